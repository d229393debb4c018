//! Tolerant scanning helpers for forum HTML.
//!
//! Forum pages are rarely well-formed, so nothing here builds a DOM. All
//! searches are ASCII case-insensitive and work on byte offsets that always
//! land on ASCII characters, so slicing with them is safe.

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp", ".gif", ".bmp"];

/// Byte offset of the first case-insensitive match of `needle` at or after `from`.
pub fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let pat = needle.as_bytes();
    if pat.is_empty() || from >= hay.len() || pat.len() > hay.len() - from {
        return None;
    }
    (from..=hay.len() - pat.len()).find(|&i| hay[i..i + pat.len()].eq_ignore_ascii_case(pat))
}

/// Text between the first `open` and the following `close`.
pub fn between_ci<'a>(haystack: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = find_ci(haystack, open, 0)? + open.len();
    let end = find_ci(haystack, close, start)?;
    Some(&haystack[start..end])
}

fn is_name_boundary(input: &str, index: usize) -> bool {
    match input.as_bytes().get(index) {
        None => true,
        Some(b) => b.is_ascii_whitespace() || *b == b'>' || *b == b'/',
    }
}

/// Offset of the `>` that closes the tag starting at `start`.
///
/// Quoted attribute values may contain `>`.
pub fn tag_end(input: &str, start: usize) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut quote: Option<u8> = None;
    let mut prev = 0u8;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => {
                if b == b'>' {
                    return Some(i);
                }
                if (b == b'"' || b == b'\'') && prev == b'=' {
                    quote = Some(b);
                }
            }
        }
        if !b.is_ascii_whitespace() {
            prev = b;
        }
    }
    None
}

/// Iterator over every `<name ...>` tag in a document, yielding the full tag text.
pub struct Tags<'a> {
    input: &'a str,
    open: String,
    pos: usize,
}

impl<'a> Iterator for Tags<'a> {
    type Item = (usize, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = find_ci(self.input, &self.open, self.pos)?;
            let after_name = start + self.open.len();
            if !is_name_boundary(self.input, after_name) {
                self.pos = after_name;
                continue;
            }
            let end = tag_end(self.input, after_name)?;
            self.pos = end + 1;
            return Some((start, &self.input[start..=end]));
        }
    }
}

/// All opening tags named `name`, with their byte offsets.
pub fn tags<'a>(input: &'a str, name: &str) -> Tags<'a> {
    tags_from(input, name, 0)
}

/// Like [`tags`], starting the search at byte offset `from`.
pub fn tags_from<'a>(input: &'a str, name: &str, from: usize) -> Tags<'a> {
    Tags {
        input,
        open: format!("<{}", name),
        pos: from,
    }
}

/// Parse the attributes of a tag into lowercased names and decoded values.
///
/// Accepts double-quoted, single-quoted, unquoted and valueless attributes.
pub fn tag_attributes(tag: &str) -> Vec<(String, String)> {
    let bytes = tag.as_bytes();
    let len = bytes.len();
    let mut attrs = Vec::new();

    let mut i = usize::from(bytes.first() == Some(&b'<'));
    while i < len && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' && bytes[i] != b'/' {
        i += 1;
    }

    loop {
        while i < len && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        if i >= len || bytes[i] == b'>' {
            break;
        }

        let name_start = i;
        while i < len
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'>' | b'/')
        {
            i += 1;
        }
        let name = tag[name_start..i].to_ascii_lowercase();

        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        let mut value = "";
        if i < len && bytes[i] == b'=' {
            i += 1;
            while i < len && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i < len && (bytes[i] == b'"' || bytes[i] == b'\'') {
                let quote = bytes[i];
                let value_start = i + 1;
                i = value_start;
                while i < len && bytes[i] != quote {
                    i += 1;
                }
                value = &tag[value_start..i];
                i = (i + 1).min(len);
            } else {
                let value_start = i;
                while i < len && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                    i += 1;
                }
                value = &tag[value_start..i];
            }
        }

        if name.is_empty() {
            i += 1;
            continue;
        }
        attrs.push((name, html_escape::decode_html_entities(value).into_owned()));
    }

    attrs
}

/// First value of attribute `name` in a tag.
pub fn attr(tag: &str, name: &str) -> Option<String> {
    tag_attributes(tag)
        .into_iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

/// End offset (exclusive) of the `<div>` whose opening tag ends just before `from`.
///
/// Nested divs are balanced; an unterminated div runs to the end of input.
pub fn balanced_div_end(input: &str, from: usize) -> usize {
    let mut depth = 1usize;
    let mut pos = from;

    loop {
        let close = loop {
            match find_ci(input, "</div", pos) {
                Some(i) if is_name_boundary(input, i + 5) => break Some(i),
                Some(i) => pos = i + 5,
                None => break None,
            }
        };
        let Some(close) = close else {
            return input.len();
        };

        let open = tags_from(&input[..close], "div", pos)
            .next()
            .map(|(start, tag)| start + tag.len());

        match open {
            Some(open_end) => {
                depth += 1;
                pos = open_end;
            }
            None => {
                depth -= 1;
                let close_end = tag_end(input, close).map_or(input.len(), |e| e + 1);
                if depth == 0 {
                    return close_end;
                }
                pos = close_end;
            }
        }
    }
}

/// The first `<div>` whose class contains "content", including its closing tag.
pub fn content_div(html: &str) -> Option<&str> {
    let (start, tag) = tags(html, "div").find(|(_, tag)| {
        attr(tag, "class").is_some_and(|class| class.to_ascii_lowercase().contains("content"))
    })?;
    let end = balanced_div_end(html, start + tag.len());
    Some(&html[start..end])
}

/// Absolute http(s) URL with something after the scheme.
pub fn is_full_url(url: &str) -> bool {
    let url = url.trim();
    ["http://", "https://"].iter().any(|scheme| {
        url.len() > scheme.len()
            && url.as_bytes()[..scheme.len()].eq_ignore_ascii_case(scheme.as_bytes())
    })
}

/// Whether the path of `url` ends with a known image extension.
pub fn is_image_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Whether `url` points at `host` itself.
pub fn is_server_url(url: &str, host: &str) -> bool {
    let Some((_, rest)) = url.split_once("://") else {
        return false;
    };
    let Some(prefix) = rest.as_bytes().get(..host.len()) else {
        return false;
    };
    prefix.eq_ignore_ascii_case(host.as_bytes())
        && matches!(rest.as_bytes().get(host.len()), None | Some(b'/' | b':' | b'?' | b'#'))
}
