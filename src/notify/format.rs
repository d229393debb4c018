use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::domain::{OutboundMessage, ParseMode, PromoRecord};

/// Visible length limit of a text message.
pub const MAX_TEXT_LEN: usize = 4096;
/// Visible length limit of a photo caption.
pub const MAX_CAPTION_LEN: usize = 1024;

/// A run of visible text wrapped in (already escaped) markup.
struct Segment {
    open: String,
    text: String,
    close: &'static str,
}

impl Segment {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            open: String::new(),
            text: text.into(),
            close: "",
        }
    }

    fn link(href: &str, text: impl Into<String>) -> Self {
        Self {
            open: format!("<a href=\"{}\">", encode_double_quoted_attribute(href)),
            text: text.into(),
            close: "</a>",
        }
    }
}

/// Length as counted by the messaging API (UTF-16 code units).
fn visible_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Builds the HTML notification for a promo record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationFormatter;

impl NotificationFormatter {
    pub fn new() -> Self {
        Self
    }

    /// A photo message when the record has an image, text otherwise.
    pub fn format(&self, record: &PromoRecord) -> OutboundMessage {
        match &record.image {
            Some(image) => OutboundMessage::photo(
                image.clone(),
                Some(self.render(record, MAX_CAPTION_LEN)),
                ParseMode::Html,
            ),
            None => OutboundMessage::text(self.render(record, MAX_TEXT_LEN), ParseMode::Html),
        }
    }

    /// HTML body whose visible text is at most `limit` long.
    pub fn render(&self, record: &PromoRecord, limit: usize) -> String {
        let title = if record.title.trim().is_empty() {
            record.url.clone()
        } else {
            record.title.clone()
        };

        let mut segments = vec![Segment::link(&record.url, title)];
        if let Some(link) = &record.link {
            segments.push(Segment::plain("\n\n"));
            segments.push(Segment::link(link, "LINK"));
        }
        if let Some(extra) = &record.extra {
            segments.push(Segment::plain("\n\n"));
            segments.push(Segment::plain(extra.clone()));
        }

        truncate(&mut segments, limit);

        segments
            .iter()
            .map(|s| format!("{}{}{}", s.open, encode_text(&s.text), s.close))
            .collect()
    }
}

/// Drop visible characters from the end until the total fits in `limit`.
/// Segments that become empty are removed along with their markup.
fn truncate(segments: &mut Vec<Segment>, limit: usize) {
    let mut total: usize = segments.iter().map(|s| visible_len(&s.text)).sum();

    while total > limit {
        let Some(last) = segments.last_mut() else {
            return;
        };
        match last.text.pop() {
            Some(c) => total -= c.len_utf16(),
            None => {
                segments.pop();
            }
        }
        if segments.last().is_some_and(|s| s.text.is_empty()) {
            segments.pop();
        }
    }

    if let Some(last) = segments.last_mut() {
        let trimmed = last.text.trim_end().len();
        last.text.truncate(trimmed);
    }
    while segments.last().is_some_and(|s| s.text.is_empty()) {
        segments.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PromoRecord {
        PromoRecord::new(7, "https://forum.test/threads/7", "Fone & Cabo <novo>")
    }

    #[test]
    fn test_title_only() {
        let text = NotificationFormatter::new().render(&record(), MAX_TEXT_LEN);
        assert_eq!(
            text,
            "<a href=\"https://forum.test/threads/7\">Fone &amp; Cabo &lt;novo&gt;</a>"
        );
    }

    #[test]
    fn test_full_layout() {
        let record = record()
            .with_link("https://shop.test/item?a=1&b=\"2\"")
            .with_extra("Preço: R$ 10");

        let text = NotificationFormatter::new().render(&record, MAX_TEXT_LEN);
        assert_eq!(
            text,
            concat!(
                "<a href=\"https://forum.test/threads/7\">Fone &amp; Cabo &lt;novo&gt;</a>",
                "\n\n<a href=\"https://shop.test/item?a=1&amp;b=&quot;2&quot;\">LINK</a>",
                "\n\nPreço: R$ 10"
            )
        );
    }

    #[test]
    fn test_empty_title_falls_back_to_url() {
        let record = PromoRecord::new(1, "https://forum.test/threads/1", "  ");
        let text = NotificationFormatter::new().render(&record, MAX_TEXT_LEN);
        assert!(text.ends_with(">https://forum.test/threads/1</a>"));
    }

    #[test]
    fn test_visible_text_is_capped_without_breaking_markup() {
        let record = record()
            .with_link("https://shop.test/item")
            .with_extra("x".repeat(5000));

        let text = NotificationFormatter::new().render(&record, MAX_TEXT_LEN);
        let visible = "Fone & Cabo <novo>".len() + 2 + "LINK".len() + 2;
        assert!(text.ends_with(&"x".repeat(MAX_TEXT_LEN - visible)));
        assert!(!text.ends_with(&"x".repeat(MAX_TEXT_LEN - visible + 1)));
        assert!(text.contains(">LINK</a>"));
    }

    #[test]
    fn test_overflowing_title_keeps_closing_tag() {
        let record = PromoRecord::new(1, "https://forum.test/threads/1", "é".repeat(2000))
            .with_link("https://shop.test/item");

        let text = NotificationFormatter::new().render(&record, 1024 - 1000);
        assert_eq!(
            text,
            format!("<a href=\"https://forum.test/threads/1\">{}</a>", "é".repeat(24))
        );
    }

    #[test]
    fn test_message_kind_follows_image() {
        let formatter = NotificationFormatter::new();

        let text = formatter.format(&record());
        assert!(!text.is_photo());

        let photo = formatter.format(&record().with_image("https://img.test/p.jpg"));
        match photo {
            OutboundMessage::Photo(m) => {
                assert_eq!(m.photo, "https://img.test/p.jpg");
                assert_eq!(m.parse_mode, ParseMode::Html);
                assert!(m.caption.unwrap().starts_with("<a href="));
            }
            other => panic!("expected photo, got {:?}", other),
        }
    }
}
