//! Finds a representative image on an external product page.

use tracing::debug;
use url::Url;

use crate::extractor::markup::{attr, find_ci, is_full_url, is_image_url, tags};
use crate::fetcher::Fetcher;

const IMAGE_META_KEYS: &[&str] = &["og:image", "twitter:image"];

/// Fetch `link` and look for its preview image.
///
/// A failed fetch is retried once without the query string. Every failure
/// ends in `None`.
pub async fn probe_image(fetcher: &dyn Fetcher, link: &str) -> Option<String> {
    if let Some(body) = fetch_page(fetcher, link).await {
        return find_page_image(&body, link);
    }

    let stripped = strip_query(link)?;
    debug!(link, retry = stripped, "retrying image probe without query");
    let body = fetch_page(fetcher, stripped).await?;
    find_page_image(&body, stripped)
}

async fn fetch_page(fetcher: &dyn Fetcher, url: &str) -> Option<String> {
    match fetcher.get(url).await {
        Ok(response) if response.is_success() => Some(response.body),
        Ok(response) => {
            debug!(url, status = response.status, "image probe got non-success status");
            None
        }
        Err(e) => {
            debug!(url, error = %e, "image probe fetch failed");
            None
        }
    }
}

fn strip_query(url: &str) -> Option<&str> {
    url.find('?').map(|i| &url[..i])
}

/// Resolve a possibly relative URL against the page it was found on.
fn resolve(base: &str, value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if is_full_url(value) {
        return Some(value.to_string());
    }
    let joined = Url::parse(base).ok()?.join(value).ok()?;
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}

/// Preview image of a page: meta tags first, then image preloads, then
/// image URLs embedded in scripts.
pub fn find_page_image(html: &str, page_url: &str) -> Option<String> {
    meta_image(html, page_url)
        .or_else(|| preload_image(html, page_url))
        .or_else(|| script_image(html))
}

fn meta_image(html: &str, page_url: &str) -> Option<String> {
    tags(html, "meta").find_map(|(_, tag)| {
        let key = attr(tag, "property").or_else(|| attr(tag, "name"))?;
        if !IMAGE_META_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k)) {
            return None;
        }
        resolve(page_url, &attr(tag, "content")?)
    })
}

fn preload_image(html: &str, page_url: &str) -> Option<String> {
    tags(html, "link").find_map(|(_, tag)| {
        if !attr(tag, "as")?.eq_ignore_ascii_case("image") {
            return None;
        }
        resolve(page_url, &attr(tag, "href")?)
    })
}

fn script_image(html: &str) -> Option<String> {
    tags(html, "script").find_map(|(start, tag)| {
        let body_start = start + tag.len();
        let body_end = find_ci(html, "</script", body_start).unwrap_or(html.len());
        quoted_urls(&html[body_start..body_end]).find(|u| is_image_url(u))
    })
}

/// Double-quoted `"http..."` literals in script text, with JSON-escaped
/// slashes undone.
fn quoted_urls(script: &str) -> impl Iterator<Item = String> + '_ {
    let mut pos = 0;
    std::iter::from_fn(move || loop {
        let start = find_ci(script, "\"http", pos)? + 1;
        let end = script[start..].find('"').map(|i| start + i)?;
        pos = end + 1;
        let candidate = script[start..end].replace("\\/", "/");
        if is_full_url(&candidate) {
            return Some(candidate);
        }
    })
}
