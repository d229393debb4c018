//! Turns a public thread page into a [`PromoRecord`].
//!
//! # Pipeline
//!
//! ```text
//! <title> → content div → link / image → description fallback → image probe
//! ```
//!
//! Parsing never fails loudly: only a page without a `<title>` pair yields
//! `None`. A missing content div or a failed probe of the external link
//! just leaves fields unset.

mod image_probe;
pub mod markup;

pub use image_probe::{find_page_image, probe_image};

use std::sync::Arc;

use crate::domain::PromoRecord;
use crate::fetcher::Fetcher;
use markup::{attr, between_ci, content_div, is_full_url, is_image_url, is_server_url, tags};

/// Description keys that never carry deal details.
const EXTRA_STOPWORDS: &[&str] = &["info", "http", "https", "link", "site"];

pub struct PromoExtractor {
    fetcher: Arc<dyn Fetcher>,
    forum_host: String,
}

impl PromoExtractor {
    /// `fetcher` is used for the external link only and should not carry
    /// forum cookies.
    pub fn new(fetcher: Arc<dyn Fetcher>, forum_host: impl Into<String>) -> Self {
        Self {
            fetcher,
            forum_host: forum_host.into(),
        }
    }

    /// Parse the page and, when it has a link but no image, look for an
    /// image on the linked page.
    pub async fn extract(&self, html: &str, id: i64, url: &str) -> Option<PromoRecord> {
        let mut record = self.parse(html, id, url)?;

        if record.image.is_none() {
            if let Some(link) = record.link.as_deref() {
                record.image = probe_image(self.fetcher.as_ref(), link).await;
            }
        }

        Some(record)
    }

    /// The network-free part of [`extract`](Self::extract).
    pub fn parse(&self, html: &str, id: i64, url: &str) -> Option<PromoRecord> {
        let title = html_escape::decode_html_entities(between_ci(html, "<title>", "</title>")?)
            .trim()
            .to_string();
        let mut record = PromoRecord::new(id, url, title);

        if let Some(content) = content_div(html) {
            record.link = tags(content, "a")
                .filter_map(|(_, tag)| attr(tag, "href"))
                .find(|href| self.is_external_link(href));

            record.image = tags(content, "img")
                .filter_map(|(_, tag)| attr(tag, "src"))
                .find(|src| is_full_url(src) && is_image_url(src));
        }

        if let Some(description) = meta_description(html) {
            for token in description.split_whitespace() {
                if record.link.is_some() && record.image.is_some() {
                    break;
                }
                if !is_full_url(token) {
                    continue;
                }
                if is_image_url(token) {
                    if record.image.is_none() {
                        record.image = Some(token.to_string());
                    }
                } else if record.link.is_none() && !is_server_url(token, &self.forum_host) {
                    record.link = Some(token.to_string());
                }
            }
            record.extra = extra_lines(&description);
        }

        Some(record)
    }

    fn is_external_link(&self, href: &str) -> bool {
        is_full_url(href) && !is_image_url(href) && !is_server_url(href, &self.forum_host)
    }
}

/// Decoded `content` of `<meta name="description">`.
pub fn meta_description(html: &str) -> Option<String> {
    tags(html, "meta").find_map(|(_, tag)| {
        attr(tag, "name")
            .filter(|name| name.eq_ignore_ascii_case("description"))
            .and_then(|_| attr(tag, "content"))
    })
}

/// `key: value` or `key = value` lines of a description, joined by newlines.
pub fn extra_lines(description: &str) -> Option<String> {
    let lines: Vec<&str> = description
        .lines()
        .filter(|line| {
            let Some(sep) = line.find(':').or_else(|| line.find('=')) else {
                return false;
            };
            if sep == 0 || sep + 1 >= line.len() {
                return false;
            }
            let key = line[..sep].trim();
            !key.is_empty()
                && !EXTRA_STOPWORDS.iter().any(|w| key.eq_ignore_ascii_case(w))
                && !line[sep + 1..].trim().is_empty()
        })
        .map(str::trim)
        .collect();

    (!lines.is_empty()).then(|| lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::app::{DealwatchError, Result};
    use crate::fetcher::{FetchRequest, FetchResponse};

    const FORUM_HOST: &str = "www.forum.test";
    const THREAD_URL: &str = "https://www.forum.test/showthread.php?t=77";

    struct NoNetwork;

    #[async_trait]
    impl Fetcher for NoNetwork {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
            Err(DealwatchError::Other(format!("no network for {}", request.url)))
        }
    }

    struct ProductPage;

    #[async_trait]
    impl Fetcher for ProductPage {
        async fn fetch(&self, _request: FetchRequest) -> Result<FetchResponse> {
            Ok(FetchResponse::new(
                200,
                r#"<meta property="og:image" content="https://cdn.shop.test/p.jpg">"#,
            ))
        }
    }

    fn extractor() -> PromoExtractor {
        PromoExtractor::new(Arc::new(NoNetwork), FORUM_HOST)
    }

    #[test]
    fn test_basic_thread() {
        let html = concat!(
            "<html><head><title>Offer X</title></head><body>",
            "<div class=\"postcontent\">",
            "<a href=\"https://www.forum.test/member.php?u=1\">me</a>",
            "<a href=\"https://cdn.test/banner.png\">banner</a>",
            "<a href=\"https://shop.example/item\">buy</a>",
            "<img src=\"/smilies/smile.gif\" />",
            "<img src=\"https://cdn.example/a.jpg\" />",
            "</div></body></html>"
        );

        let record = extractor().parse(html, 77, THREAD_URL).unwrap();

        assert_eq!(record.title, "Offer X");
        assert_eq!(record.url, THREAD_URL);
        assert_eq!(record.link.as_deref(), Some("https://shop.example/item"));
        assert_eq!(record.image.as_deref(), Some("https://cdn.example/a.jpg"));
        assert_eq!(record.extra, None);
    }

    #[test]
    fn test_title_is_trimmed_and_decoded() {
        let html = "<title>\n  Fone &amp; Cabo  </title><div class=content>x</div>";
        let record = extractor().parse(html, 1, THREAD_URL).unwrap();
        assert_eq!(record.title, "Fone & Cabo");
    }

    #[test]
    fn test_missing_title_is_none() {
        assert!(extractor().parse("<div class=content>x</div>", 1, THREAD_URL).is_none());
        assert!(extractor().parse("<title>never closed", 1, THREAD_URL).is_none());
    }

    #[test]
    fn test_missing_content_div_still_yields_record() {
        let html = "<title>T</title><div class=post><a href=\"https://s.test/x\">x</a></div>";
        let record = extractor().parse(html, 1, THREAD_URL).unwrap();
        assert_eq!(record.title, "T");
        assert_eq!(record.link, None);
        assert_eq!(record.image, None);
    }

    #[test]
    fn test_links_outside_content_are_ignored() {
        let html = concat!(
            "<title>T</title>",
            "<a href=\"https://outside.test/x\">x</a>",
            "<div class=\"content\">no links</div>",
            "<a href=\"https://after.test/y\">y</a>"
        );
        let record = extractor().parse(html, 1, THREAD_URL).unwrap();
        assert_eq!(record.link, None);
    }

    #[test]
    fn test_description_fills_missing_link_and_image_and_extra() {
        let html = r#"<html><head><title>Deal</title>
<meta name="description" content="https://www.forum.test/self https://shop.test/deal https://img.test/p.png
Preço: R$ 10
Cupom = SAVE10
Link: https://shop.test/deal
Site: shop
http://nope.test
empty:
:leading" />
</head><div class="content">text only</div></html>"#;

        let record = extractor().parse(html, 9, THREAD_URL).unwrap();

        assert_eq!(record.link.as_deref(), Some("https://shop.test/deal"));
        assert_eq!(record.image.as_deref(), Some("https://img.test/p.png"));
        assert_eq!(record.extra.as_deref(), Some("Preço: R$ 10\nCupom = SAVE10"));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let html = "<title>A</title><div class=content><a href='https://s.test/1'>x</a></div>";
        let ex = extractor();
        assert_eq!(ex.parse(html, 3, THREAD_URL), ex.parse(html, 3, THREAD_URL));
    }

    #[test]
    fn test_extra_lines() {
        assert_eq!(extra_lines("no separators here"), None);
        assert_eq!(extra_lines("INFO: skipped\nHTTPS: skipped"), None);
        assert_eq!(
            extra_lines("  Frete: grátis  \nParcelas=12x"),
            Some("Frete: grátis\nParcelas=12x".to_string())
        );
    }

    #[tokio::test]
    async fn test_extract_probes_link_for_image() {
        let html = "<title>A</title><div class=content><a href=\"https://shop.test/p\">p</a></div>";
        let ex = PromoExtractor::new(Arc::new(ProductPage), FORUM_HOST);

        let record = ex.extract(html, 5, THREAD_URL).await.unwrap();
        assert_eq!(record.image.as_deref(), Some("https://cdn.shop.test/p.jpg"));
    }

    #[tokio::test]
    async fn test_extract_survives_probe_failure() {
        let html = "<title>A</title><div class=content><a href=\"https://shop.test/p?x=1\">p</a></div>";

        let record = extractor().extract(html, 5, THREAD_URL).await.unwrap();
        assert_eq!(record.link.as_deref(), Some("https://shop.test/p?x=1"));
        assert_eq!(record.image, None);
    }
}
