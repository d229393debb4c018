use serde::{Deserialize, Serialize};

/// Structured result of scraping one promotion thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoRecord {
    pub id: i64,
    /// Canonical thread URL on the forum.
    pub url: String,
    pub title: String,
    /// First external link found in the post body.
    pub link: Option<String>,
    pub image: Option<String>,
    /// `key: value` lines lifted from the page description.
    pub extra: Option<String>,
}

impl PromoRecord {
    pub fn new(id: i64, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            title: title.into(),
            link: None,
            image: None,
            extra: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }
}
