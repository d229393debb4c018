//! Access to the forum: listing page, thread pages and their URLs.

mod classifier;
mod lister;

pub use classifier::ThreadClassifier;
pub use lister::{parse_row_id, ThreadIds, ThreadLister};

use std::collections::HashSet;
use std::sync::Arc;

use crate::app::{DealwatchError, Result};
use crate::config::CrawlerConfig;
use crate::domain::ThreadPage;
use crate::fetcher::Fetcher;

/// URL layout of the forum.
#[derive(Debug, Clone)]
pub struct ForumUrls {
    base_url: String,
    forum_id: u32,
}

impl ForumUrls {
    pub fn new(base_url: impl Into<String>, forum_id: u32) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { base_url, forum_id }
    }

    pub fn listing_url(&self) -> String {
        format!("{}forums/{}", self.base_url, self.forum_id)
    }

    pub fn thread_url(&self, id: i64) -> String {
        format!("{}threads/{}", self.base_url, id)
    }

    /// Host name of the forum, used to tell internal links from external ones.
    pub fn host(&self) -> String {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }
}

/// Listing and classification over one forum session.
pub struct ForumClient {
    fetcher: Arc<dyn Fetcher>,
    urls: ForumUrls,
    lister: ThreadLister,
    classifier: ThreadClassifier,
}

impl ForumClient {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: &CrawlerConfig) -> Self {
        let urls = ForumUrls::new(&config.base_url, config.forum_id);
        Self {
            classifier: ThreadClassifier::new(fetcher.clone(), urls.clone()),
            lister: ThreadLister::new(&config.row_marker),
            fetcher,
            urls,
        }
    }

    pub fn urls(&self) -> &ForumUrls {
        &self.urls
    }

    /// Ids currently on the promotions listing.
    pub async fn thread_ids(&self) -> Result<HashSet<i64>> {
        let url = self.urls.listing_url();
        let response = self.fetcher.get(&url).await?;
        if response.status != 200 {
            return Err(DealwatchError::Classification {
                url,
                status: response.status,
            });
        }
        Ok(self.lister.list(&response.body).collect())
    }

    pub async fn classify(&self, id: i64) -> Result<ThreadPage> {
        self.classifier.classify(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let urls = ForumUrls::new("https://www.forum.test", 407);
        assert_eq!(urls.listing_url(), "https://www.forum.test/forums/407");
        assert_eq!(urls.thread_url(123), "https://www.forum.test/threads/123");
        assert_eq!(urls.host(), "www.forum.test");
    }
}
