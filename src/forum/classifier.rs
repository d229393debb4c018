use std::sync::Arc;

use tracing::debug;

use crate::app::{DealwatchError, Result};
use crate::domain::{ThreadPage, ThreadStatus};
use crate::fetcher::Fetcher;
use crate::forum::ForumUrls;

/// Fetches one thread and decides whether it is public, private or missing.
pub struct ThreadClassifier {
    fetcher: Arc<dyn Fetcher>,
    urls: ForumUrls,
}

impl ThreadClassifier {
    pub fn new(fetcher: Arc<dyn Fetcher>, urls: ForumUrls) -> Self {
        Self { fetcher, urls }
    }

    pub async fn classify(&self, id: i64) -> Result<ThreadPage> {
        let url = self.urls.thread_url(id);

        let response = match self.fetcher.get(&url).await {
            Ok(response) => response,
            Err(DealwatchError::RemoteNotFound(_)) => {
                debug!(id, "bypass reported thread as not found");
                return Ok(ThreadPage::NotFound);
            }
            Err(e) => return Err(e),
        };

        let page = match ThreadStatus::from_http(&url, response.status)? {
            ThreadStatus::Public if response.body.is_empty() => ThreadPage::Private,
            ThreadStatus::Public => ThreadPage::Public {
                body: response.body,
            },
            ThreadStatus::Private => ThreadPage::Private,
            ThreadStatus::NotFound => ThreadPage::NotFound,
        };

        debug!(id, status = %page.status(), "classified thread");
        Ok(page)
    }
}
