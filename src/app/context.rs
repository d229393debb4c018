use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::error::Result;
use crate::config::{BypassConfig, Config};
use crate::crawler::CrawlScheduler;
use crate::extractor::PromoExtractor;
use crate::fetcher::{BypassTransport, Fetcher, HttpFetcher, ProxyBypass};
use crate::forum::ForumClient;
use crate::notify::{DeliveryQueue, MessageSender, TelegramClient};
use crate::scraper::ChromeBypass;

/// Everything built from the configuration, sharing one shutdown token.
pub struct AppContext {
    pub config: Config,
    pub cancel: CancellationToken,
    pub forum_fetcher: Arc<dyn Fetcher>,
    /// Fetcher for third-party pages, without forum cookies.
    pub page_fetcher: Arc<dyn Fetcher>,
    pub bypass: Option<Arc<dyn BypassTransport>>,
    pub sender: Arc<dyn MessageSender>,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let cancel = CancellationToken::new();
        let crawler = &config.crawler;

        let bypass: Option<Arc<dyn BypassTransport>> = match &config.bypass {
            Some(BypassConfig::Proxy(proxy)) => {
                info!(address = %proxy.address, "challenge bypass through proxy");
                Some(Arc::new(ProxyBypass::new(proxy, &crawler.user_agent)?))
            }
            Some(BypassConfig::Browser(scraper)) => {
                info!(headless = scraper.headless, "challenge bypass through headless browser");
                Some(Arc::new(ChromeBypass::new(scraper.clone())))
            }
            None => None,
        };

        let mut forum_fetcher = HttpFetcher::new(crawler, cancel.clone())?;
        if let Some(bypass) = &bypass {
            forum_fetcher = forum_fetcher.with_bypass(bypass.clone());
        }
        let page_fetcher = HttpFetcher::plain(&crawler.user_agent, crawler.timeout(), cancel.clone())?;
        let sender = TelegramClient::new(&config.telegram, cancel.clone())?;

        Ok(Self {
            forum_fetcher: Arc::new(forum_fetcher),
            page_fetcher: Arc::new(page_fetcher),
            sender: Arc::new(sender),
            bypass,
            cancel,
            config,
        })
    }

    pub fn forum(&self) -> ForumClient {
        ForumClient::new(self.forum_fetcher.clone(), &self.config.crawler)
    }

    pub fn extractor(&self) -> PromoExtractor {
        PromoExtractor::new(self.page_fetcher.clone(), self.forum().urls().host())
    }

    /// Open the delivery queue, reloading whatever a previous run left behind.
    pub fn open_queue(&self) -> Result<DeliveryQueue> {
        DeliveryQueue::open(&self.config.telegram, self.sender.clone(), &self.cancel)
    }

    pub fn scheduler(&self, queue: DeliveryQueue) -> CrawlScheduler {
        CrawlScheduler::new(
            &self.config.crawler,
            self.forum(),
            self.extractor(),
            queue,
            self.cancel.clone(),
        )
    }

    /// Cancel outstanding work and release the bypass transport.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(bypass) = &self.bypass {
            bypass.shutdown().await;
        }
    }
}
