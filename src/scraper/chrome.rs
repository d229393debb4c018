use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::{DealwatchError, Result};
use crate::fetcher::bypass::bypass_error;
use crate::fetcher::{BypassResponse, BypassTransport};
use crate::scraper::config::ScraperConfig;

/// A running browser together with the task pumping its events.
struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("Browser close failed: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

/// Loads challenged pages in headless Chrome.
///
/// The browser is launched on first use and kept until [`reset`] or
/// [`shutdown`] is called; it is never left to a destructor.
///
/// [`reset`]: BypassTransport::reset
/// [`shutdown`]: BypassTransport::shutdown
pub struct ChromeBypass {
    config: ScraperConfig,
    session: Mutex<Option<BrowserSession>>,
}

impl ChromeBypass {
    pub fn new(config: ScraperConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    async fn launch(&self) -> Result<BrowserSession> {
        let mut builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-software-rasterizer");

        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(ref path) = self.config.executable {
            builder = builder.chrome_executable(path);
        }

        let browser_config = builder
            .build()
            .map_err(|e| bypass_error("Failed to build browser config", e))?;

        let (browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| {
            bypass_error(
                "Failed to launch browser (is Chrome or Chromium installed and in PATH?)",
                e,
            )
        })?;

        let handler = tokio::spawn(async move {
            while let Some(_event) = handler.next().await {}
        });

        info!("Bypass browser launched");
        Ok(BrowserSession { browser, handler })
    }

    async fn load(&self, browser: &Browser, url: &str) -> Result<BypassResponse> {
        let page = browser
            .new_page(url)
            .await
            .map_err(|e| bypass_error("Failed to create page", e))?;

        if let Some(ref ua) = self.config.user_agent {
            page.set_user_agent(ua)
                .await
                .map_err(|e| bypass_error("Failed to set user agent", e))?;
        }

        page.wait_for_navigation()
            .await
            .map_err(|e| bypass_error("Navigation failed", e))?;

        // Challenge scripts redirect after load
        tokio::time::sleep(self.config.challenge_wait).await;

        let body = page
            .content()
            .await
            .map_err(|e| bypass_error("Failed to read page content", e))?;

        let set_cookies = match page.get_cookies().await {
            Ok(cookies) => cookies
                .into_iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect(),
            Err(e) => {
                warn!("Failed to read browser cookies: {}", e);
                Vec::new()
            }
        };

        if let Err(e) = page.close().await {
            debug!("Failed to close page: {}", e);
        }

        Ok(BypassResponse {
            status: 200,
            body,
            set_cookies,
        })
    }
}

#[async_trait]
impl BypassTransport for ChromeBypass {
    async fn fetch(&self, url: &str, _cookie: Option<&str>) -> Result<BypassResponse> {
        let mut session = self.session.lock().await;
        if session.is_none() {
            *session = Some(self.launch().await?);
        }
        let browser = match session.as_ref() {
            Some(s) => &s.browser,
            None => return Err(DealwatchError::Bypass("browser unavailable".into())),
        };

        tokio::time::timeout(self.config.page_timeout, self.load(browser, url))
            .await
            .map_err(|_| {
                DealwatchError::Bypass(format!(
                    "page load exceeded {:?} for {}",
                    self.config.page_timeout, url
                ))
            })?
    }

    async fn reset(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
        }
    }

    async fn shutdown(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
            info!("Bypass browser closed");
        }
    }
}
