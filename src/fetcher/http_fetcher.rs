use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{
    ACCEPT, ACCEPT_CHARSET, ACCEPT_LANGUAGE, CACHE_CONTROL, COOKIE, PRAGMA, SET_COOKIE,
};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::app::{DealwatchError, Result};
use crate::config::CrawlerConfig;
use crate::fetcher::bypass::is_json_not_found;
use crate::fetcher::{BypassTransport, CookieJar, FetchRequest, FetchResponse, Fetcher};

/// Interval between bypass attempts after a transport failure.
pub const BYPASS_RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// How long transport failures of the bypass are retried before giving up.
pub const BYPASS_RETRY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub struct HttpFetcher {
    client: Client,
    cookies: Option<CookieJar>,
    bypass: Option<Arc<dyn BypassTransport>>,
    challenge_marker: String,
    retry_interval: Duration,
    retry_timeout: Duration,
    cancel: CancellationToken,
}

impl HttpFetcher {
    /// Fetcher for forum pages: keeps a session cookie jar and recognizes
    /// challenge pages.
    pub fn new(config: &CrawlerConfig, cancel: CancellationToken) -> Result<Self> {
        let mut fetcher = Self::plain(&config.user_agent, config.timeout(), cancel)?;
        fetcher.cookies = Some(CookieJar::new(&config.cookie_prefixes));
        fetcher.challenge_marker = config.challenge_marker.clone();
        Ok(fetcher)
    }

    /// Stateless fetcher for third-party pages.
    pub fn plain(user_agent: &str, timeout: Duration, cancel: CancellationToken) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client,
            cookies: None,
            bypass: None,
            challenge_marker: String::new(),
            retry_interval: BYPASS_RETRY_INTERVAL,
            retry_timeout: BYPASS_RETRY_TIMEOUT,
            cancel,
        })
    }

    pub fn with_bypass(mut self, bypass: Arc<dyn BypassTransport>) -> Self {
        self.bypass = Some(bypass);
        self
    }

    pub fn with_bypass_retry(mut self, interval: Duration, timeout: Duration) -> Self {
        self.retry_interval = interval;
        self.retry_timeout = timeout;
        self
    }

    pub fn cookies(&self) -> Option<&CookieJar> {
        self.cookies.as_ref()
    }

    fn is_challenge(&self, status: u16, body: &str) -> bool {
        status == 403 && !self.challenge_marker.is_empty() && body.contains(&self.challenge_marker)
    }

    async fn cancellable<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = reqwest::Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DealwatchError::Cancelled),
            result = fut => result.map_err(DealwatchError::from),
        }
    }

    async fn fetch_bypassed(&self, bypass: &dyn BypassTransport, url: &str) -> Result<FetchResponse> {
        let started = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                return Err(DealwatchError::Cancelled);
            }

            let cookie = self.cookies.as_ref().and_then(CookieJar::header_value);
            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(DealwatchError::Cancelled),
                result = bypass.fetch(url, cookie.as_deref()) => result,
            };

            match attempt {
                Ok(response) => {
                    if is_json_not_found(&response.body) {
                        return Err(DealwatchError::RemoteNotFound(url.to_string()));
                    }
                    if let Some(jar) = &self.cookies {
                        jar.absorb_all(response.set_cookies.iter().map(String::as_str));
                    }
                    return Ok(FetchResponse::new(response.status, response.body));
                }
                Err(DealwatchError::Network(e)) => {
                    if started.elapsed() >= self.retry_timeout {
                        return Err(DealwatchError::Bypass(format!(
                            "gave up on {} after {:?}: {}",
                            url, self.retry_timeout, e
                        )));
                    }
                    debug!(url, error = %e, "bypass request failed, retrying");
                }
                Err(e) => {
                    warn!(url, error = %e, "bypass failed, resetting its session");
                    bypass.reset().await;
                    return Err(e);
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(DealwatchError::Cancelled),
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .header(ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "pt-BR,pt;q=0.9,en;q=0.8")
            .header(ACCEPT_CHARSET, "utf-8")
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache");

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(cookie) = self.cookies.as_ref().and_then(CookieJar::header_value) {
            builder = builder.header(COOKIE, cookie);
        }

        let response = self.cancellable(builder.send()).await?;
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();

        let mut fetched = FetchResponse {
            status,
            body: String::new(),
            headers,
        };
        if let Some(jar) = &self.cookies {
            jar.absorb_all(fetched.header_values(SET_COOKIE.as_str()));
        }

        fetched.body = self.cancellable(response.text()).await?;

        if self.is_challenge(status, &fetched.body) {
            if let Some(bypass) = &self.bypass {
                debug!(url = %request.url, "challenge page detected, using bypass");
                return self.fetch_bypassed(bypass.as_ref(), &request.url).await;
            }
            debug!(url = %request.url, "challenge page detected but no bypass configured");
        }

        Ok(fetched)
    }
}
