use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Client, Proxy};
use tracing::debug;

use crate::app::{DealwatchError, Result};
use crate::config::ProxyConfig;

/// Page obtained through a bypass transport.
#[derive(Debug, Clone, Default)]
pub struct BypassResponse {
    pub status: u16,
    pub body: String,
    /// Raw `Set-Cookie` values observed while loading the page
    pub set_cookies: Vec<String>,
}

/// Alternate way of loading a page that the forum answered with a challenge.
///
/// Transport-level failures must surface as [`DealwatchError::Network`] so
/// the caller can retry them; anything else is treated as a broken session.
#[async_trait]
pub trait BypassTransport: Send + Sync {
    async fn fetch(&self, url: &str, cookie: Option<&str>) -> Result<BypassResponse>;

    /// Forget any cached session so the next fetch starts fresh.
    async fn reset(&self) {}

    /// Release everything the transport holds.
    async fn shutdown(&self) {}
}

/// Sends challenged requests through an authenticating HTTP proxy.
pub struct ProxyBypass {
    client: Client,
}

impl ProxyBypass {
    pub fn new(config: &ProxyConfig, user_agent: &str) -> Result<Self> {
        let mut proxy = Proxy::all(config.address.as_str())?;
        if let Some(user) = &config.user {
            proxy = proxy.basic_auth(user, config.password.as_deref().unwrap_or(""));
        }

        let client = Client::builder()
            .proxy(proxy)
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl BypassTransport for ProxyBypass {
    async fn fetch(&self, url: &str, cookie: Option<&str>) -> Result<BypassResponse> {
        let mut request = self.client.get(url);
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(String::from)
            .collect();
        let body = response.text().await?;

        debug!(url, status, "fetched through proxy bypass");

        Ok(BypassResponse {
            status,
            body,
            set_cookies,
        })
    }
}

/// True when a bypass body is a JSON object reporting a 404.
pub fn is_json_not_found(body: &str) -> bool {
    if !body.starts_with('{') {
        return false;
    }
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("status").and_then(|s| s.as_i64()))
        == Some(404)
}

pub(crate) fn bypass_error(context: &str, e: impl std::fmt::Display) -> DealwatchError {
    DealwatchError::Bypass(format!("{}: {}", context, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_not_found_detection() {
        assert!(is_json_not_found(r#"{"status":404,"message":"gone"}"#));
        assert!(!is_json_not_found(r#"{"status":200}"#));
        assert!(!is_json_not_found(r#"{"status":"404"}"#));
        assert!(!is_json_not_found("<html>{\"status\":404}</html>"));
        assert!(!is_json_not_found("{not json"));
    }
}
