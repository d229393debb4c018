//! Headless browser access for pages guarded by an anti-bot challenge.
//!
//! # Architecture
//!
//! ```text
//! HttpFetcher (403 + challenge) → ChromeBypass → rendered page → HttpFetcher
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use dealwatch::fetcher::{BypassTransport, HttpFetcher};
//! use dealwatch::scraper::{ChromeBypass, ScraperConfig};
//!
//! let bypass = Arc::new(ChromeBypass::new(ScraperConfig::default()));
//! let fetcher = HttpFetcher::new(&config.crawler, cancel)?.with_bypass(bypass.clone());
//!
//! // On shutdown
//! bypass.shutdown().await;
//! ```

mod chrome;
mod config;

pub use chrome::ChromeBypass;
pub use config::ScraperConfig;
