//! # dealwatch
//!
//! Watches a forum's promotions section and relays every new deal thread
//! to a Telegram channel, with delivery that survives network failures and
//! restarts.
//!
//! ## Architecture
//!
//! ```text
//! CrawlScheduler → ForumClient (list, classify) → PromoExtractor
//!                → NotificationFormatter → DeliveryQueue → TelegramClient
//! ```
//!
//! - [`crawler`]: persistent-cursor polling loop (full and incremental scans)
//! - [`extractor`]: tolerant HTML scanning for title, link, image and extras
//! - [`notify`]: message formatting and the durable delivery queue
//!
//! ## Quick Start
//!
//! ```bash
//! # First run writes dealwatch.toml; fill in telegram.token and telegram.chat
//! dealwatch run
//!
//! # One cycle, then exit
//! dealwatch once
//!
//! # Inspect a thread without sending anything
//! dealwatch extract 123456
//! ```

/// Application context and error handling.
///
/// [`AppContext`](app::AppContext) builds every component from the
/// configuration and owns the shutdown token they share.
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// TOML configuration, duration parsing and validation.
pub mod config;

/// The crawl state machine and failure accounting.
pub mod crawler;

/// Foreground service hosting: PID file and signal handling.
///
/// - `dealwatch run` - Start the service
/// - `dealwatch stop` - Stop it
/// - `dealwatch status` - Check if it is running
pub mod daemon;

/// Core domain models.
///
/// - [`PromoRecord`](domain::PromoRecord): what was extracted from a thread
/// - [`ThreadPage`](domain::ThreadPage): classification of a thread fetch
/// - [`OutboundMessage`](domain::OutboundMessage): a unit of delivery
pub mod domain;

/// Turns thread pages into promo records.
pub mod extractor;

/// HTTP fetching with a session cookie jar and challenge bypass.
///
/// - [`Fetcher`](fetcher::Fetcher): async trait for page fetching
/// - [`HttpFetcher`](fetcher::HttpFetcher): reqwest-based implementation
/// - [`BypassTransport`](fetcher::BypassTransport): secondary transport for challenge pages
pub mod fetcher;

/// Forum URLs, listing parsing and thread classification.
pub mod forum;

/// Notification formatting, the Telegram client and the delivery queue.
pub mod notify;

/// Headless-browser bypass transport built on chromiumoxide.
pub mod scraper;

/// File-backed crawl cursor and queue directory.
pub mod store;
