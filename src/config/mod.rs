//! Configuration management for dealwatch.
//!
//! Configuration is read from a TOML file (`dealwatch.toml` by default).
//! If the file doesn't exist, a default configuration with comments is
//! written next to it and startup stops until the bot token and chat id
//! are filled in.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::app::DealwatchError;
use crate::scraper::ScraperConfig;

pub const DEFAULT_CONFIG_FILE: &str = "dealwatch.toml";

/// Shortest accepted poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Longest accepted poll interval (one week).
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(7 * 86400);

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub telegram: TelegramConfig,
    /// Alternate transport used when the forum answers with a challenge page.
    pub bypass: Option<BypassConfig>,
}

/// Forum crawling options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Forum root, with trailing slash
    pub base_url: String,
    /// Id of the promotions sub-forum
    pub forum_id: u32,
    #[serde(deserialize_with = "deserialize_interval")]
    pub poll_interval: Duration,
    #[serde(deserialize_with = "deserialize_interval")]
    pub full_scan_interval: Duration,
    /// Consecutive failures tolerated before the chat is alerted; negative disables alerts
    pub tries_before_log: i64,
    pub state_file: PathBuf,
    /// Start of a thread row in the listing page
    pub row_marker: String,
    /// Text that identifies an anti-bot challenge page
    pub challenge_marker: String,
    /// Cookie name prefixes kept in the session jar
    pub cookie_prefixes: Vec<String>,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.hardmob.com.br/".to_string(),
            forum_id: 407,
            poll_interval: Duration::from_secs(15),
            full_scan_interval: Duration::from_secs(3600),
            tries_before_log: 60,
            state_file: PathBuf::from("state.json"),
            row_marker: "<li class=\"threadbit".to_string(),
            challenge_marker: "history.replaceState".to_string(),
            cookie_prefixes: vec!["bb".to_string(), "cf".to_string()],
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            timeout_secs: 30,
        }
    }
}

impl CrawlerConfig {
    /// Poll interval clamped to the accepted range.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Messaging channel options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub token: String,
    pub chat: i64,
    pub queue_dir: PathBuf,
    pub api_url: String,
    #[serde(deserialize_with = "deserialize_interval")]
    pub retry_interval: Duration,
    /// Failed attempts after which a photo is resent as text
    pub photo_tries: u32,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            chat: 0,
            queue_dir: PathBuf::from("telegram-queue"),
            api_url: "https://api.telegram.org/".to_string(),
            retry_interval: Duration::from_secs(5),
            photo_tries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BypassConfig {
    /// Route challenged requests through an authenticating proxy.
    Proxy(ProxyConfig),
    /// Render challenged pages in a headless browser.
    Browser(ScraperConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub address: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_proxy_timeout")]
    pub timeout_secs: u64,
}

fn default_proxy_timeout() -> u64 {
    60
}

impl Config {
    /// Load, resolve and validate the configuration at `path`.
    ///
    /// Relative paths inside the file are resolved against its directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            Self::create_default_config(path)?;
            return Err(ConfigError::CreatedDefault {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base_dir);
        config.validate()?;

        Ok(config)
    }

    /// Make relative file locations absolute under `base_dir`.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        if self.crawler.state_file.is_relative() {
            self.crawler.state_file = base_dir.join(&self.crawler.state_file);
        }
        if self.telegram.queue_dir.is_relative() {
            self.telegram.queue_dir = base_dir.join(&self.telegram.queue_dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.token.trim().is_empty() {
            return Err(ConfigError::Missing("telegram.token"));
        }
        if self.telegram.chat == 0 {
            return Err(ConfigError::Missing("telegram.chat"));
        }

        let base = url::Url::parse(&self.crawler.base_url)
            .map_err(|e| ConfigError::Invalid(format!("crawler.base_url: {}", e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "crawler.base_url must be http(s), got {}",
                base.scheme()
            )));
        }

        if let Some(BypassConfig::Proxy(proxy)) = &self.bypass {
            if proxy.address.trim().is_empty() {
                return Err(ConfigError::Missing("bypass.address"));
            }
        }

        Ok(())
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    pub fn default_config_content() -> String {
        r##"# dealwatch configuration
#
# Intervals accept "500ms", "15s", "30m", "1h", "1d" or a bare number of seconds.

[crawler]
# Forum root and promotions sub-forum
base_url = "https://www.hardmob.com.br/"
forum_id = 407

# Wait between crawl cycles (clamped to 1ms..7d)
poll_interval = "15s"

# Rescan the whole listing when nothing new was seen for this long
full_scan_interval = "1h"

# Consecutive failures before the chat is alerted (negative disables)
tries_before_log = 60

# Cursor file, relative to this file
state_file = "state.json"

row_marker = "<li class=\"threadbit"
challenge_marker = "history.replaceState"
cookie_prefixes = ["bb", "cf"]
timeout_secs = 30

[telegram]
# Bot token and destination chat (required)
token = ""
chat = 0

# Pending messages survive restarts here
queue_dir = "telegram-queue"
api_url = "https://api.telegram.org/"
retry_interval = "5s"

# Failed attempts after which a photo is resent as plain text
photo_tries = 3

# Uncomment one of the following to fetch challenged pages another way.
#
# [bypass]
# kind = "proxy"
# address = "http://127.0.0.1:8191"
# user = "user"
# password = "secret"
#
# [bypass]
# kind = "browser"
# headless = true
# page_timeout = "30s"
# challenge_wait = "1s"
"##
        .to_string()
    }
}

/// Parse interval strings like "500ms", "15s", "30m", "1h", "1d" or bare seconds.
pub fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| format!("Invalid milliseconds: {}", ms))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .map(|h| Duration::from_secs(h * 3600))
            .map_err(|_| format!("Invalid hours: {}", hours))
    } else if let Some(minutes) = s.strip_suffix('m') {
        minutes
            .trim()
            .parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| format!("Invalid minutes: {}", minutes))
    } else if let Some(days) = s.strip_suffix('d') {
        days.trim()
            .parse::<u64>()
            .map(|d| Duration::from_secs(d * 86400))
            .map_err(|_| format!("Invalid days: {}", days))
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| format!("Invalid seconds: {}", secs))
    } else {
        s.parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| format!("Invalid interval: {}. Use format like '15s', '30m', '1h'", s))
    }
}

/// Format an interval for display
pub fn format_interval(interval: Duration) -> String {
    let millis = interval.as_millis();
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }

    let secs = interval.as_secs();
    if secs >= 86400 && secs % 86400 == 0 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

pub(crate) fn deserialize_interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawInterval {
        Secs(u64),
        Text(String),
    }

    match RawInterval::deserialize(deserializer)? {
        RawInterval::Secs(secs) => Ok(Duration::from_secs(secs)),
        RawInterval::Text(text) => parse_interval(&text).map_err(serde::de::Error::custom),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read/write config file at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Wrote a default config to {}; set telegram.token and telegram.chat and start again", path.display())]
    CreatedDefault { path: PathBuf },

    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid setting {0}")]
    Invalid(String),
}

impl From<ConfigError> for DealwatchError {
    fn from(e: ConfigError) -> Self {
        DealwatchError::Config(e.to_string())
    }
}
