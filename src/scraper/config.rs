use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::config::deserialize_interval;

/// `[bypass]` options when `kind = "browser"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub headless: bool,
    /// Chromium binary; found on `PATH` when unset
    pub executable: Option<PathBuf>,
    /// Upper bound for one challenged page, challenge wait included
    #[serde(deserialize_with = "deserialize_interval")]
    pub page_timeout: Duration,
    /// Time the challenge script gets to redirect to the real page
    #[serde(deserialize_with = "deserialize_interval")]
    pub challenge_wait: Duration,
    pub user_agent: Option<String>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            page_timeout: Duration::from_secs(30),
            challenge_wait: Duration::from_secs(1),
            user_agent: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScraperConfig::default();
        assert!(config.headless);
        assert_eq!(config.executable, None);
        assert_eq!(config.page_timeout, Duration::from_secs(30));
        assert_eq!(config.user_agent, None);
    }

    #[test]
    fn test_human_durations() {
        let config: ScraperConfig =
            toml::from_str("headless = false\npage_timeout = \"1m\"\nchallenge_wait = \"2500ms\"")
                .unwrap();
        assert!(!config.headless);
        assert_eq!(config.page_timeout, Duration::from_secs(60));
        assert_eq!(config.challenge_wait, Duration::from_millis(2500));
    }
}
