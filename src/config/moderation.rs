//! Join-time bot vetting configuration.

use serde::Deserialize;
use std::time::Duration;

/// Bot registry source and enforcement settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ModerationConfig {
    /// Master switch for join-time vetting (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Known-bot list URL.
    #[serde(default = "default_bot_list_url")]
    pub bot_list_url: String,
    /// How long a fetched bot list is reused, in seconds (default: 300).
    #[serde(default = "default_bot_list_ttl_secs")]
    pub bot_list_ttl_secs: u64,
    /// Bot list fetch timeout in seconds (default: 10).
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Timeout applied to matched bots, in seconds (default: 14 days).
    #[serde(default = "default_bot_timeout_secs")]
    pub bot_timeout_secs: u32,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bot_list_url: default_bot_list_url(),
            bot_list_ttl_secs: default_bot_list_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            bot_timeout_secs: default_bot_timeout_secs(),
        }
    }
}

impl ModerationConfig {
    pub fn bot_list_ttl(&self) -> Duration {
        Duration::from_secs(self.bot_list_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_bot_list_url() -> String {
    "https://api.twitchinsights.net/v1/bots/all".to_string()
}

fn default_bot_list_ttl_secs() -> u64 {
    300
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_bot_timeout_secs() -> u32 {
    1_209_600
}
