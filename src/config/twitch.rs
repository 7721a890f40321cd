//! Chat transport and platform API configuration.

use serde::Deserialize;
use std::time::Duration;

/// Twitch IRC + Helix API credentials and endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TwitchConfig {
    /// User access token, with or without the `oauth:` prefix.
    pub oauth_token: String,
    /// Application client id sent with every Helix request.
    pub client_id: String,
    /// Application secret. Needed only for follow subscriptions, which
    /// require an app access token.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// OAuth token endpoint (default: "https://id.twitch.tv/oauth2/token").
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// IRC endpoint (default: "irc.chat.twitch.tv:6667").
    #[serde(default = "default_irc_address")]
    pub irc_address: String,
    /// Helix base URL (default: "https://api.twitch.tv/helix").
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Per-request timeout in seconds (default: 5).
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,
    /// Upper bound for transport reconnect backoff in seconds (default: 60).
    #[serde(default = "default_max_backoff_secs")]
    pub max_reconnect_backoff_secs: u64,
}

impl TwitchConfig {
    /// Token without the IRC-only `oauth:` prefix, as Helix expects it.
    pub fn bearer_token(&self) -> &str {
        self.oauth_token
            .strip_prefix("oauth:")
            .unwrap_or(&self.oauth_token)
    }

    /// Token with the `oauth:` prefix, as IRC PASS expects it.
    pub fn irc_password(&self) -> String {
        format!("oauth:{}", self.bearer_token())
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn max_reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_backoff_secs)
    }
}

fn default_irc_address() -> String {
    "irc.chat.twitch.tv:6667".to_string()
}

fn default_api_base() -> String {
    "https://api.twitch.tv/helix".to_string()
}

fn default_token_url() -> String {
    "https://id.twitch.tv/oauth2/token".to_string()
}

fn default_api_timeout_secs() -> u64 {
    5
}

fn default_max_backoff_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: &str) -> TwitchConfig {
        toml::from_str(&format!(
            "oauth_token = \"{}\"\nclient_id = \"cid\"",
            token
        ))
        .unwrap()
    }

    #[test]
    fn token_prefix_is_normalised_both_ways() {
        let with = config("oauth:abc123");
        assert_eq!(with.bearer_token(), "abc123");
        assert_eq!(with.irc_password(), "oauth:abc123");

        let without = config("abc123");
        assert_eq!(without.bearer_token(), "abc123");
        assert_eq!(without.irc_password(), "oauth:abc123");
    }
}
