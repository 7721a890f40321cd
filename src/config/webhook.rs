//! HTTP listener configuration: follow webhook, management API, metrics.

use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// HTTP listener for follow notifications, channel management and `/metrics`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Address to bind (e.g., "0.0.0.0:8080").
    pub listen: SocketAddr,
    /// Shared secret used to sign notifications.
    pub secret: String,
    /// Public HTTPS URL of `/webhooks/follows`. When set, every joined
    /// channel is subscribed to follow notifications.
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Followers younger than this are flagged (default: 24).
    #[serde(default = "default_min_account_age_hours")]
    pub min_account_age_hours: i64,
    /// Time out flagged followers instead of only logging them (default: false).
    #[serde(default)]
    pub timeout_new_accounts: bool,
    /// Timeout length for flagged followers, in seconds (default: 600).
    #[serde(default = "default_new_account_timeout_secs")]
    pub new_account_timeout_secs: u32,
    /// Serve Prometheus metrics on the same listener (default: true).
    #[serde(default = "default_metrics")]
    pub metrics: bool,
    /// Serve the channel management API (default: true).
    #[serde(default = "default_management")]
    pub management: bool,
    /// Browser origins allowed to call the management API (default: none).
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl WebhookConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_min_account_age_hours() -> i64 {
    24
}

fn default_new_account_timeout_secs() -> u32 {
    600
}

fn default_metrics() -> bool {
    true
}

fn default_management() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}
