//! Core configuration types and loading.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::llm::LlmConfig;
use super::moderation::ModerationConfig;
use super::twitch::TwitchConfig;
use super::webhook::WebhookConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Agent configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Agent identity and chat behaviour.
    pub agent: AgentConfig,
    /// Chat transport and platform API credentials.
    pub twitch: TwitchConfig,
    /// Completion backend.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Join-time bot vetting.
    #[serde(default)]
    pub moderation: ModerationConfig,
    /// Optional follow webhook + metrics listener.
    pub webhook: Option<WebhookConfig>,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Template plugin (`get`) settings.
    #[serde(default)]
    pub plugins: PluginConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Agent identity and chat behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Login of the agent's chat account (also its own channel).
    pub username: String,
    /// Platform user id of the agent's account.
    pub user_id: String,
    /// Logins allowed to run global/admin built-ins.
    #[serde(default)]
    pub admins: Vec<String>,
    /// Prefix for built-in commands (default: "!").
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Events retained per channel (default: 100).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Events retained per channel reply-thread (default: 50).
    #[serde(default = "default_thread_limit")]
    pub thread_limit: usize,
    /// Channel actor mailbox capacity (default: 256).
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Minimum spacing between consecutive sends to one channel in ms (default: 1200).
    #[serde(default = "default_send_spacing_ms")]
    pub send_spacing_ms: u64,
    /// Honor `delay::` with a simulated typing pause (default: true).
    #[serde(default = "default_simulate_typing")]
    pub simulate_typing: bool,
}

impl AgentConfig {
    pub fn send_spacing(&self) -> Duration {
        Duration::from_millis(self.send_spacing_ms)
    }

    /// Whether `login` is a configured admin.
    pub fn is_admin(&self, login: &str) -> bool {
        self.admins.iter().any(|a| a.eq_ignore_ascii_case(login))
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file, or ":memory:".
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Settings for the `get` template plugin.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    /// Per-request timeout in seconds (default: 5).
    #[serde(default = "default_plugin_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Maximum response body kept, in bytes (default: 4096).
    #[serde(default = "default_plugin_max_body")]
    pub max_body_bytes: usize,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_plugin_timeout_secs(),
            max_body_bytes: default_plugin_max_body(),
        }
    }
}

impl PluginConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn default_simulate_typing() -> bool {
    true
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_history_limit() -> usize {
    100
}

fn default_thread_limit() -> usize {
    50
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_send_spacing_ms() -> u64 {
    1200
}

fn default_database_path() -> String {
    "straybot.db".to_string()
}

fn default_plugin_timeout_secs() -> u64 {
    5
}

fn default_plugin_max_body() -> usize {
    4096
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[agent]
username = "straybot"
user_id = "1001"

[twitch]
oauth_token = "oauth:abcdef"
client_id = "client"
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.agent.command_prefix, "!");
        assert_eq!(config.agent.history_limit, 100);
        assert_eq!(config.agent.send_spacing(), Duration::from_millis(1200));
        assert_eq!(config.database.path, "straybot.db");
        assert_eq!(config.moderation.bot_timeout_secs, 1_209_600);
        assert!(config.webhook.is_none());
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.agent.username, "straybot");
        assert_eq!(config.twitch.client_id, "client");
    }

    #[test]
    fn admin_check_is_case_insensitive() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.agent.admins = vec!["Owner".to_string()];
        assert!(config.agent.is_admin("owner"));
        assert!(!config.agent.is_admin("someone"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
