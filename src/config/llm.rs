//! Completion backend configuration.

use serde::Deserialize;
use std::time::Duration;

/// Completion backend settings. Credentials are per channel and live in the database.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (default: "https://api.openai.com/v1").
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Completion model (default: "gpt-3.5-turbo-instruct").
    #[serde(default = "default_model")]
    pub model: String,
    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Regex a channel credential must match before it is used.
    #[serde(default = "default_credential_pattern")]
    pub credential_pattern: String,
    /// Name the agent speaks as inside prompts (default: agent username).
    pub persona_name: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            credential_pattern: default_credential_pattern(),
            persona_name: None,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo-instruct".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_credential_pattern() -> String {
    r"^sk-[\w-]{20,}$".to_string()
}
