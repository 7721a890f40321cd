//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Root config struct and loading (Config, AgentConfig, DatabaseConfig)
//! - [`twitch`]: Chat transport and platform API credentials (TwitchConfig)
//! - [`llm`]: Completion backend settings (LlmConfig)
//! - [`moderation`]: Join-time bot vetting (ModerationConfig)
//! - [`webhook`]: Follow-notification listener and metrics endpoint (WebhookConfig)
//! - [`validation`]: Startup validation of the loaded values

mod llm;
mod moderation;
mod twitch;
mod types;
mod validation;
mod webhook;

pub use llm::LlmConfig;
pub use moderation::ModerationConfig;
pub use twitch::TwitchConfig;
pub use types::{AgentConfig, Config, ConfigError, DatabaseConfig, PluginConfig};
pub use validation::{ValidationError, validate};
pub use webhook::WebhookConfig;
