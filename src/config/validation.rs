//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("agent.username is required")]
    MissingUsername,
    #[error("agent.user_id is required")]
    MissingUserId,
    #[error("agent.command_prefix must not contain whitespace")]
    InvalidPrefix,
    #[error("agent.history_limit must be at least 1")]
    ZeroHistory,
    #[error("agent.send_spacing_ms must be at least 1")]
    ZeroSpacing,
    #[error("twitch.oauth_token is required")]
    MissingToken,
    #[error("twitch.client_id is required")]
    MissingClientId,
    #[error("llm.credential_pattern is not a valid regex: {0}")]
    InvalidCredentialPattern(String),
    #[error("webhook.secret must be at least 10 characters")]
    WeakWebhookSecret,
    #[error("webhook.callback_url must be an https URL")]
    InsecureCallback,
    #[error("webhook.callback_url requires twitch.client_secret")]
    MissingClientSecret,
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.agent.username.trim().is_empty() {
        errors.push(ValidationError::MissingUsername);
    }
    if config.agent.user_id.trim().is_empty() {
        errors.push(ValidationError::MissingUserId);
    }
    if config.agent.command_prefix.chars().any(char::is_whitespace) {
        errors.push(ValidationError::InvalidPrefix);
    }
    if config.agent.history_limit == 0 {
        errors.push(ValidationError::ZeroHistory);
    }
    if config.agent.send_spacing_ms == 0 {
        errors.push(ValidationError::ZeroSpacing);
    }

    if config.twitch.bearer_token().is_empty() {
        errors.push(ValidationError::MissingToken);
    }
    if config.twitch.client_id.is_empty() {
        errors.push(ValidationError::MissingClientId);
    }

    if let Err(e) = regex::Regex::new(&config.llm.credential_pattern) {
        errors.push(ValidationError::InvalidCredentialPattern(e.to_string()));
    }

    // EventSub rejects secrets shorter than 10 characters.
    if let Some(ref webhook) = config.webhook
        && webhook.secret.len() < 10
    {
        errors.push(ValidationError::WeakWebhookSecret);
    }
    if let Some(callback) = config.webhook.as_ref().and_then(|w| w.callback_url.as_deref()) {
        if !callback.starts_with("https://") {
            errors.push(ValidationError::InsecureCallback);
        }
        if config.twitch.client_secret.as_deref().is_none_or(str::is_empty) {
            errors.push(ValidationError::MissingClientSecret);
        }
    }

    if config.database.path != ":memory:" {
        let db_path = Path::new(&config.database.path);
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            errors.push(ValidationError::DatabasePathInvalid(
                config.database.path.clone(),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
