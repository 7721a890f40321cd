//! External service clients.
//!
//! - [`helix`]: streaming-platform API (lookups and moderation primitives)
//! - [`llm`]: completion backend for conversational replies
//! - [`bots`]: externally maintained known-bot registry
//!
//! Each concern sits behind a trait so the handlers and the moderation
//! engine can run against in-process fakes.

pub mod bots;
pub mod helix;
pub mod llm;

pub use bots::{BotList, BotRegistry, InsightsRegistry, KnownBot};
pub use helix::{
    Chatter, EventSubscription, FollowInfo, HelixClient, ModAction, ModerationOutcome, PlatformApi, PlatformUser,
    StreamInfo, SubscriptionTransport,
};
pub use llm::{CompletionBackend, CompletionRequest, OpenAiCompletions};

use thiserror::Error;

/// Errors from HTTP-backed collaborators.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("request timed out")]
    Timeout,
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Http(e) if e.is_timeout() => "timeout",
            Self::Http(_) => "http",
            Self::Status(_) => "status",
            Self::Decode(_) => "decode",
            Self::Timeout => "timeout",
            Self::NotConfigured(_) => "not_configured",
        }
    }
}

impl From<tokio::time::error::Elapsed> for ApiError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ApiError::Timeout
    }
}
