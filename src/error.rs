//! Errors raised while handling one chat event.
//!
//! Handlers turn most failures into chat output or silence; what reaches
//! the agent loop is logged and counted under [`HandlerError::error_code`].

use crate::db::DbError;
use crate::network::TransportError;
use crate::services::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("platform error: {0}")]
    Api(#[from] ApiError),
}

impl HandlerError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Db(e) => e.error_code(),
            Self::Transport(_) => "transport",
            Self::Api(e) => e.error_code(),
        }
    }
}

/// Result type for event handlers.
pub type HandlerResult<T = ()> = Result<T, HandlerError>;

/// Errors building the shared agent state.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid credential pattern: {0}")]
    CredentialPattern(#[from] regex::Error),

    #[error("unable to build plugin http client: {0}")]
    PluginClient(#[from] reqwest::Error),
}
