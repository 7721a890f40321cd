//! Chat transport.
//!
//! - [`ChatTransport`]: outbound say/reply/join/part, implemented by the
//!   Twitch IRC connection and by test fakes
//! - [`ChatEvent`]: inbound events fed to the agent loop
//! - [`parser`]: IRC line parsing

pub mod parser;
pub mod twitch;

pub use twitch::TwitchIrc;

use crate::state::ReplyParent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("transport closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] tokio_util::codec::LinesCodecError),
}

/// A chat message received in a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Channel login, lowercase, without `#`.
    pub channel: String,
    /// Broadcaster user id (`room-id`).
    pub room_id: String,
    pub message_id: String,
    pub user_id: String,
    /// Sender login, lowercase.
    pub user: String,
    pub display_name: String,
    pub text: String,
    pub is_mod: bool,
    pub is_broadcaster: bool,
    pub is_sub: bool,
    pub reply_parent: Option<ReplyParent>,
    pub received_at: DateTime<Utc>,
}

/// Inbound transport events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Message(IncomingMessage),
    /// A participant joined a channel.
    Join { channel: String, user: String },
    Part { channel: String, user: String },
    /// Channel state, carrying the broadcaster id.
    RoomState { channel: String, room_id: String },
}

/// Outbound chat actions.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn say(&self, channel: &str, text: &str) -> Result<(), TransportError>;

    /// Send as a threaded reply to `parent_id`.
    async fn reply(&self, channel: &str, parent_id: &str, text: &str) -> Result<(), TransportError>;

    async fn join(&self, channel: &str) -> Result<(), TransportError>;

    async fn part(&self, channel: &str) -> Result<(), TransportError>;
}
