use chrono::{DateTime, Utc};

/// The message an event was replying to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyParent {
    pub message_id: String,
    pub user_id: String,
    pub user_login: String,
    pub body: String,
}

/// One chat message as seen by the agent. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEvent {
    pub id: String,
    pub sender_id: String,
    pub sender: String,
    pub display_name: String,
    pub text: String,
    pub reply_to: Option<ReplyParent>,
    pub received_at: DateTime<Utc>,
}

impl ConversationEvent {
    /// Build an event stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let sender = sender.into();
        Self {
            id: id.into(),
            sender_id: sender_id.into(),
            display_name: sender.clone(),
            sender,
            text: text.into(),
            reply_to: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_reply_to(mut self, parent: ReplyParent) -> Self {
        self.reply_to = Some(parent);
        self
    }
}
