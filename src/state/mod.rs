//! Conversation state for joined channels.
//!
//! - [`ChannelManager`]: registry of channel actors keyed by channel id
//! - [`ChannelHandle`]: typed client for one actor's mailbox
//! - [`ConversationEvent`]: one recorded chat message

mod actor;
mod types;

pub use actor::{ChannelActor, ChannelEvent};
pub use types::{ConversationEvent, ReplyParent};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

/// Client side of a channel actor. Cheap to clone.
///
/// Reads against a stopped actor return empty results.
#[derive(Clone)]
pub struct ChannelHandle {
    tx: mpsc::Sender<ChannelEvent>,
}

impl ChannelHandle {
    pub async fn append(&self, event: ConversationEvent) {
        let _ = self
            .tx
            .send(ChannelEvent::Append {
                event: Box::new(event),
            })
            .await;
    }

    pub async fn thread_append(&self, event: ConversationEvent) {
        let _ = self
            .tx
            .send(ChannelEvent::ThreadAppend {
                event: Box::new(event),
            })
            .await;
    }

    pub async fn recent(&self, limit: usize) -> Vec<ConversationEvent> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(ChannelEvent::Recent { limit, reply_tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub async fn thread(&self, limit: usize) -> Vec<ConversationEvent> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(ChannelEvent::Thread { limit, reply_tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub async fn last_speaker(&self) -> Option<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ChannelEvent::LastSpeaker { reply_tx })
            .await
            .ok()?;
        reply_rx.await.ok().flatten()
    }
}

/// Registry of channel actors. At most one actor exists per channel id.
pub struct ChannelManager {
    channels: DashMap<String, ChannelHandle>,
    history_limit: usize,
    thread_limit: usize,
    mailbox_capacity: usize,
}

impl ChannelManager {
    pub fn new(history_limit: usize, thread_limit: usize, mailbox_capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            history_limit,
            thread_limit,
            mailbox_capacity,
        }
    }

    /// Get an existing channel actor or create a new one.
    pub fn get_or_create(&self, channel_id: &str) -> ChannelHandle {
        self.channels
            .entry(channel_id.to_string())
            .or_insert_with(|| {
                let tx = ChannelActor::new(
                    channel_id.to_string(),
                    self.history_limit,
                    self.thread_limit,
                )
                .spawn(self.mailbox_capacity);
                crate::metrics::record_channel_opened();
                ChannelHandle { tx }
            })
            .clone()
    }

    /// Drop a channel's state. The actor stops once in-flight handles finish.
    pub fn remove(&self, channel_id: &str) -> bool {
        let removed = self.channels.remove(channel_id).is_some();
        if removed {
            crate::metrics::record_channel_closed();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_actor_per_channel() {
        let manager = ChannelManager::new(10, 10, 8);
        let a = manager.get_or_create("1");
        let b = manager.get_or_create("1");
        a.append(ConversationEvent::new("m1", "u1", "alice", "hello"))
            .await;
        // Same actor behind both handles.
        assert_eq!(b.recent(10).await.len(), 1);
        assert_eq!(manager.len(), 1);

        assert!(manager.remove("1"));
        assert!(!manager.remove("1"));
        assert!(manager.is_empty());
        assert!(manager.get_or_create("1").recent(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let manager = std::sync::Arc::new(ChannelManager::new(1000, 10, 8));
        let mut tasks = Vec::new();
        for n in 0..50 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                manager
                    .get_or_create("1")
                    .append(ConversationEvent::new(format!("m{n}"), "u", "u", "x"))
                    .await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(manager.get_or_create("1").recent(1000).await.len(), 50);
    }
}
