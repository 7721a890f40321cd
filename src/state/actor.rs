//! Per-channel conversation actor.
//!
//! Each joined channel owns one `ChannelActor` running in its own task. The
//! actor is the only writer of the channel's history and reply thread, so
//! appends and reads from concurrently handled messages are serialized
//! through its mailbox.

use super::types::ConversationEvent;
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Events that can be sent to a Channel Actor.
#[derive(Debug)]
pub enum ChannelEvent {
    /// Record a chat message in the channel history.
    Append { event: Box<ConversationEvent> },
    /// Record an entry in the reply thread used for completion context.
    ThreadAppend { event: Box<ConversationEvent> },
    /// Most recent `limit` history events, oldest first.
    Recent {
        limit: usize,
        reply_tx: oneshot::Sender<Vec<ConversationEvent>>,
    },
    /// Most recent `limit` reply-thread entries, oldest first.
    Thread {
        limit: usize,
        reply_tx: oneshot::Sender<Vec<ConversationEvent>>,
    },
    /// Sender id of the newest history event.
    LastSpeaker {
        reply_tx: oneshot::Sender<Option<String>>,
    },
}

/// Owns the conversation state of a single channel.
pub struct ChannelActor {
    channel_id: String,
    history: VecDeque<ConversationEvent>,
    thread: VecDeque<ConversationEvent>,
    history_limit: usize,
    thread_limit: usize,
}

impl ChannelActor {
    pub fn new(channel_id: String, history_limit: usize, thread_limit: usize) -> Self {
        Self {
            channel_id,
            history: VecDeque::with_capacity(history_limit.min(1024)),
            thread: VecDeque::new(),
            history_limit: history_limit.max(1),
            thread_limit: thread_limit.max(1),
        }
    }

    /// Spawn the actor and return its mailbox.
    pub fn spawn(self, capacity: usize) -> mpsc::Sender<ChannelEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(self.run(rx));
        tx
    }

    /// The main actor loop. Exits when every sender is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ChannelEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle_event(event);
        }
        debug!(channel = %self.channel_id, "Channel actor stopped");
    }

    fn handle_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Append { event } => {
                push_bounded(&mut self.history, *event, self.history_limit);
            }
            ChannelEvent::ThreadAppend { event } => {
                push_bounded(&mut self.thread, *event, self.thread_limit);
            }
            ChannelEvent::Recent { limit, reply_tx } => {
                let _ = reply_tx.send(tail(&self.history, limit));
            }
            ChannelEvent::Thread { limit, reply_tx } => {
                let _ = reply_tx.send(tail(&self.thread, limit));
            }
            ChannelEvent::LastSpeaker { reply_tx } => {
                let _ = reply_tx.send(self.history.back().map(|e| e.sender_id.clone()));
            }
        }
    }
}

fn push_bounded(buf: &mut VecDeque<ConversationEvent>, event: ConversationEvent, limit: usize) {
    buf.push_back(event);
    while buf.len() > limit {
        buf.pop_front();
    }
}

fn tail(buf: &VecDeque<ConversationEvent>, limit: usize) -> Vec<ConversationEvent> {
    let skip = buf.len().saturating_sub(limit);
    buf.iter().skip(skip).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: usize) -> ConversationEvent {
        ConversationEvent::new(format!("m{n}"), format!("u{n}"), format!("user{n}"), "hi")
    }

    #[test]
    fn test_history_is_bounded_and_ordered() {
        let mut actor = ChannelActor::new("1".into(), 3, 3);
        for n in 0..5 {
            actor.handle_event(ChannelEvent::Append {
                event: Box::new(event(n)),
            });
        }
        let ids: Vec<_> = actor.history.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["m2", "m3", "m4"]);
        assert_eq!(tail(&actor.history, 2)[0].id, "m3");
        assert_eq!(tail(&actor.history, 50).len(), 3);
    }

    #[tokio::test]
    async fn test_actor_answers_queries() {
        let tx = ChannelActor::new("1".into(), 10, 10).spawn(8);
        tx.send(ChannelEvent::Append {
            event: Box::new(event(1)),
        })
        .await
        .unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(ChannelEvent::LastSpeaker { reply_tx }).await.unwrap();
        assert_eq!(reply_rx.await.unwrap().as_deref(), Some("u1"));

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(ChannelEvent::Recent { limit: 5, reply_tx })
            .await
            .unwrap();
        assert_eq!(reply_rx.await.unwrap()[0].sender, "user1");

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(ChannelEvent::Thread { limit: 5, reply_tx })
            .await
            .unwrap();
        assert!(reply_rx.await.unwrap().is_empty());
    }
}
