//! Spontaneous replies when no command matched.
//!
//! The agent replies when its share of the recent conversation is below
//! `frequency / (distinct_speakers + 2)`, so the busier the room, the less
//! it talks. Replies to one of the agent's own messages skip the heuristic.

use super::Invocation;
use super::reply::{PromptSource, conversational_reply, transcript};
use crate::hub::Hub;
use crate::state::ConversationEvent;
use std::collections::HashSet;
use tracing::{debug, warn};

/// History events considered by the heuristic.
pub const SCAN_WINDOW: usize = 50;

/// History events quoted in a spontaneous prompt.
pub const PROMPT_WINDOW: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Reply spontaneously.
    Fire,
    /// Reply in a thread the agent started.
    Thread,
    /// The agent already talks enough here.
    Throttled,
    /// The newest event is the agent's own.
    AgentSpokeLast,
    Disabled,
    NoCredential,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fire => "fire",
            Self::Thread => "thread",
            Self::Throttled => "throttled",
            Self::AgentSpokeLast => "agent_spoke_last",
            Self::Disabled => "disabled",
            Self::NoCredential => "no_credential",
        }
    }
}

/// The frequency heuristic over recent history, oldest first.
pub fn heuristic(events: &[ConversationEvent], agent_id: &str, frequency: i64) -> Decision {
    let window = &events[events.len().saturating_sub(SCAN_WINDOW)..];
    if window.last().is_some_and(|e| e.sender_id == agent_id) {
        return Decision::AgentSpokeLast;
    }

    let speakers: HashSet<&str> = window
        .iter()
        .filter(|e| e.sender_id != agent_id)
        .map(|e| e.sender_id.as_str())
        .collect();
    let own = window.iter().filter(|e| e.sender_id == agent_id).count();
    let share = if window.is_empty() {
        0.0
    } else {
        own as f64 / window.len() as f64
    };
    let threshold = frequency as f64 / (speakers.len() as f64 + 2.0);

    if share < threshold {
        Decision::Fire
    } else {
        Decision::Throttled
    }
}

/// Prompt transcript for a spontaneous reply.
pub fn synthesize_prompt(events: &[ConversationEvent]) -> String {
    transcript(&events[events.len().saturating_sub(PROMPT_WINDOW)..])
}

/// Decide and, when warranted, produce the reply output (with directives).
pub async fn maybe_autoreply(hub: &Hub, inv: &Invocation) -> Option<String> {
    let decision = decide(hub, inv).await;
    crate::metrics::record_autoreply(decision.as_str());
    debug!(channel = %inv.channel, decision = decision.as_str(), "Autoreply decision");

    match decision {
        Decision::Thread => {
            let reply = conversational_reply(hub, inv, PromptSource::Conversation).await;
            (!reply.is_empty()).then(|| format!("reply::delay::{}", reply))
        }
        Decision::Fire => {
            let history = hub.conversations.get_or_create(&inv.channel_id);
            let prompt = synthesize_prompt(&history.recent(PROMPT_WINDOW).await);
            let reply = conversational_reply(hub, inv, PromptSource::Custom(&prompt)).await;
            (!reply.is_empty()).then(|| format!("delay::{}", reply))
        }
        _ => None,
    }
}

async fn decide(hub: &Hub, inv: &Invocation) -> Decision {
    let settings = match hub.db.channels().settings(&inv.channel_id).await {
        Ok(settings) => settings,
        Err(e) => {
            warn!(channel = %inv.channel, error = %e, "Unable to load channel settings");
            return Decision::Disabled;
        }
    };
    if !settings.autoreply_enabled {
        return Decision::Disabled;
    }
    if !settings
        .llm_token
        .as_deref()
        .is_some_and(|t| hub.credential_valid(t))
    {
        return Decision::NoCredential;
    }
    if inv.replies_to(hub.agent_login()) {
        return Decision::Thread;
    }

    let history = hub.conversations.get_or_create(&inv.channel_id);
    heuristic(
        &history.recent(SCAN_WINDOW).await,
        hub.agent_id(),
        settings.autoreply_frequency,
    )
}
