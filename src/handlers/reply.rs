//! Conversational replies through the completion backend.

use super::Invocation;
use crate::hub::Hub;
use crate::services::CompletionRequest;
use crate::services::llm::tidy_completion;
use crate::state::ConversationEvent;
use std::fmt::Write;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Reply-thread entries included in a prompt.
pub const THREAD_CONTEXT: usize = 15;

/// Where the conversation part of the prompt comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSource<'a> {
    /// The reply thread when the message is a reply, else the message alone.
    Conversation,
    /// Caller-provided transcript.
    Custom(&'a str),
}

/// Persona description for a safety tier.
pub fn persona(safety: i64) -> &'static str {
    match safety {
        0 => "a very friendly viewer",
        1 => "a friendly, yet sassy viewer",
        2 => "an opinionated, sassy, but friendly viewer",
        _ => "an opinionated, sassy viewer",
    }
}

/// Format events as a `name: text` transcript. A leading `@name ` that a
/// sender addressed to themself is dropped.
pub fn transcript(events: &[ConversationEvent]) -> String {
    let mut out = String::new();
    for event in events {
        let self_mention = format!("@{} ", event.sender);
        let text = event.text.strip_prefix(&self_mention).unwrap_or(&event.text);
        let _ = writeln!(out, "{}: {}", event.sender, text);
    }
    out
}

/// Generate a reply for the invocation, or an empty string.
///
/// The triggering message joins the channel's reply thread first. Returns
/// empty when the channel has no usable credential, when the agent already
/// spoke last, or when the backend fails.
pub async fn conversational_reply(hub: &Hub, inv: &Invocation, source: PromptSource<'_>) -> String {
    let conversation = hub.conversations.get_or_create(&inv.channel_id);
    let mut event = ConversationEvent::new(&inv.message_id, &inv.user_id, &inv.user, &inv.message);
    if let Some(parent) = &inv.replying_to {
        event = event.with_reply_to(parent.clone());
    }
    conversation.thread_append(event).await;

    let settings = match hub.db.channels().settings(&inv.channel_id).await {
        Ok(settings) => settings,
        Err(e) => {
            warn!(channel = %inv.channel, error = %e, "Unable to load channel settings");
            return String::new();
        }
    };
    let Some(credential) = settings.llm_token.filter(|t| hub.credential_valid(t)) else {
        debug!(channel = %inv.channel, "No usable completion credential");
        return String::new();
    };

    let stream = match timeout(
        hub.config.twitch.api_timeout(),
        hub.platform.stream(&inv.channel_id),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(channel = %inv.channel, error = %e, "Unable to get stream data");
            None
        }
        Err(_) => None,
    };

    let name = hub.persona();
    let mut prompt = format!(
        "{} is {} in {}'s twitch stream",
        name,
        persona(settings.reply_safety),
        inv.channel
    );
    if let Some(stream) = stream {
        let _ = write!(prompt, " ({} - {})", stream.game_name, stream.title);
    }
    let _ = write!(prompt, " chat replying to {}.\n\n", inv.user);

    match source {
        PromptSource::Custom(custom) => prompt.push_str(custom),
        PromptSource::Conversation if inv.replying_to.is_some() => {
            prompt.push_str(&transcript(&conversation.thread(THREAD_CONTEXT).await));
        }
        PromptSource::Conversation => {
            let _ = writeln!(prompt, "{}: {}", inv.user, inv.message);
        }
    }
    let _ = write!(prompt, "{}:", name.to_lowercase());

    // The agent may have spoken while the prompt was being built.
    if conversation.last_speaker().await.as_deref() == Some(hub.agent_id()) {
        debug!(channel = %inv.channel, "Agent spoke last, skipping completion");
        return String::new();
    }

    let request = CompletionRequest::chat_reply(&hub.config.llm.model, prompt, &inv.channel);
    debug!(channel = %inv.channel, prompt = %request.prompt, "Requesting completion");
    match timeout(hub.config.llm.timeout(), hub.llm.complete(&credential, &request)).await {
        Ok(Ok(choices)) => match choices.first() {
            Some(text) => tidy_completion(text),
            None => {
                debug!(channel = %inv.channel, "Completion returned no choices");
                String::new()
            }
        },
        Ok(Err(e)) => {
            warn!(channel = %inv.channel, error = %e, "Completion request failed");
            String::new()
        }
        Err(_) => {
            warn!(channel = %inv.channel, "Completion request timed out");
            String::new()
        }
    }
}
