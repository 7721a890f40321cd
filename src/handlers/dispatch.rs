//! Output segmentation and delivery.
//!
//! Rendered output becomes chat lines: literal `\n` escapes split lines,
//! long lines are chunked, and the `reply::` / `delay::` directives at the
//! start of a line select threaded replies and simulated typing.

use super::Invocation;
use crate::hub::Hub;
use crate::network::TransportError;
use crate::state::{ConversationEvent, ReplyParent};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest chunk sent as one chat line, in characters.
pub const MAX_SEGMENT_CHARS: usize = 480;

/// Marker appended to every chunk of a split line except the last.
pub const ELLIPSIS: &str = "…";

pub const REPLY_DIRECTIVE: &str = "reply::";
pub const DELAY_DIRECTIVE: &str = "delay::";

/// Simulated typing speed for `delay::` segments.
const TYPING_CHARS_PER_SEC: f64 = 5.0;

/// One chat line ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    /// Send as a threaded reply to the triggering message.
    pub reply: bool,
    /// Wait the typing delay before sending.
    pub delay: bool,
}

/// Split rendered output into sendable segments, in order. Empty segments
/// are dropped.
pub fn segments(output: &str) -> Vec<Segment> {
    let output = output.replace("\\n", "\n");
    let mut out = Vec::new();
    for line in output.lines() {
        let (mut text, reply, delay) = strip_directives(line);
        if reply {
            text = strip_mention(text);
        }
        for chunk in chunk_line(text.trim()) {
            if chunk.trim().is_empty() {
                continue;
            }
            out.push(Segment {
                text: chunk,
                reply,
                delay,
            });
        }
    }
    out
}

/// Peel leading directives in any order.
fn strip_directives(mut line: &str) -> (&str, bool, bool) {
    let (mut reply, mut delay) = (false, false);
    loop {
        if let Some(rest) = line.strip_prefix(REPLY_DIRECTIVE) {
            reply = true;
            line = rest;
        } else if let Some(rest) = line.strip_prefix(DELAY_DIRECTIVE) {
            delay = true;
            line = rest;
        } else {
            return (line, reply, delay);
        }
    }
}

/// A threaded reply already names its target, so drop a leading `@mention `.
fn strip_mention(text: &str) -> &str {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('@') {
        return text;
    }
    match trimmed.split_once(char::is_whitespace) {
        Some((_, rest)) => rest.trim_start(),
        None => text,
    }
}

/// Split a line into chunks of at most [`MAX_SEGMENT_CHARS`] characters,
/// marking every chunk but the last with [`ELLIPSIS`].
pub fn chunk_line(line: &str) -> Vec<String> {
    if line.chars().count() <= MAX_SEGMENT_CHARS {
        return vec![line.to_string()];
    }
    let split = line
        .char_indices()
        .nth(MAX_SEGMENT_CHARS)
        .map_or(line.len(), |(i, _)| i);
    let (head, tail) = line.split_at(split);

    let mut chunks = vec![format!("{}{}", head, ELLIPSIS)];
    chunks.extend(chunk_line(tail));
    chunks
}

/// Typing delay for a segment: about five characters per second.
pub fn typing_delay(text: &str) -> Duration {
    Duration::from_secs_f64(text.chars().count() as f64 / TYPING_CHARS_PER_SEC)
}

/// Send rendered output to the invocation's channel.
///
/// Sent lines are recorded in the channel history as the agent's own
/// messages; threaded replies also extend the reply thread.
pub async fn dispatch(hub: &Hub, inv: &Invocation, output: &str) -> Result<usize, TransportError> {
    let segments = segments(output);
    let conversation = hub.conversations.get_or_create(&inv.channel_id);
    let mut sent = 0;

    for segment in &segments {
        if segment.delay && hub.config.agent.simulate_typing {
            tokio::time::sleep(typing_delay(&segment.text)).await;
        }
        hub.pacer.wait(&inv.channel).await;

        let threaded = segment.reply && !inv.message_id.is_empty();
        if threaded {
            hub.transport
                .reply(&inv.channel, &inv.message_id, &segment.text)
                .await?;
        } else {
            hub.transport.say(&inv.channel, &segment.text).await?;
        }
        crate::metrics::record_line_sent();
        sent += 1;

        let mut event = ConversationEvent::new(
            uuid::Uuid::new_v4().to_string(),
            hub.agent_id(),
            hub.agent_login(),
            segment.text.clone(),
        );
        if threaded {
            event = event.with_reply_to(ReplyParent {
                message_id: inv.message_id.clone(),
                user_id: inv.user_id.clone(),
                user_login: inv.user.clone(),
                body: inv.message.clone(),
            });
            conversation.thread_append(event.clone()).await;
        }
        conversation.append(event).await;
    }

    if sent > 0 {
        debug!(channel = %inv.channel, lines = sent, "Dispatched output");
    } else if !output.trim().is_empty() {
        warn!(channel = %inv.channel, "Output produced no sendable lines");
    }
    Ok(sent)
}
