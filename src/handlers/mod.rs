//! Chat event handlers.
//!
//! A message flows through: conversation history append, built-in check,
//! dynamic command resolution, template execution and dispatch. When no
//! command matches, the autoreply engine gets a turn. Join events go to
//! the moderation engine.

pub mod autoreply;
pub mod builtin;
mod context;
pub mod dispatch;
pub mod executor;
pub mod functions;
pub mod reply;
pub mod resolver;

pub use builtin::Builtin;
pub use context::{FIELDS, Invocation};
pub use functions::{FUNCTIONS, FunctionEnvironment};
pub use resolver::{CommandResolver, ResolveError, compile_pattern};

use crate::error::HandlerResult;
use crate::hub::Hub;
use crate::network::IncomingMessage;
use crate::state::ConversationEvent;
use crate::telemetry::spans;
use tracing::{Instrument, debug, info};

/// Handle one chat message end to end.
pub async fn handle_message(hub: &Hub, msg: IncomingMessage) -> HandlerResult {
    let span = spans::message(&msg.channel, &msg.user, &msg.message_id);
    process_message(hub, msg).instrument(span).await
}

async fn process_message(hub: &Hub, msg: IncomingMessage) -> HandlerResult {
    crate::metrics::record_message_received();
    if msg.room_id.is_empty() {
        debug!("Message without room id, ignoring");
        return Ok(());
    }
    hub.set_room_id(&msg.channel, &msg.room_id);

    let mut event = ConversationEvent::new(&msg.message_id, &msg.user_id, &msg.user, &msg.text);
    event.display_name = msg.display_name.clone();
    event.received_at = msg.received_at;
    if let Some(parent) = &msg.reply_parent {
        event = event.with_reply_to(parent.clone());
    }
    hub.conversations.get_or_create(&msg.room_id).append(event).await;

    // Our own lines typed from another client are history, nothing more.
    if msg.user_id == hub.agent_id() || msg.user.eq_ignore_ascii_case(hub.agent_login()) {
        return Ok(());
    }

    let inv = Invocation::from_message(&msg, &hub.config.agent);

    if let Some(builtin) = Builtin::parse(&inv.command, &hub.config.agent.command_prefix) {
        if let Some(output) = builtin::execute(hub, &inv, builtin).await? {
            dispatch::dispatch(hub, &inv, &output).await?;
        }
        return Ok(());
    }

    let records = hub.db.commands().visible_to(&inv.channel_id).await?;
    let output = match hub.resolver.resolve(&records, &inv.message) {
        Ok(Some(record)) => {
            crate::metrics::record_command(if record.scope.is_global() { "global" } else { "local" });
            debug!(command = %record.name, scope = %record.scope, "Command matched");
            Some(executor::render_all(hub, &inv, &[(record.name.as_str(), record.template.as_str())]).await)
        }
        Ok(None) => autoreply::maybe_autoreply(hub, &inv).await,
        Err(e) => {
            crate::metrics::record_command_error("resolve", e.error_code());
            info!(error = %e, "Ambiguous command");
            Some(e.to_string())
        }
    };

    if let Some(output) = output {
        dispatch::dispatch(hub, &inv, &output).await?;
    }
    Ok(())
}

/// Vet a participant that joined a channel.
pub async fn handle_join(hub: &Hub, channel: &str, user: &str) {
    if user.eq_ignore_ascii_case(hub.agent_login()) {
        return;
    }
    let Some(channel_id) = hub.room_id(channel) else {
        debug!(channel, user, "Join before room id is known, skipping vetting");
        return;
    };
    let outcome = hub.moderation.on_join(&channel_id, user).await;
    debug!(channel, user, outcome = ?outcome, "Vetted joining user");
}
