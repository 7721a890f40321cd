//! Agent event loop.
//!
//! Every inbound chat event runs as its own task. Ordering between
//! channels is not preserved; within a channel the conversation actor
//! serializes history access.

use crate::db::DbError;
use crate::error::HandlerResult;
use crate::handlers;
use crate::hub::Hub;
use crate::network::ChatEvent;
use crate::services::ApiError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Register the agent's own channel and join every stored channel.
/// Stale follow subscriptions are dropped first, then every joined channel
/// is subscribed again. Returns how many channels were joined.
pub async fn join_known_channels(hub: &Hub) -> Result<usize, DbError> {
    let channels = hub.db.channels();
    channels.register(hub.agent_id(), hub.agent_login()).await?;
    unsubscribe_follows(hub, None).await;

    let known = channels.list().await?;
    let mut joined = 0;
    for channel in &known {
        hub.set_room_id(&channel.channel_name, &channel.channel_id);
        match hub.transport.join(&channel.channel_name).await {
            Ok(()) => joined += 1,
            Err(e) => warn!(channel = %channel.channel_name, error = %e, "Unable to join channel"),
        }
        subscribe_follows(hub, &channel.channel_id).await;
    }
    info!(count = joined, "Joined known channels");
    Ok(joined)
}

/// Register a channel, join it and subscribe to its follows.
pub async fn join_channel(hub: &Hub, channel_id: &str, channel: &str) -> HandlerResult {
    hub.db.channels().register(channel_id, channel).await?;
    hub.set_room_id(channel, channel_id);
    hub.transport.join(channel).await?;
    subscribe_follows(hub, channel_id).await;
    info!(channel, "Joined channel");
    Ok(())
}

/// Forget a channel: stored rows, transport membership, conversation state
/// and its follow subscription.
pub async fn leave_channel(hub: &Hub, channel_id: &str, channel: &str) -> HandlerResult {
    hub.db.channels().unregister(channel_id).await?;
    hub.transport.part(channel).await?;
    hub.conversations.remove(channel_id);
    hub.pacer.forget(channel);
    hub.forget_room(channel);
    unsubscribe_follows(hub, Some(channel_id)).await;
    info!(channel, "Left channel");
    Ok(())
}

/// Subscribe one channel to follow notifications. Does nothing unless a
/// public callback is configured; failures are logged.
pub async fn subscribe_follows(hub: &Hub, channel_id: &str) {
    let Some((callback, secret)) = hub.follow_callback() else {
        return;
    };
    let result = tokio::time::timeout(
        hub.config.twitch.api_timeout(),
        hub.platform.subscribe_follows(channel_id, callback, secret),
    )
    .await
    .map_err(ApiError::from)
    .and_then(|r| r);
    if let Err(e) = result {
        warn!(channel_id, error = %e, "Unable to subscribe to follows");
    }
}

/// Delete follow subscriptions pointing at our callback, for one channel
/// or, with `None`, for all of them. Returns how many were deleted.
pub async fn unsubscribe_follows(hub: &Hub, channel_id: Option<&str>) -> usize {
    let Some((callback, _)) = hub.follow_callback() else {
        return 0;
    };
    let timeout = hub.config.twitch.api_timeout();
    let subscriptions = match tokio::time::timeout(timeout, hub.platform.follow_subscriptions()).await {
        Ok(Ok(subscriptions)) => subscriptions,
        Ok(Err(e)) => {
            warn!(error = %e, "Unable to list follow subscriptions");
            return 0;
        }
        Err(_) => {
            warn!("Listing follow subscriptions timed out");
            return 0;
        }
    };

    let mut removed = 0;
    for sub in subscriptions.iter().filter(|s| {
        s.callback() == Some(callback) && channel_id.is_none_or(|id| s.broadcaster_id() == Some(id))
    }) {
        match tokio::time::timeout(timeout, hub.platform.unsubscribe(&sub.id)).await {
            Ok(Ok(())) => removed += 1,
            Ok(Err(e)) => warn!(subscription = %sub.id, error = %e, "Unable to unsubscribe"),
            Err(_) => warn!(subscription = %sub.id, "Unsubscribe timed out"),
        }
    }
    if removed > 0 {
        debug!(removed, "Removed follow subscriptions");
    }
    removed
}

/// Consume transport events until the stream ends.
pub async fn run(hub: Arc<Hub>, mut events: mpsc::Receiver<ChatEvent>) {
    while let Some(event) = events.recv().await {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            handle_event(&hub, event).await;
        });
    }
    info!("Chat event stream closed");
}

/// Route one transport event.
pub async fn handle_event(hub: &Hub, event: ChatEvent) {
    match event {
        ChatEvent::Message(msg) => {
            if let Err(e) = handlers::handle_message(hub, msg).await {
                crate::metrics::record_command_error("handler", e.error_code());
                warn!(error = %e, "Message handling failed");
            }
        }
        ChatEvent::Join { channel, user } => {
            debug!(channel = %channel, user = %user, "joined");
            handlers::handle_join(hub, &channel, &user).await;
        }
        ChatEvent::Part { channel, user } => {
            debug!(channel = %channel, user = %user, "left");
        }
        ChatEvent::RoomState { channel, room_id } => {
            hub.set_room_id(&channel, &room_id);
        }
    }
}
