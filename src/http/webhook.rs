//! Follow notification webhook.
//!
//! Follow notifications arrive EventSub style. Each delivery is signed
//! with the shared secret; unsigned, stale or tampered deliveries are
//! rejected before the body is looked at.

use super::AppState;
use crate::config::WebhookConfig;
use crate::hub::Hub;
use crate::security::Candidate;
use crate::security::signature;
use crate::services::helix::FOLLOW_SUBSCRIPTION;
use crate::telemetry::spans;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{Instrument, debug, info, warn};

pub const HEADER_MESSAGE_ID: &str = "twitch-eventsub-message-id";
pub const HEADER_TIMESTAMP: &str = "twitch-eventsub-message-timestamp";
pub const HEADER_SIGNATURE: &str = "twitch-eventsub-message-signature";
pub const HEADER_TYPE: &str = "twitch-eventsub-message-type";

#[derive(Debug, Deserialize)]
struct Delivery {
    #[serde(default)]
    challenge: Option<String>,
    subscription: Subscription,
    #[serde(default)]
    event: Option<FollowEvent>,
}

#[derive(Debug, Deserialize)]
struct Subscription {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FollowEvent {
    pub user_id: String,
    pub user_login: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> &'h str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

pub(super) async fn follow_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let message_id = header(&headers, HEADER_MESSAGE_ID);
    let timestamp = header(&headers, HEADER_TIMESTAMP);
    let kind = header(&headers, HEADER_TYPE);

    let signed = signature::verify(
        &state.config.secret,
        message_id,
        timestamp,
        &body,
        header(&headers, HEADER_SIGNATURE),
    );
    if !signed || !signature::is_fresh(timestamp, Utc::now()) {
        crate::metrics::record_webhook_rejected();
        warn!(msgid = message_id, signed, "Rejected webhook delivery");
        return StatusCode::FORBIDDEN.into_response();
    }

    let delivery: Delivery = match serde_json::from_slice(&body) {
        Ok(delivery) => delivery,
        Err(e) => {
            debug!(msgid = message_id, error = %e, "Malformed webhook body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match kind {
        "webhook_callback_verification" => match delivery.challenge {
            Some(challenge) => {
                info!(subscription = %delivery.subscription.kind, "Webhook subscription verified");
                (StatusCode::OK, challenge).into_response()
            }
            None => StatusCode::BAD_REQUEST.into_response(),
        },
        "notification" if delivery.subscription.kind == FOLLOW_SUBSCRIPTION => {
            let Some(event) = delivery.event else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            let span = spans::webhook(message_id, kind);
            // Acknowledge right away; the platform retries slow deliveries.
            tokio::spawn(on_follow(state.hub.clone(), state.config.clone(), event).instrument(span));
            StatusCode::NO_CONTENT.into_response()
        }
        "revocation" => {
            warn!(subscription = %delivery.subscription.kind, "Webhook subscription revoked");
            StatusCode::NO_CONTENT.into_response()
        }
        _ => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Whether an account created at `created_at` is younger than `min_hours`.
pub fn is_new_account(created_at: DateTime<Utc>, now: DateTime<Utc>, min_hours: i64) -> bool {
    (now - created_at).num_hours() < min_hours
}

/// Flag very new followers, then vet the follower like a joining user.
pub async fn on_follow(hub: Arc<Hub>, config: Arc<WebhookConfig>, event: FollowEvent) {
    let lookup = tokio::time::timeout(
        hub.config.twitch.api_timeout(),
        hub.platform.user_by_id(&event.user_id),
    )
    .await;
    if let Ok(Ok(Some(user))) = lookup
        && is_new_account(user.created_at, Utc::now(), config.min_account_age_hours)
    {
        warn!(
            channel = %event.broadcaster_user_login,
            user = %event.user_login,
            created_at = %user.created_at,
            "Follow from a very new account"
        );
        if config.timeout_new_accounts {
            let reason = format!(
                "account younger than {} hours",
                config.min_account_age_hours
            );
            let outcome = hub
                .platform
                .ban(
                    &event.broadcaster_user_id,
                    &event.user_id,
                    Some(config.new_account_timeout_secs),
                    &reason,
                )
                .await;
            debug!(outcome = outcome.as_str(), "New account timeout");
        }
    }

    let candidate = Candidate {
        user_id: event.user_id,
        login: event.user_login,
    };
    let outcome = hub.moderation.vet(&event.broadcaster_user_id, &candidate).await;
    debug!(user = %candidate.login, outcome = ?outcome, "Vetted follower");
}
