//! Channel management API.
//!
//! Reads are public. Registering or leaving a channel needs a user access
//! token belonging to that channel; settings changes also accept a token
//! of a configured admin.

use super::AppState;
use crate::agent;
use crate::db::{DbError, FREQUENCY_RANGE, SAFETY_RANGE, Scope};
use crate::error::HandlerError;
use crate::hub::Hub;
use crate::services::PlatformUser;
use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Stored completion credentials are never echoed back.
pub const MASKED_TOKEN: &str = "******";
/// Pause between joining a channel and greeting it.
pub const GREETING_DELAY: Duration = Duration::from_secs(2);

type ApiResult<T> = Result<T, (StatusCode, String)>;

/// A registered channel in the channel list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub channel_id: String,
    pub login: String,
    pub display_name: String,
}

/// A channel with its autoreply settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelView {
    pub channel_id: String,
    pub login: String,
    pub created_at: i64,
    pub autoreply_enabled: bool,
    pub autoreply_frequency: i64,
    pub reply_safety: i64,
    pub llm_token: Option<String>,
}

/// Settings change request. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelPatch {
    pub autoreply_enabled: Option<bool>,
    pub autoreply_frequency: Option<i64>,
    pub reply_safety: Option<i64>,
    pub llm_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandView {
    pub name: String,
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalView {
    pub user_id: String,
    pub login: Option<String>,
    pub display_name: Option<String>,
    pub manual: bool,
    pub created_at: i64,
}

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/channels", get(list_channels))
        .route(
            "/channels/:id",
            get(get_channel)
                .put(register_channel)
                .delete(unregister_channel)
                .patch(patch_channel),
        )
        .route("/channels/:id/commands", get(list_channel_commands))
        .route("/channels/:id/approvals", get(list_approvals))
        .route("/commands", get(list_global_commands))
}

fn db_error(e: DbError) -> (StatusCode, String) {
    match e {
        DbError::OutOfRange(msg) => (StatusCode::BAD_REQUEST, msg),
        e => {
            warn!(error = %e, "Management query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.error_code().to_string())
        }
    }
}

fn handler_error(e: HandlerError) -> (StatusCode, String) {
    match e {
        HandlerError::Db(e) => db_error(e),
        HandlerError::Transport(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        HandlerError::Api(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

/// Channel ids are numeric; leading zeros are dropped.
fn parse_id(raw: &str) -> ApiResult<String> {
    raw.parse::<u64>()
        .map(|id| id.to_string())
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid channel id: {}", raw)))
}

/// Token from the Authorization header, with or without a scheme.
fn access_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("OAuth "))
        .unwrap_or(value)
        .trim();
    (!token.is_empty()).then_some(token)
}

/// Resolve the caller from their access token.
async fn authenticate(hub: &Hub, headers: &HeaderMap) -> ApiResult<PlatformUser> {
    let Some(token) = access_token(headers) else {
        return Err((StatusCode::UNAUTHORIZED, "missing authorization header".into()));
    };
    match tokio::time::timeout(hub.config.twitch.api_timeout(), hub.platform.user_by_token(token)).await {
        Ok(Ok(Some(user))) => Ok(user),
        Ok(Ok(None)) => Err((StatusCode::UNAUTHORIZED, "invalid access token".into())),
        Ok(Err(e)) => Err((StatusCode::BAD_GATEWAY, e.to_string())),
        Err(_) => Err((StatusCode::GATEWAY_TIMEOUT, "token lookup timed out".into())),
    }
}

/// Platform users for `ids`, keyed by id. Lookup failures yield an empty map.
async fn users_by_id(hub: &Hub, ids: Vec<String>) -> HashMap<String, PlatformUser> {
    if ids.is_empty() {
        return HashMap::new();
    }
    match tokio::time::timeout(hub.config.twitch.api_timeout(), hub.platform.users_by_id(&ids)).await {
        Ok(Ok(users)) => users.into_iter().map(|u| (u.id.clone(), u)).collect(),
        Ok(Err(e)) => {
            warn!(error = %e, "User lookup failed");
            HashMap::new()
        }
        Err(_) => {
            warn!("User lookup timed out");
            HashMap::new()
        }
    }
}

async fn channel_view(hub: &Hub, channel_id: &str) -> ApiResult<ChannelView> {
    let channels = hub.db.channels();
    let Some(record) = channels.find_by_id(channel_id).await.map_err(db_error)? else {
        return Err((StatusCode::NOT_FOUND, format!("channel {} is not registered", channel_id)));
    };
    let settings = channels.settings(channel_id).await.map_err(db_error)?;
    Ok(ChannelView {
        channel_id: record.channel_id,
        login: record.channel_name,
        created_at: record.created_at,
        autoreply_enabled: settings.autoreply_enabled,
        autoreply_frequency: settings.autoreply_frequency,
        reply_safety: settings.reply_safety,
        llm_token: settings.llm_token.map(|_| MASKED_TOKEN.to_string()),
    })
}

/// Say one line outside of any invocation, respecting send spacing.
async fn announce(hub: &Hub, channel: &str, text: &str) {
    hub.pacer.wait(channel).await;
    match hub.transport.say(channel, text).await {
        Ok(()) => crate::metrics::record_line_sent(),
        Err(e) => warn!(channel, error = %e, "Unable to announce"),
    }
}

async fn list_channels(State(state): State<AppState>) -> ApiResult<Json<Vec<ChannelSummary>>> {
    let records = state.hub.db.channels().list().await.map_err(db_error)?;
    let users = users_by_id(&state.hub, records.iter().map(|r| r.channel_id.clone()).collect()).await;
    Ok(Json(
        records
            .into_iter()
            .map(|record| {
                let display_name = users
                    .get(&record.channel_id)
                    .map(|u| u.display_name.clone())
                    .unwrap_or_else(|| record.channel_name.clone());
                ChannelSummary {
                    channel_id: record.channel_id,
                    login: record.channel_name,
                    display_name,
                }
            })
            .collect(),
    ))
}

async fn get_channel(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<ChannelView>> {
    let id = parse_id(&id)?;
    Ok(Json(channel_view(&state.hub, &id).await?))
}

async fn register_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ChannelView>> {
    let id = parse_id(&id)?;
    let user = authenticate(&state.hub, &headers).await?;
    if user.id != id {
        return Err((StatusCode::FORBIDDEN, "not authorized to register this channel".into()));
    }

    agent::join_channel(&state.hub, &user.id, &user.login)
        .await
        .map_err(handler_error)?;
    info!(channel = %user.login, "Channel registered over the API");

    let hub = state.hub.clone();
    let greeting = format!("Hi {} 👋", user.display_name);
    let login = user.login.clone();
    tokio::spawn(async move {
        tokio::time::sleep(GREETING_DELAY).await;
        announce(&hub, &login, &greeting).await;
    });

    Ok(Json(channel_view(&state.hub, &id).await?))
}

async fn unregister_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    let user = authenticate(&state.hub, &headers).await?;
    if user.id != id {
        return Err((StatusCode::FORBIDDEN, "not authorized to unregister this channel".into()));
    }
    if id == state.hub.agent_id() {
        return Err((StatusCode::BAD_REQUEST, "the agent's own channel stays registered".into()));
    }
    let Some(record) = state.hub.db.channels().find_by_id(&id).await.map_err(db_error)? else {
        return Err((StatusCode::NOT_FOUND, format!("channel {} is not registered", id)));
    };

    // Say goodbye while still joined.
    announce(&state.hub, &record.channel_name, &format!("Bye {} 👋", user.display_name)).await;
    agent::leave_channel(&state.hub, &id, &record.channel_name)
        .await
        .map_err(handler_error)?;
    info!(channel = %record.channel_name, "Channel unregistered over the API");
    Ok(StatusCode::NO_CONTENT)
}

async fn patch_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<ChannelPatch>,
) -> ApiResult<Json<ChannelView>> {
    let id = parse_id(&id)?;
    let hub = &state.hub;
    let user = authenticate(hub, &headers).await?;
    if user.id != id && !hub.config.agent.is_admin(&user.login) {
        return Err((StatusCode::FORBIDDEN, "not authorized to change this channel".into()));
    }

    // Validate everything before writing anything.
    if let Some(frequency) = patch.autoreply_frequency
        && !FREQUENCY_RANGE.contains(&frequency)
    {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("autoreply frequency must be {}-{}", FREQUENCY_RANGE.start(), FREQUENCY_RANGE.end()),
        ));
    }
    if let Some(safety) = patch.reply_safety
        && !SAFETY_RANGE.contains(&safety)
    {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("reply safety must be {}-{}", SAFETY_RANGE.start(), SAFETY_RANGE.end()),
        ));
    }
    let token = patch.llm_token.as_deref().filter(|t| !t.is_empty());
    if let Some(token) = token
        && !hub.credential_valid(token)
    {
        return Err((StatusCode::BAD_REQUEST, "llm token has an invalid format".into()));
    }

    let channels = hub.db.channels();
    if channels.find_by_id(&id).await.map_err(db_error)?.is_none() {
        return Err((StatusCode::NOT_FOUND, format!("channel {} is not registered", id)));
    }
    if let Some(enabled) = patch.autoreply_enabled {
        channels.set_autoreply(&id, enabled).await.map_err(db_error)?;
    }
    if let Some(frequency) = patch.autoreply_frequency {
        channels.set_frequency(&id, frequency).await.map_err(db_error)?;
    }
    if let Some(safety) = patch.reply_safety {
        channels.set_safety(&id, safety).await.map_err(db_error)?;
    }
    if let Some(token) = token {
        channels.set_llm_token(&id, token).await.map_err(db_error)?;
    }
    info!(channel_id = %id, by = %user.login, "Channel settings changed over the API");

    Ok(Json(channel_view(hub, &id).await?))
}

async fn list_commands(hub: &Hub, scope: &Scope) -> ApiResult<Json<Vec<CommandView>>> {
    let records = hub.db.commands().list(scope).await.map_err(db_error)?;
    Ok(Json(
        records
            .into_iter()
            .map(|c| CommandView {
                name: c.name,
                template: c.template,
            })
            .collect(),
    ))
}

async fn list_channel_commands(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<CommandView>>> {
    let id = parse_id(&id)?;
    list_commands(&state.hub, &Scope::channel(id)).await
}

async fn list_global_commands(State(state): State<AppState>) -> ApiResult<Json<Vec<CommandView>>> {
    list_commands(&state.hub, &Scope::Global).await
}

async fn list_approvals(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ApprovalView>>> {
    let id = parse_id(&id)?;
    let approvals = state.hub.db.approvals().list(&id).await.map_err(db_error)?;
    let users = users_by_id(&state.hub, approvals.iter().map(|a| a.user_id.clone()).collect()).await;
    Ok(Json(
        approvals
            .into_iter()
            .map(|a| {
                let user = users.get(&a.user_id);
                ApprovalView {
                    login: user.map(|u| u.login.clone()),
                    display_name: user.map(|u| u.display_name.clone()),
                    user_id: a.user_id,
                    manual: a.manual,
                    created_at: a.created_at,
                }
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_access_token_schemes() {
        assert_eq!(access_token(&headers("Bearer abc123")), Some("abc123"));
        assert_eq!(access_token(&headers("OAuth abc123")), Some("abc123"));
        assert_eq!(access_token(&headers("abc123")), Some("abc123"));
        assert_eq!(access_token(&headers("Bearer ")), None);
        assert_eq!(access_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_channel_ids_are_numeric() {
        assert_eq!(parse_id("0100").unwrap(), "100");
        assert_eq!(parse_id("abc").unwrap_err().0, StatusCode::BAD_REQUEST);
        assert_eq!(parse_id("-5").unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_patch_fields_are_optional() {
        let patch: ChannelPatch = serde_json::from_str(r#"{"reply_safety": 2}"#).unwrap();
        assert_eq!(patch.reply_safety, Some(2));
        assert!(patch.autoreply_enabled.is_none() && patch.llm_token.is_none());
    }
}
