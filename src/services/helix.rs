//! Streaming-platform API client.
//!
//! Lookups return `Ok(None)` for unknown users or offline streams. Moderation
//! primitives never fail: the HTTP status is folded into a
//! [`ModerationOutcome`].
//!
//! Follow subscriptions (EventSub over webhook) need an app access token,
//! obtained with the client credentials grant and cached until shortly
//! before it expires. Everything else runs as the agent's user token.

use super::ApiError;
use crate::config::TwitchConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on chatter roster pages fetched per call.
const MAX_CHATTER_PAGES: usize = 10;
/// Upper bound on subscription pages fetched per call.
const MAX_SUBSCRIPTION_PAGES: usize = 10;
/// Helix accepts at most this many ids per `/users` call.
const USERS_PER_REQUEST: usize = 100;
/// App tokens are refreshed this long before they expire.
const APP_TOKEN_MARGIN: Duration = Duration::from_secs(60);

pub const FOLLOW_SUBSCRIPTION: &str = "channel.follow";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformUser {
    pub id: String,
    pub login: String,
    pub display_name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub broadcaster_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub profile_image_url: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub id: String,
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub viewer_count: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowInfo {
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    pub followed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chatter {
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
}

/// An EventSub subscription owned by the application.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventSubscription {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub condition: HashMap<String, serde_json::Value>,
    pub transport: SubscriptionTransport,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionTransport {
    pub method: String,
    #[serde(default)]
    pub callback: Option<String>,
}

impl EventSubscription {
    pub fn broadcaster_id(&self) -> Option<&str> {
        self.condition
            .get("broadcaster_user_id")
            .and_then(|v| v.as_str())
    }

    pub fn callback(&self) -> Option<&str> {
        self.transport.callback.as_deref()
    }
}

/// Which moderation primitive produced an outcome. Selects the diagnostic text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModAction {
    Ban,
    Timeout,
    Unban,
    Delete,
    Clear,
}

impl ModAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Timeout => "timeout",
            Self::Unban => "unban",
            Self::Delete => "delete",
            Self::Clear => "clear",
        }
    }

    fn required_scope(&self) -> &'static str {
        match self {
            Self::Ban | Self::Timeout | Self::Unban => "moderator:manage:banned_users",
            Self::Delete | Self::Clear => "moderator:manage:chat_messages",
        }
    }
}

/// Result of a moderation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationOutcome {
    Success,
    /// 401 when `token_rejected`, otherwise 403 (agent is not a moderator).
    NotAuthorized { token_rejected: bool },
    /// Unknown message, or too old to delete.
    NotFound,
    RateLimited,
    BadRequest,
    /// Target is already being moderated by someone else.
    Conflict,
    /// The call never got a response.
    Unavailable,
}

impl ModerationOutcome {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            200..=299 => Self::Success,
            400 => Self::BadRequest,
            401 => Self::NotAuthorized {
                token_rejected: true,
            },
            403 => Self::NotAuthorized {
                token_rejected: false,
            },
            404 => Self::NotFound,
            409 => Self::Conflict,
            429 => Self::RateLimited,
            _ => Self::Unavailable,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NotAuthorized {
                token_rejected: true,
            } => "unauthorized",
            Self::NotAuthorized {
                token_rejected: false,
            } => "forbidden",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::BadRequest => "bad_request",
            Self::Conflict => "conflict",
            Self::Unavailable => "unavailable",
        }
    }

    /// Short text for the template, or empty for silent outcomes.
    ///
    /// Message deletion only reports token problems; the other failures
    /// (protected message, too old, not a moderator) are routine.
    pub fn diagnostic(&self, action: ModAction) -> String {
        let token_problem = format!(
            "unauthorized, check token scope for {}, or client-id",
            action.required_scope()
        );
        match (self, action) {
            (
                Self::NotAuthorized {
                    token_rejected: true,
                },
                _,
            ) => token_problem,
            (_, ModAction::Delete | ModAction::Clear) => String::new(),
            (Self::BadRequest, _) => "bad request".to_string(),
            (Self::RateLimited, _) => "rate limited".to_string(),
            _ => String::new(),
        }
    }
}

/// Streaming-platform operations used by the agent.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn user_by_login(&self, login: &str) -> Result<Option<PlatformUser>, ApiError>;

    async fn user_by_id(&self, user_id: &str) -> Result<Option<PlatformUser>, ApiError>;

    /// Users for a batch of ids. Unknown ids are left out.
    async fn users_by_id(&self, user_ids: &[String]) -> Result<Vec<PlatformUser>, ApiError>;

    /// Owner of a user access token, `None` when the token is rejected.
    async fn user_by_token(&self, token: &str) -> Result<Option<PlatformUser>, ApiError>;

    /// Live stream of a broadcaster, `None` when offline.
    async fn stream(&self, broadcaster_id: &str) -> Result<Option<StreamInfo>, ApiError>;

    /// Follow relationship of `user_id` to the broadcaster.
    async fn follow(&self, broadcaster_id: &str, user_id: &str) -> Result<Option<FollowInfo>, ApiError>;

    /// Current chatter roster of a channel.
    async fn chatters(&self, broadcaster_id: &str) -> Result<Vec<Chatter>, ApiError>;

    /// Ban, or time out when `duration_secs` is set.
    async fn ban(
        &self,
        broadcaster_id: &str,
        user_id: &str,
        duration_secs: Option<u32>,
        reason: &str,
    ) -> ModerationOutcome;

    async fn unban(&self, broadcaster_id: &str, user_id: &str) -> ModerationOutcome;

    /// Delete one message, or clear the whole chat when `message_id` is `None`.
    async fn delete_message(&self, broadcaster_id: &str, message_id: Option<&str>) -> ModerationOutcome;

    /// Subscribe a channel's follows to a webhook. An existing identical
    /// subscription counts as success.
    async fn subscribe_follows(&self, broadcaster_id: &str, callback: &str, secret: &str) -> Result<(), ApiError>;

    /// Follow subscriptions owned by the application.
    async fn follow_subscriptions(&self) -> Result<Vec<EventSubscription>, ApiError>;

    /// Delete a subscription. Deleting one that is already gone succeeds.
    async fn unsubscribe(&self, subscription_id: &str) -> Result<(), ApiError>;
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: Vec<T>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Default, Deserialize)]
struct Pagination {
    cursor: Option<String>,
}

#[derive(Serialize)]
struct BanBody<'a> {
    data: BanData<'a>,
}

#[derive(Serialize)]
struct BanData<'a> {
    user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<u32>,
    reason: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct AppToken {
    token: String,
    refresh_at: Instant,
}

/// Helix REST client authenticated as the agent's account.
pub struct HelixClient {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: Option<String>,
    token_url: String,
    token: String,
    moderator_id: String,
    app_token: Mutex<Option<AppToken>>,
}

impl HelixClient {
    pub fn new(config: &TwitchConfig, moderator_id: &str) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.api_timeout()).build()?;
        Ok(Self::with_client(client, config, moderator_id))
    }

    pub fn with_client(client: Client, config: &TwitchConfig, moderator_id: &str) -> Self {
        Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone().filter(|s| !s.is_empty()),
            token_url: config.token_url.clone(),
            token: config.bearer_token().to_string(),
            moderator_id: moderator_id.to_string(),
            app_token: Mutex::new(None),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.request_as(method, path, &self.token)
    }

    fn request_as(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header("Client-Id", &self.client_id)
    }

    /// Cached app access token, fetched on first use and after expiry.
    async fn app_token(&self) -> Result<String, ApiError> {
        let cached = self
            .app_token
            .lock()
            .as_ref()
            .filter(|t| t.refresh_at > Instant::now())
            .map(|t| t.token.clone());
        if let Some(token) = cached {
            return Ok(token);
        }

        let secret = self
            .client_secret
            .as_deref()
            .ok_or(ApiError::NotConfigured("twitch.client_secret"))?;
        let response = self
            .client
            .post(&self.token_url)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", secret),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(APP_TOKEN_MARGIN);
        *self.app_token.lock() = Some(AppToken {
            token: body.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        debug!(expires_in = body.expires_in, "Fetched app access token");
        Ok(body.access_token)
    }

    async fn get_data<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<DataEnvelope<T>, ApiError> {
        let response = self.request(Method::GET, path).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        response
            .json::<DataEnvelope<T>>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn first<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, ApiError> {
        Ok(self.get_data(path, query).await?.data.into_iter().next())
    }

    async fn moderate(&self, request: RequestBuilder, action: ModAction) -> ModerationOutcome {
        let outcome = match request.send().await {
            Ok(response) => ModerationOutcome::from_status(response.status()),
            Err(e) => {
                warn!(action = action.as_str(), error = %e, "Moderation request failed");
                ModerationOutcome::Unavailable
            }
        };
        debug!(action = action.as_str(), outcome = outcome.as_str(), "Moderation call finished");
        crate::metrics::record_moderation(action.as_str(), outcome.as_str());
        outcome
    }
}

#[async_trait]
impl PlatformApi for HelixClient {
    async fn user_by_login(&self, login: &str) -> Result<Option<PlatformUser>, ApiError> {
        self.first("/users", &[("login", login)]).await
    }

    async fn user_by_id(&self, user_id: &str) -> Result<Option<PlatformUser>, ApiError> {
        self.first("/users", &[("id", user_id)]).await
    }

    async fn users_by_id(&self, user_ids: &[String]) -> Result<Vec<PlatformUser>, ApiError> {
        let mut users = Vec::with_capacity(user_ids.len());
        for batch in user_ids.chunks(USERS_PER_REQUEST) {
            let query: Vec<(&str, &str)> = batch.iter().map(|id| ("id", id.as_str())).collect();
            let page: DataEnvelope<PlatformUser> = self.get_data("/users", &query).await?;
            users.extend(page.data);
        }
        Ok(users)
    }

    async fn user_by_token(&self, token: &str) -> Result<Option<PlatformUser>, ApiError> {
        let response = self.request_as(Method::GET, "/users", token).send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED => Ok(None),
            status if !status.is_success() => Err(ApiError::Status(status.as_u16())),
            _ => {
                let body: DataEnvelope<PlatformUser> = response
                    .json()
                    .await
                    .map_err(|e| ApiError::Decode(e.to_string()))?;
                Ok(body.data.into_iter().next())
            }
        }
    }

    async fn stream(&self, broadcaster_id: &str) -> Result<Option<StreamInfo>, ApiError> {
        self.first("/streams", &[("user_id", broadcaster_id), ("first", "1")])
            .await
    }

    async fn follow(&self, broadcaster_id: &str, user_id: &str) -> Result<Option<FollowInfo>, ApiError> {
        self.first(
            "/channels/followers",
            &[("broadcaster_id", broadcaster_id), ("user_id", user_id)],
        )
        .await
    }

    async fn chatters(&self, broadcaster_id: &str) -> Result<Vec<Chatter>, ApiError> {
        let mut roster = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_CHATTER_PAGES {
            let mut query = vec![
                ("broadcaster_id", broadcaster_id),
                ("moderator_id", self.moderator_id.as_str()),
                ("first", "1000"),
            ];
            if let Some(ref after) = cursor {
                query.push(("after", after.as_str()));
            }
            let page: DataEnvelope<Chatter> = self.get_data("/chat/chatters", &query).await?;
            roster.extend(page.data);
            match page.pagination.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(roster)
    }

    async fn ban(
        &self,
        broadcaster_id: &str,
        user_id: &str,
        duration_secs: Option<u32>,
        reason: &str,
    ) -> ModerationOutcome {
        let action = if duration_secs.is_some() {
            ModAction::Timeout
        } else {
            ModAction::Ban
        };
        let body = BanBody {
            data: BanData {
                user_id,
                duration: duration_secs,
                reason,
            },
        };
        let request = self
            .request(Method::POST, "/moderation/bans")
            .query(&[
                ("broadcaster_id", broadcaster_id),
                ("moderator_id", self.moderator_id.as_str()),
            ])
            .json(&body);
        self.moderate(request, action).await
    }

    async fn unban(&self, broadcaster_id: &str, user_id: &str) -> ModerationOutcome {
        let request = self.request(Method::DELETE, "/moderation/bans").query(&[
            ("broadcaster_id", broadcaster_id),
            ("moderator_id", self.moderator_id.as_str()),
            ("user_id", user_id),
        ]);
        self.moderate(request, ModAction::Unban).await
    }

    async fn delete_message(&self, broadcaster_id: &str, message_id: Option<&str>) -> ModerationOutcome {
        let mut query = vec![
            ("broadcaster_id", broadcaster_id),
            ("moderator_id", self.moderator_id.as_str()),
        ];
        let action = match message_id {
            Some(id) => {
                query.push(("message_id", id));
                ModAction::Delete
            }
            None => ModAction::Clear,
        };
        let request = self.request(Method::DELETE, "/moderation/chat").query(&query);
        self.moderate(request, action).await
    }

    async fn subscribe_follows(&self, broadcaster_id: &str, callback: &str, secret: &str) -> Result<(), ApiError> {
        let token = self.app_token().await?;
        let body = json!({
            "type": FOLLOW_SUBSCRIPTION,
            "version": "2",
            "condition": {
                "broadcaster_user_id": broadcaster_id,
                "moderator_user_id": self.moderator_id,
            },
            "transport": {
                "method": "webhook",
                "callback": callback,
                "secret": secret,
            },
        });
        let response = self
            .request_as(Method::POST, "/eventsub/subscriptions", &token)
            .json(&body)
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => {
                info!(broadcaster_id, "Follow subscription requested");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(broadcaster_id, "Follow subscription already exists");
                Ok(())
            }
            status => Err(ApiError::Status(status.as_u16())),
        }
    }

    async fn follow_subscriptions(&self) -> Result<Vec<EventSubscription>, ApiError> {
        let token = self.app_token().await?;
        let mut subscriptions = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_SUBSCRIPTION_PAGES {
            let mut query = vec![("type", FOLLOW_SUBSCRIPTION)];
            if let Some(ref after) = cursor {
                query.push(("after", after.as_str()));
            }
            let response = self
                .request_as(Method::GET, "/eventsub/subscriptions", &token)
                .query(&query)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ApiError::Status(status.as_u16()));
            }
            let page: DataEnvelope<EventSubscription> = response
                .json()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()))?;
            subscriptions.extend(page.data);
            match page.pagination.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(subscriptions)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<(), ApiError> {
        let token = self.app_token().await?;
        let response = self
            .request_as(Method::DELETE, "/eventsub/subscriptions", &token)
            .query(&[("id", subscription_id)])
            .send()
            .await?;
        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            status => Err(ApiError::Status(status.as_u16())),
        }
    }
}
