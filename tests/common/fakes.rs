//! Fake collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use straybot::network::{ChatTransport, TransportError};
use straybot::services::{
    ApiError, BotList, BotRegistry, Chatter, CompletionBackend, CompletionRequest,
    EventSubscription, FollowInfo, KnownBot, ModerationOutcome, PlatformApi, PlatformUser,
    StreamInfo, SubscriptionTransport,
};

pub fn user(id: &str, login: &str, created_at: DateTime<Utc>) -> PlatformUser {
    PlatformUser {
        id: id.into(),
        login: login.into(),
        display_name: login.into(),
        kind: String::new(),
        broadcaster_type: String::new(),
        description: String::new(),
        profile_image_url: String::new(),
        created_at,
    }
}

/// Platform API fake. Every login resolves to `id-<login>` unless listed in
/// `users`.
#[derive(Default)]
pub struct FakePlatform {
    pub users: Mutex<HashMap<String, PlatformUser>>,
    pub stream: Mutex<Option<StreamInfo>>,
    pub roster: Mutex<Vec<Chatter>>,
    pub bans: Mutex<Vec<(String, String, Option<u32>, String)>>,
    pub deletes: Mutex<Vec<Option<String>>>,
    pub ban_outcome: Mutex<Option<ModerationOutcome>>,
    /// Access token to owner, for authenticated management calls.
    pub tokens: Mutex<HashMap<String, PlatformUser>>,
    pub subscriptions: Mutex<Vec<EventSubscription>>,
    pub unsubscribed: Mutex<Vec<String>>,
}

pub fn subscription(id: &str, broadcaster_id: &str, callback: &str) -> EventSubscription {
    EventSubscription {
        id: id.into(),
        kind: "channel.follow".into(),
        status: "enabled".into(),
        condition: HashMap::from([(
            "broadcaster_user_id".to_string(),
            serde_json::Value::String(broadcaster_id.into()),
        )]),
        transport: SubscriptionTransport {
            method: "webhook".into(),
            callback: Some(callback.into()),
        },
    }
}

impl FakePlatform {
    pub fn add_user(&self, user: PlatformUser) {
        self.users.lock().unwrap().insert(user.login.clone(), user);
    }

    pub fn bans(&self) -> Vec<(String, String, Option<u32>, String)> {
        self.bans.lock().unwrap().clone()
    }

    /// Register `user` and make `token` authenticate as them.
    pub fn add_token(&self, token: &str, user: PlatformUser) {
        self.add_user(user.clone());
        self.tokens.lock().unwrap().insert(token.to_string(), user);
    }

    /// Broadcaster ids with a live follow subscription to `callback`.
    pub fn subscribed(&self, callback: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.callback() == Some(callback))
            .filter_map(|s| s.broadcaster_id().map(str::to_string))
            .collect();
        ids.sort();
        ids
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.unsubscribed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn user_by_login(&self, login: &str) -> Result<Option<PlatformUser>, ApiError> {
        let users = self.users.lock().unwrap();
        Ok(Some(users.get(login).cloned().unwrap_or_else(|| {
            user(&format!("id-{}", login), login, Utc::now() - chrono::Duration::days(365))
        })))
    }

    async fn user_by_id(&self, user_id: &str) -> Result<Option<PlatformUser>, ApiError> {
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.id == user_id).cloned())
    }

    async fn users_by_id(&self, user_ids: &[String]) -> Result<Vec<PlatformUser>, ApiError> {
        let users = self.users.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter_map(|id| users.values().find(|u| &u.id == id).cloned())
            .collect())
    }

    async fn user_by_token(&self, token: &str) -> Result<Option<PlatformUser>, ApiError> {
        Ok(self.tokens.lock().unwrap().get(token).cloned())
    }

    async fn stream(&self, _: &str) -> Result<Option<StreamInfo>, ApiError> {
        Ok(self.stream.lock().unwrap().clone())
    }

    async fn follow(&self, _: &str, _: &str) -> Result<Option<FollowInfo>, ApiError> {
        Ok(None)
    }

    async fn chatters(&self, _: &str) -> Result<Vec<Chatter>, ApiError> {
        Ok(self.roster.lock().unwrap().clone())
    }

    async fn ban(
        &self,
        broadcaster_id: &str,
        user_id: &str,
        duration_secs: Option<u32>,
        reason: &str,
    ) -> ModerationOutcome {
        self.bans.lock().unwrap().push((
            broadcaster_id.to_string(),
            user_id.to_string(),
            duration_secs,
            reason.to_string(),
        ));
        self.ban_outcome
            .lock()
            .unwrap()
            .unwrap_or(ModerationOutcome::Success)
    }

    async fn unban(&self, _: &str, _: &str) -> ModerationOutcome {
        ModerationOutcome::Success
    }

    async fn delete_message(&self, _: &str, message_id: Option<&str>) -> ModerationOutcome {
        self.deletes
            .lock()
            .unwrap()
            .push(message_id.map(str::to_string));
        ModerationOutcome::Success
    }

    async fn subscribe_follows(&self, broadcaster_id: &str, callback: &str, _: &str) -> Result<(), ApiError> {
        let mut subs = self.subscriptions.lock().unwrap();
        if !subs
            .iter()
            .any(|s| s.broadcaster_id() == Some(broadcaster_id) && s.callback() == Some(callback))
        {
            subs.push(subscription(&format!("sub-{}", broadcaster_id), broadcaster_id, callback));
        }
        Ok(())
    }

    async fn follow_subscriptions(&self) -> Result<Vec<EventSubscription>, ApiError> {
        Ok(self.subscriptions.lock().unwrap().clone())
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<(), ApiError> {
        self.subscriptions
            .lock()
            .unwrap()
            .retain(|s| s.id != subscription_id);
        self.unsubscribed
            .lock()
            .unwrap()
            .push(subscription_id.to_string());
        Ok(())
    }
}

/// Completion fake returning a fixed text and recording prompts.
pub struct FakeLlm {
    pub response: Mutex<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl Default for FakeLlm {
    fn default() -> Self {
        Self {
            response: Mutex::new(" sounds like fun!\npartial li".to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

impl FakeLlm {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionBackend for FakeLlm {
    async fn complete(&self, _: &str, request: &CompletionRequest) -> Result<Vec<String>, ApiError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        Ok(vec![self.response.lock().unwrap().clone()])
    }
}

/// Bot registry fake holding a single known bot, `spambot`.
pub struct FakeBots {
    pub fail: Mutex<bool>,
}

impl Default for FakeBots {
    fn default() -> Self {
        Self {
            fail: Mutex::new(false),
        }
    }
}

#[async_trait]
impl BotRegistry for FakeBots {
    async fn fetch(&self) -> Result<Arc<BotList>, ApiError> {
        if *self.fail.lock().unwrap() {
            return Err(ApiError::Status(502));
        }
        Ok(Arc::new(BotList::new([KnownBot {
            login: "spambot".into(),
            channel_count: 812,
            user_id: "id-spambot".into(),
        }])))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub channel: String,
    pub parent_id: Option<String>,
    pub text: String,
}

/// Transport fake recording every outbound action.
#[derive(Default)]
pub struct FakeTransport {
    pub lines: Mutex<Vec<Sent>>,
    pub joins: Mutex<Vec<String>>,
    pub parts: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn sent(&self) -> Vec<Sent> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn say(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        self.lines.lock().unwrap().push(Sent {
            channel: channel.into(),
            parent_id: None,
            text: text.into(),
        });
        Ok(())
    }

    async fn reply(&self, channel: &str, parent_id: &str, text: &str) -> Result<(), TransportError> {
        self.lines.lock().unwrap().push(Sent {
            channel: channel.into(),
            parent_id: Some(parent_id.into()),
            text: text.into(),
        });
        Ok(())
    }

    async fn join(&self, channel: &str) -> Result<(), TransportError> {
        self.joins.lock().unwrap().push(channel.into());
        Ok(())
    }

    async fn part(&self, channel: &str) -> Result<(), TransportError> {
        self.parts.lock().unwrap().push(channel.into());
        Ok(())
    }
}
