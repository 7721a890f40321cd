//! Function environment: the capabilities a template may call.
//!
//! Every capability is bound to one invocation. Lookups and moderation
//! actions never raise into the template; failures are logged and become
//! an empty string or a short diagnostic. Only misuse (wrong arity, bad
//! argument types) is a template error.

use super::Invocation;
use super::reply::{PromptSource, conversational_reply};
use crate::hub::Hub;
use crate::services::{ApiError, ModAction};
use crate::template::{FunctionEnv, TemplateError, Value, arity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Capability names, in the order `functions` lists them.
pub const FUNCTIONS: &[&str] = &[
    "reply",
    "user",
    "timeout",
    "ban",
    "unban",
    "delete",
    "clear",
    "userfollow",
    "stream",
    "chatters",
    "random",
    "duration",
    "get",
    "json",
    "counter",
    "increment",
    "add",
];

/// Units shown by `duration`.
const DURATION_UNITS: usize = 3;

pub struct FunctionEnvironment<'a> {
    hub: &'a Hub,
    inv: &'a Invocation,
}

fn type_error(name: &str, message: impl Into<String>) -> TemplateError {
    TemplateError::Type {
        name: name.to_string(),
        message: message.into(),
    }
}

fn int_arg(name: &str, value: &Value) -> Result<i64, TemplateError> {
    value
        .as_int()
        .ok_or_else(|| type_error(name, format!("expected int, got {}", value.type_name())))
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_string(value).map(Value::Str).unwrap_or_else(|e| {
        warn!(error = %e, "Unable to encode lookup result");
        Value::empty()
    })
}

impl<'a> FunctionEnvironment<'a> {
    pub fn new(hub: &'a Hub, inv: &'a Invocation) -> Self {
        Self { hub, inv }
    }

    /// Run a bounded platform lookup, folding failures into `None`.
    async fn lookup<T, F>(&self, what: &str, call: F) -> Option<T>
    where
        F: Future<Output = Result<Option<T>, ApiError>>,
    {
        match timeout(self.hub.config.twitch.api_timeout(), call).await {
            Ok(Ok(Some(found))) => Some(found),
            Ok(Ok(None)) => {
                debug!(channel = %self.inv.channel, what, "Lookup found nothing");
                None
            }
            Ok(Err(e)) => {
                warn!(channel = %self.inv.channel, user = %self.inv.user, what, error = %e, "Lookup failed");
                None
            }
            Err(_) => {
                warn!(channel = %self.inv.channel, what, "Lookup timed out");
                None
            }
        }
    }

    /// Id of the selected user, looked up by login when not yet known.
    async fn selected_user_id(&self) -> Option<String> {
        if !self.inv.selected_user_id.is_empty() {
            return Some(self.inv.selected_user_id.clone());
        }
        self.lookup("user", self.hub.platform.user_by_login(&self.inv.selected_user))
            .await
            .map(|u| u.id)
    }

    async fn moderate(&self, action: ModAction, duration: Option<u32>, reason: &str) -> Value {
        let outcome = match action {
            ModAction::Delete => {
                self.hub
                    .platform
                    .delete_message(&self.inv.channel_id, Some(&self.inv.message_id))
                    .await
            }
            ModAction::Clear => self.hub.platform.delete_message(&self.inv.channel_id, None).await,
            ModAction::Ban | ModAction::Timeout | ModAction::Unban => {
                let Some(user_id) = self.selected_user_id().await else {
                    return Value::empty();
                };
                if action == ModAction::Unban {
                    self.hub.platform.unban(&self.inv.channel_id, &user_id).await
                } else {
                    self.hub
                        .platform
                        .ban(&self.inv.channel_id, &user_id, duration, reason)
                        .await
                }
            }
        };
        if !outcome.is_success() {
            debug!(
                channel = %self.inv.channel,
                action = action.as_str(),
                outcome = outcome.as_str(),
                "Moderation action not applied"
            );
        }
        Value::Str(outcome.diagnostic(action))
    }

    async fn fetch(&self, url: &str) -> Value {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            debug!(channel = %self.inv.channel, url, "Refusing non-http plugin url");
            return Value::empty();
        }
        let response = match self
            .hub
            .plugins
            .get(url)
            .header(reqwest::header::ACCEPT, "text/plain")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(channel = %self.inv.channel, url, error = %e, "Plugin request failed");
                return Value::empty();
            }
        };
        let max_bytes = self.hub.config.plugins.max_body_bytes;
        let body = match read_capped(response, max_bytes).await {
            Ok(body) => body,
            Err(e) => {
                warn!(channel = %self.inv.channel, url, error = %e, "Unable to read plugin body");
                return Value::empty();
            }
        };
        Value::Str(clean_body(&body, max_bytes))
    }

    async fn counter_add(&self, name: &str, delta: i64) -> Option<i64> {
        match self
            .hub
            .db
            .counters()
            .add(&self.inv.channel_id, name, delta)
            .await
        {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(channel = %self.inv.channel, counter = name, error = %e, "Unable to update counter");
                None
            }
        }
    }
}

#[async_trait]
impl FunctionEnv for FunctionEnvironment<'_> {
    fn field(&self, name: &str) -> Option<Value> {
        self.inv.field(name)
    }

    fn has_function(&self, name: &str) -> bool {
        FUNCTIONS.contains(&name)
    }

    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
        match name {
            "reply" => {
                if args.len() > 1 {
                    arity(name, &args, 1)?;
                }
                // An explicit argument replaces the thread as prompt context.
                let custom = args
                    .first()
                    .map(|a| format!("{}\n", a.to_string().trim_end()))
                    .filter(|a| !a.trim().is_empty());
                let source = match &custom {
                    Some(prompt) => PromptSource::Custom(prompt),
                    None => PromptSource::Conversation,
                };
                let reply = conversational_reply(self.hub, self.inv, source).await;
                if reply.is_empty() {
                    return Ok(Value::empty());
                }
                Ok(Value::Str(format!("reply::delay::{}", reply)))
            }
            "user" => {
                arity(name, &args, 0)?;
                let user = if self.inv.selected_user_id.is_empty() {
                    self.lookup("user", self.hub.platform.user_by_login(&self.inv.selected_user))
                        .await
                } else {
                    self.lookup("user", self.hub.platform.user_by_id(&self.inv.selected_user_id))
                        .await
                };
                Ok(user.map(|u| to_json(&u)).unwrap_or_else(Value::empty))
            }
            "timeout" => {
                arity(name, &args, 2)?;
                let secs = int_arg(name, &args[0])?;
                let secs = u32::try_from(secs)
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| type_error(name, format!("invalid duration {}", secs)))?;
                Ok(self.moderate(ModAction::Timeout, Some(secs), &args[1].to_string()).await)
            }
            "ban" => {
                arity(name, &args, 1)?;
                Ok(self.moderate(ModAction::Ban, None, &args[0].to_string()).await)
            }
            "unban" => {
                arity(name, &args, 0)?;
                Ok(self.moderate(ModAction::Unban, None, "").await)
            }
            "delete" => {
                arity(name, &args, 0)?;
                Ok(self.moderate(ModAction::Delete, None, "").await)
            }
            "clear" => {
                arity(name, &args, 0)?;
                Ok(self.moderate(ModAction::Clear, None, "").await)
            }
            "userfollow" => {
                arity(name, &args, 0)?;
                let Some(user_id) = self.selected_user_id().await else {
                    return Ok(Value::empty());
                };
                let follow = self
                    .lookup("follow", self.hub.platform.follow(&self.inv.channel_id, &user_id))
                    .await;
                Ok(follow.map(|f| to_json(&f)).unwrap_or_else(Value::empty))
            }
            "stream" => {
                arity(name, &args, 0)?;
                let stream = self
                    .lookup("stream", self.hub.platform.stream(&self.inv.channel_id))
                    .await;
                Ok(stream.map(|s| to_json(&s)).unwrap_or_else(Value::empty))
            }
            "chatters" => {
                arity(name, &args, 0)?;
                let roster = self
                    .lookup("chatters", async {
                        self.hub.platform.chatters(&self.inv.channel_id).await.map(Some)
                    })
                    .await
                    .unwrap_or_default();
                Ok(Value::List(
                    roster.into_iter().map(|c| Value::Str(c.user_login)).collect(),
                ))
            }
            "random" => {
                arity(name, &args, 1)?;
                let max = int_arg(name, &args[0])?;
                if max < 0 {
                    return Err(type_error(name, "max must not be negative"));
                }
                let n = rand::thread_rng().gen_range(0..=max);
                Ok(Value::Int(n))
            }
            "duration" => {
                arity(name, &args, 1)?;
                let since = args[0].to_string();
                match DateTime::parse_from_rfc3339(since.trim()) {
                    Ok(start) => Ok(Value::Str(format_elapsed(
                        Utc::now() - start.with_timezone(&Utc),
                        DURATION_UNITS,
                    ))),
                    Err(e) => {
                        debug!(channel = %self.inv.channel, time = %since, error = %e, "Unable to parse time");
                        Ok(Value::empty())
                    }
                }
            }
            "get" => {
                arity(name, &args, 1)?;
                Ok(self.fetch(&args[0].to_string()).await)
            }
            "json" => {
                arity(name, &args, 2)?;
                Ok(Value::Str(json_field(&args[0].to_string(), &args[1].to_string())))
            }
            "counter" => {
                arity(name, &args, 1)?;
                let counter = args[0].to_string();
                match self.hub.db.counters().get(&self.inv.channel_id, &counter).await {
                    Ok(value) => Ok(Value::Int(value)),
                    Err(e) => {
                        warn!(channel = %self.inv.channel, counter = %counter, error = %e, "Unable to read counter");
                        Ok(Value::Int(0))
                    }
                }
            }
            "increment" => {
                arity(name, &args, 1)?;
                self.counter_add(&args[0].to_string(), 1).await;
                Ok(Value::empty())
            }
            "add" => {
                arity(name, &args, 2)?;
                let delta = int_arg(name, &args[1])?;
                Ok(self
                    .counter_add(&args[0].to_string(), delta)
                    .await
                    .map(Value::Int)
                    .unwrap_or_else(Value::empty))
            }
            other => Err(TemplateError::UnknownFunction(other.to_string())),
        }
    }
}

/// Read at most `max_bytes` of a response body. The rest is never pulled
/// off the wire. A multi-byte character split by the cap is dropped.
pub async fn read_capped(mut response: reqwest::Response, max_bytes: usize) -> Result<String, reqwest::Error> {
    let mut buf: Vec<u8> = Vec::with_capacity(max_bytes.min(8192));
    while buf.len() < max_bytes {
        let Some(chunk) = response.chunk().await? else {
            break;
        };
        let take = chunk.len().min(max_bytes - buf.len());
        buf.extend_from_slice(&chunk[..take]);
    }
    if let Err(e) = std::str::from_utf8(&buf)
        && e.error_len().is_none()
    {
        buf.truncate(e.valid_up_to());
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Flatten a plugin body onto one line and cap its size.
pub fn clean_body(body: &str, max_bytes: usize) -> String {
    let mut out = body.replace('\n', " ").replace('\r', "");
    if out.len() > max_bytes {
        let mut cut = max_bytes;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}

/// Field `key` of a JSON object. Strings come back raw, other values as
/// JSON. Missing keys and invalid input give an empty string.
pub fn json_field(key: &str, json: &str) -> String {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(json) else {
        debug!(key, "Unable to parse json object");
        return String::new();
    };
    match map.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Human-readable elapsed time using the `limit` largest non-zero units,
/// e.g. `2 days 3 hours 4 minutes`.
pub fn format_elapsed(elapsed: chrono::Duration, limit: usize) -> String {
    const UNITS: &[(&str, i64)] = &[
        ("year", 365 * 24 * 3600),
        ("week", 7 * 24 * 3600),
        ("day", 24 * 3600),
        ("hour", 3600),
        ("minute", 60),
        ("second", 1),
    ];

    let mut remaining = elapsed.num_seconds().max(0);
    let mut parts = Vec::new();
    for (unit, secs) in UNITS {
        if parts.len() == limit {
            break;
        }
        let count = remaining / secs;
        remaining %= secs;
        if count > 0 {
            let plural = if count == 1 { "" } else { "s" };
            parts.push(format!("{} {}{}", count, unit, plural));
        }
    }
    if parts.is_empty() {
        return "0 seconds".to_string();
    }
    parts.join(" ")
}
