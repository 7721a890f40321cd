//! Known-bot registry.
//!
//! The list comes from an external service as
//! `{"bots": [[login, channel_count, user_id], ...]}` and is cached for a
//! configurable TTL. Malformed entries are skipped.

use super::ApiError;
use crate::config::ModerationConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownBot {
    pub login: String,
    /// Number of channels the account was seen in.
    pub channel_count: u64,
    pub user_id: String,
}

/// Snapshot of the registry keyed by lowercase login.
#[derive(Debug, Default)]
pub struct BotList {
    by_login: HashMap<String, KnownBot>,
}

impl BotList {
    pub fn new(bots: impl IntoIterator<Item = KnownBot>) -> Self {
        Self {
            by_login: bots
                .into_iter()
                .map(|b| (b.login.to_lowercase(), b))
                .collect(),
        }
    }

    pub fn get(&self, login: &str) -> Option<&KnownBot> {
        self.by_login.get(&login.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.by_login.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_login.is_empty()
    }

    /// Parse the registry's JSON payload.
    pub fn from_json(body: &str) -> Result<Self, ApiError> {
        #[derive(Deserialize)]
        struct Payload {
            bots: Vec<Vec<serde_json::Value>>,
        }

        let payload: Payload =
            serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))?;

        let mut skipped = 0usize;
        let bots: Vec<KnownBot> = payload
            .bots
            .into_iter()
            .filter_map(|entry| {
                let bot = parse_entry(&entry);
                if bot.is_none() {
                    skipped += 1;
                }
                bot
            })
            .collect();
        if skipped > 0 {
            debug!(skipped, "Skipped malformed bot list entries");
        }
        Ok(Self::new(bots))
    }
}

fn parse_entry(entry: &[serde_json::Value]) -> Option<KnownBot> {
    let login = entry.first()?.as_str()?.to_string();
    let channel_count = entry.get(1)?.as_u64()?;
    // Ids arrive as numbers from some mirrors and strings from others.
    let user_id = match entry.get(2)? {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        _ => return None,
    };
    Some(KnownBot {
        login,
        channel_count,
        user_id,
    })
}

#[async_trait]
pub trait BotRegistry: Send + Sync {
    /// Current list of known bots.
    async fn fetch(&self) -> Result<Arc<BotList>, ApiError>;
}

/// HTTP-backed registry with a TTL cache.
pub struct InsightsRegistry {
    client: Client,
    url: String,
    ttl: Duration,
    cache: Mutex<Option<(Instant, Arc<BotList>)>>,
}

impl InsightsRegistry {
    pub fn new(config: &ModerationConfig) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.fetch_timeout()).build()?;
        Ok(Self {
            client,
            url: config.bot_list_url.clone(),
            ttl: config.bot_list_ttl(),
            cache: Mutex::new(None),
        })
    }

    fn cached(&self) -> Option<Arc<BotList>> {
        let cache = self.cache.lock();
        match cache.as_ref() {
            Some((fetched_at, list)) if fetched_at.elapsed() < self.ttl => Some(list.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl BotRegistry for InsightsRegistry {
    async fn fetch(&self) -> Result<Arc<BotList>, ApiError> {
        if let Some(list) = self.cached() {
            return Ok(list);
        }

        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        let list = Arc::new(BotList::from_json(&body)?);
        info!(bots = list.len(), "Bot list refreshed");

        *self.cache.lock() = Some((Instant::now(), list.clone()));
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registry_payload() {
        let body = r#"{"bots":[["Nightbot",1200,19264788],["commanderroot","900","1"],
            ["streamelements",800,"100135110"],[42]],"_total":4}"#;
        let list = BotList::from_json(body).unwrap();
        assert_eq!(list.len(), 2);

        let bot = list.get("nightbot").unwrap();
        assert_eq!(bot.channel_count, 1200);
        assert_eq!(bot.user_id, "19264788");
        assert_eq!(list.get("StreamElements").unwrap().user_id, "100135110");
        assert!(list.get("commanderroot").is_none());
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(matches!(
            BotList::from_json("not json"),
            Err(ApiError::Decode(_))
        ));
    }
}
