//! Shared agent state.
//!
//! The `Hub` is the central point handed to every event task: configuration,
//! the database, external collaborators behind their traits, and the
//! in-memory conversation state.

use crate::config::Config;
use crate::db::Database;
use crate::error::HubError;
use crate::handlers::CommandResolver;
use crate::network::ChatTransport;
use crate::security::{ModerationEngine, SendPacer};
use crate::services::{BotRegistry, CompletionBackend, PlatformApi};
use crate::state::ChannelManager;
use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;

/// External collaborators the agent talks to.
pub struct Collaborators {
    pub platform: Arc<dyn PlatformApi>,
    pub llm: Arc<dyn CompletionBackend>,
    pub bots: Arc<dyn BotRegistry>,
    pub transport: Arc<dyn ChatTransport>,
}

pub struct Hub {
    pub config: Config,
    pub db: Database,
    pub platform: Arc<dyn PlatformApi>,
    pub llm: Arc<dyn CompletionBackend>,
    pub transport: Arc<dyn ChatTransport>,
    /// Per-channel conversation actors, keyed by channel id.
    pub conversations: ChannelManager,
    pub resolver: CommandResolver,
    pub moderation: ModerationEngine,
    pub pacer: SendPacer,
    /// Client for the `get` template plugin.
    pub plugins: reqwest::Client,
    /// Channel login -> broadcaster id, learned from the transport.
    room_ids: DashMap<String, String>,
    credential_pattern: Regex,
}

impl Hub {
    pub fn new(config: Config, db: Database, collaborators: Collaborators) -> Result<Self, HubError> {
        let credential_pattern = Regex::new(&config.llm.credential_pattern)?;
        let plugins = reqwest::Client::builder()
            .timeout(config.plugins.http_timeout())
            .build()?;

        let conversations = ChannelManager::new(
            config.agent.history_limit,
            config.agent.thread_limit,
            config.agent.mailbox_capacity,
        );
        let moderation = ModerationEngine::new(
            config.moderation.clone(),
            db.clone(),
            collaborators.platform.clone(),
            collaborators.bots,
        );
        let pacer = SendPacer::new(config.agent.send_spacing());

        Ok(Self {
            db,
            platform: collaborators.platform,
            llm: collaborators.llm,
            transport: collaborators.transport,
            conversations,
            resolver: CommandResolver::new(),
            moderation,
            pacer,
            plugins,
            room_ids: DashMap::new(),
            credential_pattern,
            config,
        })
    }

    /// Login of the agent's own account.
    pub fn agent_login(&self) -> &str {
        &self.config.agent.username
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent.user_id
    }

    /// Name the agent speaks as inside completion prompts.
    pub fn persona(&self) -> &str {
        self.config
            .llm
            .persona_name
            .as_deref()
            .unwrap_or(&self.config.agent.username)
    }

    /// Whether a stored completion credential looks usable.
    pub fn credential_valid(&self, token: &str) -> bool {
        self.credential_pattern.is_match(token)
    }

    pub fn set_room_id(&self, channel: &str, room_id: &str) {
        self.room_ids.insert(channel.to_lowercase(), room_id.to_string());
    }

    pub fn room_id(&self, channel: &str) -> Option<String> {
        self.room_ids.get(&channel.to_lowercase()).map(|r| r.clone())
    }

    /// Callback URL and signing secret for follow subscriptions, when the
    /// webhook listener is publicly reachable.
    pub fn follow_callback(&self) -> Option<(&str, &str)> {
        let webhook = self.config.webhook.as_ref()?;
        let callback = webhook.callback_url.as_deref()?;
        Some((callback, webhook.secret.as_str()))
    }

    pub fn forget_room(&self, channel: &str) -> Option<String> {
        self.room_ids.remove(&channel.to_lowercase()).map(|(_, id)| id)
    }
}
