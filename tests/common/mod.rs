//! Integration test common infrastructure.
//!
//! In-process fakes for every external collaborator plus a `TestAgent`
//! that wires them into a real `Hub` over an in-memory database.

#![allow(dead_code)]

pub mod fakes;

pub use fakes::{FakeBots, FakeLlm, FakePlatform, FakeTransport, Sent};

use std::sync::Arc;
use straybot::config::{Config, WebhookConfig};
use straybot::db::Database;
use straybot::hub::{Collaborators, Hub};
use straybot::network::IncomingMessage;
use straybot::state::ReplyParent;

pub const AGENT_LOGIN: &str = "straybot";
pub const AGENT_ID: &str = "1";
pub const CHANNEL: &str = "alice";
pub const CHANNEL_ID: &str = "100";
pub const LLM_TOKEN: &str = "sk-testtesttesttesttesttest";
pub const WEBHOOK_SECRET: &str = "s3cret-webhook-key";
pub const CALLBACK_URL: &str = "https://straybot.example.com/webhooks/follows";

const CONFIG: &str = r#"
[agent]
username = "straybot"
user_id = "1"
admins = ["root"]
send_spacing_ms = 0
simulate_typing = false

[twitch]
oauth_token = "oauth:testtoken"
client_id = "test-client"

[database]
path = ":memory:"
"#;

pub struct TestAgent {
    pub hub: Arc<Hub>,
    pub platform: Arc<FakePlatform>,
    pub llm: Arc<FakeLlm>,
    pub bots: Arc<FakeBots>,
    pub transport: Arc<FakeTransport>,
}

impl TestAgent {
    /// Agent with channel `alice` (id 100) registered.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let mut config: Config = toml::from_str(CONFIG).expect("test config");
        adjust(&mut config);

        let db = Database::new(":memory:").await.expect("memory database");
        db.channels().register(CHANNEL_ID, CHANNEL).await.expect("register channel");

        let platform = Arc::new(FakePlatform::default());
        let llm = Arc::new(FakeLlm::default());
        let bots = Arc::new(FakeBots::default());
        let transport = Arc::new(FakeTransport::default());

        let hub = Hub::new(
            config,
            db,
            Collaborators {
                platform: platform.clone(),
                llm: llm.clone(),
                bots: bots.clone(),
                transport: transport.clone(),
            },
        )
        .expect("hub");
        hub.set_room_id(CHANNEL, CHANNEL_ID);

        Self {
            hub: Arc::new(hub),
            platform,
            llm,
            bots,
            transport,
        }
    }

    /// Turn autoreply on with a valid credential.
    pub async fn enable_autoreply(&self, frequency: i64) {
        let channels = self.hub.db.channels();
        channels.set_autoreply(CHANNEL_ID, true).await.unwrap();
        channels.set_frequency(CHANNEL_ID, frequency).await.unwrap();
        channels.set_llm_token(CHANNEL_ID, LLM_TOKEN).await.unwrap();
    }

    pub async fn say(&self, msg: IncomingMessage) {
        straybot::handlers::handle_message(&self.hub, msg)
            .await
            .expect("message handled");
    }

    /// Lines sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.transport.sent().into_iter().map(|s| s.text).collect()
    }

    /// Serve the HTTP router on an ephemeral port. `extra` is appended to a
    /// minimal listener config. Returns the base URL.
    pub async fn serve(&self, extra: &str) -> String {
        let config: WebhookConfig = toml::from_str(&format!(
            "listen = \"127.0.0.1:0\"\nsecret = \"{}\"\n{}",
            WEBHOOK_SECRET, extra
        ))
        .expect("listener config");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = straybot::http::router(self.hub.clone(), config);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }
}

/// Listener config with a public follow callback.
pub fn public_webhook() -> WebhookConfig {
    toml::from_str(&format!(
        "listen = \"127.0.0.1:0\"\nsecret = \"{}\"\ncallback_url = \"{}\"\n",
        WEBHOOK_SECRET, CALLBACK_URL
    ))
    .expect("listener config")
}

static NEXT_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

/// A plain viewer message in `#alice`.
pub fn message(user: &str, text: &str) -> IncomingMessage {
    let id = NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    IncomingMessage {
        channel: CHANNEL.into(),
        room_id: CHANNEL_ID.into(),
        message_id: format!("msg-{}", id),
        user_id: format!("id-{}", user),
        user: user.into(),
        display_name: user.into(),
        text: text.into(),
        is_mod: false,
        is_broadcaster: false,
        is_sub: false,
        reply_parent: None,
        received_at: chrono::Utc::now(),
    }
}

pub fn mod_message(user: &str, text: &str) -> IncomingMessage {
    IncomingMessage {
        is_mod: true,
        ..message(user, text)
    }
}

pub fn owner_message(text: &str) -> IncomingMessage {
    IncomingMessage {
        user_id: CHANNEL_ID.into(),
        is_broadcaster: true,
        is_mod: true,
        ..message(CHANNEL, text)
    }
}

/// A reply to one of the agent's messages.
pub fn reply_to_agent(user: &str, text: &str, parent_body: &str) -> IncomingMessage {
    IncomingMessage {
        reply_parent: Some(ReplyParent {
            message_id: "agent-msg".into(),
            user_id: AGENT_ID.into(),
            user_login: AGENT_LOGIN.into(),
            body: parent_body.into(),
        }),
        ..message(user, &format!("@{} {}", AGENT_LOGIN, text))
    }
}
