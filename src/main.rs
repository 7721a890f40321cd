//! straybot - Straylight chat agent.

use std::sync::Arc;
use straybot::config::{Config, validate};
use straybot::db::Database;
use straybot::hub::{Collaborators, Hub};
use straybot::network::TwitchIrc;
use straybot::services::{HelixClient, InsightsRegistry, OpenAiCompletions};
use straybot::{agent, http, metrics};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        return Err(anyhow::anyhow!(
            "{} configuration error(s) in {}",
            errors.len(),
            config_path
        ));
    }

    info!(
        agent = %config.agent.username,
        channel_id = %config.agent.user_id,
        "Starting straybot"
    );

    // Persistence and chat are required; failing either is fatal.
    let db = Database::new(&config.database.path).await?;
    let (irc, events) = TwitchIrc::connect(&config.twitch, &config.agent.username).await?;

    let collaborators = Collaborators {
        platform: Arc::new(HelixClient::new(&config.twitch, &config.agent.user_id)?),
        llm: Arc::new(OpenAiCompletions::new(&config.llm)?),
        bots: Arc::new(InsightsRegistry::new(&config.moderation)?),
        transport: Arc::new(irc),
    };
    let webhook = config.webhook.clone();
    let hub = Arc::new(Hub::new(config, db, collaborators)?);

    metrics::init();
    if let Some(webhook) = webhook {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            http::run_http_server(hub, webhook).await;
        });
    } else {
        info!("HTTP listener disabled");
    }

    agent::join_known_channels(&hub).await?;
    agent::run(hub, events).await;

    Ok(())
}
