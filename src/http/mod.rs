//! HTTP listener: follow webhook, channel management API and Prometheus
//! `/metrics`.
//!
//! Everything shares one listener and one `AppState`. Management routes
//! and `/metrics` are mounted only when enabled in [`WebhookConfig`].

mod management;
mod webhook;

pub use management::{
    ApprovalView, ChannelPatch, ChannelSummary, ChannelView, CommandView, GREETING_DELAY, MASKED_TOKEN,
};
pub use webhook::{
    FollowEvent, HEADER_MESSAGE_ID, HEADER_SIGNATURE, HEADER_TIMESTAMP, HEADER_TYPE, is_new_account,
    on_follow,
};

use crate::config::WebhookConfig;
use crate::hub::Hub;
use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
    config: Arc<WebhookConfig>,
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Browser origins allowed to call the management API. Unparseable entries
/// are skipped.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid allowed origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
            ])
            .allow_headers(AllowHeaders::list([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
            ])),
    )
}

/// Build the router.
pub fn router(hub: Arc<Hub>, config: WebhookConfig) -> Router {
    let serve_metrics = config.metrics;
    let serve_management = config.management;
    let timeout = config.request_timeout();
    let cors = cors_layer(&config.allowed_origins);
    let state = AppState {
        hub,
        config: Arc::new(config),
    };

    let mut router = Router::new().route("/webhooks/follows", post(webhook::follow_webhook));
    if serve_management {
        let mut api = management::routes();
        if let Some(cors) = cors {
            api = api.layer(cors);
        }
        router = router.merge(api);
    }
    let mut router = router.with_state(state);
    if serve_metrics {
        router = router.route("/metrics", get(metrics_handler));
    }
    router.layer(TimeoutLayer::new(timeout))
}

/// Run the HTTP listener.
///
/// This is a long-running task that should be spawned in the background.
pub async fn run_http_server(hub: Arc<Hub>, config: WebhookConfig) {
    let addr = config.listen;
    let app = router(hub, config);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind HTTP server on {}: {}", addr, e);
            return;
        }
    };
    info!(%addr, "HTTP listener started");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("HTTP server error: {}", e);
    }
}
