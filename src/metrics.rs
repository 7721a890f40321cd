//! Prometheus metrics collection for straybot.
//!
//! Exposed on the HTTP listener at `/metrics` when enabled.
//!
//! - `straybot_commands_total{kind}` - Commands executed. `kind` is `local` or
//!   `global` for dynamic commands, the built-in's name (`set`, `approve`, ...)
//!   otherwise
//! - `straybot_command_errors_total{kind,error}` - Failures by stage (`resolve`,
//!   `template`, `handler`)
//! - `straybot_template_duration_seconds` - Template render latency
//! - `straybot_autoreply_decisions_total{decision}` - Heuristic outcomes
//! - `straybot_moderation_actions_total{action,outcome}` - Platform moderation calls

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters
// ========================================================================

/// Inbound chat messages handled.
pub static MESSAGES_RECEIVED: OnceLock<IntCounter> = OnceLock::new();

/// Chat lines sent by the agent.
pub static LINES_SENT: OnceLock<IntCounter> = OnceLock::new();

/// Commands executed by kind.
pub static COMMANDS: OnceLock<IntCounterVec> = OnceLock::new();

/// Command failures by kind and error code.
pub static COMMAND_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Autoreply heuristic decisions.
pub static AUTOREPLY_DECISIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Platform moderation calls by action and outcome.
pub static MODERATION_ACTIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Approval records created by the moderation engine.
pub static APPROVALS_RECORDED: OnceLock<IntCounter> = OnceLock::new();

/// Rejected webhook deliveries.
pub static WEBHOOK_REJECTED: OnceLock<IntCounter> = OnceLock::new();

// ========================================================================
// Gauges and histograms
// ========================================================================

/// Channels with live conversation state.
pub static ACTIVE_CHANNELS: OnceLock<IntGauge> = OnceLock::new();

/// Template render latency.
pub static TEMPLATE_LATENCY: OnceLock<Histogram> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded.
/// Recording before `init` is a no-op.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    if MESSAGES_RECEIVED.get().is_some() {
        return;
    }

    register!(MESSAGES_RECEIVED, IntCounter::new("straybot_messages_received_total", "Inbound chat messages handled"));
    register!(LINES_SENT, IntCounter::new("straybot_lines_sent_total", "Chat lines sent"));
    register!(COMMANDS, IntCounterVec::new(Opts::new("straybot_commands_total", "Commands executed by kind"), &["kind"]));
    register!(COMMAND_ERRORS, IntCounterVec::new(Opts::new("straybot_command_errors_total", "Command failures by kind and error"), &["kind", "error"]));
    register!(AUTOREPLY_DECISIONS, IntCounterVec::new(Opts::new("straybot_autoreply_decisions_total", "Autoreply heuristic decisions"), &["decision"]));
    register!(MODERATION_ACTIONS, IntCounterVec::new(Opts::new("straybot_moderation_actions_total", "Moderation calls by action and outcome"), &["action", "outcome"]));
    register!(APPROVALS_RECORDED, IntCounter::new("straybot_approvals_recorded_total", "Automatic approvals recorded"));
    register!(WEBHOOK_REJECTED, IntCounter::new("straybot_webhook_rejected_total", "Webhook deliveries rejected"));
    register!(ACTIVE_CHANNELS, IntGauge::new("straybot_active_channels", "Channels with live conversation state"));
    register!(TEMPLATE_LATENCY, Histogram::with_opts(
        HistogramOpts::new("straybot_template_duration_seconds", "Template render latency")
            .buckets(vec![0.0001, 0.0005, 0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0])));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

#[inline]
fn inc(metric: &OnceLock<IntCounter>) {
    if let Some(c) = metric.get() {
        c.inc();
    }
}

#[inline]
fn inc_vec(metric: &OnceLock<IntCounterVec>, labels: &[&str]) {
    if let Some(c) = metric.get() {
        c.with_label_values(labels).inc();
    }
}

#[inline]
pub fn record_message_received() {
    inc(&MESSAGES_RECEIVED);
}

#[inline]
pub fn record_line_sent() {
    inc(&LINES_SENT);
}

/// Record an executed command of the given kind.
#[inline]
pub fn record_command(kind: &str) {
    inc_vec(&COMMANDS, &[kind]);
}

/// Record a command error.
#[inline]
pub fn record_command_error(kind: &str, error: &str) {
    inc_vec(&COMMAND_ERRORS, &[kind, error]);
}

#[inline]
pub fn record_autoreply(decision: &str) {
    inc_vec(&AUTOREPLY_DECISIONS, &[decision]);
}

#[inline]
pub fn record_moderation(action: &str, outcome: &str) {
    inc_vec(&MODERATION_ACTIONS, &[action, outcome]);
}

#[inline]
pub fn record_approval() {
    inc(&APPROVALS_RECORDED);
}

#[inline]
pub fn record_webhook_rejected() {
    inc(&WEBHOOK_REJECTED);
}

#[inline]
pub fn record_channel_opened() {
    if let Some(g) = ACTIVE_CHANNELS.get() {
        g.inc();
    }
}

#[inline]
pub fn record_channel_closed() {
    if let Some(g) = ACTIVE_CHANNELS.get() {
        g.dec();
    }
}

#[inline]
pub fn record_template_latency(duration_secs: f64) {
    if let Some(h) = TEMPLATE_LATENCY.get() {
        h.observe(duration_secs);
    }
}
