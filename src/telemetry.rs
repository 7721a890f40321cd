//! Telemetry utilities for template timing and event spans.

use std::time::Instant;

/// Guard for timing template rendering.
///
/// Records latency when dropped, including on early error returns.
pub struct TemplateTimer {
    start: Instant,
}

impl TemplateTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for TemplateTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TemplateTimer {
    fn drop(&mut self) {
        crate::metrics::record_template_latency(self.start.elapsed().as_secs_f64());
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span for handling one inbound chat message.
    pub fn message(channel: &str, user: &str, message_id: &str) -> Span {
        info_span!("message", channel = %channel, user = %user, msgid = %message_id)
    }

    /// Span for vetting one participant.
    pub fn vetting(channel_id: &str, user: &str) -> Span {
        info_span!("vetting", channel_id = %channel_id, user = %user)
    }

    /// Span for one webhook delivery.
    pub fn webhook(message_id: &str, kind: &str) -> Span {
        info_span!("webhook", msgid = %message_id, kind = %kind)
    }
}
