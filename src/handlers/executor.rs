//! Template execution.

use super::Invocation;
use super::functions::FunctionEnvironment;
use crate::hub::Hub;
use crate::template::Template;
use tokio::time::timeout;
use tracing::warn;

/// Render one template for an invocation.
///
/// A template that fails to parse or evaluate renders as a one-line
/// diagnostic naming it, so the failure is visible in chat.
pub async fn render(hub: &Hub, inv: &Invocation, name: &str, source: &str) -> String {
    let template = match Template::parse(name, source) {
        Ok(template) => template,
        Err(e) => {
            crate::metrics::record_command_error("template", e.error_code());
            warn!(channel = %inv.channel, template = name, error = %e, "Template failed to parse");
            return e.diagnostic(name);
        }
    };

    let inv = with_selected_id(hub, inv, source).await;
    let env = FunctionEnvironment::new(hub, &inv);
    match template.render(&env).await {
        Ok(output) => output,
        Err(e) => {
            crate::metrics::record_command_error("template", e.error_code());
            warn!(channel = %inv.channel, template = name, error = %e, "Template failed");
            e.diagnostic(name)
        }
    }
}

/// Render several templates in order, joined by newlines.
pub async fn render_all(hub: &Hub, inv: &Invocation, templates: &[(&str, &str)]) -> String {
    let mut outputs = Vec::with_capacity(templates.len());
    for (name, source) in templates {
        outputs.push(render(hub, inv, name, source).await);
    }
    outputs.join("\n")
}

/// Resolve `.SelectedUserID` up front when the template reads it.
async fn with_selected_id(hub: &Hub, inv: &Invocation, source: &str) -> Invocation {
    let mut inv = inv.clone();
    if inv.selected_user_id.is_empty()
        && source.contains(".SelectedUserID")
        && let Ok(Ok(Some(user))) = timeout(
            hub.config.twitch.api_timeout(),
            hub.platform.user_by_login(&inv.selected_user),
        )
        .await
    {
        inv.selected_user_id = user.id;
    }
    inv
}
