//! Built-in administrative commands.
//!
//! Built-ins short-circuit dynamic resolution. Each one declares who may run
//! it; anyone else gets silence, not an error.

use super::functions::FUNCTIONS;
use super::resolver::compile_pattern;
use super::{Invocation, dispatch, executor};
use crate::agent;
use crate::db::{DbError, Scope};
use crate::error::HandlerResult;
use crate::hub::Hub;
use crate::template::Template;
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Approve,
    Unapprove,
    Join,
    Leave,
    Commands,
    Get,
    Set,
    Unset,
    GlobalCommands,
    GlobalGet,
    GlobalSet,
    GlobalUnset,
    Test,
    Autoreply,
    Functions,
    Version,
}

/// Who may run a built-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Anyone,
    /// Anyone, but only in the agent's own channel.
    OwnChannel,
    Moderator,
    Owner,
    Admin,
}

impl Builtin {
    /// Recognize a command word (`!set` with prefix `!`).
    pub fn parse(word: &str, prefix: &str) -> Option<Self> {
        let name = word.strip_prefix(prefix)?;
        let builtin = match name.to_lowercase().as_str() {
            "approve" => Self::Approve,
            "unapprove" => Self::Unapprove,
            "join" => Self::Join,
            "leave" => Self::Leave,
            "commands" => Self::Commands,
            "get" => Self::Get,
            "set" => Self::Set,
            "unset" => Self::Unset,
            "globalcommands" => Self::GlobalCommands,
            "globalget" => Self::GlobalGet,
            "globalset" => Self::GlobalSet,
            "globalunset" => Self::GlobalUnset,
            "test" => Self::Test,
            "autoreply" => Self::Autoreply,
            "functions" => Self::Functions,
            "version" => Self::Version,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Unapprove => "unapprove",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Commands => "commands",
            Self::Get => "get",
            Self::Set => "set",
            Self::Unset => "unset",
            Self::GlobalCommands => "globalcommands",
            Self::GlobalGet => "globalget",
            Self::GlobalSet => "globalset",
            Self::GlobalUnset => "globalunset",
            Self::Test => "test",
            Self::Autoreply => "autoreply",
            Self::Functions => "functions",
            Self::Version => "version",
        }
    }

    fn access(&self) -> Access {
        match self {
            Self::Commands | Self::Functions | Self::Version => Access::Anyone,
            Self::Join => Access::OwnChannel,
            Self::Approve | Self::Unapprove | Self::Get | Self::Set | Self::Unset | Self::Test => {
                Access::Moderator
            }
            Self::Leave | Self::Autoreply => Access::Owner,
            Self::GlobalCommands | Self::GlobalGet | Self::GlobalSet | Self::GlobalUnset => Access::Admin,
        }
    }

    pub fn authorized(&self, inv: &Invocation, agent_login: &str) -> bool {
        match self.access() {
            Access::Anyone => true,
            Access::OwnChannel => inv.channel.eq_ignore_ascii_case(agent_login),
            Access::Moderator => inv.is_mod,
            Access::Owner => inv.is_owner || inv.is_admin,
            Access::Admin => inv.is_admin,
        }
    }

    fn scope(&self, inv: &Invocation) -> Scope {
        match self {
            Self::GlobalCommands | Self::GlobalGet | Self::GlobalSet | Self::GlobalUnset => Scope::Global,
            _ => Scope::channel(inv.channel_id.clone()),
        }
    }
}

/// Run a built-in. `Ok(None)` means nothing to say.
pub async fn execute(hub: &Hub, inv: &Invocation, builtin: Builtin) -> HandlerResult<Option<String>> {
    if !builtin.authorized(inv, hub.agent_login()) {
        return Ok(None);
    }
    let prefix = &hub.config.agent.command_prefix;
    let scope = builtin.scope(inv);
    let first = inv.args.first().map(String::as_str);

    let reply = match builtin {
        Builtin::Approve | Builtin::Unapprove => {
            let Some(target) = first.map(|a| a.trim_start_matches('@').to_lowercase()) else {
                return Ok(Some(format!("usage: {}{} @user", prefix, builtin.name())));
            };
            let user = timeout(
                hub.config.twitch.api_timeout(),
                hub.platform.user_by_login(&target),
            )
            .await;
            let Ok(Ok(Some(user))) = user else {
                return Ok(Some(format!("unable to find user {}", target)));
            };
            let approvals = hub.db.approvals();
            if builtin == Builtin::Approve {
                approvals.approve(&inv.channel_id, &user.id, true).await?;
                crate::metrics::record_approval();
                format!("approved {}", user.login)
            } else if approvals.unapprove(&inv.channel_id, &user.id).await? {
                format!("unapproved {}", user.login)
            } else {
                format!("{} was not approved", user.login)
            }
        }
        Builtin::Join => {
            agent::join_channel(hub, &inv.user_id, &inv.user).await?;
            format!("joined #{}", inv.user)
        }
        Builtin::Leave => {
            if inv.channel.eq_ignore_ascii_case(hub.agent_login()) {
                return Ok(None);
            }
            // Say goodbye while still joined.
            dispatch::dispatch(hub, inv, &format!("leaving #{}, bye!", inv.channel)).await?;
            agent::leave_channel(hub, &inv.channel_id, &inv.channel).await?;
            crate::metrics::record_command(builtin.name());
            return Ok(None);
        }
        Builtin::Commands | Builtin::GlobalCommands => {
            let names: Vec<String> = hub
                .db
                .commands()
                .list(&scope)
                .await?
                .into_iter()
                .map(|c| c.name)
                .collect();
            if names.is_empty() {
                "no commands".to_string()
            } else {
                format!("commands: {}", names.join(", "))
            }
        }
        Builtin::Get | Builtin::GlobalGet => {
            let Some(name) = first else {
                return Ok(Some(format!("usage: {}{} <name>", prefix, builtin.name())));
            };
            match hub.db.commands().get(&scope, name).await? {
                Some(cmd) => cmd.template,
                None => format!("no command {}", name),
            }
        }
        Builtin::Set | Builtin::GlobalSet => {
            let (Some(name), template) = (first, inv.rest(1)) else {
                return Ok(Some(format!("usage: {}{} <name> <template>", prefix, builtin.name())));
            };
            if template.is_empty() {
                return Ok(Some(format!("usage: {}{} <name> <template>", prefix, builtin.name())));
            }
            if let Err(e) = compile_pattern(name) {
                warn!(channel = %inv.channel, name, error = %e, "Rejected command name");
                return Ok(Some(format!("invalid command name {}", name)));
            }
            if let Err(e) = Template::parse(name, template) {
                return Ok(Some(e.diagnostic(name)));
            }
            let revision = hub.db.commands().upsert(&scope, name, template).await?;
            info!(scope = %scope, name, revision, "Command saved");
            format!("set command {}", name)
        }
        Builtin::Unset | Builtin::GlobalUnset => {
            let Some(name) = first else {
                return Ok(Some(format!("usage: {}{} <name>", prefix, builtin.name())));
            };
            if hub.db.commands().delete(&scope, name).await? {
                hub.resolver.invalidate(&scope, name);
                format!("unset command {}", name)
            } else {
                format!("no command {}", name)
            }
        }
        Builtin::Test => {
            let source = inv.rest(0);
            if source.is_empty() {
                return Ok(None);
            }
            executor::render(hub, inv, "test", source).await
        }
        Builtin::Autoreply => autoreply_settings(hub, inv).await?,
        Builtin::Functions => format!("functions: {}", FUNCTIONS.join(", ")),
        Builtin::Version => format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
    };

    crate::metrics::record_command(builtin.name());
    Ok(Some(reply))
}

async fn autoreply_settings(hub: &Hub, inv: &Invocation) -> HandlerResult<String> {
    let channels = hub.db.channels();
    let value = inv.args.get(1).map(String::as_str).unwrap_or_default();
    let range_error = |e: DbError| match e {
        DbError::OutOfRange(message) => Ok(message),
        other => Err(other),
    };

    let reply = match inv.args.first().map(|a| a.to_lowercase()).as_deref() {
        Some("on") => {
            channels.set_autoreply(&inv.channel_id, true).await?;
            "autoreply enabled".to_string()
        }
        Some("off") => {
            channels.set_autoreply(&inv.channel_id, false).await?;
            "autoreply disabled".to_string()
        }
        Some("frequency") => match value.parse::<i64>() {
            Ok(n) => match channels.set_frequency(&inv.channel_id, n).await {
                Ok(_) => format!("autoreply frequency set to {}", n),
                Err(e) => range_error(e)?,
            },
            Err(_) => "usage: autoreply frequency <1-5>".to_string(),
        },
        Some("safety") => match value.parse::<i64>() {
            Ok(n) => match channels.set_safety(&inv.channel_id, n).await {
                Ok(_) => format!("autoreply safety set to {}", n),
                Err(e) => range_error(e)?,
            },
            Err(_) => "usage: autoreply safety <0-3>".to_string(),
        },
        Some("token") => {
            // The token was pasted into chat; remove it whatever happens next.
            let outcome = hub
                .platform
                .delete_message(&inv.channel_id, Some(&inv.message_id))
                .await;
            if !outcome.is_success() {
                warn!(channel = %inv.channel, outcome = outcome.as_str(), "Unable to delete token message");
            }
            if hub.credential_valid(value) {
                channels.set_llm_token(&inv.channel_id, value).await?;
                "token saved".to_string()
            } else {
                "invalid token".to_string()
            }
        }
        _ => {
            let settings = channels.settings(&inv.channel_id).await?;
            format!(
                "autoreply {}, frequency {}, safety {}, token {}",
                if settings.autoreply_enabled { "on" } else { "off" },
                settings.autoreply_frequency,
                settings.reply_safety,
                if settings.llm_token.is_some() { "set" } else { "not set" }
            )
        }
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inv(channel: &str) -> Invocation {
        Invocation {
            channel: channel.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(Builtin::parse("!set", "!"), Some(Builtin::Set));
        assert_eq!(Builtin::parse("!GlobalSet", "!"), Some(Builtin::GlobalSet));
        assert_eq!(Builtin::parse("set", "!"), None);
        assert_eq!(Builtin::parse("?set", "?"), Some(Builtin::Set));
        assert_eq!(Builtin::parse("!hello", "!"), None);
    }

    #[test]
    fn test_access() {
        let viewer = inv("alice");
        assert!(Builtin::Commands.authorized(&viewer, "straybot"));
        assert!(!Builtin::Set.authorized(&viewer, "straybot"));
        assert!(!Builtin::Join.authorized(&viewer, "straybot"));
        assert!(Builtin::Join.authorized(&inv("StrayBot"), "straybot"));

        let moderator = Invocation {
            is_mod: true,
            ..inv("alice")
        };
        assert!(Builtin::Test.authorized(&moderator, "straybot"));
        assert!(!Builtin::Autoreply.authorized(&moderator, "straybot"));
        assert!(!Builtin::GlobalSet.authorized(&moderator, "straybot"));

        let owner = Invocation {
            is_mod: true,
            is_owner: true,
            ..inv("alice")
        };
        assert!(Builtin::Leave.authorized(&owner, "straybot"));
        assert!(!Builtin::GlobalUnset.authorized(&owner, "straybot"));

        let admin = Invocation {
            is_admin: true,
            ..inv("alice")
        };
        assert!(Builtin::GlobalGet.authorized(&admin, "straybot"));
        assert!(Builtin::Autoreply.authorized(&admin, "straybot"));
    }
}
