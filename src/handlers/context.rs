//! Per-message invocation context.

use crate::config::AgentConfig;
use crate::network::IncomingMessage;
use crate::state::ReplyParent;
use crate::template::Value;

/// Context fields a template may read, without the leading dot.
pub const FIELDS: &[&str] = &[
    "User",
    "UserID",
    "Channel",
    "ChannelID",
    "Message",
    "MessageID",
    "IsMod",
    "IsOwner",
    "IsAdmin",
    "IsSub",
    "BotID",
    "Command",
    "Arg",
    "SelectedUser",
    "SelectedUserID",
    "ReplyingToUser",
    "ReplyingToUserID",
    "ReplyingToMessage",
    "ReplyingToMessageID",
];

/// Identity, authorization and argument data for one message.
///
/// Built fresh per message and never shared between messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub user: String,
    pub user_id: String,
    pub channel: String,
    pub channel_id: String,
    pub message: String,
    pub message_id: String,
    pub is_mod: bool,
    pub is_owner: bool,
    pub is_admin: bool,
    pub is_sub: bool,
    pub bot_id: String,
    /// First whitespace-separated token, lowercased.
    pub command: String,
    pub args: Vec<String>,
    /// First argument without a leading `@`, lowercased; the sender otherwise.
    pub selected_user: String,
    /// Filled in lazily; empty until resolved.
    pub selected_user_id: String,
    pub replying_to: Option<ReplyParent>,
}

impl Invocation {
    pub fn from_message(msg: &IncomingMessage, agent: &AgentConfig) -> Self {
        let mut words = msg.text.split_whitespace();
        let command = words.next().unwrap_or_default().to_lowercase();
        let args: Vec<String> = words.map(str::to_string).collect();

        let is_owner = msg.is_broadcaster || (!msg.user_id.is_empty() && msg.user_id == msg.room_id);
        let is_admin = agent.is_admin(&msg.user);

        let selected_user = args
            .first()
            .map(|a| a.trim_start_matches('@').to_lowercase())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| msg.user.clone());
        let selected_user_id = if selected_user == msg.user {
            msg.user_id.clone()
        } else {
            String::new()
        };

        Self {
            user: msg.user.clone(),
            user_id: msg.user_id.clone(),
            channel: msg.channel.clone(),
            channel_id: msg.room_id.clone(),
            message: msg.text.clone(),
            message_id: msg.message_id.clone(),
            is_mod: msg.is_mod || is_owner || is_admin,
            is_owner,
            is_admin,
            is_sub: msg.is_sub,
            bot_id: agent.user_id.clone(),
            command,
            args,
            selected_user,
            selected_user_id,
            replying_to: msg.reply_parent.clone(),
        }
    }

    /// Value of a template context field.
    pub fn field(&self, name: &str) -> Option<Value> {
        let parent = self.replying_to.as_ref();
        let parent_field = |f: fn(&ReplyParent) -> &String| {
            Value::Str(parent.map(|p| f(p).clone()).unwrap_or_default())
        };
        let value = match name {
            "User" => Value::from(self.user.as_str()),
            "UserID" => Value::from(self.user_id.as_str()),
            "Channel" => Value::from(self.channel.as_str()),
            "ChannelID" => Value::from(self.channel_id.as_str()),
            "Message" => Value::from(self.message.as_str()),
            "MessageID" => Value::from(self.message_id.as_str()),
            "IsMod" => Value::Bool(self.is_mod),
            "IsOwner" => Value::Bool(self.is_owner),
            "IsAdmin" => Value::Bool(self.is_admin),
            "IsSub" => Value::Bool(self.is_sub),
            "BotID" => Value::from(self.bot_id.as_str()),
            "Command" => Value::from(self.command.as_str()),
            "Arg" => Value::List(self.args.iter().map(|a| Value::from(a.as_str())).collect()),
            "SelectedUser" => Value::from(self.selected_user.as_str()),
            "SelectedUserID" => Value::from(self.selected_user_id.as_str()),
            "ReplyingToUser" => parent_field(|p| &p.user_login),
            "ReplyingToUserID" => parent_field(|p| &p.user_id),
            "ReplyingToMessage" => parent_field(|p| &p.body),
            "ReplyingToMessageID" => parent_field(|p| &p.message_id),
            _ => return None,
        };
        Some(value)
    }

    /// Text after the command word and the first `skip` arguments, with the
    /// original spacing kept.
    pub fn rest(&self, skip: usize) -> &str {
        let mut rest = self.message.trim_start();
        for _ in 0..=skip {
            rest = match rest.split_once(char::is_whitespace) {
                Some((_, tail)) => tail.trim_start(),
                None => "",
            };
        }
        rest
    }

    /// Whether this message replies to something `login` wrote.
    pub fn replies_to(&self, login: &str) -> bool {
        self.replying_to
            .as_ref()
            .is_some_and(|p| p.user_login.eq_ignore_ascii_case(login))
    }
}
