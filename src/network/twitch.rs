//! Twitch IRC connection.
//!
//! One task owns the socket. Outbound lines arrive over an mpsc queue that
//! survives reconnects; inbound lines are parsed and forwarded as
//! [`ChatEvent`]s. On disconnect the task reconnects with capped exponential
//! backoff and rejoins every channel it was in.

use super::parser::{IrcLine, parse_line};
use super::{ChatEvent, ChatTransport, IncomingMessage, TransportError};
use crate::config::TwitchConfig;
use crate::state::ReplyParent;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dashmap::DashSet;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, warn};

type IrcFramed = Framed<TcpStream, LinesCodec>;

const CAPABILITIES: &str = "CAP REQ :twitch.tv/tags twitch.tv/commands twitch.tv/membership";
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Twitch drops lines longer than this (tags excluded).
const MAX_LINE_BYTES: usize = 4096;
/// Longest inbound line accepted: the IRCv3 tag block limit plus a classic
/// 512-byte message. Anything longer fails the session, which reconnects.
const MAX_INBOUND_LINE_BYTES: usize = 8192 + 512;

/// Handle to the IRC connection task.
pub struct TwitchIrc {
    out_tx: mpsc::Sender<String>,
    joined: Arc<DashSet<String>>,
}

struct Session {
    address: String,
    nick: String,
    password: String,
    max_backoff: Duration,
    joined: Arc<DashSet<String>>,
    events: mpsc::Sender<ChatEvent>,
}

impl TwitchIrc {
    /// Connect and log in. Failure here is fatal to the caller; later
    /// disconnects are retried in the background.
    pub async fn connect(
        config: &TwitchConfig,
        nick: &str,
    ) -> Result<(Self, mpsc::Receiver<ChatEvent>), TransportError> {
        let (events_tx, events_rx) = mpsc::channel(1024);
        let (out_tx, out_rx) = mpsc::channel(256);
        let joined = Arc::new(DashSet::new());

        let session = Session {
            address: config.irc_address.clone(),
            nick: nick.to_lowercase(),
            password: config.irc_password(),
            max_backoff: config.max_reconnect_backoff(),
            joined: joined.clone(),
            events: events_tx,
        };

        let framed = session.open().await?;
        info!(address = %session.address, nick = %session.nick, "Connected to chat");
        tokio::spawn(session.run(framed, out_rx));

        Ok((Self { out_tx, joined }, events_rx))
    }

    async fn send_line(&self, line: String) -> Result<(), TransportError> {
        self.out_tx
            .send(line)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

fn channel_param(channel: &str) -> String {
    format!("#{}", channel.trim_start_matches('#').to_lowercase())
}

/// Collapse line breaks so one call can never emit two IRC lines.
fn single_line(text: &str) -> String {
    let mut out: String = text
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    if out.len() > MAX_LINE_BYTES {
        let mut cut = MAX_LINE_BYTES;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}

#[async_trait]
impl ChatTransport for TwitchIrc {
    async fn say(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        self.send_line(format!("PRIVMSG {} :{}", channel_param(channel), single_line(text)))
            .await
    }

    async fn reply(&self, channel: &str, parent_id: &str, text: &str) -> Result<(), TransportError> {
        self.send_line(format!(
            "@reply-parent-msg-id={} PRIVMSG {} :{}",
            parent_id,
            channel_param(channel),
            single_line(text)
        ))
        .await
    }

    async fn join(&self, channel: &str) -> Result<(), TransportError> {
        let param = channel_param(channel);
        self.joined.insert(param.clone());
        self.send_line(format!("JOIN {}", param)).await
    }

    async fn part(&self, channel: &str) -> Result<(), TransportError> {
        let param = channel_param(channel);
        self.joined.remove(&param);
        self.send_line(format!("PART {}", param)).await
    }
}

fn irc_codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_INBOUND_LINE_BYTES)
}

impl Session {
    /// Open a socket and complete login.
    async fn open(&self) -> Result<IrcFramed, TransportError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(TransportError::Connect)?;
        let mut framed = Framed::new(stream, irc_codec());

        framed.send(CAPABILITIES).await?;
        framed.send(format!("PASS {}", self.password)).await?;
        framed.send(format!("NICK {}", self.nick)).await?;

        tokio::time::timeout(LOGIN_TIMEOUT, await_welcome(&mut framed))
            .await
            .map_err(|_| TransportError::Timeout("login"))??;

        let channels: Vec<String> = self.joined.iter().map(|c| c.key().clone()).collect();
        for channel in channels {
            framed.send(format!("JOIN {}", channel)).await?;
        }
        Ok(framed)
    }

    async fn run(self, mut framed: IrcFramed, mut out_rx: mpsc::Receiver<String>) {
        loop {
            match self.pump(&mut framed, &mut out_rx).await {
                Ok(()) => {
                    info!("Outbound queue closed, chat connection stopping");
                    return;
                }
                Err(e) => warn!(error = %e, "Chat connection lost"),
            }

            let mut backoff = INITIAL_BACKOFF;
            framed = loop {
                tokio::time::sleep(backoff).await;
                match self.open().await {
                    Ok(f) => {
                        info!(channels = self.joined.len(), "Reconnected to chat");
                        break f;
                    }
                    Err(e) => {
                        error!(error = %e, retry_in = ?backoff, "Reconnect failed");
                        backoff = (backoff * 2).min(self.max_backoff);
                    }
                }
            };
        }
    }

    /// Shuttle lines until the socket fails. `Ok` means the agent shut down.
    async fn pump(
        &self,
        framed: &mut IrcFramed,
        out_rx: &mut mpsc::Receiver<String>,
    ) -> Result<(), TransportError> {
        loop {
            tokio::select! {
                outbound = out_rx.recv() => {
                    let Some(line) = outbound else {
                        return Ok(());
                    };
                    debug!(line = %line, "> chat");
                    framed.send(line).await?;
                }
                inbound = framed.next() => {
                    let line = match inbound {
                        Some(line) => line?,
                        None => return Err(TransportError::Closed),
                    };
                    let parsed = match parse_line(&line) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            debug!(error = %e, line = %line, "Ignoring unparseable line");
                            continue;
                        }
                    };
                    match parsed.command {
                        "PING" => {
                            framed
                                .send(format!("PONG :{}", parsed.param(0).unwrap_or_default()))
                                .await?;
                        }
                        "RECONNECT" => return Err(TransportError::Closed),
                        "NOTICE" => {
                            info!(notice = parsed.param(1).unwrap_or_default(), "Chat notice");
                        }
                        _ => {
                            if let Some(event) = to_event(&parsed)
                                && self.events.send(event).await.is_err()
                            {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Wait for `001`, answering PINGs. Twitch reports bad credentials as a NOTICE.
async fn await_welcome(framed: &mut IrcFramed) -> Result<(), TransportError> {
    while let Some(line) = framed.next().await {
        let line = line?;
        let Ok(parsed) = parse_line(&line) else {
            continue;
        };
        match parsed.command {
            "001" => return Ok(()),
            "PING" => {
                framed
                    .send(format!("PONG :{}", parsed.param(0).unwrap_or_default()))
                    .await?;
            }
            "NOTICE" => {
                return Err(TransportError::Auth(
                    parsed.param(1).unwrap_or_default().to_string(),
                ));
            }
            _ => {}
        }
    }
    Err(TransportError::Closed)
}

fn strip_channel(param: &str) -> String {
    param.trim_start_matches('#').to_lowercase()
}

fn has_badge(badges: &str, name: &str) -> bool {
    badges
        .split(',')
        .any(|b| b.split('/').next() == Some(name))
}

/// Map a parsed line onto a chat event, if it is one the agent cares about.
pub fn to_event(line: &IrcLine<'_>) -> Option<ChatEvent> {
    match line.command {
        "PRIVMSG" => {
            let channel = strip_channel(line.param(0)?);
            let mut text = line.param(1).unwrap_or_default();
            if let Some(action) = text
                .strip_prefix("\u{1}ACTION ")
                .and_then(|t| t.strip_suffix('\u{1}'))
            {
                text = action;
            }

            let user = line.nick().unwrap_or_default().to_lowercase();
            let tag = |key: &str| line.tag(key).map(|v| v.into_owned()).unwrap_or_default();
            let badges = tag("badges");
            let is_broadcaster = has_badge(&badges, "broadcaster");

            let reply_parent = line.tag("reply-parent-msg-id").map(|id| ReplyParent {
                message_id: id.into_owned(),
                user_id: tag("reply-parent-user-id"),
                user_login: tag("reply-parent-user-login"),
                body: tag("reply-parent-msg-body"),
            });

            let received_at = tag("tmi-sent-ts")
                .parse::<i64>()
                .ok()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or_else(Utc::now);

            let display_name = match tag("display-name") {
                name if name.is_empty() => user.clone(),
                name => name,
            };

            Some(ChatEvent::Message(IncomingMessage {
                channel,
                room_id: tag("room-id"),
                message_id: tag("id"),
                user_id: tag("user-id"),
                display_name,
                user,
                text: text.to_string(),
                is_mod: tag("mod") == "1" || is_broadcaster,
                is_broadcaster,
                is_sub: tag("subscriber") == "1" || has_badge(&badges, "subscriber"),
                reply_parent,
                received_at,
            }))
        }
        "JOIN" => Some(ChatEvent::Join {
            channel: strip_channel(line.param(0)?),
            user: line.nick()?.to_lowercase(),
        }),
        "PART" => Some(ChatEvent::Part {
            channel: strip_channel(line.param(0)?),
            user: line.nick()?.to_lowercase(),
        }),
        "ROOMSTATE" => Some(ChatEvent::RoomState {
            channel: strip_channel(line.param(0)?),
            room_id: line.tag("room-id")?.into_owned(),
        }),
        _ => None,
    }
}
