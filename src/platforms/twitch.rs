use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::config::BotConfig;
use crate::platforms::ChatTransport;
use crate::types::{normalize_handle, RoomEvent, TransportError};

// Type aliases for cleaner code
type WebSocketWriter = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type SharedWriter = Arc<Mutex<Option<WebSocketWriter>>>;

const PLATFORM: &str = "twitch";
const EVENT_BUFFER: usize = 1000;

/// Configuration for Twitch connection
#[derive(Debug, Clone)]
pub struct TwitchConfig {
    pub username: String,
    pub oauth_token: String, // oauth:your_token_here
    /// Room name without the leading `#`
    pub channel: String,
    pub server_url: String,
}

impl TwitchConfig {
    pub fn from_bot_config(config: &BotConfig) -> Self {
        Self {
            username: config.name.clone(),
            oauth_token: config.password.clone(),
            channel: config.room().to_string(),
            server_url: config.server_url.clone(),
        }
    }
}

/// One IRC line split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcLine<'a> {
    pub tags: Option<&'a str>,
    pub prefix: Option<&'a str>,
    pub command: &'a str,
    pub params: Vec<&'a str>,
    pub trailing: Option<&'a str>,
}

impl<'a> IrcLine<'a> {
    /// Format: `[@tags] [:prefix] COMMAND [params...] [:trailing]`
    pub fn parse(line: &'a str) -> Option<Self> {
        let mut rest = line.trim();
        let mut tags = None;
        let mut prefix = None;

        if let Some(tagged) = rest.strip_prefix('@') {
            let (t, remaining) = tagged.split_once(' ')?;
            tags = Some(t);
            rest = remaining.trim_start();
        }

        if let Some(prefixed) = rest.strip_prefix(':') {
            let (p, remaining) = prefixed.split_once(' ')?;
            prefix = Some(p);
            rest = remaining.trim_start();
        }

        let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return None;
        }

        let mut trailing = None;
        if let Some(t) = rest.strip_prefix(':') {
            trailing = Some(t);
            rest = "";
        } else if let Some((before, t)) = rest.split_once(" :") {
            trailing = Some(t);
            rest = before;
        }

        Some(Self {
            tags,
            prefix,
            command,
            params: rest.split_whitespace().collect(),
            trailing,
        })
    }

    /// Nickname from a `nick!user@host` prefix
    pub fn nick(&self) -> Option<&'a str> {
        self.prefix.map(|p| p.split('!').next().unwrap_or(p))
    }
}

/// Map one raw line from the server to a room event
pub fn parse_room_event(line: &str) -> Option<RoomEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    let raw = || RoomEvent::RawDiagnostic { line: line.to_string() };
    let Some(irc) = IrcLine::parse(line) else {
        return Some(raw());
    };

    let event = match irc.command {
        "001" => RoomEvent::Connected,
        "JOIN" => match irc.nick() {
            Some(nick) => RoomEvent::Join { handle: normalize_handle(nick) },
            None => raw(),
        },
        "PART" => match irc.nick() {
            Some(nick) => RoomEvent::Part { handle: normalize_handle(nick) },
            None => raw(),
        },
        "PRIVMSG" => match (irc.nick(), irc.trailing) {
            (Some(nick), Some(text)) => RoomEvent::Message {
                handle: normalize_handle(nick),
                text: text.to_string(),
            },
            _ => raw(),
        },
        // :jtv MODE #channel +o someone
        "MODE" if irc.params.len() >= 3 => RoomEvent::PrivilegeChange {
            room: irc.params[0].to_string(),
            actor: irc.nick().unwrap_or_default().to_string(),
            delta: irc.params[1].to_string(),
            target: irc.params[2].to_string(),
        },
        _ => raw(),
    };
    Some(event)
}

/// Twitch IRC connection implementation
pub struct TwitchConnection {
    config: TwitchConfig,
    websocket_writer: SharedWriter,
    is_connected: Arc<RwLock<bool>>,
}

impl TwitchConnection {
    pub fn new(config: TwitchConfig) -> Self {
        Self {
            config,
            websocket_writer: Arc::new(Mutex::new(None)),
            is_connected: Arc::new(RwLock::new(false)),
        }
    }

    async fn send_line(&self, line: &str) -> Result<()> {
        send_raw(&self.websocket_writer, line).await
    }
}

async fn send_raw(writer: &SharedWriter, line: &str) -> Result<()> {
    let mut guard = writer.lock().await;
    let Some(writer) = guard.as_mut() else {
        return Err(TransportError::NotConnected { platform: PLATFORM.to_string() }.into());
    };

    writer
        .send(Message::Text(format!("{}\r\n", line)))
        .await
        .map_err(|e| TransportError::SendFailed {
            platform: PLATFORM.to_string(),
            reason: e.to_string(),
        })?;
    Ok(())
}

#[async_trait]
impl ChatTransport for TwitchConnection {
    async fn connect(&self) -> Result<mpsc::Receiver<RoomEvent>> {
        info!("Connecting to Twitch IRC...");

        let url = Url::parse(&self.config.server_url)
            .with_context(|| format!("Failed to parse Twitch WebSocket URL: {}", self.config.server_url))?;

        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Twitch WebSocket")?;

        let (write, mut read) = ws_stream.split();
        *self.websocket_writer.lock().await = Some(write);

        // Authenticate with Twitch
        self.send_line(&format!("PASS {}", self.config.oauth_token))
            .await
            .context("Failed to send PASS command")?;
        self.send_line(&format!("NICK {}", self.config.username))
            .await
            .context("Failed to send NICK command")?;

        // membership is needed for JOIN/PART, commands for MODE
        self.send_line("CAP REQ :twitch.tv/tags twitch.tv/commands twitch.tv/membership")
            .await
            .context("Failed to request capabilities")?;

        *self.is_connected.write().await = true;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let writer_for_pong = Arc::clone(&self.websocket_writer);
        let is_connected = Arc::clone(&self.is_connected);

        tokio::spawn(async move {
            info!("Twitch message reader started");

            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        // Handle multiple messages in one websocket frame
                        for line in text.lines() {
                            if let Some(payload) = line.strip_prefix("PING") {
                                debug!("Responding to PING");
                                if let Err(e) = send_raw(&writer_for_pong, &format!("PONG{}", payload)).await {
                                    error!("Failed to send PONG: {}", e);
                                }
                                continue;
                            }

                            if let Some(event) = parse_room_event(line) {
                                if tx.send(event).await.is_err() {
                                    debug!("Event receiver dropped, stopping reader");
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        debug!("Received ping, sending pong");
                        if let Some(writer) = writer_for_pong.lock().await.as_mut() {
                            if let Err(e) = writer.send(Message::Pong(payload)).await {
                                error!("Failed to send pong: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(close_frame))) => {
                        info!("WebSocket connection closed: {:?}", close_frame);
                        break;
                    }
                    Some(Ok(_)) => {
                        debug!("Received non-text frame (ignoring)");
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        warn!("WebSocket stream ended");
                        break;
                    }
                }

                if tx.is_closed() {
                    break;
                }
            }

            *is_connected.write().await = false;
            let _ = tx.send(RoomEvent::Disconnected).await;
            warn!("Twitch connection handler exited");
        });

        info!("Successfully connected to Twitch IRC");
        Ok(rx)
    }

    async fn say(&self, text: &str) -> Result<()> {
        self.send_line(&format!("PRIVMSG #{} :{}", self.config.channel, text)).await?;
        debug!("Sent message to #{}: {}", self.config.channel, text);
        Ok(())
    }

    async fn send_moderation_command(&self, command: &str, args: &str) -> Result<()> {
        self.send_line(&format!("PRIVMSG #{} :/{} {}", self.config.channel, command, args))
            .await?;
        info!("Sent /{} {} in #{}", command, args, self.config.channel);
        Ok(())
    }

    async fn join_room(&self) -> Result<()> {
        self.send_line(&format!("JOIN #{}", self.config.channel))
            .await
            .with_context(|| format!("Failed to join channel: {}", self.config.channel))?;
        info!("Joined channel: #{}", self.config.channel);
        Ok(())
    }

    async fn leave_room(&self) -> Result<()> {
        self.send_line(&format!("PART #{}", self.config.channel)).await?;
        info!("Left channel: #{}", self.config.channel);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.is_connected.write().await = false;
        if let Some(mut writer) = self.websocket_writer.lock().await.take() {
            if let Err(e) = writer.close().await {
                debug!("Error closing Twitch socket: {}", e);
            }
        }
        info!("Disconnected from Twitch");
        Ok(())
    }

    fn platform_name(&self) -> &str {
        PLATFORM
    }

    async fn is_connected(&self) -> bool {
        *self.is_connected.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_privmsg() {
        let line = "@badge-info=;mod=0;display-name=Alice :alice!alice@alice.tmi.twitch.tv PRIVMSG #example :!Roll 20 :)";
        let irc = IrcLine::parse(line).unwrap();
        assert_eq!(irc.command, "PRIVMSG");
        assert_eq!(irc.params, vec!["#example"]);
        assert!(irc.tags.unwrap().contains("display-name=Alice"));

        assert_eq!(
            parse_room_event(line),
            Some(RoomEvent::Message {
                handle: "alice".to_string(),
                text: "!Roll 20 :)".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_membership() {
        assert_eq!(
            parse_room_event(":Bob!bob@bob.tmi.twitch.tv JOIN #example\r\n"),
            Some(RoomEvent::Join { handle: "bob".to_string() })
        );
        assert_eq!(
            parse_room_event(":bob!bob@bob.tmi.twitch.tv PART #example"),
            Some(RoomEvent::Part { handle: "bob".to_string() })
        );
    }

    #[test]
    fn test_parse_mode_and_welcome() {
        assert_eq!(
            parse_room_event(":jtv MODE #example +o bob"),
            Some(RoomEvent::PrivilegeChange {
                room: "#example".to_string(),
                actor: "jtv".to_string(),
                delta: "+o".to_string(),
                target: "bob".to_string(),
            })
        );
        assert_eq!(
            parse_room_event(":tmi.twitch.tv 001 examplebot :Welcome, GLHF!"),
            Some(RoomEvent::Connected)
        );
    }

    #[test]
    fn test_everything_else_is_diagnostic() {
        assert_eq!(
            parse_room_event(":tmi.twitch.tv CAP * ACK :twitch.tv/tags"),
            Some(RoomEvent::RawDiagnostic {
                line: ":tmi.twitch.tv CAP * ACK :twitch.tv/tags".to_string(),
            })
        );
        assert!(matches!(parse_room_event(":jtv MODE #example"), Some(RoomEvent::RawDiagnostic { .. })));
        assert_eq!(parse_room_event("   "), None);
    }

    #[test]
    fn test_trailing_directly_after_command() {
        let irc = IrcLine::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(irc.command, "PING");
        assert!(irc.params.is_empty());
        assert_eq!(irc.trailing, Some("tmi.twitch.tv"));
        assert_eq!(irc.nick(), None);
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let connection = TwitchConnection::new(TwitchConfig {
            username: "examplebot".to_string(),
            oauth_token: "oauth:test".to_string(),
            channel: "example".to_string(),
            server_url: "wss://irc-ws.chat.twitch.tv:443".to_string(),
        });
        let err = connection.say("hi").await.unwrap_err();
        assert!(err.downcast_ref::<TransportError>().is_some());
        assert!(!connection.is_connected().await);
    }
}
