// src/types/mod.rs - Core event, action and handler types shared by the bot

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Normalized events produced by a chat transport and consumed by the bot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomEvent {
    /// Registration with the chat server completed
    Connected,
    /// A user (possibly the bot itself) joined the room
    Join { handle: String },
    /// A user left the room
    Part { handle: String },
    /// A chat message was posted in the room
    Message { handle: String, text: String },
    /// Moderator flag added or removed, e.g. `:jtv MODE #room +o someone`
    PrivilegeChange {
        room: String,
        actor: String,
        delta: String,
        target: String,
    },
    /// Anything else the transport saw, kept for debugging
    RawDiagnostic { line: String },
    /// The transport lost its connection
    Disconnected,
}

/// Commands the bot asks the transport to perform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundAction {
    Say { text: String },
    Moderation { command: String, args: String },
    JoinRoom,
    LeaveRoom,
    Disconnect,
}

impl OutboundAction {
    pub fn say(text: impl Into<String>) -> Self {
        OutboundAction::Say { text: text.into() }
    }
}

/// Result of recording an offense against a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationAction {
    Timeout {
        handle: String,
        duration_seconds: u64,
        reason: String,
        offense: u32,
        max_offenses: u32,
    },
    Ban {
        handle: String,
        reason: String,
        offense: u32,
        max_offenses: u32,
    },
}

impl ModerationAction {
    pub fn handle(&self) -> &str {
        match self {
            ModerationAction::Timeout { handle, .. } | ModerationAction::Ban { handle, .. } => handle,
        }
    }

    pub fn is_ban(&self) -> bool {
        matches!(self, ModerationAction::Ban { .. })
    }

    /// Name of the chat moderation command (`timeout` or `ban`)
    pub fn command_name(&self) -> &'static str {
        match self {
            ModerationAction::Timeout { .. } => "timeout",
            ModerationAction::Ban { .. } => "ban",
        }
    }

    /// Arguments for the moderation command, always ending with the running tally
    pub fn args_text(&self) -> String {
        match self {
            ModerationAction::Timeout { handle, duration_seconds, reason, offense, max_offenses } => {
                format!("{} {} {} (warning {} of {})", handle, duration_seconds, reason, offense, max_offenses)
            }
            ModerationAction::Ban { handle, reason, offense, max_offenses } => {
                format!("{} {} (warning {} of {})", handle, reason, offense, max_offenses)
            }
        }
    }

    pub fn to_outbound(&self) -> OutboundAction {
        OutboundAction::Moderation {
            command: self.command_name().to_string(),
            args: self.args_text(),
        }
    }
}

/// Future returned by invocable command and timer handlers
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Option<String>>> + Send>>;

pub type CommandFn = dyn Fn(Vec<String>, bool) -> HandlerFuture + Send + Sync;
pub type TimerFn = dyn Fn() -> HandlerFuture + Send + Sync;

/// What a chat command does when invoked
#[derive(Clone)]
pub enum CommandHandler {
    /// Reply with fixed text
    Static(String),
    /// Call a function with `(args, is_moderator)`
    Invocable(Arc<CommandFn>),
}

impl CommandHandler {
    pub fn text(response: impl Into<String>) -> Self {
        CommandHandler::Static(response.into())
    }

    /// Wrap a synchronous handler. Returning `None` means "say nothing".
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Vec<String>, bool) -> Option<String> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let handler: Arc<CommandFn> = Arc::new(move |args: Vec<String>, is_mod: bool| -> HandlerFuture {
            let f = Arc::clone(&f);
            Box::pin(async move { Ok(f(args, is_mod)) })
        });
        CommandHandler::Invocable(handler)
    }

    /// Wrap an asynchronous handler.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<String>, bool) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
    {
        let handler: Arc<CommandFn> =
            Arc::new(move |args: Vec<String>, is_mod: bool| -> HandlerFuture { Box::pin(f(args, is_mod)) });
        CommandHandler::Invocable(handler)
    }
}

impl fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandHandler::Static(text) => f.debug_tuple("Static").field(text).finish(),
            CommandHandler::Invocable(_) => f.write_str("Invocable(..)"),
        }
    }
}

/// What a timer posts when it fires
#[derive(Clone)]
pub enum TimerHandler {
    Static(String),
    Invocable(Arc<TimerFn>),
}

impl TimerHandler {
    pub fn text(message: impl Into<String>) -> Self {
        TimerHandler::Static(message.into())
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let handler: Arc<TimerFn> = Arc::new(move || -> HandlerFuture {
            let f = Arc::clone(&f);
            Box::pin(async move { Ok(f()) })
        });
        TimerHandler::Invocable(handler)
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
    {
        let handler: Arc<TimerFn> = Arc::new(move || -> HandlerFuture { Box::pin(f()) });
        TimerHandler::Invocable(handler)
    }
}

impl fmt::Debug for TimerHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerHandler::Static(text) => f.debug_tuple("Static").field(text).finish(),
            TimerHandler::Invocable(_) => f.write_str("Invocable(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BotTimer {
    pub name: String,
    pub handler: TimerHandler,
    pub interval_seconds: u64,
}

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected to {platform}")]
    NotConnected { platform: String },
    #[error("failed to send to {platform}: {reason}")]
    SendFailed { platform: String, reason: String },
}

/// Lower-case a user handle and drop a leading `@`
pub fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moderation_command_text() {
        let timeout = ModerationAction::Timeout {
            handle: "loud".to_string(),
            duration_seconds: 10,
            reason: "Excessive use of caps".to_string(),
            offense: 1,
            max_offenses: 3,
        };
        assert_eq!(timeout.command_name(), "timeout");
        assert_eq!(timeout.args_text(), "loud 10 Excessive use of caps (warning 1 of 3)");

        let ban = ModerationAction::Ban {
            handle: "loud".to_string(),
            reason: "spam".to_string(),
            offense: 4,
            max_offenses: 3,
        };
        assert!(ban.is_ban());
        assert_eq!(
            ban.to_outbound(),
            OutboundAction::Moderation {
                command: "ban".to_string(),
                args: "loud spam (warning 4 of 3)".to_string(),
            }
        );
    }

    #[test]
    fn test_normalize_handle() {
        assert_eq!(normalize_handle("@SomeUser"), "someuser");
        assert_eq!(normalize_handle(" Mixed "), "mixed");
    }

    #[tokio::test]
    async fn test_sync_handler_is_wrapped() {
        let handler = CommandHandler::from_fn(|args, is_mod| {
            if is_mod {
                Some(args.join("+"))
            } else {
                None
            }
        });
        let CommandHandler::Invocable(f) = handler else {
            panic!("expected invocable handler");
        };
        let out = f(vec!["a".to_string(), "b".to_string()], true).await.unwrap();
        assert_eq!(out.as_deref(), Some("a+b"));
        let out = f(vec![], false).await.unwrap();
        assert!(out.is_none());
    }
}
