//! # twitchcmd
//!
//! Command and moderation bot for a single Twitch room.
//!
//! ## Features
//!
//! - **Command Routing**: static text or async handlers, shared per-command cooldown
//! - **Spam Escalation**: caps-lock detection with timeout, longer timeout, then ban
//! - **Timers**: recurring announcements, re-armed after each run
//! - **Presence Watchdog**: live announcements to Discord and auto-exit after the stream ends
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use twitchcmd::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BotConfig::load("config/bot.yaml").await?;
//!     let transport = Arc::new(TwitchConnection::new(TwitchConfig::from_bot_config(&config)));
//!
//!     let mut bot = ChatBot::new(config)?;
//!     bot.add_command("hello", CommandHandler::text("Hello chat!"));
//!     bot.add_command(
//!         "echo",
//!         CommandHandler::from_fn(|args, _is_mod| Some(args.join(" "))),
//!     );
//!
//!     bot.run(transport).await
//! }
//! ```

pub mod bot;
pub mod config;
pub mod platforms;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::chat_log::{ChatLog, FileChatLog};
    pub use crate::bot::shutdown::ControlMessage;
    pub use crate::bot::ChatBot;
    pub use crate::config::BotConfig;
    pub use crate::platforms::{
        discord::DiscordAnnouncer,
        helix::HelixLivenessProbe,
        twitch::{TwitchConfig, TwitchConnection},
        AnnouncementSink, ChatTransport, LivenessProbe,
    };
    pub use crate::types::{
        BotTimer, CommandHandler, ModerationAction, OutboundAction, RoomEvent, TimerHandler,
    };
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
