// src/config/mod.rs - Bot configuration loaded from YAML/TOML with environment overrides

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

use crate::types::{BotTimer, TimerHandler};

pub const DEFAULT_SERVER_URL: &str = "wss://irc-ws.chat.twitch.tv:443";
pub const DEFAULT_COMMAND_PREFIX: &str = "!";
pub const DEFAULT_MAX_OFFENSES: u32 = 3;
pub const DEFAULT_COOLDOWN_SECONDS: u64 = 10;
pub const DEFAULT_TIMER_SECONDS: u64 = 60 * 5;
/// Longest accepted cooldown or timer interval (one year)
pub const MAX_INTERVAL_SECONDS: u64 = 60 * 60 * 24 * 365;

/// Structural problems in a loaded configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config.{0} is required")]
    Missing(&'static str),
    #[error("config.channel must start with '#', got '{0}'")]
    InvalidChannel(String),
    #[error("config.max_offenses must be positive")]
    InvalidMaxOffenses,
    #[error("timer '{0}' must have an interval between 1 second and one year")]
    InvalidTimerInterval(String),
    #[error("config.cooldown_seconds must be at most one year, got {0}")]
    InvalidCooldown(u64),
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
}

/// A recurring announcement as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_timer_seconds")]
    pub seconds: u64,
    pub message: String,
}

/// Complete bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Bot account name (lower-cased on load)
    pub name: String,
    /// OAuth token, `oauth:...`
    pub password: String,
    /// Room to join, `#channel`
    pub channel: String,
    pub server_url: String,
    pub command_prefix: String,
    pub join_message: Option<String>,
    pub part_message: Option<String>,
    pub announce_users: bool,
    /// Static text commands; function commands are registered in code
    pub commands: HashMap<String, String>,
    pub timers: Vec<TimerDefinition>,
    pub filter_spam: bool,
    pub max_offenses: u32,
    pub cooldown_seconds: u64,
    pub auto_exit: bool,
    pub chat_log_dir: Option<PathBuf>,
    pub debug: bool,

    pub discord_token: Option<String>,
    pub discord_channels: Vec<String>,
    pub live_message: Option<String>,

    pub helix_client_id: Option<String>,
    pub helix_token: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            password: String::new(),
            channel: String::new(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
            join_message: None,
            part_message: None,
            announce_users: false,
            commands: HashMap::new(),
            timers: Vec::new(),
            filter_spam: false,
            max_offenses: DEFAULT_MAX_OFFENSES,
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            auto_exit: true,
            chat_log_dir: Some(PathBuf::from("chat_logs")),
            debug: false,
            discord_token: None,
            discord_channels: Vec::new(),
            live_message: None,
            helix_client_id: None,
            helix_token: None,
        }
    }
}

fn default_timer_seconds() -> u64 {
    DEFAULT_TIMER_SECONDS
}

impl BotConfig {
    /// Load configuration from a `.yaml`/`.yml` or `.toml` file, apply
    /// environment overrides and validate the result
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        let mut config = Self::parse(path, &content)?;
        config.apply_env_overrides();
        config.normalize();
        config.validate()?;

        info!(
            "Loaded config for '{}' in {} ({} commands, {} timers)",
            config.name,
            config.channel,
            config.commands.len(),
            config.timers.len()
        );
        Ok(config)
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();

        match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(content)
                .with_context(|| format!("Failed to parse config: {}", path.display())),
            "toml" => toml::from_str(content)
                .with_context(|| format!("Failed to parse config: {}", path.display())),
            other => Err(ConfigError::UnsupportedFormat(other.to_string()).into()),
        }
    }

    /// Environment variables (and `.env`) win over file values
    pub fn apply_env_overrides(&mut self) {
        dotenv::dotenv().ok();

        let overrides: [(&str, &mut String); 3] = [
            ("TWITCH_USERNAME", &mut self.name),
            ("TWITCH_OAUTH_TOKEN", &mut self.password),
            ("TWITCH_CHANNEL", &mut self.channel),
        ];
        for (key, slot) in overrides {
            if let Ok(value) = env::var(key) {
                debug!("Config value overridden by {}", key);
                *slot = value;
            }
        }

        if let Ok(token) = env::var("DISCORD_TOKEN") {
            self.discord_token = Some(token);
        }
        if let Ok(client_id) = env::var("TWITCH_CLIENT_ID") {
            self.helix_client_id = Some(client_id);
        }
        if let Ok(token) = env::var("TWITCH_HELIX_TOKEN") {
            self.helix_token = Some(token);
        }
    }

    fn normalize(&mut self) {
        self.name = self.name.trim().to_lowercase();
        self.password = self.password.trim().to_string();
        self.channel = self.channel.trim().to_lowercase();
        self.command_prefix = self.command_prefix.trim().to_string();
        self.commands = self
            .commands
            .drain()
            .map(|(name, response)| (name.to_lowercase(), response))
            .collect();
        for (i, timer) in self.timers.iter_mut().enumerate() {
            if timer.name.is_empty() {
                timer.name = format!("timer{}", i + 1);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Missing("name"));
        }
        if self.password.is_empty() {
            return Err(ConfigError::Missing("password"));
        }
        if self.channel.is_empty() {
            return Err(ConfigError::Missing("channel"));
        }
        if !self.channel.starts_with('#') {
            return Err(ConfigError::InvalidChannel(self.channel.clone()));
        }
        if self.command_prefix.is_empty() {
            return Err(ConfigError::Missing("command_prefix"));
        }
        if self.max_offenses == 0 {
            return Err(ConfigError::InvalidMaxOffenses);
        }
        if self.cooldown_seconds > MAX_INTERVAL_SECONDS {
            return Err(ConfigError::InvalidCooldown(self.cooldown_seconds));
        }
        if let Some(timer) = self
            .timers
            .iter()
            .find(|t| t.seconds == 0 || t.seconds > MAX_INTERVAL_SECONDS)
        {
            return Err(ConfigError::InvalidTimerInterval(timer.name.clone()));
        }
        Ok(())
    }

    /// Room name without the leading `#`
    pub fn room(&self) -> &str {
        self.channel.trim_start_matches('#')
    }

    /// The broadcaster owning the room; always treated as a moderator
    pub fn owner(&self) -> &str {
        self.room()
    }

    /// Timers from the config file as static-text timers
    pub fn static_timers(&self) -> Vec<BotTimer> {
        self.timers
            .iter()
            .map(|t| BotTimer {
                name: t.name.clone(),
                handler: TimerHandler::text(t.message.clone()),
                interval_seconds: t.seconds,
            })
            .collect()
    }

    /// Whether cross-platform live announcements are configured
    pub fn announcements_enabled(&self) -> bool {
        self.discord_token.is_some() && !self.discord_channels.is_empty()
    }

    pub fn live_announcement(&self) -> String {
        match &self.live_message {
            Some(message) => message.replace("$(channel)", self.room()),
            None => format!("{} is now live! https://twitch.tv/{}", self.room(), self.room()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn valid() -> BotConfig {
        BotConfig {
            name: "examplebot".to_string(),
            password: "oauth:abc".to_string(),
            channel: "#example".to_string(),
            ..BotConfig::default()
        }
    }

    #[tokio::test]
    async fn test_load_yaml_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bot.yaml");
        let yaml = r##"
name: ExampleBot
password: "oauth:xxxxxxxx"
channel: "#Example"
join_message: hi
filter_spam: true
commands:
  Ping: pong
timers:
  - seconds: 10
    message: "follow the stream"
  - message: "default interval"
"##;
        fs::write(&path, yaml).await.unwrap();

        let mut config: BotConfig = BotConfig::parse(&path, yaml).unwrap();
        config.normalize();
        config.validate().unwrap();

        assert_eq!(config.name, "examplebot");
        assert_eq!(config.channel, "#example");
        assert_eq!(config.room(), "example");
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.max_offenses, DEFAULT_MAX_OFFENSES);
        assert!(config.auto_exit);
        assert!(config.filter_spam);
        assert_eq!(config.commands.get("ping").map(String::as_str), Some("pong"));
        assert_eq!(config.timers[0].name, "timer1");
        assert_eq!(config.timers[1].seconds, DEFAULT_TIMER_SECONDS);
        assert_eq!(config.static_timers().len(), 2);
    }

    #[test]
    fn test_parse_toml() {
        let toml_src = r##"
name = "bot"
password = "oauth:t"
channel = "#room"
max_offenses = 5
"##;
        let config = BotConfig::parse(Path::new("bot.toml"), toml_src).unwrap();
        assert_eq!(config.max_offenses, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unsupported_extension() {
        let err = BotConfig::parse(Path::new("bot.ini"), "").unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = valid();
        config.channel = "example".to_string();
        assert_eq!(config.validate(), Err(ConfigError::InvalidChannel("example".to_string())));

        let mut config = valid();
        config.password.clear();
        assert_eq!(config.validate(), Err(ConfigError::Missing("password")));

        let mut config = valid();
        config.max_offenses = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxOffenses));

        let mut config = valid();
        config.timers.push(TimerDefinition {
            name: "broken".to_string(),
            seconds: 0,
            message: "x".to_string(),
        });
        assert_eq!(config.validate(), Err(ConfigError::InvalidTimerInterval("broken".to_string())));

        let mut config = valid();
        config.timers.push(TimerDefinition {
            name: "forever".to_string(),
            seconds: u64::MAX,
            message: "x".to_string(),
        });
        assert_eq!(config.validate(), Err(ConfigError::InvalidTimerInterval("forever".to_string())));

        let mut config = valid();
        config.cooldown_seconds = u64::MAX;
        assert_eq!(config.validate(), Err(ConfigError::InvalidCooldown(u64::MAX)));
        config.cooldown_seconds = MAX_INTERVAL_SECONDS;
        assert_eq!(config.validate(), Ok(()));
    }

    #[tokio::test]
    async fn test_load_applies_env_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bot.yaml");
        let yaml = r##"
name: filebot
password: "oauth:from-file"
channel: "#fromfile"
discord_channels: ["123"]
"##;
        fs::write(&path, yaml).await.unwrap();

        // the only test touching these variables
        let keys = [
            ("TWITCH_USERNAME", " EnvBot "),
            ("TWITCH_OAUTH_TOKEN", "oauth:from-env"),
            ("TWITCH_CHANNEL", "#EnvRoom"),
            ("DISCORD_TOKEN", "discord-from-env"),
        ];
        for (key, value) in keys {
            env::set_var(key, value);
        }
        let loaded = BotConfig::load(&path).await;
        for (key, _) in keys {
            env::remove_var(key);
        }

        let config = loaded.unwrap();
        assert_eq!(config.name, "envbot");
        assert_eq!(config.password, "oauth:from-env");
        assert_eq!(config.channel, "#envroom");
        assert_eq!(config.room(), "envroom");
        assert_eq!(config.discord_token.as_deref(), Some("discord-from-env"));
        assert!(config.announcements_enabled());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = BotConfig::load(dir.path().join("absent.yaml")).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read config"));
    }

    #[test]
    fn test_live_announcement() {
        let mut config = valid();
        assert_eq!(config.live_announcement(), "example is now live! https://twitch.tv/example");
        config.live_message = Some("$(channel) started streaming".to_string());
        assert_eq!(config.live_announcement(), "example started streaming");
        assert!(!config.announcements_enabled());
    }
}
