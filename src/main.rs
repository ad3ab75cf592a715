use anyhow::{Context, Result};
use log::{error, info, warn};
use rand::Rng;
use std::env;
use std::sync::Arc;

use twitchcmd::bot::shutdown::spawn_signal_handlers;
use twitchcmd::prelude::*;

const DEFAULT_CONFIG_PATH: &str = "config/bot.yaml";
const DEFAULT_ROLL_MAX: u32 = 100;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Starting twitchcmd v{}", twitchcmd::VERSION);

    let config_path = env::var("TWITCHCMD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = BotConfig::load(&config_path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let transport = Arc::new(TwitchConnection::new(TwitchConfig::from_bot_config(&config)));

    let chat_log = match &config.chat_log_dir {
        Some(dir) => match FileChatLog::open(dir, config.room()).await {
            Ok(log) => Some(Arc::new(log)),
            Err(e) => {
                error!("Chat logging disabled: {:#}", e);
                None
            }
        },
        None => None,
    };

    let liveness = match (&config.helix_client_id, &config.helix_token) {
        (Some(client_id), Some(token)) => Some(Arc::new(HelixLivenessProbe::new(
            client_id.clone(),
            token.clone(),
            config.room().to_string(),
        )?)),
        _ => {
            warn!("No Helix credentials configured, presence watchdog disabled");
            None
        }
    };

    let announcer = match &config.discord_token {
        Some(token) if config.announcements_enabled() => Some(Arc::new(DiscordAnnouncer::new(token.clone())?)),
        _ => None,
    };

    let mut bot = ChatBot::new(config)?;

    // =================================================================
    // BUILT-IN COMMANDS
    // =================================================================

    bot.add_command("roll", CommandHandler::from_fn(|args, _is_mod| Some(roll(&args, &mut rand::rng()))));

    if let Some(chat_log) = &chat_log {
        bot.set_chat_log(chat_log.clone());
    }
    if let Some(probe) = liveness {
        bot.set_liveness_probe(probe);
    }
    if let Some(announcer) = announcer {
        bot.set_announcer(announcer);
    }

    // =================================================================
    // GRACEFUL SHUTDOWN SETUP
    // =================================================================

    spawn_signal_handlers(bot.control_handle());

    info!("Bot is running. Press Ctrl+C to stop.");
    let outcome = bot.run(transport).await;

    // lines queued before the session ended still reach disk
    if let Some(chat_log) = &chat_log {
        chat_log.flush().await;
    }
    outcome?;

    info!("twitchcmd stopped");
    Ok(())
}

/// `!roll` gives 0-100, `!roll N` gives 0-N
fn roll<R: Rng>(args: &[String], rng: &mut R) -> String {
    let max = args
        .first()
        .and_then(|arg| arg.parse::<u32>().ok())
        .filter(|max| *max > 0)
        .unwrap_or(DEFAULT_ROLL_MAX);
    rng.random_range(0..=max).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_roll_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let value: u32 = roll(&[], &mut rng).parse().unwrap();
            assert!(value <= DEFAULT_ROLL_MAX);

            let value: u32 = roll(&["6".to_string()], &mut rng).parse().unwrap();
            assert!(value <= 6);
        }
    }

    #[test]
    fn test_roll_ignores_bad_argument() {
        let mut rng = StdRng::seed_from_u64(7);
        for arg in ["zero", "0", "-5"] {
            let value: u32 = roll(&[arg.to_string()], &mut rng).parse().unwrap();
            assert!(value <= DEFAULT_ROLL_MAX);
        }
    }
}
