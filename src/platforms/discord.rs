use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::platforms::{http_client, AnnouncementSink, HTTP_TIMEOUT};

pub const DISCORD_API_URL: &str = "https://discord.com/api/v10";

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
}

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
}

/// Posts live announcements to Discord text channels over the REST API
pub struct DiscordAnnouncer {
    http: reqwest::Client,
    token: String,
    api_url: String,
    ready: AtomicBool,
}

impl DiscordAnnouncer {
    pub fn new(token: String) -> Result<Self> {
        Ok(Self {
            http: http_client(HTTP_TIMEOUT)?,
            token,
            api_url: DISCORD_API_URL.to_string(),
            ready: AtomicBool::new(false),
        })
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Validate the token against `/users/@me`
    async fn check_identity(&self) -> Result<DiscordUser> {
        let response = self
            .http
            .get(format!("{}/users/@me", self.api_url))
            .header("Authorization", self.authorization())
            .send()
            .await
            .context("Discord: error calling /users/@me")?;

        if !response.status().is_success() {
            return Err(anyhow!("Discord: /users/@me returned HTTP {}", response.status()));
        }

        response
            .json::<DiscordUser>()
            .await
            .context("Discord: could not parse /users/@me")
    }
}

#[async_trait]
impl AnnouncementSink for DiscordAnnouncer {
    async fn is_ready(&self) -> bool {
        if self.ready.load(Ordering::SeqCst) {
            return true;
        }
        match self.check_identity().await {
            Ok(user) => {
                info!("Discord ready as {} ({})", user.username, user.id);
                self.ready.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                warn!("Discord not ready: {:#}", e);
                false
            }
        }
    }

    async fn post_announcement(&self, channel_id: &str, text: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/channels/{}/messages", self.api_url, channel_id))
            .header("Authorization", self.authorization())
            .json(&CreateMessage { content: text })
            .send()
            .await
            .with_context(|| format!("Discord: error posting to channel {}", channel_id))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Discord: channel {} returned HTTP {} => {}", channel_id, status, body_text));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_body() {
        let body = serde_json::to_string(&CreateMessage { content: "example is now live!" }).unwrap();
        assert_eq!(body, r#"{"content":"example is now live!"}"#);
    }

    #[tokio::test]
    async fn test_unreachable_api_is_not_ready() {
        let mut announcer = DiscordAnnouncer::new("token".to_string()).unwrap();
        announcer.api_url = "http://127.0.0.1:9".to_string();
        assert!(!announcer.is_ready().await);
        assert!(announcer.post_announcement("123", "hi").await.is_err());
    }
}
