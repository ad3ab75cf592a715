use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use std::time::Duration;

use crate::platforms::{http_client, LivenessProbe, HTTP_TIMEOUT};

pub const HELIX_STREAMS_URL: &str = "https://api.twitch.tv/helix/streams";

/// Response from "Get Streams" endpoint.
#[derive(Debug, Deserialize)]
pub struct StreamsResponse {
    pub data: Vec<StreamData>,
}

#[derive(Debug, Deserialize)]
pub struct StreamData {
    #[serde(default)]
    pub user_login: String,
    #[serde(rename = "type", default)]
    pub type_field: String, // e.g., "live"
    #[serde(default)]
    pub title: String,
}

/// A channel is live when "Get Streams" returns at least one record for it
pub fn is_live_payload(body: &str) -> Result<bool> {
    let streams: StreamsResponse = serde_json::from_str(body).context("Malformed Get Streams payload")?;
    if let Some(stream) = streams.data.first() {
        debug!("{} is {}: {}", stream.user_login, stream.type_field, stream.title);
    }
    Ok(!streams.data.is_empty())
}

/// Polls the Helix API for the monitored channel
pub struct HelixLivenessProbe {
    http: reqwest::Client,
    client_id: String,
    bearer_token: String,
    user_login: String,
    streams_url: String,
}

impl HelixLivenessProbe {
    pub fn new(client_id: String, bearer_token: String, user_login: String) -> Result<Self> {
        Self::with_timeout(client_id, bearer_token, user_login, HTTP_TIMEOUT)
    }

    /// A poll that takes longer than `timeout` fails instead of stalling the watchdog
    pub fn with_timeout(client_id: String, bearer_token: String, user_login: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            client_id,
            bearer_token: bearer_token.trim_start_matches("oauth:").to_string(),
            user_login,
            streams_url: HELIX_STREAMS_URL.to_string(),
        })
    }
}

#[async_trait]
impl LivenessProbe for HelixLivenessProbe {
    async fn poll(&self) -> Result<bool> {
        let url = format!("{}?user_login={}", self.streams_url, urlencoding::encode(&self.user_login));
        let response = self
            .http
            .get(&url)
            .header("Client-Id", &self.client_id)
            .header("Authorization", format!("Bearer {}", self.bearer_token))
            .send()
            .await
            .context("Get Streams network error")?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Get Streams: HTTP {} => {}", status, body_text));
        }

        let body = response.text().await.context("Failed to read Get Streams body")?;
        is_live_payload(&body)
    }
}
