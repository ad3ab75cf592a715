use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::types::RoomEvent;

pub mod discord;
pub mod helix;
pub mod twitch;

/// Upper bound on any single REST request, connect through body
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Interface every chat transport must implement.
///
/// The transport owns the wire protocol; the bot only sees normalized
/// `RoomEvent`s and issues the outbound commands below.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Connect and return the stream of normalized room events
    async fn connect(&self) -> Result<mpsc::Receiver<RoomEvent>>;

    /// Post a chat message in the room
    async fn say(&self, text: &str) -> Result<()>;

    /// Issue a moderation command such as `timeout` or `ban`
    async fn send_moderation_command(&self, command: &str, args: &str) -> Result<()>;

    async fn join_room(&self) -> Result<()>;

    async fn leave_room(&self) -> Result<()>;

    /// Gracefully disconnect
    async fn disconnect(&self) -> Result<()>;

    /// Get the platform identifier (e.g., "twitch")
    fn platform_name(&self) -> &str;

    /// Check if the connection is healthy
    async fn is_connected(&self) -> bool;
}

/// External signal telling whether the monitored stream is live
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn poll(&self) -> Result<bool>;
}

/// Second messaging platform that receives live announcements
#[async_trait]
pub trait AnnouncementSink: Send + Sync {
    /// Whether the platform finished its own startup and accepts posts
    async fn is_ready(&self) -> bool;

    async fn post_announcement(&self, channel_id: &str, text: &str) -> Result<()>;
}
