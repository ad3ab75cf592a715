// src/bot/chat_log.rs - Append-only chat transcript, one file per room and day

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

/// Sink for every chat line the bot sees. Appends never block the caller.
pub trait ChatLog: Send + Sync {
    fn append(&self, at: DateTime<Utc>, sender: &str, text: &str);
}

#[derive(Debug)]
enum WriterRequest {
    Line {
        at: DateTime<Utc>,
        sender: String,
        text: String,
    },
    /// Answered once every earlier line has been written
    Flush(oneshot::Sender<()>),
}

/// Writes `[HH:MM:SS] sender: text` lines to `<dir>/<room>-<YYYY-MM-DD>.log`
pub struct FileChatLog {
    sender: mpsc::UnboundedSender<WriterRequest>,
}

impl FileChatLog {
    pub async fn open<P: AsRef<Path>>(dir: P, room: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create chat log directory: {}", dir.display()))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(write_lines(dir.clone(), room.to_string(), receiver));
        info!("Logging chat for '{}' to {}", room, dir.display());
        Ok(Self { sender })
    }

    /// Path of the log file that holds lines written at `at`
    pub fn file_for(dir: &Path, room: &str, at: DateTime<Utc>) -> PathBuf {
        dir.join(format!("{}-{}.log", room, at.format("%Y-%m-%d")))
    }

    /// Wait until every line appended so far is on disk
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.sender.send(WriterRequest::Flush(done_tx)).is_err() {
            error!("Chat log writer gone, queued lines may be lost");
            return;
        }
        if done_rx.await.is_err() {
            error!("Chat log writer stopped before flushing");
        }
    }
}

impl ChatLog for FileChatLog {
    fn append(&self, at: DateTime<Utc>, sender: &str, text: &str) {
        let line = WriterRequest::Line {
            at,
            sender: sender.to_string(),
            text: text.to_string(),
        };
        if self.sender.send(line).is_err() {
            debug!("Chat log writer gone, dropping line");
        }
    }
}

async fn write_lines(dir: PathBuf, room: String, mut receiver: mpsc::UnboundedReceiver<WriterRequest>) {
    while let Some(request) = receiver.recv().await {
        match request {
            WriterRequest::Line { at, sender, text } => {
                let path = FileChatLog::file_for(&dir, &room, at);
                let entry = format!("[{}] {}: {}\n", at.format("%H:%M:%S"), sender, text);
                if let Err(e) = append_to(&path, entry.as_bytes()).await {
                    error!("Failed to write chat log {}: {}", path.display(), e);
                }
            }
            WriterRequest::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Chat log writer for '{}' stopped", room);
}

async fn append_to(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(bytes).await?;
    file.flush().await
}
