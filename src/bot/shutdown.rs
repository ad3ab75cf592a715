// src/bot/shutdown.rs - Shutdown signalling between the session and its background tasks

use log::{error, info};
use tokio::signal;
use tokio::sync::{mpsc, watch};

/// Requests delivered to a running session from outside the event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Shutdown { reason: String },
}

/// One-shot broadcast telling timers and the watchdog to stop.
///
/// Late subscribers still see the flag, unlike a broadcast channel.
#[derive(Debug)]
pub struct ShutdownSignal {
    sender: watch::Sender<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Flip the flag; returns false if it was already set
    pub fn trigger(&self) -> bool {
        let mut first = false;
        self.sender.send_if_modified(|stopped| {
            first = !*stopped;
            *stopped = true;
            first
        });
        first
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Resolves once the flag is set. A dropped sender counts as shutdown.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

/// Forward Ctrl+C and SIGTERM to the session as shutdown requests
pub fn spawn_signal_handlers(control: mpsc::Sender<ControlMessage>) {
    let control_sigint = control.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal, initiating graceful shutdown...");
                let _ = control_sigint
                    .send(ControlMessage::Shutdown { reason: "ctrl-c".to_string() })
                    .await;
            }
            Err(err) => {
                error!("Failed to listen for Ctrl+C signal: {}", err);
            }
        }
    });

    // Handle SIGTERM (systemd, docker stop, etc.)
    #[cfg(unix)]
    tokio::spawn(async move {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!("Failed to register SIGTERM handler: {}", err);
                return;
            }
        };

        sigterm.recv().await;
        info!("Received SIGTERM signal, initiating graceful shutdown...");
        let _ = control
            .send(ControlMessage::Shutdown { reason: "sigterm".to_string() })
            .await;
    });

    info!("Shutdown signal handlers started");
}
