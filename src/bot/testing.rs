// In-memory transport for driving a ChatBot from tests

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::platforms::ChatTransport;
use crate::types::{OutboundAction, RoomEvent};

/// Records every outbound call as an `OutboundAction` and hands out a
/// sender for injecting synthetic room events.
pub struct FakeTransport {
    events: Mutex<Option<mpsc::Receiver<RoomEvent>>>,
    recorder: mpsc::UnboundedSender<OutboundAction>,
    connected: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> (Arc<Self>, mpsc::Sender<RoomEvent>, mpsc::UnboundedReceiver<OutboundAction>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (recorder, recorded) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            events: Mutex::new(Some(event_rx)),
            recorder,
            connected: AtomicBool::new(false),
        });
        (transport, event_tx, recorded)
    }

    fn record(&self, action: OutboundAction) -> Result<()> {
        let _ = self.recorder.send(action);
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn connect(&self) -> Result<mpsc::Receiver<RoomEvent>> {
        self.connected.store(true, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow::anyhow!("fake transport already connected"))
    }

    async fn say(&self, text: &str) -> Result<()> {
        self.record(OutboundAction::say(text))
    }

    async fn send_moderation_command(&self, command: &str, args: &str) -> Result<()> {
        self.record(OutboundAction::Moderation {
            command: command.to_string(),
            args: args.to_string(),
        })
    }

    async fn join_room(&self) -> Result<()> {
        self.record(OutboundAction::JoinRoom)
    }

    async fn leave_room(&self) -> Result<()> {
        self.record(OutboundAction::LeaveRoom)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.record(OutboundAction::Disconnect)
    }

    fn platform_name(&self) -> &str {
        "fake"
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Everything recorded up to and including the final `Disconnect`
pub async fn collect_until_disconnect(recorded: &mut mpsc::UnboundedReceiver<OutboundAction>) -> Vec<OutboundAction> {
    let mut actions = Vec::new();
    while let Some(action) = recorded.recv().await {
        let done = action == OutboundAction::Disconnect;
        actions.push(action);
        if done {
            break;
        }
    }
    actions
}
