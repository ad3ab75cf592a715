use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::config::BotConfig;
use crate::platforms::{AnnouncementSink, ChatTransport, LivenessProbe};
use crate::types::{normalize_handle, BotTimer, CommandHandler, ModerationAction, OutboundAction, RoomEvent};

pub mod chat_log;
pub mod commands;
pub mod escalation;
pub mod moderation;
pub mod presence;
pub mod rate_limit;
pub mod room_state;
pub mod shutdown;
pub mod timers;

#[cfg(test)]
pub(crate) mod testing;

use chat_log::ChatLog;
use commands::{CommandSystem, RouteOutcome};
use escalation::OffenseEscalator;
use moderation::{SpamClassifier, CAPS_SPAM_REASON};
use presence::{Announcements, PresenceTracker, PresenceWatchdog};
use rate_limit::RateLimitLedger;
use room_state::RoomState;
use shutdown::{ControlMessage, ShutdownSignal};
use timers::TimerSystem;

/// System user whose MODE lines grant and revoke moderator status
pub const TRUSTED_AUTHORITY: &str = "jtv";

const OUTBOUND_BUFFER: usize = 256;
const CONTROL_BUFFER: usize = 8;

/// How long `stop` waits for running tasks before aborting them
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Mutable room session data, guarded by a single lock
#[derive(Debug)]
pub struct SessionState {
    pub room: RoomState,
    pub rate_limits: RateLimitLedger,
    pub presence: PresenceTracker,
}

impl SessionState {
    pub fn new(cooldown_seconds: u64, auto_exit: bool) -> Self {
        Self {
            room: RoomState::new(),
            rate_limits: RateLimitLedger::new(cooldown_seconds),
            presence: PresenceTracker::new(auto_exit),
        }
    }
}

enum Verdict {
    Spam(ModerationAction),
    Routed(RouteOutcome),
}

/// Core bot engine: one room session from connect to disconnect
pub struct ChatBot {
    config: Arc<BotConfig>,
    command_system: CommandSystem,
    timer_system: TimerSystem,
    state: Arc<Mutex<SessionState>>,
    spam: SpamClassifier,
    escalator: OffenseEscalator,

    chat_log: Option<Arc<dyn ChatLog>>,
    liveness: Option<Arc<dyn LivenessProbe>>,
    announcer: Option<Arc<dyn AnnouncementSink>>,

    outbound: Option<mpsc::Sender<OutboundAction>>,
    control_tx: mpsc::Sender<ControlMessage>,
    control_rx: Option<mpsc::Receiver<ControlMessage>>,
    shutdown: ShutdownSignal,

    background: Vec<JoinHandle<()>>,
    in_flight: Vec<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
    joined: bool,
    stopped: bool,
}

impl ChatBot {
    /// Build a session from config, registering its static commands and timers
    pub fn new(config: BotConfig) -> Result<Self> {
        let mut command_system = CommandSystem::new();
        command_system.set_command_prefix(config.command_prefix.clone());
        for (name, handler) in commands::static_commands(&config.commands) {
            command_system.add_command(&name, handler);
        }

        let mut timer_system = TimerSystem::new();
        for timer in config.static_timers() {
            timer_system.add_timer(timer)?;
        }

        let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);

        Ok(Self {
            state: Arc::new(Mutex::new(SessionState::new(config.cooldown_seconds, config.auto_exit))),
            spam: SpamClassifier::new(config.filter_spam),
            escalator: OffenseEscalator::new(config.max_offenses),
            config: Arc::new(config),
            command_system,
            timer_system,
            chat_log: None,
            liveness: None,
            announcer: None,
            outbound: None,
            control_tx,
            control_rx: Some(control_rx),
            shutdown: ShutdownSignal::new(),
            background: Vec::new(),
            in_flight: Vec::new(),
            pump: None,
            joined: false,
            stopped: false,
        })
    }

    // =================================================================
    // REGISTRATION - only effective before `start`
    // =================================================================

    pub fn add_command(&mut self, name: &str, handler: CommandHandler) {
        self.command_system.add_command(name, handler);
    }

    pub fn add_timer(&mut self, timer: BotTimer) -> Result<()> {
        self.timer_system.add_timer(timer)
    }

    pub fn set_chat_log(&mut self, chat_log: Arc<dyn ChatLog>) {
        self.chat_log = Some(chat_log);
    }

    pub fn set_liveness_probe(&mut self, probe: Arc<dyn LivenessProbe>) {
        self.liveness = Some(probe);
    }

    pub fn set_announcer(&mut self, announcer: Arc<dyn AnnouncementSink>) {
        self.announcer = Some(announcer);
    }

    /// Sender for out-of-band requests such as a signal-triggered shutdown
    pub fn control_handle(&self) -> mpsc::Sender<ControlMessage> {
        self.control_tx.clone()
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub async fn is_moderator(&self, handle: &str) -> bool {
        self.state.lock().await.room.is_moderator(handle)
    }

    pub async fn offenses(&self, handle: &str) -> u32 {
        self.state.lock().await.room.offenses(handle)
    }

    pub async fn is_live(&self) -> bool {
        self.state.lock().await.presence.is_live()
    }

    // =================================================================
    // LIFECYCLE
    // =================================================================

    /// Connect the transport and start forwarding outbound actions to it.
    /// Returns the room event stream for the caller to feed into `handle_event`.
    pub async fn start(&mut self, transport: Arc<dyn ChatTransport>) -> Result<mpsc::Receiver<RoomEvent>> {
        info!("Starting chat bot for {} on {}...", self.config.channel, transport.platform_name());

        {
            let mut state = self.state.lock().await;
            state.room.seed_moderator(&self.config.name);
            state.room.seed_moderator(self.config.owner());
        }

        let events = transport
            .connect()
            .await
            .with_context(|| format!("Failed to connect to {}", transport.platform_name()))?;

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        self.pump = Some(tokio::spawn(pump_outbound(transport, outbound_rx)));
        self.outbound = Some(outbound_tx);

        info!("Chat bot started with {} commands and {} timers", self.command_system.len(), self.timer_system.len());
        Ok(events)
    }

    /// Process room events until the stream ends or a shutdown is requested,
    /// then stop the session
    pub async fn run(&mut self, transport: Arc<dyn ChatTransport>) -> Result<()> {
        let mut control = self.control_rx.take().context("Chat bot session already ran")?;
        let mut events = self.start(transport).await?;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Room event stream closed");
                        break;
                    }
                },
                Some(message) = control.recv() => match message {
                    ControlMessage::Shutdown { reason } => {
                        info!("Shutdown requested: {}", reason);
                        break;
                    }
                },
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Leave the room and tear the session down. Safe to call more than once.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("Shutting down chat bot...");

        // timers and the watchdog go quiet before the part message
        self.shutdown.trigger();
        drain_tasks(std::mem::take(&mut self.background), "Background task").await;
        drain_tasks(std::mem::take(&mut self.in_flight), "Command handler task").await;

        if let Some(outbound) = self.outbound.take() {
            if self.joined {
                if let Some(part_message) = &self.config.part_message {
                    let _ = outbound.send(OutboundAction::say(part_message.clone())).await;
                }
            }
            let _ = outbound.send(OutboundAction::LeaveRoom).await;
            let _ = outbound.send(OutboundAction::Disconnect).await;
        }

        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                error!("Outbound pump failed: {}", e);
            }
        }

        info!("Chat bot shutdown complete");
    }

    // =================================================================
    // EVENT DISPATCH
    // =================================================================

    pub async fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Connected => {
                info!("Connected, joining {}", self.config.channel);
                self.send(OutboundAction::JoinRoom).await;
            }
            RoomEvent::Join { handle } => self.handle_join(&handle).await,
            RoomEvent::Part { handle } => self.handle_part(&handle).await,
            RoomEvent::Message { handle, text } => self.handle_message(&handle, &text).await,
            RoomEvent::PrivilegeChange { room, actor, delta, target } => {
                self.handle_privilege_change(&room, &actor, &delta, &target).await
            }
            RoomEvent::RawDiagnostic { line } => {
                if self.config.debug {
                    info!("< {}", line);
                } else {
                    debug!("< {}", line);
                }
            }
            RoomEvent::Disconnected => warn!("Transport reported disconnect"),
        }
    }

    /// Manually record an offense, e.g. from a moderator-only command
    pub async fn punish(&self, handle: &str, duration_seconds: Option<u64>, reason: &str) -> ModerationAction {
        let action = {
            let mut state = self.state.lock().await;
            self.escalator.record_offense(&mut state.room, handle, duration_seconds, reason)
        };
        self.send(action.to_outbound()).await;
        action
    }

    async fn handle_join(&mut self, handle: &str) {
        let handle = normalize_handle(handle);
        if handle == self.config.name {
            self.on_own_join().await;
            return;
        }

        self.state.lock().await.room.on_join(&handle);
        debug!("{} joined", handle);
        if self.config.announce_users {
            self.send(OutboundAction::say(format!("{} joined", handle))).await;
        }
    }

    async fn on_own_join(&mut self) {
        if self.joined {
            debug!("Ignoring repeated join of our own account");
            return;
        }
        self.joined = true;
        info!("Joined {}", self.config.channel);

        if let Some(join_message) = &self.config.join_message {
            self.send(OutboundAction::say(join_message.clone())).await;
        }

        let Some(outbound) = self.outbound.clone() else {
            warn!("Joined before start, background tasks not started");
            return;
        };

        if !self.timer_system.is_empty() {
            self.background.push(self.timer_system.start(outbound, self.shutdown.subscribe()));
        }

        if let Some(probe) = &self.liveness {
            let announcements = match &self.announcer {
                Some(sink) if !self.config.discord_channels.is_empty() => Some(Announcements {
                    sink: Arc::clone(sink),
                    channels: self.config.discord_channels.clone(),
                    text: self.config.live_announcement(),
                }),
                _ => None,
            };
            let watchdog = PresenceWatchdog::new(Arc::clone(probe), announcements);
            self.background.push(watchdog.start(
                Arc::clone(&self.state),
                self.control_tx.clone(),
                self.shutdown.subscribe(),
            ));
        }
    }

    async fn handle_part(&mut self, handle: &str) {
        let handle = normalize_handle(handle);
        if handle == self.config.name {
            debug!("Own part observed");
            return;
        }

        self.state.lock().await.room.on_part(&handle);
        debug!("{} left", handle);
        if self.config.announce_users {
            self.send(OutboundAction::say(format!("{} left", handle))).await;
        }
    }

    async fn handle_message(&mut self, handle: &str, text: &str) {
        let sender = normalize_handle(handle);
        let now = Utc::now();

        if let Some(chat_log) = &self.chat_log {
            chat_log.append(now, &sender, text);
        }

        let verdict = {
            let mut state = self.state.lock().await;
            let SessionState { room, rate_limits, .. } = &mut *state;
            room.on_join(&sender);
            let is_moderator = room.is_moderator(&sender);

            if self.spam.is_spam(is_moderator, text) {
                Verdict::Spam(self.escalator.record_offense(room, &sender, None, CAPS_SPAM_REASON))
            } else {
                Verdict::Routed(self.command_system.route(&sender, text, is_moderator, rate_limits, now))
            }
        };

        match verdict {
            Verdict::Spam(action) => {
                warn!("Message flagged as spam from {}: {}", sender, text);
                self.send(action.to_outbound()).await;
            }
            Verdict::Routed(RouteOutcome::Dispatched(dispatch)) => {
                let Some(outbound) = &self.outbound else {
                    debug!("Not started, dropping command from {}", sender);
                    return;
                };
                if let Some(handle) = commands::execute(dispatch, outbound).await {
                    self.in_flight.retain(|task| !task.is_finished());
                    self.in_flight.push(handle);
                }
            }
            Verdict::Routed(_) => {}
        }
    }

    async fn handle_privilege_change(&mut self, room: &str, actor: &str, delta: &str, target: &str) {
        let room = room.trim_start_matches('#').to_lowercase();
        if room != self.config.room() {
            debug!("Privilege change for other room '{}' ignored", room);
            return;
        }
        if normalize_handle(actor) != TRUSTED_AUTHORITY {
            debug!("Privilege change from untrusted '{}' ignored", actor);
            return;
        }
        let grant = match delta {
            "+o" => true,
            "-o" => false,
            other => {
                debug!("Unsupported mode '{}' ignored", other);
                return;
            }
        };

        if self.state.lock().await.room.set_moderator(target, grant) {
            info!("{} is {} a moderator", normalize_handle(target), if grant { "now" } else { "no longer" });
        }
    }

    async fn send(&self, action: OutboundAction) {
        match &self.outbound {
            Some(outbound) => {
                if outbound.send(action).await.is_err() {
                    debug!("Outbound channel closed, dropping action");
                }
            }
            None => debug!("Not started, dropping {:?}", action),
        }
    }
}

/// Await `handles` for at most `SHUTDOWN_GRACE`, then abort whatever is left
async fn drain_tasks(mut handles: Vec<JoinHandle<()>>, what: &str) {
    if handles.is_empty() {
        return;
    }
    match tokio::time::timeout(SHUTDOWN_GRACE, join_all(handles.iter_mut())).await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    error!("{} failed during shutdown: {}", what, e);
                }
            }
        }
        Err(_) => {
            let pending = handles.iter().filter(|handle| !handle.is_finished()).count();
            warn!("{} still running after {}s, aborting {}", what, SHUTDOWN_GRACE.as_secs(), pending);
            for handle in &handles {
                handle.abort();
            }
        }
    }
}

/// Forward queued actions to the transport until `Disconnect` goes out
async fn pump_outbound(transport: Arc<dyn ChatTransport>, mut outbound: mpsc::Receiver<OutboundAction>) {
    while let Some(action) = outbound.recv().await {
        let result = match &action {
            OutboundAction::Say { text } => transport.say(text).await,
            OutboundAction::Moderation { command, args } => transport.send_moderation_command(command, args).await,
            OutboundAction::JoinRoom => transport.join_room().await,
            OutboundAction::LeaveRoom => transport.leave_room().await,
            OutboundAction::Disconnect => transport.disconnect().await,
        };

        if let Err(e) = result {
            error!("Failed to deliver {:?} to {}: {}", action, transport.platform_name(), e);
        }
        if action == OutboundAction::Disconnect {
            break;
        }
    }
    debug!("Outbound pump for {} stopped", transport.platform_name());
}
