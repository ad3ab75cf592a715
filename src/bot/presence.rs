// src/bot/presence.rs - Live/offline tracking, cross-platform announcements and auto-exit

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};

use crate::bot::shutdown::{wait_for_shutdown, ControlMessage};
use crate::bot::SessionState;
use crate::platforms::{AnnouncementSink, LivenessProbe};

pub const POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const OFFLINE_GRACE_MINUTES: i64 = 30;

/// One poll of the liveness signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Live,
    Offline,
    /// Error or malformed payload: no new information
    Failed,
}

/// What a poll changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    None,
    WentLive,
    WentOffline,
    AutoExit,
}

/// Live/offline state machine; starts offline
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    is_live: bool,
    offline_since: Option<DateTime<Utc>>,
    exit_requested: bool,
    auto_exit: bool,
    grace: ChronoDuration,
}

impl PresenceTracker {
    pub fn new(auto_exit: bool) -> Self {
        Self {
            is_live: false,
            offline_since: None,
            exit_requested: false,
            auto_exit,
            grace: ChronoDuration::minutes(OFFLINE_GRACE_MINUTES),
        }
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    pub fn offline_since(&self) -> Option<DateTime<Utc>> {
        self.offline_since
    }

    pub fn observe(&mut self, poll: PollOutcome, now: DateTime<Utc>) -> PresenceTransition {
        match poll {
            PollOutcome::Failed => PresenceTransition::None,
            PollOutcome::Live => {
                if self.is_live {
                    return PresenceTransition::None;
                }
                self.is_live = true;
                self.offline_since = None;
                PresenceTransition::WentLive
            }
            PollOutcome::Offline => {
                if self.is_live {
                    self.is_live = false;
                    self.offline_since = Some(now);
                    return PresenceTransition::WentOffline;
                }
                let Some(since) = self.offline_since else {
                    // started while offline: the grace window begins now
                    self.offline_since = Some(now);
                    return PresenceTransition::None;
                };
                if self.auto_exit && !self.exit_requested && now.signed_duration_since(since) > self.grace {
                    self.exit_requested = true;
                    return PresenceTransition::AutoExit;
                }
                PresenceTransition::None
            }
        }
    }
}

/// Where live announcements go
pub struct Announcements {
    pub sink: Arc<dyn AnnouncementSink>,
    pub channels: Vec<String>,
    pub text: String,
}

/// Background poller driving the `PresenceTracker` held in session state
pub struct PresenceWatchdog {
    pub probe: Arc<dyn LivenessProbe>,
    pub announcements: Option<Announcements>,
    pub poll_interval: Duration,
}

impl PresenceWatchdog {
    pub fn new(probe: Arc<dyn LivenessProbe>, announcements: Option<Announcements>) -> Self {
        Self {
            probe,
            announcements,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Spawn the polling loop. The first poll happens immediately.
    pub fn start(
        self,
        state: Arc<Mutex<SessionState>>,
        control: mpsc::Sender<ControlMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Presence watchdog started (every {}s)", self.poll_interval.as_secs());
            let clock = MonotonicClock::new();
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => break,
                    _ = interval.tick() => {}
                }

                // an in-flight poll is abandoned on shutdown
                let poll = tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => break,
                    result = self.probe.poll() => match result {
                        Ok(true) => PollOutcome::Live,
                        Ok(false) => PollOutcome::Offline,
                        Err(e) => {
                            warn!("Liveness poll failed: {}", e);
                            PollOutcome::Failed
                        }
                    },
                };

                let transition = state.lock().await.presence.observe(poll, clock.now());
                match transition {
                    PresenceTransition::None => debug!("Presence poll: {:?}", poll),
                    PresenceTransition::WentLive => {
                        info!("Stream went live");
                        tokio::select! {
                            _ = wait_for_shutdown(&mut shutdown) => break,
                            _ = self.announce() => {}
                        }
                    }
                    PresenceTransition::WentOffline => info!("Stream went offline"),
                    PresenceTransition::AutoExit => {
                        info!("Stream offline for over {} minutes, requesting exit", OFFLINE_GRACE_MINUTES);
                        let request = ControlMessage::Shutdown { reason: "stream offline".to_string() };
                        if control.send(request).await.is_err() {
                            warn!("Session gone before auto-exit request");
                        }
                        break;
                    }
                }
            }

            info!("Presence watchdog stopped");
        })
    }

    async fn announce(&self) {
        let Some(announcements) = &self.announcements else {
            return;
        };
        if !announcements.sink.is_ready().await {
            warn!("Announcement platform not ready, skipping live announcement");
            return;
        }
        for channel in &announcements.channels {
            match announcements.sink.post_announcement(channel, &announcements.text).await {
                Ok(()) => info!("Posted live announcement to {}", channel),
                Err(e) => error!("Failed to post live announcement to {}: {}", channel, e),
            }
        }
    }
}

/// Wall-clock time advanced by the tokio clock, so paused-time tests work
struct MonotonicClock {
    origin: Instant,
    wall: DateTime<Utc>,
}

impl MonotonicClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            wall: Utc::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = ChronoDuration::from_std(self.origin.elapsed()).unwrap_or_else(|_| ChronoDuration::zero());
        self.wall + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn minutes(m: i64) -> ChronoDuration {
        ChronoDuration::minutes(m)
    }

    #[test]
    fn test_auto_exit_after_grace_window() {
        let t0 = Utc::now();
        let mut tracker = PresenceTracker::new(true);

        let transitions: Vec<_> = [0, 15, 31, 45]
            .iter()
            .map(|m| tracker.observe(PollOutcome::Offline, t0 + minutes(*m)))
            .collect();

        assert_eq!(
            transitions,
            vec![
                PresenceTransition::None,
                PresenceTransition::None,
                PresenceTransition::AutoExit,
                PresenceTransition::None,
            ]
        );
    }

    #[test]
    fn test_no_exit_when_disabled() {
        let t0 = Utc::now();
        let mut tracker = PresenceTracker::new(false);
        for m in [0, 15, 31, 90] {
            assert_eq!(tracker.observe(PollOutcome::Offline, t0 + minutes(m)), PresenceTransition::None);
        }
    }

    #[test]
    fn test_live_offline_cycle() {
        let t0 = Utc::now();
        let mut tracker = PresenceTracker::new(true);

        assert_eq!(tracker.observe(PollOutcome::Live, t0), PresenceTransition::WentLive);
        assert_eq!(tracker.observe(PollOutcome::Live, t0 + minutes(1)), PresenceTransition::None);
        assert_eq!(tracker.observe(PollOutcome::Offline, t0 + minutes(2)), PresenceTransition::WentOffline);
        assert_eq!(tracker.offline_since(), Some(t0 + minutes(2)));
        // back within the grace window: announce again, no exit
        assert_eq!(tracker.observe(PollOutcome::Live, t0 + minutes(20)), PresenceTransition::WentLive);
        assert!(tracker.is_live());
        assert_eq!(tracker.offline_since(), None);
    }

    #[test]
    fn test_failed_polls_change_nothing() {
        let t0 = Utc::now();
        let mut tracker = PresenceTracker::new(true);
        tracker.observe(PollOutcome::Live, t0);

        assert_eq!(tracker.observe(PollOutcome::Failed, t0 + minutes(1)), PresenceTransition::None);
        assert!(tracker.is_live());
        // the next good poll does not repeat the announcement
        assert_eq!(tracker.observe(PollOutcome::Live, t0 + minutes(2)), PresenceTransition::None);
    }

    struct ScriptedProbe {
        results: std::sync::Mutex<VecDeque<Result<bool>>>,
    }

    #[async_trait]
    impl LivenessProbe for ScriptedProbe {
        async fn poll(&self) -> Result<bool> {
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(false))
        }
    }

    #[derive(Default)]
    struct CountingSink {
        posts: AtomicUsize,
    }

    #[async_trait]
    impl AnnouncementSink for CountingSink {
        async fn is_ready(&self) -> bool {
            true
        }

        async fn post_announcement(&self, _channel_id: &str, _text: &str) -> Result<()> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_announces_then_requests_exit() {
        let probe = Arc::new(ScriptedProbe {
            results: std::sync::Mutex::new(VecDeque::from(vec![
                Ok(true),
                Err(anyhow::anyhow!("bad payload")),
                Ok(true),
                Ok(false),
            ])),
        });
        let sink = Arc::new(CountingSink::default());
        let watchdog = PresenceWatchdog::new(
            probe,
            Some(Announcements {
                sink: sink.clone(),
                channels: vec!["111".to_string(), "222".to_string()],
                text: "live!".to_string(),
            }),
        );

        let state = Arc::new(Mutex::new(SessionState::new(10, true)));
        let (control_tx, mut control_rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = watchdog.start(Arc::clone(&state), control_tx, shutdown_rx);

        let request = control_rx.recv().await;
        assert!(matches!(request, Some(ControlMessage::Shutdown { .. })));
        handle.await.unwrap();

        // one live transition, announced to both channels
        assert_eq!(sink.posts.load(Ordering::SeqCst), 2);
        assert!(!state.lock().await.presence.is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_stops_on_shutdown() {
        let probe = Arc::new(ScriptedProbe {
            results: std::sync::Mutex::new(VecDeque::new()),
        });
        let watchdog = PresenceWatchdog::new(probe, None);
        let state = Arc::new(Mutex::new(SessionState::new(10, false)));
        let (control_tx, mut control_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = watchdog.start(state, control_tx, shutdown_rx);

        tokio::time::sleep(Duration::from_secs(60 * 45)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(control_rx.try_recv().is_err());
    }

    struct StalledProbe;

    #[async_trait]
    impl LivenessProbe for StalledProbe {
        async fn poll(&self) -> Result<bool> {
            std::future::pending::<()>().await;
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_stalled_poll() {
        let watchdog = PresenceWatchdog::new(Arc::new(StalledProbe), None);
        let state = Arc::new(Mutex::new(SessionState::new(10, true)));
        let (control_tx, _control_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = watchdog.start(Arc::clone(&state), control_tx, shutdown_rx);

        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown_tx.send(true).unwrap();

        let finished = tokio::time::timeout(Duration::from_secs(60 * 60), handle).await;
        assert!(finished.is_ok(), "watchdog kept waiting on the probe");
        assert!(!state.lock().await.presence.is_live());
    }
}
