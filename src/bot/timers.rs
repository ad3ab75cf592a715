use anyhow::Result;
use log::{debug, info, warn};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};

use crate::bot::commands::invoke_guarded;
use crate::config::MAX_INTERVAL_SECONDS;
use crate::types::{BotTimer, OutboundAction, TimerHandler};

/// Recurring announcements, each re-armed one interval after it last fired
#[derive(Debug, Default)]
pub struct TimerSystem {
    timers: Vec<BotTimer>,
}

impl TimerSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer. Must happen before `start`.
    pub fn add_timer(&mut self, timer: BotTimer) -> Result<()> {
        if timer.interval_seconds == 0 || timer.interval_seconds > MAX_INTERVAL_SECONDS {
            return Err(anyhow::anyhow!(
                "Timer '{}' interval must be between 1 and {} seconds, got {}",
                timer.name,
                MAX_INTERVAL_SECONDS,
                timer.interval_seconds
            ));
        }
        info!("Registered timer '{}' with interval {}s", timer.name, timer.interval_seconds);
        self.timers.push(timer);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Spawn the scheduler. Every timer first fires one interval from now.
    /// The task ends when `shutdown` flips to true or its sender is dropped.
    pub fn start(
        &self,
        response_sender: mpsc::Sender<OutboundAction>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let timers = Arc::new(self.timers.clone());
        info!("Starting timer scheduler with {} timers", timers.len());
        tokio::spawn(run_scheduler(timers, response_sender, shutdown))
    }
}

async fn run_scheduler(
    timers: Arc<Vec<BotTimer>>,
    response_sender: mpsc::Sender<OutboundAction>,
    mut shutdown: watch::Receiver<bool>,
) {
    let start = Instant::now();
    let mut queue: BinaryHeap<Reverse<(Instant, usize)>> = timers
        .iter()
        .enumerate()
        .map(|(index, timer)| Reverse((start + interval_of(timer), index)))
        .collect();

    // function timers report back here once their output is in
    let (rearm_tx, mut rearm_rx) = mpsc::unbounded_channel::<usize>();

    if *shutdown.borrow() {
        return;
    }

    loop {
        let next_fire = queue.peek().map(|Reverse((at, _))| *at);

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Timer scheduler received shutdown signal");
                    break;
                }
            }
            Some(index) = rearm_rx.recv() => {
                queue.push(Reverse((Instant::now() + interval_of(&timers[index]), index)));
            }
            _ = sleep_until(next_fire.unwrap_or_else(Instant::now)), if next_fire.is_some() => {
                let Some(Reverse((_, index))) = queue.pop() else {
                    continue;
                };
                fire(&timers, index, &response_sender, &rearm_tx, &mut queue).await;
            }
        }
    }

    debug!("Timer scheduler stopped with {} timers pending", queue.len());
}

async fn fire(
    timers: &Arc<Vec<BotTimer>>,
    index: usize,
    response_sender: &mpsc::Sender<OutboundAction>,
    rearm_tx: &mpsc::UnboundedSender<usize>,
    queue: &mut BinaryHeap<Reverse<(Instant, usize)>>,
) {
    let timer = &timers[index];
    debug!("Timer '{}' fired", timer.name);

    match &timer.handler {
        TimerHandler::Static(text) => {
            queue.push(Reverse((Instant::now() + interval_of(timer), index)));
            if response_sender.send(OutboundAction::say(text.clone())).await.is_err() {
                warn!("Outbound channel closed, timer '{}' message dropped", timer.name);
            }
        }
        TimerHandler::Invocable(handler) => {
            let handler = Arc::clone(handler);
            let name = timer.name.clone();
            let response_sender = response_sender.clone();
            let rearm_tx = rearm_tx.clone();
            tokio::spawn(async move {
                if let Some(text) = invoke_guarded(&name, move || handler()).await {
                    if response_sender.send(OutboundAction::say(text)).await.is_err() {
                        debug!("Outbound channel closed, timer '{}' output dropped", name);
                    }
                }
                // scheduler may already be gone during shutdown
                let _ = rearm_tx.send(index);
            });
        }
    }
}

fn interval_of(timer: &BotTimer) -> Duration {
    Duration::from_secs(timer.interval_seconds)
}
