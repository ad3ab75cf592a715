use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::HashMap;

use crate::config::{DEFAULT_COOLDOWN_SECONDS, MAX_INTERVAL_SECONDS};

/// Ledger size that triggers a sweep of expired entries
const PRUNE_THRESHOLD: usize = 256;

/// Last invocation time per command text.
///
/// Keys are the prefix-stripped command text, not the sender, so two users
/// issuing the identical command share one cooldown window.
#[derive(Debug)]
pub struct RateLimitLedger {
    last_invoked: HashMap<String, DateTime<Utc>>,
    cooldown: Duration,
    prune_at: usize,
}

impl Default for RateLimitLedger {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_SECONDS)
    }
}

impl RateLimitLedger {
    pub fn new(cooldown_seconds: u64) -> Self {
        let cooldown_seconds = cooldown_seconds.min(MAX_INTERVAL_SECONDS);
        Self {
            last_invoked: HashMap::new(),
            cooldown: Duration::seconds(cooldown_seconds as i64),
            prune_at: PRUNE_THRESHOLD,
        }
    }

    /// Seconds left before `key` may run again for a non-moderator
    pub fn remaining(&self, key: &str, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_invoked.get(key)?;
        let elapsed = now.signed_duration_since(*last);
        if elapsed < self.cooldown {
            Some(self.cooldown - elapsed)
        } else {
            None
        }
    }

    /// Decide whether `key` may run at `now`. Allowed invocations are recorded;
    /// suppressed ones leave the ledger untouched.
    pub fn check_and_record(&mut self, key: &str, now: DateTime<Utc>, bypass: bool) -> bool {
        if !bypass {
            if let Some(left) = self.remaining(key, now) {
                debug!("Command '{}' is on cooldown for {}ms", key, left.num_milliseconds());
                return false;
            }
        }
        self.last_invoked.insert(key.to_string(), now);
        if self.last_invoked.len() >= self.prune_at {
            self.prune(now);
        }
        true
    }

    /// Drop entries whose window has closed. They no longer affect any decision.
    fn prune(&mut self, now: DateTime<Utc>) {
        let before = self.last_invoked.len();
        let cooldown = self.cooldown;
        self.last_invoked.retain(|_, last| now.signed_duration_since(*last) < cooldown);
        // keep the sweep amortized when most entries are still active
        self.prune_at = (self.last_invoked.len() * 2).max(PRUNE_THRESHOLD);
        debug!("Pruned {} expired cooldown entries", before - self.last_invoked.len());
    }

    pub fn len(&self) -> usize {
        self.last_invoked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_invoked.is_empty()
    }

    pub fn last_invoked(&self, key: &str) -> Option<DateTime<Utc>> {
        self.last_invoked.get(key).copied()
    }
}
