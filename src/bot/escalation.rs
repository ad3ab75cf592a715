use log::info;

use crate::bot::room_state::RoomState;
use crate::config::DEFAULT_MAX_OFFENSES;
use crate::types::{normalize_handle, ModerationAction};

pub const FIRST_OFFENSE_SECONDS: u64 = 10;
pub const REPEAT_OFFENSE_SECONDS: u64 = 60;

/// Maps a user's running offense count to a timeout or a ban.
///
/// Escalation only goes up: there is no expiry, the count is only reset when
/// the user record is dropped on part.
#[derive(Debug, Clone, Copy)]
pub struct OffenseEscalator {
    max_offenses: u32,
}

impl Default for OffenseEscalator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OFFENSES)
    }
}

impl OffenseEscalator {
    pub fn new(max_offenses: u32) -> Self {
        Self { max_offenses }
    }

    pub fn max_offenses(&self) -> u32 {
        self.max_offenses
    }

    pub fn record_offense(
        &self,
        room: &mut RoomState,
        handle: &str,
        duration_seconds: Option<u64>,
        reason: &str,
    ) -> ModerationAction {
        let handle = normalize_handle(handle);
        let offense = room.record_offense(&handle);

        let action = if offense > self.max_offenses {
            ModerationAction::Ban {
                handle,
                reason: reason.to_string(),
                offense,
                max_offenses: self.max_offenses,
            }
        } else {
            let duration_seconds = duration_seconds.unwrap_or(if offense == 1 {
                FIRST_OFFENSE_SECONDS
            } else {
                REPEAT_OFFENSE_SECONDS
            });
            ModerationAction::Timeout {
                handle,
                duration_seconds,
                reason: reason.to_string(),
                offense,
                max_offenses: self.max_offenses,
            }
        };

        info!("Offense {} of {} for '{}': {}", offense, self.max_offenses, action.handle(), action.command_name());
        action
    }
}
