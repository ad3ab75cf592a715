use log::debug;
use std::collections::HashMap;

use crate::types::normalize_handle;

/// Per-user moderation state within the room
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub is_moderator: bool,
    pub offenses: u32,
}

impl User {
    pub fn moderator() -> Self {
        Self {
            is_moderator: true,
            offenses: 0,
        }
    }
}

/// Room membership keyed by normalized handle
#[derive(Debug, Default)]
pub struct RoomState {
    users: HashMap<String, User>,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a user; existing records are left as they are
    pub fn on_join(&mut self, handle: &str) {
        self.users.entry(normalize_handle(handle)).or_default();
    }

    /// Forget a user entirely. Offense history does not survive a part/join cycle.
    pub fn on_part(&mut self, handle: &str) {
        if self.users.remove(&normalize_handle(handle)).is_none() {
            debug!("Part for untracked user '{}'", handle);
        }
    }

    /// Update the moderator flag of a tracked user. Unknown users are ignored.
    pub fn set_moderator(&mut self, handle: &str, is_moderator: bool) -> bool {
        match self.users.get_mut(&normalize_handle(handle)) {
            Some(user) => {
                user.is_moderator = is_moderator;
                true
            }
            None => {
                debug!("Privilege change for untracked user '{}' ignored", handle);
                false
            }
        }
    }

    /// Create-or-update a user as moderator (bot identity, room owner)
    pub fn seed_moderator(&mut self, handle: &str) {
        self.users.entry(normalize_handle(handle)).or_default().is_moderator = true;
    }

    pub fn is_moderator(&self, handle: &str) -> bool {
        self.users
            .get(&normalize_handle(handle))
            .map(|u| u.is_moderator)
            .unwrap_or(false)
    }

    /// Increment the user's offense count, creating the record if needed
    pub fn record_offense(&mut self, handle: &str) -> u32 {
        let user = self.users.entry(normalize_handle(handle)).or_default();
        user.offenses = user.offenses.saturating_add(1);
        user.offenses
    }

    pub fn offenses(&self, handle: &str) -> u32 {
        self.users
            .get(&normalize_handle(handle))
            .map(|u| u.offenses)
            .unwrap_or(0)
    }

    pub fn get(&self, handle: &str) -> Option<&User> {
        self.users.get(&normalize_handle(handle))
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.users.contains_key(&normalize_handle(handle))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_idempotent() {
        let mut room = RoomState::new();
        room.on_join("Viewer");
        room.record_offense("viewer");
        room.on_join("viewer");

        assert_eq!(room.len(), 1);
        assert_eq!(room.offenses("VIEWER"), 1);
        assert!(!room.is_moderator("viewer"));
    }

    #[test]
    fn test_set_moderator_requires_existing_user() {
        let mut room = RoomState::new();
        assert!(!room.set_moderator("ghost", true));
        assert!(!room.contains("ghost"));
        assert!(!room.is_moderator("ghost"));

        room.on_join("mod");
        assert!(room.set_moderator("Mod", true));
        assert!(room.is_moderator("mod"));
        assert!(room.set_moderator("mod", false));
        assert!(!room.is_moderator("mod"));
    }

    #[test]
    fn test_part_join_resets_user() {
        let mut room = RoomState::new();
        room.on_join("viewer");
        room.set_moderator("viewer", true);
        room.record_offense("viewer");
        room.record_offense("viewer");

        room.on_part("viewer");
        assert!(!room.contains("viewer"));
        room.on_join("viewer");

        assert_eq!(room.get("viewer"), Some(&User::default()));
    }

    #[test]
    fn test_unknown_part_is_ignored() {
        let mut room = RoomState::new();
        room.on_part("nobody");
        assert!(room.is_empty());
    }

    #[test]
    fn test_seed_moderator_and_offense_creation() {
        let mut room = RoomState::new();
        room.seed_moderator("ExampleBot");
        assert_eq!(room.get("examplebot"), Some(&User::moderator()));

        assert_eq!(room.record_offense("@newcomer"), 1);
        assert_eq!(room.record_offense("newcomer"), 2);
        assert!(room.contains("newcomer"));
    }

    #[test]
    fn test_offense_count_saturates() {
        let mut room = RoomState::new();
        room.on_join("viewer");
        if let Some(user) = room.users.get_mut("viewer") {
            user.offenses = u32::MAX - 1;
        }
        assert_eq!(room.record_offense("viewer"), u32::MAX);
        assert_eq!(room.record_offense("viewer"), u32::MAX);
        assert_eq!(room.offenses("viewer"), u32::MAX);
    }
}
