// src/bot/moderation.rs - Caps-lock spam classification

use log::debug;

/// Reason attached to moderation commands issued for caps spam
pub const CAPS_SPAM_REASON: &str = "Excessive use of caps";

/// Minimum number of upper-case letters before a message can count as spam
pub const MIN_CAPS: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct SpamClassifier {
    enabled: bool,
}

impl SpamClassifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Moderators are never flagged; everyone else is flagged when the message
    /// holds at least ten capitals and capitals make up at least half of it.
    pub fn is_spam(&self, is_moderator: bool, text: &str) -> bool {
        if !self.enabled || is_moderator {
            return false;
        }

        let caps = text.chars().filter(|c| c.is_uppercase()).count();
        let length = text.chars().count();
        let flagged = caps >= MIN_CAPS && caps * 2 >= length;

        if flagged {
            debug!("Caps spam: {} of {} characters upper-case", caps, length);
        }
        flagged
    }
}
