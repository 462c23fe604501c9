//! Local view of who holds the push-to-talk floor.

use rtccore::types::UserId;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub enum FloorState {
    #[default]
    Idle,
    /// The local participant holds the floor.
    Speaking,
    /// A remote participant announced a turn or is offering media.
    Listening { speaker: UserId },
}

impl FloorState {
    pub fn is_speaking(&self) -> bool {
        matches!(self, Self::Speaking)
    }

    pub fn speaker(&self) -> Option<&UserId> {
        match self {
            Self::Listening { speaker } => Some(speaker),
            _ => None,
        }
    }

    /// Record `speaker` as holding the floor. Ignored while speaking locally.
    pub(crate) fn record_remote(&mut self, speaker: &UserId) -> bool {
        if self.is_speaking() {
            return false;
        }
        *self = Self::Listening {
            speaker: speaker.clone(),
        };
        true
    }

    /// Clear the record if it names `speaker`.
    pub(crate) fn release_remote(&mut self, speaker: &UserId) -> bool {
        if self.speaker() == Some(speaker) {
            *self = Self::Idle;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_turn_is_ignored_while_speaking() {
        let mut floor = FloorState::Speaking;
        assert!(!floor.record_remote(&"bob".into()));
        assert_eq!(floor, FloorState::Speaking);
    }

    #[test]
    fn test_release_only_clears_matching_speaker() {
        let mut floor = FloorState::Idle;
        assert!(floor.record_remote(&"bob".into()));
        assert!(!floor.release_remote(&"carol".into()));
        assert_eq!(floor.speaker().map(UserId::as_str), Some("bob"));

        assert!(floor.release_remote(&"bob".into()));
        assert_eq!(floor, FloorState::Idle);
    }

    #[test]
    fn test_newer_remote_turn_replaces_older() {
        let mut floor = FloorState::Idle;
        floor.record_remote(&"bob".into());
        floor.record_remote(&"carol".into());
        assert_eq!(floor.speaker().map(UserId::as_str), Some("carol"));
    }
}
