//! Movement intents.
//!
//! A session holds at most one pending intent. The inbound handler offers a
//! new intent with [`IntentMailbox::try_set`]; the simulation tick consumes it
//! with [`IntentMailbox::take`]. While an intent is pending, new ones are
//! rejected (first pending wins until consumed).

use bitflags::bitflags;
use parking_lot::Mutex;

bitflags! {
    /// Directions requested for the next simulation tick.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MovementIntent: u8 {
        const UP = 1 << 0;
        const DOWN = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
    }
}

impl MovementIntent {
    pub fn from_flags(up: bool, down: bool, left: bool, right: bool) -> Self {
        let mut intent = Self::empty();
        intent.set(Self::UP, up);
        intent.set(Self::DOWN, down);
        intent.set(Self::LEFT, left);
        intent.set(Self::RIGHT, right);
        intent
    }

    /// One unit per active direction, in screen coordinates (up is -y).
    pub fn displacement(self) -> (i32, i32) {
        let mut dx = 0;
        let mut dy = 0;
        if self.contains(Self::UP) {
            dy -= 1;
        }
        if self.contains(Self::DOWN) {
            dy += 1;
        }
        if self.contains(Self::LEFT) {
            dx -= 1;
        }
        if self.contains(Self::RIGHT) {
            dx += 1;
        }
        (dx, dy)
    }
}

/// Single-slot mailbox for the pending movement intent.
#[derive(Debug, Default)]
pub struct IntentMailbox {
    slot: Mutex<Option<MovementIntent>>,
}

impl IntentMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `intent` if the slot is empty. Returns false if occupied.
    pub fn try_set(&self, intent: MovementIntent) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(intent);
        true
    }

    /// Removes and returns the pending intent.
    pub fn take(&self) -> Option<MovementIntent> {
        self.slot.lock().take()
    }

    /// Returns the pending intent without consuming it.
    pub fn peek(&self) -> Option<MovementIntent> {
        *self.slot.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposing_flags_cancel() {
        let intent = MovementIntent::from_flags(true, true, true, false);
        assert_eq!(intent.displacement(), (-1, 0));
    }

    #[test]
    fn second_intent_is_rejected_until_taken() {
        let mailbox = IntentMailbox::new();
        assert!(mailbox.try_set(MovementIntent::UP));
        assert!(!mailbox.try_set(MovementIntent::DOWN));
        assert_eq!(mailbox.peek(), Some(MovementIntent::UP));

        assert_eq!(mailbox.take(), Some(MovementIntent::UP));
        assert_eq!(mailbox.take(), None);
        assert!(mailbox.try_set(MovementIntent::DOWN));
        assert_eq!(mailbox.peek(), Some(MovementIntent::DOWN));
    }

    #[test]
    fn empty_intent_still_occupies_the_slot() {
        let mailbox = IntentMailbox::new();
        assert!(mailbox.try_set(MovementIntent::empty()));
        assert!(!mailbox.try_set(MovementIntent::LEFT));
    }
}
