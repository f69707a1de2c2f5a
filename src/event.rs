//! # Event Control
//!
//! Events are the synchronisation primitive of extended tasks. Each
//! extended task owns two bit masks: the events that have *occurred*
//! since they were last cleared, and the events it is currently
//! *awaiting*. A waiting task wakes as soon as the two masks intersect.
//!
//! Occurred bits survive a wake-up. The woken task is expected to read
//! them with `get_event` and acknowledge with `clear_event`; only the
//! awaited mask is consumed by the wake.

use crate::task::{TaskState, Tcb};

/// Bit mask of events. Each extended task interprets the bits privately;
/// there is no global event namespace.
pub type EventMask = u8;

impl Tcb {
    /// Record occurred events. Returns `true` if the task was waiting and
    /// this posting intersects its awaited mask, i.e. the task must be
    /// made ready by the caller.
    #[inline]
    pub fn post_events(&mut self, mask: EventMask) -> bool {
        self.occurred |= mask;
        self.state == TaskState::Waiting && self.occurred & self.awaited != 0
    }

    /// Drop event bits from the occurred mask.
    #[inline]
    pub fn clear_events(&mut self, mask: EventMask) {
        self.occurred &= !mask;
    }

    /// True if waiting on `mask` would return immediately because one of
    /// the events already occurred.
    #[inline]
    pub const fn events_pending(&self, mask: EventMask) -> bool {
        self.occurred & mask != 0
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;

    #[test]
    fn test_post_accumulates_bits() {
        let mut tcb = Tcb::EMPTY;
        tcb.state = TaskState::Ready;
        assert!(!tcb.post_events(0b0001));
        assert!(!tcb.post_events(0b0100));
        assert_eq!(tcb.occurred, 0b0101);
    }

    #[test]
    fn test_post_wakes_only_on_intersection() {
        let mut tcb = Tcb::EMPTY;
        tcb.state = TaskState::Waiting;
        tcb.awaited = 0b0010;

        assert!(!tcb.post_events(0b0001), "disjoint event must not wake");
        assert!(tcb.post_events(0b0010), "awaited event must wake");
        // Both postings are retained either way.
        assert_eq!(tcb.occurred, 0b0011);
    }

    #[test]
    fn test_clear_drops_only_named_bits() {
        let mut tcb = Tcb::EMPTY;
        tcb.occurred = 0b0111;
        tcb.clear_events(0b0010);
        assert_eq!(tcb.occurred, 0b0101);
    }

    #[test]
    fn test_events_pending() {
        let mut tcb = Tcb::EMPTY;
        assert!(!tcb.events_pending(0b1111));
        tcb.occurred = 0b1000;
        assert!(tcb.events_pending(0b1000));
        assert!(!tcb.events_pending(0b0111));
    }
}
