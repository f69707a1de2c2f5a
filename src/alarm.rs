//! # Counter and Alarms
//!
//! The kernel keeps one system counter, advanced by the platform tick and
//! wrapping at a configurable maximum. Alarms are match registers on that
//! counter: each armed alarm stores the absolute counter value of its next
//! expiry and, for cyclic alarms, the period to re-arm with.
//!
//! Expiry actions are fixed at configuration time: activate a task, post
//! an event mask to an extended task, or call a plain function.
//!
//! All counter arithmetic is modular. `ring_add` and `ring_until` below
//! are the only two places that deal with wrap-around; everything else
//! compares ticks for exact equality.

use crate::event::EventMask;
use crate::task::TaskId;

/// Value of the system counter, in ticks.
pub type Tick = u32;

// ---------------------------------------------------------------------------
// Identifiers and configuration
// ---------------------------------------------------------------------------

/// Index of an alarm in the configured alarm table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AlarmId(pub u8);

impl AlarmId {
    /// Position of this alarm in the descriptor table and control block
    /// array.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Characteristics of the system counter, as reported by
/// `get_alarm_base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmBase {
    /// Largest value the counter reaches before wrapping to 0.
    pub max_allowed_value: Tick,
    /// Hardware ticks per counter increment. Informational only; the
    /// kernel itself advances the counter once per `tick` call.
    pub ticks_per_base: Tick,
    /// Smallest cycle length a cyclic alarm may use.
    pub min_cycle: Tick,
}

/// What an alarm does when it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmAction {
    /// Activate the task, exactly as `activate_task` would.
    ActivateTask(TaskId),
    /// Post the event mask to an extended task, exactly as `set_event`
    /// would.
    SetEvent(TaskId, EventMask),
    /// Call the function. Callbacks run in kernel context and must not
    /// block.
    Callback(fn()),
}

/// Static, immutable properties of one alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmDesc {
    /// The action taken on every expiry.
    pub action: AlarmAction,
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// Alarm control block: the kernel-owned mutable state of one alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmCb {
    /// Absolute counter value of the next expiry. Meaningful only while
    /// armed.
    pub(crate) next: Tick,
    /// Re-arm period; 0 marks a one-shot alarm.
    pub(crate) cycle: Tick,
    /// Whether the alarm is currently armed.
    pub(crate) armed: bool,
}

impl AlarmCb {
    /// A control block in its reset (unarmed) state.
    pub const EMPTY: AlarmCb = AlarmCb {
        next: 0,
        cycle: 0,
        armed: false,
    };
}

// ---------------------------------------------------------------------------
// Modular counter arithmetic
// ---------------------------------------------------------------------------

/// `base + increment` on a counter that wraps after `max`.
///
/// The ring has `max + 1` positions; the sum is computed in 64 bits so
/// `max == u32::MAX` works too.
pub const fn ring_add(max: Tick, base: Tick, increment: Tick) -> Tick {
    ((base as u64 + increment as u64) % (max as u64 + 1)) as Tick
}

/// Ticks from `now` until the counter next reads `target`, on a counter
/// that wraps after `max`. Zero when `target == now`.
pub const fn ring_until(max: Tick, now: Tick, target: Tick) -> Tick {
    if target >= now {
        target - now
    } else {
        // Walk up to the wrap point, through 0, on to the target.
        (max - now) + target + 1
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
