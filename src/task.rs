//! # Task Model
//!
//! Static task descriptors and the runtime control blocks that track them.
//! Everything that never changes at runtime (class, priority, scheduling
//! mode, activation limit) lives in a [`TaskDesc`] inside a table the
//! application hands to the kernel at boot. Everything that does change
//! lives in a [`Tcb`] owned by the kernel.
//!
//! ## State machine
//!
//! The lifecycle follows the OSEK four-state model:
//!
//! ```text
//!                  activate
//!   ┌───────────┐ ─────────► ┌─────────┐
//!   │ Suspended │            │  Ready  │ ◄──────────┐
//!   └───────────┘ ◄───────── └─────────┘            │ event
//!                  terminate   │     ▲               │ arrives
//!                     dispatch │     │ preempt       │
//!                              ▼     │               │
//!                            ┌─────────┐   wait   ┌─────────┐
//!                            │ Running │ ───────► │ Waiting │
//!                            └─────────┘          └─────────┘
//! ```
//!
//! A waiting task re-enters `Ready`, never `Running`, when one of its
//! awaited events arrives. Only extended tasks may pass through `Waiting`.

use crate::event::EventMask;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Index of a task in the configured task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId(pub u8);

impl TaskId {
    /// Position of this task in the descriptor table and in the control
    /// block array.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// The mandatory idle task. It is always descriptor 0, runs at priority 0
/// and holds the processor whenever nothing else is ready.
pub const IDLE_TASK: TaskId = TaskId(0);

// ---------------------------------------------------------------------------
// Static configuration
// ---------------------------------------------------------------------------

/// Conformance class of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    /// Runs to completion and never blocks on events.
    Basic,
    /// May wait for events; limited to a single activation.
    Extended,
}

/// Whether a running task may be displaced by a higher-priority one
/// before it voluntarily gives up the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedClass {
    /// The task keeps the processor until it terminates, chains, waits,
    /// or yields through an explicit scheduling point.
    NonPreemptive,
    /// A higher-priority task that becomes ready takes over at once.
    Preemptive,
}

/// Static, immutable properties of one task. The application builds a
/// table of these; the kernel never mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDesc {
    /// Activate this task automatically during start-up.
    pub auto_start: bool,
    /// Basic or extended conformance.
    pub class: TaskClass,
    /// Scheduling priority; larger values win. 0 is reserved for idle.
    pub priority: u8,
    /// Preemptability of the task while it is running.
    pub sched: SchedClass,
    /// How many activations may be outstanding at once, counting the
    /// running one. Must be at least 1; extended tasks allow exactly 1.
    pub max_activations: u8,
}

impl TaskDesc {
    /// The descriptor shape required of table entry 0.
    pub const IDLE: TaskDesc = TaskDesc {
        auto_start: true,
        class: TaskClass::Basic,
        priority: 0,
        sched: SchedClass::Preemptive,
        max_activations: 1,
    };
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// Lifecycle state of a task, as reported by `task_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Holds the processor. At most one task at a time.
    Running = 0,
    /// Extended task parked until one of its awaited events occurs.
    Waiting = 1,
    /// Activated and runnable, waiting for the scheduler to pick it.
    Ready = 2,
    /// Not activated; the initial state of every task.
    Suspended = 3,
}

/// Task control block: the kernel-owned mutable state of one task.
///
/// TCBs live in a fixed array inside the kernel, one per descriptor slot.
/// No heap allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tcb {
    /// Current lifecycle state.
    pub state: TaskState,
    /// Outstanding activations, counting the running one.
    pub pending: u8,
    /// Activation sequence number, stamped each time the task enters
    /// `Ready` from `Suspended` or `Waiting`. Breaks priority ties
    /// first-come-first-served.
    pub seq: u64,
    /// Events that have occurred and were not yet cleared.
    pub occurred: EventMask,
    /// Events the task is waiting for; non-zero only while `Waiting`.
    pub awaited: EventMask,
}

impl Tcb {
    /// A control block in its reset state, suitable for initialising the
    /// kernel's static array.
    pub const EMPTY: Tcb = Tcb {
        state: TaskState::Suspended,
        pending: 0,
        seq: 0,
        occurred: 0,
        awaited: 0,
    };

    /// True if the scheduler may pick this task.
    #[inline]
    pub const fn is_ready(&self) -> bool {
        matches!(self.state, TaskState::Ready)
    }

    /// True if another activation fits under the given limit.
    #[inline]
    pub const fn can_activate(&self, max_activations: u8) -> bool {
        self.pending < max_activations
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
