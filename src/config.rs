//! # Kernel Configuration
//!
//! Compile-time capacities and the runtime [`OsConfig`] block. All limits
//! are fixed at compile time so every kernel structure is a plain static
//! array; there is no dynamic allocation anywhere.

use crate::alarm::{AlarmBase, Tick};

/// Maximum number of tasks a configuration may declare, idle included.
/// This bounds the control block array and the stack arena. Increase
/// with care; each slot consumes `STACK_SIZE` bytes of arena RAM.
pub const MAX_TASKS: usize = 8;

/// Maximum number of alarms a configuration may declare.
pub const MAX_ALARMS: usize = 8;

/// Per-task stack region in bytes, guard bytes not included.
pub const STACK_SIZE: usize = 128;

/// Default tick period in milliseconds. Informational for the platform;
/// the kernel only counts ticks.
pub const DEFAULT_TICK_MS: u32 = 10;

/// Default counter wrap point, the classic 16-bit OSEK counter.
pub const DEFAULT_MAX_ALLOWED_VALUE: Tick = 0xffff;

// ---------------------------------------------------------------------------
// Runtime configuration block
// ---------------------------------------------------------------------------

/// Tunable kernel behaviour, fixed once the kernel is built.
///
/// The defaults mirror a conservative production set-up: stack checking
/// on, every service error reported, and a hard halt on the first error.
/// Soft-failure systems clear `halt_on_error` and decide in the
/// application what to do with reported errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsConfig {
    /// Tick period in milliseconds, exposed to the platform layer.
    pub tick_ms: u32,
    /// System counter characteristics; also the reply of
    /// `get_alarm_base`.
    pub counter: AlarmBase,
    /// Verify stack guard zones on every dispatch and task exit.
    pub check_stack: bool,
    /// Write a console line whenever a service call fails.
    pub report_errors: bool,
    /// Shut the system down after the first reported service error.
    pub halt_on_error: bool,
}

impl Default for OsConfig {
    fn default() -> Self {
        OsConfig {
            tick_ms: DEFAULT_TICK_MS,
            counter: AlarmBase {
                max_allowed_value: DEFAULT_MAX_ALLOWED_VALUE,
                ticks_per_base: 1,
                min_cycle: 1,
            },
            check_stack: true,
            report_errors: true,
            halt_on_error: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
