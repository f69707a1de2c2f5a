//! # Status Codes
//!
//! Error taxonomy of the kernel service surface. Every service returns
//! `Result<T, OsError>`; `Ok` plays the role of the classic `E_OK` status.
//! The `Display` form of each code is its OSEK wire name, so diagnostic
//! lines on the console read like traditional OSEK error reports.
//!
//! Configuration and boot problems are not service errors. They are caught
//! before the kernel runs and get their own types, [`ConfigError`] and
//! [`StartError`].

use core::fmt;

use crate::alarm::AlarmId;
use crate::task::TaskId;

// ---------------------------------------------------------------------------
// Service status codes
// ---------------------------------------------------------------------------

/// Failure status of a kernel service call.
///
/// The numeric values match the classic OSEK `E_OS_*` codes; `E_OK` (0) is
/// represented by `Ok` on the Rust side and has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsError {
    /// The caller may not reach this object from its current state, e.g.
    /// posting events to a basic task or taking an occupied resource.
    AccessDenied = 1,
    /// Service invoked from a forbidden context, e.g. before the kernel
    /// has been started.
    CallLevel = 2,
    /// Task or alarm identifier outside the configured tables.
    InvalidId = 3,
    /// A configured cap was exceeded, e.g. too many pending activations.
    LimitExceeded = 4,
    /// The requested feature is not provided by this kernel.
    NotImplemented = 5,
    /// Resource protocol violation: wrong holder, or still holding one
    /// at a point where that is forbidden.
    Resource = 6,
    /// Operation invalid for the target's current lifecycle state.
    WrongState = 7,
    /// Numeric parameter outside its domain.
    InvalidValue = 8,
}

impl OsError {
    /// Numeric status code as used on the wire by OSEK implementations.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Classic OSEK name of this status code.
    pub const fn wire_name(self) -> &'static str {
        match self {
            OsError::AccessDenied => "E_OS_ACCESS",
            OsError::CallLevel => "E_OS_CALLEVEL",
            OsError::InvalidId => "E_OS_ID",
            OsError::LimitExceeded => "E_OS_LIMIT",
            OsError::NotImplemented => "E_OS_NOFUNC",
            OsError::Resource => "E_OS_RESOURCE",
            OsError::WrongState => "E_OS_STATE",
            OsError::InvalidValue => "E_OS_VALUE",
        }
    }
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ---------------------------------------------------------------------------
// Service identifiers
// ---------------------------------------------------------------------------

/// Identifies which kernel service produced a status, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    ActivateTask,
    TerminateTask,
    ChainTask,
    Schedule,
    GetTaskState,
    GetResource,
    ReleaseResource,
    SetEvent,
    ClearEvent,
    GetEvent,
    WaitEvent,
    GetAlarmBase,
    GetAlarm,
    SetRelAlarm,
    SetAbsAlarm,
    CancelAlarm,
    ShutdownOs,
}

impl Service {
    /// OSEK-style service name, as printed in error reports.
    pub const fn name(self) -> &'static str {
        match self {
            Service::ActivateTask => "ActivateTask",
            Service::TerminateTask => "TerminateTask",
            Service::ChainTask => "ChainTask",
            Service::Schedule => "Schedule",
            Service::GetTaskState => "GetTaskState",
            Service::GetResource => "GetResource",
            Service::ReleaseResource => "ReleaseResource",
            Service::SetEvent => "SetEvent",
            Service::ClearEvent => "ClearEvent",
            Service::GetEvent => "GetEvent",
            Service::WaitEvent => "WaitEvent",
            Service::GetAlarmBase => "GetAlarmBase",
            Service::GetAlarm => "GetAlarm",
            Service::SetRelAlarm => "SetRelAlarm",
            Service::SetAbsAlarm => "SetAbsAlarm",
            Service::CancelAlarm => "CancelAlarm",
            Service::ShutdownOs => "ShutdownOS",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Configuration and boot errors
// ---------------------------------------------------------------------------

/// Rejected static configuration, detected when the kernel is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// More task descriptors than the kernel has control blocks for.
    TooManyTasks,
    /// More alarm descriptors than the kernel has control blocks for.
    TooManyAlarms,
    /// Descriptor 0 must be the idle task: basic, priority 0, preemptable,
    /// auto-started, single activation.
    MissingIdleTask,
    /// Priority 0 is reserved for the idle task.
    PriorityZero(TaskId),
    /// Zero activation limit, or a limit above 1 on an extended task.
    ActivationLimit(TaskId),
    /// Alarm action targets a task outside the table, or posts events to
    /// a basic task.
    AlarmTarget(AlarmId),
    /// Counter characteristics out of domain: maximum value, ticks per
    /// base and minimum cycle must all be non-zero.
    CounterRange,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ConfigError::TooManyTasks => f.write_str("too many tasks configured"),
            ConfigError::TooManyAlarms => f.write_str("too many alarms configured"),
            ConfigError::MissingIdleTask => f.write_str("descriptor 0 is not a valid idle task"),
            ConfigError::PriorityZero(t) => {
                write!(f, "task {} uses priority 0, reserved for idle", t.index())
            }
            ConfigError::ActivationLimit(t) => {
                write!(f, "task {} has an invalid activation limit", t.index())
            }
            ConfigError::AlarmTarget(a) => {
                write!(f, "alarm {} has an invalid action target", a.index())
            }
            ConfigError::CounterRange => f.write_str("counter characteristics out of range"),
        }
    }
}

/// Failure to enter the running system from [`Kernel::start`].
///
/// [`Kernel::start`]: crate::kernel::Kernel::start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartError {
    /// The kernel has already been started once.
    AlreadyStarted,
    /// A configured task (other than idle) has no body in the task set.
    MissingBody(TaskId),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            StartError::AlreadyStarted => f.write_str("kernel already started"),
            StartError::MissingBody(t) => write!(f, "task {} has no body", t.index()),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
