//! # Dispatcher
//!
//! Drives task bodies around the kernel state machine. Tasks are Rust
//! values implementing [`TaskBody`]; running one activation is an
//! *episode*, a plain synchronous call of `run` that ends when the body
//! returns an [`Exit`] token. Exit tokens only come out of the
//! episode-ending services (`terminate`, `chain`, a parked `wait_event`,
//! `shutdown`), so a body cannot forget to end its activation properly;
//! a token carried across episodes merely buys an implicit terminate.
//!
//! ## Preemption
//!
//! Preemption is nested dispatch. When a service makes a stronger task
//! ready and the caller is preemptable, the dispatcher runs the stronger
//! task to completion *inside* the service call:
//!
//! ```text
//! start ─► dispatch(A)            A running
//!             │ A: activate(B)      B outranks A, A preemptable
//!             ├──► dispatch(B)    A ready, B running
//!             │       B: terminate
//!             ◄──┘                A running again
//!             │ A: terminate
//! start ◄──┘
//! ```
//!
//! Each nesting level only dispatches tasks strictly above the priority
//! of the task it interrupted, so the recursion is bounded by the number
//! of distinct priorities.
//!
//! ## Waiting
//!
//! A parked extended task ends its episode like any other. When an
//! awaited event arrives the task is dispatched again from the top of
//! its body; `wait_event` then reports the event as already occurred.
//! State that must survive the park lives in the body value itself.
//!
//! ## The platform
//!
//! The dispatcher owns no hardware. Timing and console I/O go through
//! the [`Platform`] trait; elapsed ticks reported by the platform are
//! drained at dispatch boundaries, never in the middle of an episode.

use core::fmt::{self, Write as _};

use crate::alarm::{AlarmBase, AlarmId, Tick};
use crate::config::MAX_TASKS;
use crate::error::{OsError, Service, StartError};
use crate::event::EventMask;
use crate::kernel::{AppMode, Kernel, ResourceId, Shutdown, TickReport, WaitVerdict};
use crate::task::{SchedClass, TaskId, TaskState};

// ---------------------------------------------------------------------------
// Exit tokens and task bodies
// ---------------------------------------------------------------------------

/// Proof that an episode ended through a kernel service. Only the
/// dispatcher can mint one; bodies obtain theirs from `terminate`,
/// `chain`, `shutdown` or a parked `wait_event`.
#[derive(Debug)]
pub struct Exit {
    _seal: (),
}

impl Exit {
    pub(crate) const fn seal() -> Exit {
        Exit { _seal: () }
    }
}

/// Outcome of [`Runtime::wait_event`].
#[derive(Debug)]
pub enum EventWait {
    /// An awaited event had already occurred; the caller keeps running.
    Occurred,
    /// The task parked. Return the token to end the episode; the body
    /// is re-entered from the top once an awaited event arrives.
    Parked(Exit),
}

/// One task's code. `run` is called once per activation and must end by
/// returning an [`Exit`] token.
pub trait TaskBody {
    fn run(&mut self, os: &mut Runtime<'_, '_>) -> Exit;
}

/// Any `FnMut` closure of the right shape is a task body.
impl<F> TaskBody for F
where
    F: FnMut(&mut Runtime<'_, '_>) -> Exit,
{
    fn run(&mut self, os: &mut Runtime<'_, '_>) -> Exit {
        self(os)
    }
}

/// The bodies backing the configured task table, indexed by [`TaskId`].
/// Slot 0 stays empty: the idle task is the dispatcher's own wait loop.
pub struct TaskSet<'a> {
    slots: [Option<&'a mut dyn TaskBody>; MAX_TASKS],
}

impl<'a> TaskSet<'a> {
    pub fn new() -> TaskSet<'a> {
        TaskSet {
            slots: [const { None }; MAX_TASKS],
        }
    }

    /// Attach a body to a task slot.
    ///
    /// # Panics
    ///
    /// If `id` is outside the kernel's compile-time task capacity.
    pub fn insert(&mut self, id: TaskId, body: &'a mut dyn TaskBody) {
        assert!(id.index() < MAX_TASKS, "task id beyond capacity");
        self.slots[id.index()] = Some(body);
    }

    fn has(&self, id: TaskId) -> bool {
        self.slots[id.index()].is_some()
    }

    fn take(&mut self, id: TaskId) -> Option<&'a mut dyn TaskBody> {
        self.slots[id.index()].take()
    }

    fn put(&mut self, id: TaskId, body: &'a mut dyn TaskBody) {
        self.slots[id.index()] = Some(body);
    }
}

impl Default for TaskSet<'_> {
    fn default() -> Self {
        TaskSet::new()
    }
}

// ---------------------------------------------------------------------------
// Platform collaborators
// ---------------------------------------------------------------------------

/// Everything the dispatcher needs from the outside world: a console for
/// diagnostics and a tick source for time.
pub trait Platform {
    /// Write a diagnostic string to the console.
    fn put_str(&mut self, s: &str);

    /// Write one character. The default goes through `put_str`.
    fn put_char(&mut self, c: char) {
        let mut buf = [0u8; 4];
        self.put_str(c.encode_utf8(&mut buf));
    }

    /// Block until the next tick. Returning `false` means the tick
    /// source is exhausted and the kernel shuts down.
    fn wait_for_tick(&mut self) -> bool;

    /// Ticks that elapsed while task bodies were running, drained at
    /// dispatch boundaries. Platforms with a free-running tick interrupt
    /// return the accumulated count; polled set-ups keep the default.
    fn pending_ticks(&mut self) -> u32 {
        0
    }
}

/// `core::fmt` front-end for the platform console.
struct ConsoleWriter<'p>(&'p mut dyn Platform);

impl fmt::Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.put_str(s);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error reporting and halt policy
// ---------------------------------------------------------------------------

fn report_fault(platform: &mut dyn Platform, service: Service, error: OsError) {
    // The console is best-effort; formatting cannot fail here anyway.
    let _ = writeln!(ConsoleWriter(platform), "os: {} failed: {}", service, error);
}

/// Apply the configured report and halt policy to one failed service
/// call. Quiet once the system has already halted.
fn police(kernel: &mut Kernel, platform: &mut dyn Platform, service: Service, error: OsError) {
    if kernel.halted().is_some() {
        return;
    }
    if kernel.config().report_errors {
        report_fault(platform, service, error);
    }
    if kernel.config().halt_on_error {
        kernel.force_halt(Shutdown::PolicyHalt { service, error });
    }
}

/// Report every failed alarm action of a tick, then halt on the first
/// one if the policy says so. The tick itself has already completed.
fn apply_tick_report(kernel: &mut Kernel, platform: &mut dyn Platform, report: &TickReport) {
    if report.is_clean() || kernel.halted().is_some() {
        return;
    }
    if kernel.config().report_errors {
        for &(service, error) in report.faults() {
            report_fault(platform, service, error);
        }
    }
    if kernel.config().halt_on_error {
        if let Some(&(service, error)) = report.faults().first() {
            kernel.force_halt(Shutdown::PolicyHalt { service, error });
        }
    }
}

/// A violated stack guard is fatal and reported unconditionally; the
/// error-report switch does not apply.
fn stack_fault(kernel: &mut Kernel, platform: &mut dyn Platform, task: TaskId) {
    let _ = writeln!(
        ConsoleWriter(platform),
        "os: stack guard violated: task {}",
        task.index()
    );
    kernel.force_halt(Shutdown::StackFault { task });
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Process the ticks that accrued while bodies were running.
fn drain_ticks(kernel: &mut Kernel, platform: &mut dyn Platform) {
    let mut n = platform.pending_ticks();
    while n > 0 && kernel.halted().is_none() {
        let report = kernel.tick();
        apply_tick_report(kernel, platform, &report);
        n -= 1;
    }
}

/// Run one episode of `id`: seat it, check its stack guards, call the
/// body, check the guards again before the region may be recycled, and
/// re-seat the task it displaced.
fn dispatch(kernel: &mut Kernel, set: &mut TaskSet<'_>, platform: &mut dyn Platform, id: TaskId) {
    let prev = kernel.begin_episode(id);
    if !kernel.stack_ok(id) {
        stack_fault(kernel, platform, id);
        kernel.finish_episode(id, prev);
        return;
    }
    match set.take(id) {
        Some(body) => {
            let mut os = Runtime {
                kernel: &mut *kernel,
                set: &mut *set,
                platform: &mut *platform,
                task: id,
            };
            let _exit = body.run(&mut os);
            set.put(id, body);
        }
        // Coverage is validated at start; finish below retires the
        // activation as an implicit terminate.
        None => debug_assert!(false, "dispatched a task without a body"),
    }
    // Guard verdict before finish_episode recycles the region, so the
    // evidence of an overrun is still in place.
    if !kernel.stack_ok(id) {
        stack_fault(kernel, platform, id);
    }
    kernel.finish_episode(id, prev);
}

/// Dispatch ready tasks for as long as one outranks `floor`. This is
/// the preemption loop: `floor` is the effective priority of whichever
/// task the current nesting level interrupted.
fn dispatch_above(
    kernel: &mut Kernel,
    set: &mut TaskSet<'_>,
    platform: &mut dyn Platform,
    floor: u8,
) {
    loop {
        drain_ticks(kernel, platform);
        if kernel.halted().is_some() {
            return;
        }
        match kernel.next_candidate() {
            Some(next) if kernel.effective_priority_of(next) > floor => {
                dispatch(kernel, set, platform, next);
            }
            _ => return,
        }
    }
}

// ---------------------------------------------------------------------------
// System start
// ---------------------------------------------------------------------------

impl Kernel {
    /// Start the system and run it to completion.
    ///
    /// Validates that every configured task except idle has a body,
    /// queues the auto-start activations in table order, then loops:
    /// dispatch the strongest ready task, or sit in the idle task
    /// waiting for the next tick. Returns the shutdown cause once the
    /// system halts.
    pub fn start(
        &mut self,
        mode: AppMode,
        set: &mut TaskSet<'_>,
        platform: &mut dyn Platform,
    ) -> Result<Shutdown, StartError> {
        if self.is_started() {
            return Err(StartError::AlreadyStarted);
        }
        for i in 1..self.task_count() {
            let id = TaskId(i as u8);
            if !set.has(id) {
                return Err(StartError::MissingBody(id));
            }
        }
        self.boot(mode);
        loop {
            drain_ticks(self, platform);
            if let Some(cause) = self.halted() {
                return Ok(cause);
            }
            match self.next_candidate() {
                Some(next) => dispatch(self, set, platform, next),
                None => {
                    // The idle task holds the processor here.
                    if platform.wait_for_tick() {
                        let report = self.tick();
                        apply_tick_report(self, platform, &report);
                    } else {
                        self.force_halt(Shutdown::TickSourceStopped);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// The task-facing service surface
// ---------------------------------------------------------------------------

/// Handle through which a running task body calls kernel services.
///
/// Every fallible call feeds the configured error report and halt
/// policy before its result reaches the body. After the system has
/// halted, the episode-ending services hand out their [`Exit`] tokens
/// without touching kernel state, so bodies on the unwind path can
/// always return; everything else fails with [`OsError::CallLevel`].
pub struct Runtime<'r, 'a> {
    kernel: &'r mut Kernel,
    set: &'r mut TaskSet<'a>,
    platform: &'r mut dyn Platform,
    task: TaskId,
}

impl Runtime<'_, '_> {
    // -- identity and environment ------------------------------------------

    /// The calling task.
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Current value of the system counter.
    pub fn system_counter(&self) -> Tick {
        self.kernel.system_counter()
    }

    /// The mode the system was started in.
    pub fn app_mode(&self) -> AppMode {
        self.kernel.app_mode()
    }

    /// The caller's private stack region, guard zones excluded.
    pub fn stack_mut(&mut self) -> &mut [u8] {
        self.kernel.task_stack_mut(self.task)
    }

    /// Untouched bytes left in a task's stack region. Diagnostic only,
    /// outside the error-policy layer.
    pub fn stack_headroom(&self, id: TaskId) -> Result<usize, OsError> {
        self.kernel.stack_headroom(id)
    }

    /// Write to the platform console.
    pub fn put_str(&mut self, s: &str) {
        self.platform.put_str(s);
    }

    // -- task management ----------------------------------------------------

    /// Queue an activation of `id`. A stronger task made ready this way
    /// preempts the caller before the call returns, if the caller is
    /// preemptable.
    pub fn activate(&mut self, id: TaskId) -> Result<(), OsError> {
        let r = self.kernel.activate_task(id);
        let r = self.checked(Service::ActivateTask, r);
        if r.is_ok() {
            self.reschedule();
        }
        r
    }

    /// End the current activation. The returned token ends the episode.
    /// Fails while the caller holds the scheduler resource.
    pub fn terminate(&mut self) -> Result<Exit, OsError> {
        if self.kernel.halted().is_some() {
            return Ok(Exit::seal());
        }
        let r = self.kernel.terminate_task();
        self.checked(Service::TerminateTask, r).map(|()| Exit::seal())
    }

    /// Atomically terminate the caller and activate `id`; on error the
    /// caller keeps running with nothing changed.
    pub fn chain(&mut self, id: TaskId) -> Result<Exit, OsError> {
        if self.kernel.halted().is_some() {
            return Ok(Exit::seal());
        }
        let r = self.kernel.chain_task(id);
        self.checked(Service::ChainTask, r).map(|()| Exit::seal())
    }

    /// Explicit scheduling point: every ready task above the caller's
    /// priority runs before this returns, whatever the caller's
    /// preemptability. Fails while the scheduler resource is held.
    pub fn schedule(&mut self) -> Result<(), OsError> {
        let r = self.kernel.schedule();
        let r = self.checked(Service::Schedule, r);
        if r.is_ok() {
            let floor = self.kernel.effective_priority_of(self.task);
            dispatch_above(self.kernel, self.set, self.platform, floor);
        }
        r
    }

    /// Lifecycle state of any task.
    pub fn task_state(&mut self, id: TaskId) -> Result<TaskState, OsError> {
        let r = self.kernel.task_state(id);
        self.checked(Service::GetTaskState, r)
    }

    // -- events -------------------------------------------------------------

    /// Post events to an extended task, waking it if it awaits any of
    /// them. A woken task that outranks a preemptable caller runs
    /// before this returns.
    pub fn set_event(&mut self, id: TaskId, mask: EventMask) -> Result<(), OsError> {
        let r = self.kernel.set_event(id, mask);
        let r = self.checked(Service::SetEvent, r);
        if r.is_ok() {
            self.reschedule();
        }
        r
    }

    /// Drop event bits from the caller's occurred mask.
    pub fn clear_event(&mut self, mask: EventMask) -> Result<(), OsError> {
        let r = self.kernel.clear_event(mask);
        self.checked(Service::ClearEvent, r)
    }

    /// Occurred-event mask of an extended task.
    pub fn get_event(&mut self, id: TaskId) -> Result<EventMask, OsError> {
        let r = self.kernel.get_event(id);
        self.checked(Service::GetEvent, r)
    }

    /// Wait for any event in `mask`. If none has occurred yet the task
    /// parks and the episode ends with the token inside
    /// [`EventWait::Parked`]; on wake-up the body is re-entered from
    /// the top. Basic tasks and resource holders are refused.
    pub fn wait_event(&mut self, mask: EventMask) -> Result<EventWait, OsError> {
        if self.kernel.halted().is_some() {
            return Ok(EventWait::Parked(Exit::seal()));
        }
        let r = self.kernel.wait_event(mask);
        match self.checked(Service::WaitEvent, r)? {
            WaitVerdict::Continue => Ok(EventWait::Occurred),
            WaitVerdict::Park => Ok(EventWait::Parked(Exit::seal())),
        }
    }

    // -- alarms -------------------------------------------------------------

    /// Counter characteristics.
    pub fn alarm_base(&mut self, id: AlarmId) -> Result<AlarmBase, OsError> {
        let r = self.kernel.alarm_base(id);
        self.checked(Service::GetAlarmBase, r)
    }

    /// Ticks until the alarm next expires.
    pub fn alarm_remaining(&mut self, id: AlarmId) -> Result<Tick, OsError> {
        let r = self.kernel.alarm_remaining(id);
        self.checked(Service::GetAlarm, r)
    }

    /// Arm an alarm relative to the current counter value.
    pub fn set_rel_alarm(&mut self, id: AlarmId, increment: Tick, cycle: Tick) -> Result<(), OsError> {
        let r = self.kernel.set_rel_alarm(id, increment, cycle);
        self.checked(Service::SetRelAlarm, r)
    }

    /// Arm an alarm for an absolute counter value.
    pub fn set_abs_alarm(&mut self, id: AlarmId, start: Tick, cycle: Tick) -> Result<(), OsError> {
        let r = self.kernel.set_abs_alarm(id, start, cycle);
        self.checked(Service::SetAbsAlarm, r)
    }

    /// Disarm an alarm.
    pub fn cancel_alarm(&mut self, id: AlarmId) -> Result<(), OsError> {
        let r = self.kernel.cancel_alarm(id);
        self.checked(Service::CancelAlarm, r)
    }

    // -- resource -----------------------------------------------------------

    /// Take the scheduler resource, raising the caller to the ceiling
    /// priority until release.
    pub fn get_resource(&mut self, res: ResourceId) -> Result<(), OsError> {
        let r = self.kernel.get_resource(res);
        self.checked(Service::GetResource, r)
    }

    /// Release the scheduler resource. Tasks that became ready while it
    /// was held preempt a preemptable caller before this returns.
    pub fn release_resource(&mut self, res: ResourceId) -> Result<(), OsError> {
        let r = self.kernel.release_resource(res);
        let r = self.checked(Service::ReleaseResource, r);
        if r.is_ok() {
            self.reschedule();
        }
        r
    }

    // -- shutdown -----------------------------------------------------------

    /// Request system shutdown with an optional status. Infallible from
    /// a task's point of view: the first recorded cause wins, and the
    /// token ends the episode either way.
    pub fn shutdown(&mut self, error: Option<OsError>) -> Exit {
        let _ = self.kernel.shutdown(error);
        Exit::seal()
    }

    // -- internals ----------------------------------------------------------

    /// Feed an error into the report and halt policy, then pass it on.
    fn checked<T>(&mut self, service: Service, result: Result<T, OsError>) -> Result<T, OsError> {
        if let Err(e) = &result {
            police(self.kernel, self.platform, service, *e);
        }
        result
    }

    /// Hand the processor to stronger ready tasks if the caller is
    /// preemptable. No-op for non-preemptable callers; the ceiling
    /// makes it a no-op for resource holders too.
    fn reschedule(&mut self) {
        if self.kernel.halted().is_some() {
            return;
        }
        if self.kernel.task_desc(self.task).sched != SchedClass::Preemptive {
            return;
        }
        let floor = self.kernel.effective_priority_of(self.task);
        dispatch_above(self.kernel, self.set, self.platform, floor);
    }
}

// ---------------------------------------------------------------------------
// Behavioural tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::{AlarmAction, AlarmDesc};
    use crate::config::OsConfig;
    use crate::task::{TaskClass, TaskDesc, IDLE_TASK};
    use core::cell::{Cell, RefCell};

    // -- fixtures -----------------------------------------------------------

    const fn task(
        priority: u8,
        sched: SchedClass,
        class: TaskClass,
        auto_start: bool,
        max_activations: u8,
    ) -> TaskDesc {
        TaskDesc {
            auto_start,
            class,
            priority,
            sched,
            max_activations,
        }
    }

    const fn np(priority: u8, auto_start: bool) -> TaskDesc {
        task(priority, SchedClass::NonPreemptive, TaskClass::Basic, auto_start, 1)
    }

    const fn pe(priority: u8, auto_start: bool) -> TaskDesc {
        task(priority, SchedClass::Preemptive, TaskClass::Basic, auto_start, 1)
    }

    const fn ext(priority: u8, auto_start: bool) -> TaskDesc {
        task(priority, SchedClass::NonPreemptive, TaskClass::Extended, auto_start, 1)
    }

    /// Scripted tick source plus console capture. `batch` feeds
    /// `pending_ticks`, for tests that let time pass inside a body.
    struct ScriptedPlatform<'t> {
        ticks_left: u32,
        batch: Option<&'t Cell<u32>>,
        out: [u8; 512],
        out_len: usize,
    }

    impl<'t> ScriptedPlatform<'t> {
        fn new(ticks: u32) -> ScriptedPlatform<'t> {
            ScriptedPlatform {
                ticks_left: ticks,
                batch: None,
                out: [0; 512],
                out_len: 0,
            }
        }

        fn with_batch(ticks: u32, batch: &'t Cell<u32>) -> ScriptedPlatform<'t> {
            ScriptedPlatform {
                batch: Some(batch),
                ..ScriptedPlatform::new(ticks)
            }
        }

        fn output(&self) -> &[u8] {
            &self.out[..self.out_len]
        }

        fn output_contains(&self, needle: &[u8]) -> bool {
            self.output().windows(needle.len()).any(|w| w == needle)
        }
    }

    impl Platform for ScriptedPlatform<'_> {
        fn put_str(&mut self, s: &str) {
            for &b in s.as_bytes() {
                if self.out_len < self.out.len() {
                    self.out[self.out_len] = b;
                    self.out_len += 1;
                }
            }
        }

        fn wait_for_tick(&mut self) -> bool {
            if self.ticks_left > 0 {
                self.ticks_left -= 1;
                true
            } else {
                false
            }
        }

        fn pending_ticks(&mut self) -> u32 {
            self.batch.map(Cell::take).unwrap_or(0)
        }
    }

    /// Execution trace: (code, counter value) pairs pushed by bodies.
    struct Trace {
        buf: RefCell<([u8; 32], [u32; 32], usize)>,
    }

    impl Trace {
        fn new() -> Trace {
            Trace {
                buf: RefCell::new(([0; 32], [0; 32], 0)),
            }
        }

        fn push(&self, code: u8, tick: u32) {
            let mut b = self.buf.borrow_mut();
            let n = b.2;
            if n < 32 {
                b.0[n] = code;
                b.1[n] = tick;
                b.2 = n + 1;
            }
        }

        fn assert_codes(&self, expected: &[u8]) {
            let b = self.buf.borrow();
            assert_eq!(&b.0[..b.2], expected);
        }

        fn at(&self, i: usize) -> (u8, u32) {
            let b = self.buf.borrow();
            assert!(i < b.2, "trace shorter than expected");
            (b.0[i], b.1[i])
        }
    }

    fn soft_errors() -> OsConfig {
        OsConfig {
            halt_on_error: false,
            ..OsConfig::default()
        }
    }

    // -- start validation ---------------------------------------------------

    #[test]
    fn test_start_requires_a_body_per_task() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, np(5, false), np(7, false)];
        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(0);

        let mut one = |os: &mut Runtime<'_, '_>| -> Exit { os.terminate().unwrap() };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut one);

        assert!(matches!(
            kernel.start(AppMode::Default, &mut set, &mut platform),
            Err(StartError::MissingBody(TaskId(2)))
        ));
    }

    #[test]
    fn test_start_twice_is_refused() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE];
        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(0);
        let mut set = TaskSet::new();

        let done = kernel.start(AppMode::Default, &mut set, &mut platform);
        assert_eq!(done, Ok(Shutdown::TickSourceStopped));
        assert!(matches!(
            kernel.start(AppMode::Default, &mut set, &mut platform),
            Err(StartError::AlreadyStarted)
        ));
    }

    // -- ordering and timing ------------------------------------------------

    #[test]
    fn test_auto_starts_run_in_priority_order() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, np(5, true), np(10, true)];
        let trace = Trace::new();
        let mut low = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(5, os.system_counter());
            os.terminate().unwrap()
        };
        let mut high = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(10, os.system_counter());
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut low);
        set.insert(TaskId(2), &mut high);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(0);
        let done = kernel.start(AppMode::Default, &mut set, &mut platform);

        assert_eq!(done, Ok(Shutdown::TickSourceStopped));
        trace.assert_codes(&[10, 5]);
    }

    #[test]
    fn test_alarm_activations_run_when_their_tick_comes() {
        // A start-up task arms two one-shot alarms: tick 5 activates the
        // stronger task, tick 6 the weaker one. Both are non-preemptable
        // and run to completion in activation order.
        const TASKS: &[TaskDesc] = &[
            TaskDesc::IDLE,
            np(100, true), // start-up
            np(10, false),
            np(5, false),
        ];
        const ALARMS: &[AlarmDesc] = &[
            AlarmDesc {
                action: AlarmAction::ActivateTask(TaskId(2)),
            },
            AlarmDesc {
                action: AlarmAction::ActivateTask(TaskId(3)),
            },
        ];
        let trace = Trace::new();
        let mut startup = |os: &mut Runtime<'_, '_>| -> Exit {
            os.set_rel_alarm(AlarmId(0), 5, 0).unwrap();
            os.set_rel_alarm(AlarmId(1), 6, 0).unwrap();
            os.terminate().unwrap()
        };
        let mut hi = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(10, os.system_counter());
            os.terminate().unwrap()
        };
        let mut lo = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(5, os.system_counter());
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut startup);
        set.insert(TaskId(2), &mut hi);
        set.insert(TaskId(3), &mut lo);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, ALARMS).unwrap();
        let mut platform = ScriptedPlatform::new(8);
        let done = kernel.start(AppMode::Default, &mut set, &mut platform);

        assert_eq!(done, Ok(Shutdown::TickSourceStopped));
        assert_eq!(trace.at(0), (10, 5));
        assert_eq!(trace.at(1), (5, 6));
    }

    // -- preemption ---------------------------------------------------------

    #[test]
    fn test_preemptable_caller_is_displaced_mid_call() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, pe(5, true), pe(10, false)];
        let trace = Trace::new();
        let mut low = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(1, os.system_counter());
            os.activate(TaskId(2)).unwrap();
            // The stronger task already ran inside the call above.
            trace.push(3, os.system_counter());
            os.terminate().unwrap()
        };
        let mut high = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(2, os.system_counter());
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut low);
        set.insert(TaskId(2), &mut high);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(0);
        kernel.start(AppMode::Default, &mut set, &mut platform).unwrap();

        trace.assert_codes(&[1, 2, 3]);
    }

    #[test]
    fn test_non_preemptable_caller_keeps_the_processor() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, np(5, true), pe(10, false)];
        let trace = Trace::new();
        let mut low = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(1, os.system_counter());
            os.activate(TaskId(2)).unwrap();
            trace.push(3, os.system_counter());
            os.terminate().unwrap()
        };
        let mut high = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(2, os.system_counter());
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut low);
        set.insert(TaskId(2), &mut high);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(0);
        kernel.start(AppMode::Default, &mut set, &mut platform).unwrap();

        trace.assert_codes(&[1, 3, 2]);
    }

    #[test]
    fn test_schedule_is_a_yield_point_for_non_preemptable_tasks() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, np(5, true), pe(10, false)];
        let trace = Trace::new();
        let mut low = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(1, os.system_counter());
            os.activate(TaskId(2)).unwrap();
            trace.push(2, os.system_counter());
            os.schedule().unwrap();
            trace.push(3, os.system_counter());
            os.terminate().unwrap()
        };
        let mut high = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(9, os.system_counter());
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut low);
        set.insert(TaskId(2), &mut high);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(0);
        kernel.start(AppMode::Default, &mut set, &mut platform).unwrap();

        trace.assert_codes(&[1, 2, 9, 3]);
    }

    #[test]
    fn test_scheduler_resource_defers_preemption_until_release() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, pe(5, true), pe(10, false)];
        let trace = Trace::new();
        let mut low = |os: &mut Runtime<'_, '_>| -> Exit {
            os.get_resource(crate::kernel::RES_SCHEDULER).unwrap();
            trace.push(1, os.system_counter());
            os.activate(TaskId(2)).unwrap();
            // Held resource: the ceiling shields us from the stronger task.
            trace.push(2, os.system_counter());
            os.release_resource(crate::kernel::RES_SCHEDULER).unwrap();
            trace.push(3, os.system_counter());
            os.terminate().unwrap()
        };
        let mut high = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(9, os.system_counter());
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut low);
        set.insert(TaskId(2), &mut high);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(0);
        kernel.start(AppMode::Default, &mut set, &mut platform).unwrap();

        trace.assert_codes(&[1, 2, 9, 3]);
    }

    // -- chaining and waiting -----------------------------------------------

    #[test]
    fn test_chain_hands_over_and_suspends_the_caller() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, np(5, true), np(7, false)];
        let trace = Trace::new();
        let mut first = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(1, os.system_counter());
            os.chain(TaskId(2)).unwrap()
        };
        let mut second = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(2, os.system_counter());
            assert_eq!(os.task_state(TaskId(1)), Ok(TaskState::Suspended));
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut first);
        set.insert(TaskId(2), &mut second);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(0);
        kernel.start(AppMode::Default, &mut set, &mut platform).unwrap();

        trace.assert_codes(&[1, 2]);
    }

    #[test]
    fn test_wait_parks_and_wake_reenters_from_the_top() {
        const EV: EventMask = 0x01;
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, ext(20, true), np(5, true)];
        let trace = Trace::new();
        let mut waiter = |os: &mut Runtime<'_, '_>| -> Exit {
            match os.wait_event(EV).unwrap() {
                EventWait::Parked(exit) => {
                    trace.push(1, os.system_counter());
                    exit
                }
                EventWait::Occurred => {
                    assert_eq!(os.get_event(os.task_id()), Ok(EV));
                    os.clear_event(EV).unwrap();
                    trace.push(3, os.system_counter());
                    os.terminate().unwrap()
                }
            }
        };
        let mut poster = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(2, os.system_counter());
            os.set_event(TaskId(1), EV).unwrap();
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut waiter);
        set.insert(TaskId(2), &mut poster);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(0);
        kernel.start(AppMode::Default, &mut set, &mut platform).unwrap();

        // Stronger waiter runs first and parks; the poster wakes it.
        trace.assert_codes(&[1, 2, 3]);
    }

    #[test]
    fn test_alarm_event_wakes_waiter() {
        const EV: EventMask = 0x04;
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, ext(20, true), np(30, true)];
        const ALARMS: &[AlarmDesc] = &[AlarmDesc {
            action: AlarmAction::SetEvent(TaskId(1), EV),
        }];
        let trace = Trace::new();
        let mut waiter = |os: &mut Runtime<'_, '_>| -> Exit {
            match os.wait_event(EV).unwrap() {
                EventWait::Parked(exit) => exit,
                EventWait::Occurred => {
                    trace.push(7, os.system_counter());
                    os.clear_event(EV).unwrap();
                    os.terminate().unwrap()
                }
            }
        };
        let mut startup = |os: &mut Runtime<'_, '_>| -> Exit {
            os.set_rel_alarm(AlarmId(0), 4, 0).unwrap();
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut waiter);
        set.insert(TaskId(2), &mut startup);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, ALARMS).unwrap();
        let mut platform = ScriptedPlatform::new(6);
        kernel.start(AppMode::Default, &mut set, &mut platform).unwrap();

        assert_eq!(trace.at(0), (7, 4));
    }

    // -- error policy -------------------------------------------------------

    #[test]
    fn test_halt_on_error_stops_the_system() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, np(5, true), np(7, false)];
        let trace = Trace::new();
        let mut offender = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(1, os.system_counter());
            os.activate(TaskId(2)).unwrap();
            // Second activation breaks the limit of 1 and halts the
            // system under the default policy.
            let _ = os.activate(TaskId(2));
            trace.push(2, os.system_counter());
            os.terminate().unwrap()
        };
        let mut other = |os: &mut Runtime<'_, '_>| -> Exit { os.terminate().unwrap() };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut offender);
        set.insert(TaskId(2), &mut other);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(4);
        let done = kernel.start(AppMode::Default, &mut set, &mut platform);

        assert_eq!(
            done,
            Ok(Shutdown::PolicyHalt {
                service: Service::ActivateTask,
                error: OsError::LimitExceeded,
            })
        );
        assert!(platform.output_contains(b"os: ActivateTask failed: E_OS_LIMIT\n"));
        // The task still got to finish its episode on the unwind path.
        trace.assert_codes(&[1, 2]);
    }

    #[test]
    fn test_reported_errors_without_halt_keep_running() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, np(5, true), np(7, false)];
        let trace = Trace::new();
        let mut offender = |os: &mut Runtime<'_, '_>| -> Exit {
            os.activate(TaskId(2)).unwrap();
            assert_eq!(os.activate(TaskId(2)), Err(OsError::LimitExceeded));
            trace.push(1, os.system_counter());
            os.terminate().unwrap()
        };
        let mut other = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(2, os.system_counter());
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut offender);
        set.insert(TaskId(2), &mut other);

        let mut kernel = Kernel::new(soft_errors(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(2);
        let done = kernel.start(AppMode::Default, &mut set, &mut platform);

        assert_eq!(done, Ok(Shutdown::TickSourceStopped));
        assert!(platform.output_contains(b"os: ActivateTask failed: E_OS_LIMIT\n"));
        trace.assert_codes(&[1, 2]);
    }

    // -- stack guards -------------------------------------------------------

    #[test]
    fn test_violated_guard_is_fatal_before_the_body_runs() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, np(5, true)];
        let trace = Trace::new();
        let mut body = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(1, os.system_counter());
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut body);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        kernel.arena_mut().scribble_guard(1);
        let mut platform = ScriptedPlatform::new(4);
        let done = kernel.start(AppMode::Default, &mut set, &mut platform);

        assert_eq!(done, Ok(Shutdown::StackFault { task: TaskId(1) }));
        assert!(platform.output_contains(b"os: stack guard violated: task 1\n"));
        trace.assert_codes(&[]);
    }

    #[test]
    fn test_guard_violation_during_episode_is_caught_at_exit() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, np(5, true)];
        let mut body = |os: &mut Runtime<'_, '_>| -> Exit {
            os.kernel.arena_mut().scribble_guard(2);
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut body);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(4);
        let done = kernel.start(AppMode::Default, &mut set, &mut platform);

        assert_eq!(done, Ok(Shutdown::StackFault { task: TaskId(1) }));
    }

    #[test]
    fn test_stack_checking_can_be_disabled() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, np(5, true)];
        let trace = Trace::new();
        let mut body = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(1, os.system_counter());
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut body);

        let cfg = OsConfig {
            check_stack: false,
            ..OsConfig::default()
        };
        let mut kernel = Kernel::new(cfg, TASKS, &[]).unwrap();
        kernel.arena_mut().scribble_guard(1);
        let mut platform = ScriptedPlatform::new(0);
        let done = kernel.start(AppMode::Default, &mut set, &mut platform);

        assert_eq!(done, Ok(Shutdown::TickSourceStopped));
        trace.assert_codes(&[1]);
    }

    // -- episode mechanics --------------------------------------------------

    #[test]
    fn test_pending_ticks_are_drained_between_episodes() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, np(5, true), np(7, false)];
        const ALARMS: &[AlarmDesc] = &[AlarmDesc {
            action: AlarmAction::ActivateTask(TaskId(2)),
        }];
        let trace = Trace::new();
        let batch = Cell::new(0u32);
        // Three ticks elapse while the first body runs; the batch is
        // drained before the alarm-activated task is dispatched.
        let mut first = |os: &mut Runtime<'_, '_>| -> Exit {
            os.set_rel_alarm(AlarmId(0), 2, 0).unwrap();
            batch.set(3);
            os.terminate().unwrap()
        };
        let mut second = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(2, os.system_counter());
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut first);
        set.insert(TaskId(2), &mut second);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, ALARMS).unwrap();
        let mut platform = ScriptedPlatform::with_batch(0, &batch);
        kernel.start(AppMode::Default, &mut set, &mut platform).unwrap();

        // All three ticks land before the next dispatch: counter reads 3.
        assert_eq!(trace.at(0), (2, 3));
    }

    #[test]
    fn test_body_returning_without_terminate_is_an_implicit_terminate() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, np(9, true), np(5, true)];
        let trace = Trace::new();
        let mut sloppy = |os: &mut Runtime<'_, '_>| -> Exit {
            os.get_resource(crate::kernel::RES_SCHEDULER).unwrap();
            trace.push(1, os.system_counter());
            // Returns a stale token instead of terminating.
            Exit::seal()
        };
        let mut after = |os: &mut Runtime<'_, '_>| -> Exit {
            assert_eq!(os.task_state(TaskId(1)), Ok(TaskState::Suspended));
            // The implicit terminate released the resource.
            os.get_resource(crate::kernel::RES_SCHEDULER).unwrap();
            os.release_resource(crate::kernel::RES_SCHEDULER).unwrap();
            trace.push(2, os.system_counter());
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut sloppy);
        set.insert(TaskId(2), &mut after);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(0);
        kernel.start(AppMode::Default, &mut set, &mut platform).unwrap();

        trace.assert_codes(&[1, 2]);
    }

    #[test]
    fn test_shutdown_from_a_task_stops_everything() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, np(9, true), np(5, true)];
        let trace = Trace::new();
        let mut quitter = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(1, os.system_counter());
            os.shutdown(None)
        };
        let mut never = |os: &mut Runtime<'_, '_>| -> Exit {
            trace.push(2, os.system_counter());
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut quitter);
        set.insert(TaskId(2), &mut never);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(8);
        let done = kernel.start(AppMode::Default, &mut set, &mut platform);

        assert_eq!(done, Ok(Shutdown::Requested { error: None }));
        // The weaker ready task never got the processor.
        trace.assert_codes(&[1]);
    }

    #[test]
    fn test_runtime_identity_and_console() {
        const TASKS: &[TaskDesc] = &[TaskDesc::IDLE, np(5, true)];
        let mut body = |os: &mut Runtime<'_, '_>| -> Exit {
            assert_eq!(os.task_id(), TaskId(1));
            assert_eq!(os.app_mode(), AppMode::Default);
            assert_eq!(os.task_state(IDLE_TASK), Ok(TaskState::Ready));
            os.stack_mut().fill(0x42);
            os.put_str("hello from task 1\n");
            os.terminate().unwrap()
        };
        let mut set = TaskSet::new();
        set.insert(TaskId(1), &mut body);

        let mut kernel = Kernel::new(OsConfig::default(), TASKS, &[]).unwrap();
        let mut platform = ScriptedPlatform::new(0);
        kernel.start(AppMode::Default, &mut set, &mut platform).unwrap();

        assert!(platform.output_contains(b"hello from task 1\n"));
        // The dirtied region was recycled after termination.
        assert_eq!(
            kernel.stack_headroom(TaskId(1)),
            Ok(crate::config::STACK_SIZE)
        );
    }
}
