//! # Kernel Core
//!
//! The kernel is one plain struct holding the configured tables and all
//! runtime state: task and alarm control blocks, the stack arena, the
//! system counter, and the resource ceiling. Every OSEK-style service is
//! a method returning `Result<_, OsError>`.
//!
//! The kernel does not run tasks itself. It is a deterministic state
//! machine: [`tick`](Kernel::tick) advances time and fires alarms, the
//! service methods perform state transitions, and the dispatcher in
//! [`exec`](crate::exec) drives task bodies around it. That split keeps
//! the whole scheduling model testable on the host.
//!
//! ## Service context
//!
//! Mutating services are task-level calls: they fail with
//! [`OsError::CallLevel`] before [`start`](Kernel::start) and after
//! shutdown. Pure reads (`task_state`, `get_event`, `alarm_base`,
//! `alarm_remaining`, the counter and mode accessors) work at any time.

use crate::alarm::{
    ring_add, ring_until, AlarmAction, AlarmBase, AlarmCb, AlarmDesc, AlarmId, Tick,
};
use crate::config::{OsConfig, MAX_ALARMS, MAX_TASKS};
use crate::error::{ConfigError, OsError, Service};
use crate::event::EventMask;
use crate::sched;
use crate::stack::StackArena;
use crate::task::{TaskClass, TaskDesc, TaskId, TaskState, Tcb, IDLE_TASK};

// ---------------------------------------------------------------------------
// Modes, resources, shutdown causes
// ---------------------------------------------------------------------------

/// Application mode passed to `start` and reported back by
/// [`app_mode`](Kernel::app_mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppMode {
    /// The one standard mode.
    #[default]
    Default,
}

/// Identifier of a kernel resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceId(pub u8);

/// The scheduler resource. Holding it lifts the holder to the ceiling
/// priority (the highest configured priority), which keeps every other
/// task from preempting it. The only resource this kernel provides.
pub const RES_SCHEDULER: ResourceId = ResourceId(0);

/// Why the system stopped. Returned by `start` once the kernel halts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The application requested shutdown, with the status it passed.
    Requested { error: Option<OsError> },
    /// A guard zone around this task's stack region was found violated.
    StackFault { task: TaskId },
    /// The halt-on-error policy stopped the system after this failure.
    PolicyHalt { service: Service, error: OsError },
    /// The platform tick source reported it will not tick again.
    TickSourceStopped,
}

/// Outcome of a `wait_event` call: continue the caller, or park it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitVerdict {
    Continue,
    Park,
}

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

/// Failures of alarm actions during one [`tick`](Kernel::tick). The
/// dispatcher applies the configured reporting and halt policy to these;
/// the tick itself always completes.
#[derive(Debug, Clone, Copy)]
pub struct TickReport {
    faults: [(Service, OsError); MAX_ALARMS],
    len: usize,
}

impl TickReport {
    pub(crate) const fn empty() -> Self {
        TickReport {
            faults: [(Service::ActivateTask, OsError::AccessDenied); MAX_ALARMS],
            len: 0,
        }
    }

    fn push(&mut self, service: Service, error: OsError) {
        // At most one fault per alarm, so the array cannot overflow.
        if self.len < MAX_ALARMS {
            self.faults[self.len] = (service, error);
            self.len += 1;
        }
    }

    /// The failed alarm actions, in alarm table order.
    pub fn faults(&self) -> &[(Service, OsError)] {
        &self.faults[..self.len]
    }

    /// True when every alarm action of the tick succeeded.
    pub fn is_clean(&self) -> bool {
        self.len == 0
    }
}

// ---------------------------------------------------------------------------
// The kernel
// ---------------------------------------------------------------------------

/// Kernel state: configured tables plus all mutable control data. Built
/// once from static tables, then driven by the dispatcher.
#[derive(Debug)]
pub struct Kernel {
    cfg: OsConfig,
    tasks: &'static [TaskDesc],
    alarms: &'static [AlarmDesc],
    tcbs: [Tcb; MAX_TASKS],
    acbs: [AlarmCb; MAX_ALARMS],
    arena: StackArena,
    counter: Tick,
    next_seq: u64,
    running: TaskId,
    holder: Option<TaskId>,
    ceiling: u8,
    mode: AppMode,
    started: bool,
    halted: Option<Shutdown>,
}

impl Kernel {
    /// Build a kernel from the static configuration, validating it.
    ///
    /// Entry 0 of the task table must be [`TaskDesc::IDLE`]; priority 0
    /// is reserved for it. Extended tasks must use an activation limit
    /// of exactly 1, alarm actions must target configured tasks, and
    /// event-posting alarms must target extended tasks.
    pub fn new(
        cfg: OsConfig,
        tasks: &'static [TaskDesc],
        alarms: &'static [AlarmDesc],
    ) -> Result<Kernel, ConfigError> {
        if tasks.len() > MAX_TASKS {
            return Err(ConfigError::TooManyTasks);
        }
        if alarms.len() > MAX_ALARMS {
            return Err(ConfigError::TooManyAlarms);
        }
        match tasks.first() {
            Some(idle) if *idle == TaskDesc::IDLE => {}
            _ => return Err(ConfigError::MissingIdleTask),
        }
        for (i, desc) in tasks.iter().enumerate().skip(1) {
            let id = TaskId(i as u8);
            if desc.priority == 0 {
                return Err(ConfigError::PriorityZero(id));
            }
            if desc.max_activations == 0
                || (desc.class == TaskClass::Extended && desc.max_activations != 1)
            {
                return Err(ConfigError::ActivationLimit(id));
            }
        }
        let counter = cfg.counter;
        if counter.max_allowed_value == 0 || counter.ticks_per_base == 0 || counter.min_cycle == 0
        {
            return Err(ConfigError::CounterRange);
        }
        for (j, desc) in alarms.iter().enumerate() {
            let id = AlarmId(j as u8);
            let target = match desc.action {
                AlarmAction::ActivateTask(t) => Some((t, false)),
                AlarmAction::SetEvent(t, _) => Some((t, true)),
                AlarmAction::Callback(_) => None,
            };
            if let Some((t, needs_extended)) = target {
                match tasks.get(t.index()) {
                    Some(td) if !needs_extended || td.class == TaskClass::Extended => {}
                    _ => return Err(ConfigError::AlarmTarget(id)),
                }
            }
        }

        let mut arena = StackArena::new();
        arena.init(tasks.len());
        Ok(Kernel {
            cfg,
            tasks,
            alarms,
            tcbs: [Tcb::EMPTY; MAX_TASKS],
            acbs: [AlarmCb::EMPTY; MAX_ALARMS],
            arena,
            counter: 0,
            next_seq: 1,
            running: IDLE_TASK,
            holder: None,
            ceiling: sched::ceiling_priority(tasks),
            mode: AppMode::Default,
            started: false,
            halted: None,
        })
    }

    // -- read-only accessors ------------------------------------------------

    /// The configuration the kernel was built with.
    pub fn config(&self) -> &OsConfig {
        &self.cfg
    }

    /// Current value of the system counter.
    pub fn system_counter(&self) -> Tick {
        self.counter
    }

    /// The application mode the system was started in.
    pub fn app_mode(&self) -> AppMode {
        self.mode
    }

    /// Identity of the running task; `None` before start. The idle task
    /// is reported like any other.
    pub fn current_task(&self) -> Option<TaskId> {
        if self.started {
            Some(self.running)
        } else {
            None
        }
    }

    /// The shutdown cause, once the system has halted.
    pub fn halted(&self) -> Option<Shutdown> {
        self.halted
    }

    /// Number of configured tasks, idle included.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Lifecycle state of a task.
    pub fn task_state(&self, id: TaskId) -> Result<TaskState, OsError> {
        self.check_task(id)?;
        Ok(self.tcbs[id.index()].state)
    }

    /// Bytes of a task's stack region never written since the last
    /// recycle. A rough high-water mark for sizing stacks.
    pub fn stack_headroom(&self, id: TaskId) -> Result<usize, OsError> {
        self.check_task(id)?;
        Ok(self.arena.untouched(id.index()))
    }

    // -- task services ------------------------------------------------------

    /// Queue an activation of `id`, making it ready if it was suspended.
    /// A suspended task re-enters the ready set with a fresh sequence
    /// stamp and cleared event masks.
    pub fn activate_task(&mut self, id: TaskId) -> Result<(), OsError> {
        self.check_task(id)?;
        self.ensure_started()?;
        self.activate(id)
    }

    /// End the running task's current activation. With further
    /// activations queued it re-enters the ready set at the back of its
    /// priority band, otherwise it suspends.
    pub fn terminate_task(&mut self) -> Result<(), OsError> {
        self.ensure_started()?;
        if self.tcbs[self.running.index()].state != TaskState::Running {
            return Err(OsError::WrongState);
        }
        if self.holder == Some(self.running) {
            return Err(OsError::Resource);
        }
        self.retire_running();
        Ok(())
    }

    /// Atomically terminate the running task and activate `id`. On any
    /// error the caller keeps running and nothing changes. Chaining to
    /// the caller itself re-queues it.
    pub fn chain_task(&mut self, id: TaskId) -> Result<(), OsError> {
        self.check_task(id)?;
        self.ensure_started()?;
        let caller = self.running;
        if self.tcbs[caller.index()].state != TaskState::Running {
            return Err(OsError::WrongState);
        }
        if self.holder == Some(caller) {
            return Err(OsError::Resource);
        }
        // Capacity check counts the slot our own termination frees.
        let freed = if id == caller { 1 } else { 0 };
        let i = id.index();
        if self.tcbs[i].pending.saturating_sub(freed) >= self.tasks[i].max_activations {
            return Err(OsError::LimitExceeded);
        }
        self.retire_running();
        let activated = self.activate(id);
        debug_assert!(activated.is_ok());
        Ok(())
    }

    /// Validate a yield request of the running task. The dispatcher
    /// performs the actual hand-over on `Ok`.
    pub fn schedule(&mut self) -> Result<(), OsError> {
        self.ensure_started()?;
        if self.holder == Some(self.running) {
            return Err(OsError::Resource);
        }
        Ok(())
    }

    // -- event services -----------------------------------------------------

    /// Post events to an extended task. Wakes it if it is waiting for
    /// any of them; occurred bits are retained either way.
    pub fn set_event(&mut self, id: TaskId, mask: EventMask) -> Result<(), OsError> {
        self.check_task(id)?;
        self.ensure_started()?;
        self.deliver_events(id, mask)
    }

    /// Drop event bits from the running extended task's occurred mask.
    pub fn clear_event(&mut self, mask: EventMask) -> Result<(), OsError> {
        self.ensure_started()?;
        let i = self.running.index();
        if self.tasks[i].class != TaskClass::Extended {
            return Err(OsError::WrongState);
        }
        self.tcbs[i].clear_events(mask);
        Ok(())
    }

    /// Occurred-event mask of an extended task.
    pub fn get_event(&self, id: TaskId) -> Result<EventMask, OsError> {
        self.check_task(id)?;
        let i = id.index();
        if self.tasks[i].class != TaskClass::Extended {
            return Err(OsError::AccessDenied);
        }
        if self.tcbs[i].state == TaskState::Suspended {
            return Err(OsError::WrongState);
        }
        Ok(self.tcbs[i].occurred)
    }

    /// Wait for any event in `mask`. Returns
    /// [`WaitVerdict::Continue`] when one already occurred, otherwise
    /// parks the caller. A mask of 0 can never be satisfied and parks
    /// the task until shutdown.
    pub(crate) fn wait_event(&mut self, mask: EventMask) -> Result<WaitVerdict, OsError> {
        self.ensure_started()?;
        let i = self.running.index();
        if self.tasks[i].class != TaskClass::Extended {
            return Err(OsError::WrongState);
        }
        if self.holder == Some(self.running) {
            return Err(OsError::Resource);
        }
        if self.tcbs[i].events_pending(mask) {
            return Ok(WaitVerdict::Continue);
        }
        self.tcbs[i].awaited = mask;
        self.tcbs[i].state = TaskState::Waiting;
        Ok(WaitVerdict::Park)
    }

    // -- alarm services -----------------------------------------------------

    /// Counter characteristics, identical for every alarm.
    pub fn alarm_base(&self, id: AlarmId) -> Result<AlarmBase, OsError> {
        self.check_alarm(id)?;
        Ok(self.cfg.counter)
    }

    /// Ticks until the alarm next expires. Fails with
    /// [`OsError::WrongState`] while the alarm is not armed.
    pub fn alarm_remaining(&self, id: AlarmId) -> Result<Tick, OsError> {
        self.check_alarm(id)?;
        self.ensure_started()?;
        let acb = &self.acbs[id.index()];
        if !acb.armed {
            return Err(OsError::WrongState);
        }
        Ok(ring_until(
            self.cfg.counter.max_allowed_value,
            self.counter,
            acb.next,
        ))
    }

    /// Arm an alarm `increment` ticks from now; `cycle` 0 makes it
    /// one-shot. The increment must be in `1..=max_allowed_value`.
    pub fn set_rel_alarm(&mut self, id: AlarmId, increment: Tick, cycle: Tick) -> Result<(), OsError> {
        self.check_alarm(id)?;
        self.ensure_started()?;
        let max = self.cfg.counter.max_allowed_value;
        if increment == 0 || increment > max {
            return Err(OsError::InvalidValue);
        }
        self.check_cycle(cycle)?;
        let next = ring_add(max, self.counter, increment);
        self.arm(id, next, cycle)
    }

    /// Arm an alarm for the absolute counter value `start`. A start
    /// equal to the current counter value matches only after a full
    /// counter wrap.
    pub fn set_abs_alarm(&mut self, id: AlarmId, start: Tick, cycle: Tick) -> Result<(), OsError> {
        self.check_alarm(id)?;
        self.ensure_started()?;
        if start > self.cfg.counter.max_allowed_value {
            return Err(OsError::InvalidValue);
        }
        self.check_cycle(cycle)?;
        self.arm(id, start, cycle)
    }

    /// Disarm an alarm. Fails with [`OsError::WrongState`] if it is not
    /// armed.
    pub fn cancel_alarm(&mut self, id: AlarmId) -> Result<(), OsError> {
        self.check_alarm(id)?;
        self.ensure_started()?;
        let acb = &mut self.acbs[id.index()];
        if !acb.armed {
            return Err(OsError::WrongState);
        }
        acb.armed = false;
        Ok(())
    }

    // -- resource services --------------------------------------------------

    /// Take the scheduler resource, lifting the caller to the ceiling
    /// priority. No nesting: a second take before release fails.
    pub fn get_resource(&mut self, res: ResourceId) -> Result<(), OsError> {
        if res != RES_SCHEDULER {
            return Err(OsError::InvalidId);
        }
        self.ensure_started()?;
        if self.holder.is_some() {
            return Err(OsError::AccessDenied);
        }
        self.holder = Some(self.running);
        Ok(())
    }

    /// Release the scheduler resource. Only the holder may release.
    pub fn release_resource(&mut self, res: ResourceId) -> Result<(), OsError> {
        if res != RES_SCHEDULER {
            return Err(OsError::InvalidId);
        }
        self.ensure_started()?;
        if self.holder != Some(self.running) {
            return Err(OsError::Resource);
        }
        self.holder = None;
        Ok(())
    }

    // -- shutdown -----------------------------------------------------------

    /// Request system shutdown with an optional status. The first
    /// recorded cause wins; services fail with [`OsError::CallLevel`]
    /// afterwards.
    pub fn shutdown(&mut self, error: Option<OsError>) -> Result<(), OsError> {
        self.ensure_started()?;
        self.force_halt(Shutdown::Requested { error });
        Ok(())
    }

    /// Record a shutdown cause unless one is already set.
    pub(crate) fn force_halt(&mut self, cause: Shutdown) {
        if self.halted.is_none() {
            self.halted = Some(cause);
        }
    }

    // -- counter ------------------------------------------------------------

    /// Advance the system counter by one tick and fire due alarms in
    /// table order. One-shot alarms disarm; cyclic alarms re-arm for
    /// `expiry + cycle` before their action runs. Ignored before start
    /// and after halt.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::empty();
        if !self.started || self.halted.is_some() {
            return report;
        }
        let max = self.cfg.counter.max_allowed_value;
        self.counter = ring_add(max, self.counter, 1);
        for j in 0..self.alarms.len() {
            if !self.acbs[j].armed || self.acbs[j].next != self.counter {
                continue;
            }
            let cycle = self.acbs[j].cycle;
            if cycle == 0 {
                self.acbs[j].armed = false;
            } else {
                self.acbs[j].next = ring_add(max, self.counter, cycle);
            }
            match self.alarms[j].action {
                AlarmAction::ActivateTask(t) => {
                    if let Err(e) = self.activate(t) {
                        report.push(Service::ActivateTask, e);
                    }
                }
                AlarmAction::SetEvent(t, mask) => {
                    if let Err(e) = self.deliver_events(t, mask) {
                        report.push(Service::SetEvent, e);
                    }
                }
                AlarmAction::Callback(f) => f(),
            }
        }
        report
    }

    // -- dispatcher interface -----------------------------------------------

    /// Mark the system started: record the mode, queue every auto-start
    /// activation in table order, and seat the idle task.
    pub(crate) fn boot(&mut self, mode: AppMode) {
        debug_assert!(!self.started);
        self.mode = mode;
        self.started = true;
        for i in 0..self.tasks.len() {
            if self.tasks[i].auto_start {
                let activated = self.activate(TaskId(i as u8));
                debug_assert!(activated.is_ok());
            }
        }
        // Idle is auto-started by table contract and runs first.
        self.tcbs[IDLE_TASK.index()].state = TaskState::Running;
        self.running = IDLE_TASK;
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started
    }

    /// The ready task that would win the processor right now.
    pub(crate) fn next_candidate(&self) -> Option<TaskId> {
        let n = self.tasks.len();
        sched::next_ready(self.tasks, &self.tcbs[..n], self.holder, self.ceiling)
    }

    pub(crate) fn effective_priority_of(&self, id: TaskId) -> u8 {
        sched::effective_priority(id, &self.tasks[id.index()], self.holder, self.ceiling)
    }

    pub(crate) fn task_desc(&self, id: TaskId) -> &TaskDesc {
        &self.tasks[id.index()]
    }

    /// Seat `id` as the running task. The displaced task goes back to
    /// ready without a new stamp, keeping its place in its priority
    /// band. Returns the displaced task.
    pub(crate) fn begin_episode(&mut self, id: TaskId) -> TaskId {
        let prev = self.running;
        if self.tcbs[prev.index()].state == TaskState::Running {
            self.tcbs[prev.index()].state = TaskState::Ready;
        }
        debug_assert!(self.tcbs[id.index()].is_ready());
        self.tcbs[id.index()].state = TaskState::Running;
        self.running = id;
        prev
    }

    /// Close an episode after the task body returned, and re-seat
    /// `prev`. A body that returns while still `Running` is treated as
    /// an implicit terminate, dropping the resource if held. Stack
    /// regions of ended activations are recycled here, after the
    /// dispatcher's guard check.
    pub(crate) fn finish_episode(&mut self, id: TaskId, prev: TaskId) {
        let i = id.index();
        if self.halted.is_none() {
            match self.tcbs[i].state {
                TaskState::Running => {
                    if self.holder == Some(id) {
                        self.holder = None;
                    }
                    self.retire_running();
                    self.arena.reset(i);
                }
                TaskState::Suspended | TaskState::Ready => {
                    // Terminated or chained inside the episode.
                    self.arena.reset(i);
                }
                TaskState::Waiting => {}
            }
        }
        self.running = prev;
        self.tcbs[prev.index()].state = TaskState::Running;
    }

    /// Guard-zone verdict for a task's stack region. Always true when
    /// stack checking is disabled.
    pub(crate) fn stack_ok(&self, id: TaskId) -> bool {
        !self.cfg.check_stack || self.arena.check(id.index())
    }

    /// The running task's private stack region.
    pub(crate) fn task_stack_mut(&mut self, id: TaskId) -> &mut [u8] {
        self.arena.region_mut(id.index())
    }

    #[cfg(test)]
    pub(crate) fn arena_mut(&mut self) -> &mut StackArena {
        &mut self.arena
    }

    // -- internals ----------------------------------------------------------

    fn ensure_started(&self) -> Result<(), OsError> {
        if self.started && self.halted.is_none() {
            Ok(())
        } else {
            Err(OsError::CallLevel)
        }
    }

    fn check_task(&self, id: TaskId) -> Result<(), OsError> {
        if id.index() < self.tasks.len() {
            Ok(())
        } else {
            Err(OsError::InvalidId)
        }
    }

    fn check_alarm(&self, id: AlarmId) -> Result<(), OsError> {
        if id.index() < self.alarms.len() {
            Ok(())
        } else {
            Err(OsError::InvalidId)
        }
    }

    fn check_cycle(&self, cycle: Tick) -> Result<(), OsError> {
        let c = &self.cfg.counter;
        if cycle != 0 && (cycle < c.min_cycle || cycle > c.max_allowed_value) {
            return Err(OsError::InvalidValue);
        }
        Ok(())
    }

    /// Arming core shared by the relative and absolute alarm services.
    /// An alarm already in use must be cancelled first.
    fn arm(&mut self, id: AlarmId, next: Tick, cycle: Tick) -> Result<(), OsError> {
        let acb = &mut self.acbs[id.index()];
        if acb.armed {
            return Err(OsError::WrongState);
        }
        acb.next = next;
        acb.cycle = cycle;
        acb.armed = true;
        Ok(())
    }

    fn stamp(&mut self) -> u64 {
        let s = self.next_seq;
        self.next_seq += 1;
        s
    }

    /// Unchecked activation core shared by the service, chaining, boot
    /// and alarm expiry.
    fn activate(&mut self, id: TaskId) -> Result<(), OsError> {
        let i = id.index();
        if !self.tcbs[i].can_activate(self.tasks[i].max_activations) {
            return Err(OsError::LimitExceeded);
        }
        self.tcbs[i].pending += 1;
        if self.tcbs[i].state == TaskState::Suspended {
            let seq = self.stamp();
            let tcb = &mut self.tcbs[i];
            tcb.state = TaskState::Ready;
            tcb.seq = seq;
            tcb.occurred = 0;
            tcb.awaited = 0;
        }
        Ok(())
    }

    /// Event-posting core shared by the service and alarm expiry.
    fn deliver_events(&mut self, id: TaskId, mask: EventMask) -> Result<(), OsError> {
        let i = id.index();
        if self.tasks[i].class != TaskClass::Extended {
            return Err(OsError::AccessDenied);
        }
        if self.tcbs[i].state == TaskState::Suspended {
            return Err(OsError::WrongState);
        }
        if self.tcbs[i].post_events(mask) {
            let seq = self.stamp();
            let tcb = &mut self.tcbs[i];
            tcb.awaited = 0;
            tcb.state = TaskState::Ready;
            tcb.seq = seq;
        }
        Ok(())
    }

    /// Retire the running task's current activation: re-queue it with a
    /// fresh stamp if more activations are pending, else suspend it.
    fn retire_running(&mut self) {
        let i = self.running.index();
        debug_assert_eq!(self.tcbs[i].state, TaskState::Running);
        debug_assert!(self.tcbs[i].pending > 0);
        self.tcbs[i].pending = self.tcbs[i].pending.saturating_sub(1);
        if self.tcbs[i].pending > 0 {
            let seq = self.stamp();
            self.tcbs[i].state = TaskState::Ready;
            self.tcbs[i].seq = seq;
        } else {
            self.tcbs[i].state = TaskState::Suspended;
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
