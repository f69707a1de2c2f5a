//! # Oskar Demo System
//!
//! A small periodic sampling system run on the host: the tick source is
//! `thread::sleep`, the console is stdout, and the kernel schedules
//! exactly as it would on a microcontroller.
//!
//! | Task         | Priority | Class    | Sched          | Role                              |
//! |--------------|----------|----------|----------------|-----------------------------------|
//! | `startup`    | 100      | Basic    | Non-preemptive | Arms all alarms, then exits       |
//! | `poller`     | 5        | Basic    | Non-preemptive | Cyclic sample, chains `sender`    |
//! | `sender`     | 10       | Basic    | Preemptive     | Ships every third sample          |
//! | `monitor`    | 20       | Extended | Non-preemptive | Waits on the sample-window event  |
//! | `supervisor` | 50       | Basic    | Preemptive     | Prints a summary and shuts down   |
//!
//! ## Timeline
//!
//! The startup task arms four alarms: a cyclic activation of `poller`
//! every 5 ticks, a cyclic sample-window event for `monitor` every
//! 8 ticks, a cyclic heartbeat callback every 10 ticks, and a one-shot
//! activation of `supervisor` at tick 60 that ends the run. Every third
//! poll chains into `sender`, so by tick 60 the schedule interleaves
//! all three cadences plus the waits and wake-ups of the monitor.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use oskar::alarm::{AlarmAction, AlarmDesc, AlarmId};
use oskar::config::OsConfig;
use oskar::event::EventMask;
use oskar::exec::{EventWait, Exit, Platform, Runtime, TaskBody, TaskSet};
use oskar::kernel::{AppMode, Kernel, RES_SCHEDULER};
use oskar::task::{SchedClass, TaskClass, TaskDesc, TaskId};

// ---------------------------------------------------------------------------
// System configuration
// ---------------------------------------------------------------------------

const STARTUP: TaskId = TaskId(1);
const POLLER: TaskId = TaskId(2);
const SENDER: TaskId = TaskId(3);
const MONITOR: TaskId = TaskId(4);
const SUPERVISOR: TaskId = TaskId(5);

const POLL_ALARM: AlarmId = AlarmId(0);
const SAMPLE_ALARM: AlarmId = AlarmId(1);
const STOP_ALARM: AlarmId = AlarmId(2);
const HEARTBEAT_ALARM: AlarmId = AlarmId(3);

/// Sample window opened for the monitor.
const EV_SAMPLE: EventMask = 0x01;

const TASKS: &[TaskDesc] = &[
    TaskDesc::IDLE,
    TaskDesc {
        auto_start: true,
        class: TaskClass::Basic,
        priority: 100,
        sched: SchedClass::NonPreemptive,
        max_activations: 1,
    },
    TaskDesc {
        auto_start: false,
        class: TaskClass::Basic,
        priority: 5,
        sched: SchedClass::NonPreemptive,
        max_activations: 2,
    },
    TaskDesc {
        auto_start: false,
        class: TaskClass::Basic,
        priority: 10,
        sched: SchedClass::Preemptive,
        max_activations: 1,
    },
    TaskDesc {
        auto_start: false,
        class: TaskClass::Extended,
        priority: 20,
        sched: SchedClass::NonPreemptive,
        max_activations: 1,
    },
    TaskDesc {
        auto_start: false,
        class: TaskClass::Basic,
        priority: 50,
        sched: SchedClass::Preemptive,
        max_activations: 1,
    },
];

const ALARMS: &[AlarmDesc] = &[
    AlarmDesc {
        action: AlarmAction::ActivateTask(POLLER),
    },
    AlarmDesc {
        action: AlarmAction::SetEvent(MONITOR, EV_SAMPLE),
    },
    AlarmDesc {
        action: AlarmAction::ActivateTask(SUPERVISOR),
    },
    AlarmDesc {
        action: AlarmAction::Callback(heartbeat),
    },
];

static HEARTBEATS: AtomicU32 = AtomicU32::new(0);

/// Alarm callback: runs inside the tick, no task involved.
fn heartbeat() {
    HEARTBEATS.fetch_add(1, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Host platform
// ---------------------------------------------------------------------------

/// Tick source and console for a hosted run. Each tick is one real
/// sleep of the configured duration; output goes to stdout.
struct HostPlatform {
    tick: Duration,
}

impl Platform for HostPlatform {
    fn put_str(&mut self, s: &str) {
        print!("{s}");
    }

    fn wait_for_tick(&mut self) -> bool {
        thread::sleep(self.tick);
        true
    }
}

// ---------------------------------------------------------------------------
// Task bodies
// ---------------------------------------------------------------------------

/// Arms the whole alarm schedule, then gets out of the way. Runs first
/// at the highest configured priority.
fn startup(os: &mut Runtime<'_, '_>) -> Exit {
    let base = match os.alarm_base(POLL_ALARM) {
        Ok(base) => base,
        Err(e) => return os.shutdown(Some(e)),
    };
    os.put_str(&format!(
        "startup: counter wraps after {} ticks\n",
        base.max_allowed_value
    ));

    // The monitor must be running (well, waiting) before the first
    // sample-window event lands, or the delivery is a state error.
    let armed = os
        .activate(MONITOR)
        .and_then(|()| os.set_rel_alarm(POLL_ALARM, 5, 5))
        .and_then(|()| os.set_rel_alarm(SAMPLE_ALARM, 8, 8))
        .and_then(|()| os.set_rel_alarm(HEARTBEAT_ALARM, 10, 10))
        .and_then(|()| os.set_rel_alarm(STOP_ALARM, 60, 0));
    if let Err(e) = armed {
        return os.shutdown(Some(e));
    }

    os.terminate().unwrap_or_else(|e| os.shutdown(Some(e)))
}

/// Cyclic sampler. Every third sample is worth shipping, which hands
/// the rest of the activation to the sender.
struct Poller {
    runs: u32,
}

impl TaskBody for Poller {
    fn run(&mut self, os: &mut Runtime<'_, '_>) -> Exit {
        self.runs += 1;
        let now = os.system_counter();
        os.put_str(&format!("poller: sample {} at tick {now}\n", self.runs));
        if self.runs % 3 == 0 {
            os.chain(SENDER).unwrap_or_else(|e| os.shutdown(Some(e)))
        } else {
            os.terminate().unwrap_or_else(|e| os.shutdown(Some(e)))
        }
    }
}

/// Ships a batch. Holds the scheduler resource across the send so the
/// output line cannot be split by a higher-priority wake-up.
fn sender(os: &mut Runtime<'_, '_>) -> Exit {
    if let Err(e) = os.get_resource(RES_SCHEDULER) {
        return os.shutdown(Some(e));
    }
    let now = os.system_counter();
    os.put_str(&format!("sender: batch shipped at tick {now}\n"));
    if let Err(e) = os.release_resource(RES_SCHEDULER) {
        return os.shutdown(Some(e));
    }
    os.terminate().unwrap_or_else(|e| os.shutdown(Some(e)))
}

/// Extended task: parks on the sample-window event, reports each
/// window, and never terminates.
fn monitor(os: &mut Runtime<'_, '_>) -> Exit {
    loop {
        match os.wait_event(EV_SAMPLE) {
            Ok(EventWait::Parked(exit)) => return exit,
            Ok(EventWait::Occurred) => {
                if let Err(e) = os.clear_event(EV_SAMPLE) {
                    return os.shutdown(Some(e));
                }
                let now = os.system_counter();
                os.put_str(&format!("monitor: sample window at tick {now}\n"));
            }
            Err(e) => return os.shutdown(Some(e)),
        }
    }
}

/// One-shot at the end of the run: prints what happened, then asks the
/// kernel to stop.
fn supervisor(os: &mut Runtime<'_, '_>) -> Exit {
    let now = os.system_counter();
    let beats = HEARTBEATS.load(Ordering::Relaxed);
    os.put_str(&format!(
        "supervisor: halting at tick {now} after {beats} heartbeats\n"
    ));
    for id in [STARTUP, POLLER, SENDER, MONITOR, SUPERVISOR] {
        if let Ok(headroom) = os.stack_headroom(id) {
            os.put_str(&format!(
                "supervisor: task {} stack headroom {} bytes\n",
                id.index(),
                headroom
            ));
        }
    }
    os.shutdown(None)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    let cfg = OsConfig::default();
    let mut platform = HostPlatform {
        tick: Duration::from_millis(cfg.tick_ms as u64),
    };
    let mut kernel = Kernel::new(cfg, TASKS, ALARMS).expect("failed to build the kernel");

    let mut startup = startup;
    let mut poller = Poller { runs: 0 };
    let mut sender = sender;
    let mut monitor = monitor;
    let mut supervisor = supervisor;

    let mut set = TaskSet::new();
    set.insert(STARTUP, &mut startup);
    set.insert(POLLER, &mut poller);
    set.insert(SENDER, &mut sender);
    set.insert(MONITOR, &mut monitor);
    set.insert(SUPERVISOR, &mut supervisor);

    let cause = kernel
        .start(AppMode::Default, &mut set, &mut platform)
        .expect("failed to start the system");
    println!("kernel halted: {cause:?}");
}
