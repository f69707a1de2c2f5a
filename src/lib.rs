//! # Oskar: an OSEK-style real-time kernel core
//!
//! A statically configured, priority-driven kernel in the OSEK OS
//! tradition: fixed task and alarm tables, run-to-completion tasks,
//! tick-driven alarms, event control for extended tasks, and a
//! ceiling-protocol scheduler resource.
//!
//! ## Overview
//!
//! Everything the kernel will ever run is declared up front. A task
//! table fixes each task's priority, scheduling class and activation
//! limit; an alarm table fixes what every alarm does when it expires.
//! At runtime the kernel is a deterministic state machine over those
//! tables: services move tasks between `Suspended`, `Ready`, `Running`
//! and `Waiting`, and the system counter drives alarms that activate
//! tasks, post events, or call back into the application.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │            Application Tasks (TaskBody impls)           │
//! ├────────────────────────────────────────────────────────┤
//! │                Dispatcher (exec.rs)                     │
//! │        start() · dispatch · Runtime service calls       │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │   Alarm Engine     │  Event Control    │
//! │  sched.rs    │   alarm.rs         │  event.rs         │
//! │  ─ next_ready│   ─ ring_add()     │  ─ post_events()  │
//! │  ─ fifo ties │   ─ ring_until()   │  ─ clear_events() │
//! │  ─ ceiling   │   ─ arm/expire     │                   │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │            Kernel State Machine (kernel.rs)             │
//! │     Tcb · services · system counter · shutdown          │
//! ├────────────────────────────────────────────────────────┤
//! │              Stack Guards (stack.rs)                    │
//! │     per-task regions · sentinel zones · headroom        │
//! ├────────────────────────────────────────────────────────┤
//! │        Platform trait / Arch (arch/cortex_m.rs)         │
//! │     console · tick source · SysTick · TickPump          │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Execution Model
//!
//! Tasks do not own hardware contexts. One activation of a task is an
//! *episode*: the dispatcher calls the body, the body makes service
//! calls through [`exec::Runtime`], and the episode ends when the body
//! returns an [`exec::Exit`] token obtained from a terminating service.
//! Preemption is nested dispatch inside the service call that made a
//! stronger task ready; waiting parks the task and re-enters its body
//! from the top once an awaited event arrives.
//!
//! This trades saved register frames for something harder to get from a
//! context-switching kernel: the whole scheduler, alarm and event
//! machinery runs unmodified on a development host, so every scheduling
//! property is an ordinary unit test.
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically sized
//! - **No `alloc`**: pure `core` only
//! - **Fixed control blocks**: `[Tcb; MAX_TASKS]`, `[AlarmCb; MAX_ALARMS]`
//! - **Stack arena**: one `u8` region per task, fenced by guard zones
//! - **Configuration**: `&'static` task and alarm tables, consumed once

#![no_std]

pub mod config;
pub mod error;
pub mod task;
pub mod event;
pub mod alarm;
pub mod stack;
pub mod sched;
pub mod kernel;
pub mod exec;
pub mod arch;
