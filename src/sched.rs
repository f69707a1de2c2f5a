//! # Scheduling Rules
//!
//! The selection logic of the kernel, kept as pure functions over the
//! task tables so it can be tested in isolation. The dispatcher decides
//! *when* to reschedule; this module decides *who* wins.
//!
//! ## Rules
//!
//! 1. Among all ready tasks, the highest effective priority wins.
//! 2. Ties are broken first-come-first-served by activation sequence
//!    number. A preempted task keeps its original stamp, so it stays
//!    ahead of later arrivals at the same priority.
//! 3. The holder of the scheduler resource is lifted to the ceiling
//!    priority, the highest priority in the configuration.
//! 4. A running task is displaced only if it is preemptable and the
//!    challenger's priority is strictly higher. That rule belongs to
//!    the dispatcher; this module only picks the challenger.

use crate::task::{TaskDesc, TaskId, Tcb};

/// Priority the scheduler actually compares for `id`: the static one,
/// or the ceiling while the task holds the scheduler resource.
pub fn effective_priority(
    id: TaskId,
    desc: &TaskDesc,
    holder: Option<TaskId>,
    ceiling: u8,
) -> u8 {
    if holder == Some(id) {
        ceiling
    } else {
        desc.priority
    }
}

/// Pick the ready task that would win the processor right now, ignoring
/// whatever is running. `None` when nothing is ready.
///
/// `descs` and `tcbs` are the configured tables, index-aligned.
pub fn next_ready(
    descs: &[TaskDesc],
    tcbs: &[Tcb],
    holder: Option<TaskId>,
    ceiling: u8,
) -> Option<TaskId> {
    let mut best: Option<(u8, u64, TaskId)> = None;
    for (i, tcb) in tcbs.iter().enumerate() {
        if !tcb.is_ready() {
            continue;
        }
        let id = TaskId(i as u8);
        let prio = effective_priority(id, &descs[i], holder, ceiling);
        let better = match best {
            None => true,
            Some((bp, bs, _)) => prio > bp || (prio == bp && tcb.seq < bs),
        };
        if better {
            best = Some((prio, tcb.seq, id));
        }
    }
    best.map(|(_, _, id)| id)
}

/// The ceiling priority of a task table: its highest configured
/// priority.
pub fn ceiling_priority(descs: &[TaskDesc]) -> u8 {
    descs.iter().map(|d| d.priority).max().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
