//! # Stack Arena
//!
//! One contiguous buffer carved into fixed per-task stack regions with
//! guard zones between them:
//!
//! ```text
//! | G | region 0 | G | region 1 | G | ... | region N-1 | G |
//! ```
//!
//! Every region is bracketed by a guard on both sides, so N regions take
//! N+1 guards; neighbouring regions share the guard between them. Guards
//! hold a fixed byte pattern that task code never writes. A changed guard
//! byte means a task ran off the end of its region, which the kernel
//! treats as fatal.
//!
//! Fresh and recycled regions are filled with [`FILL`], so a debugger can
//! read high-water marks off the arena.

use crate::config::{MAX_TASKS, STACK_SIZE};

/// Bytes in one guard zone.
pub const GUARD_LEN: usize = 2;

/// Pattern written to every guard zone.
pub const GUARD: [u8; GUARD_LEN] = [0x5a, 0xc3];

/// Fill byte for unused stack region bytes.
pub const FILL: u8 = 0xa5;

/// Total arena size for the maximum task count.
pub const ARENA_LEN: usize = MAX_TASKS * STACK_SIZE + (MAX_TASKS + 1) * GUARD_LEN;

/// The stack arena. Sized for [`MAX_TASKS`] at compile time; only the
/// first `tasks` regions are laid out and checked.
#[derive(Debug)]
pub struct StackArena {
    buf: [u8; ARENA_LEN],
    tasks: usize,
}

impl StackArena {
    /// An uninitialised arena. Call [`init`](StackArena::init) before
    /// use.
    pub const fn new() -> Self {
        StackArena {
            buf: [0; ARENA_LEN],
            tasks: 0,
        }
    }

    /// Lay out guards and fill for `tasks` regions.
    pub fn init(&mut self, tasks: usize) {
        debug_assert!(tasks <= MAX_TASKS);
        self.tasks = tasks;
        for i in 0..tasks {
            self.fill_region(i);
        }
        for j in 0..=tasks {
            self.write_guard(j);
        }
    }

    /// Offset of guard `j`. Guard `i` sits just below region `i`, guard
    /// `tasks` closes the arena.
    const fn guard_at(j: usize) -> usize {
        j * (STACK_SIZE + GUARD_LEN)
    }

    /// Offset of the first usable byte of region `i`.
    const fn region_at(i: usize) -> usize {
        Self::guard_at(i) + GUARD_LEN
    }

    /// Usable stack bytes of region `i`.
    pub fn region(&self, i: usize) -> &[u8] {
        let start = Self::region_at(i);
        &self.buf[start..start + STACK_SIZE]
    }

    /// Mutable view of region `i`, handed to the task that owns it.
    pub fn region_mut(&mut self, i: usize) -> &mut [u8] {
        let start = Self::region_at(i);
        &mut self.buf[start..start + STACK_SIZE]
    }

    /// True if both guards around region `i` still hold the pattern.
    pub fn check(&self, i: usize) -> bool {
        self.guard_intact(i) && self.guard_intact(i + 1)
    }

    /// Restore region `i` to its pristine state: refill the stack bytes
    /// and rewrite both adjacent guards.
    ///
    /// Callers that care about corruption evidence must run
    /// [`check`](StackArena::check) first; this erases it.
    pub fn reset(&mut self, i: usize) {
        self.fill_region(i);
        self.write_guard(i);
        self.write_guard(i + 1);
    }

    /// Bytes of region `i` still holding the fill pattern, counted from
    /// the bottom. A rough high-water mark for sizing stacks.
    pub fn untouched(&self, i: usize) -> usize {
        self.region(i).iter().take_while(|&&b| b == FILL).count()
    }

    /// Flip bits in guard `j`, forging an overrun for fault-path tests.
    #[cfg(test)]
    pub(crate) fn scribble_guard(&mut self, j: usize) {
        self.buf[Self::guard_at(j)] ^= 0xff;
    }

    fn guard_intact(&self, j: usize) -> bool {
        let at = Self::guard_at(j);
        self.buf[at..at + GUARD_LEN] == GUARD
    }

    fn write_guard(&mut self, j: usize) {
        let at = Self::guard_at(j);
        self.buf[at..at + GUARD_LEN].copy_from_slice(&GUARD);
    }

    fn fill_region(&mut self, i: usize) {
        let start = Self::region_at(i);
        self.buf[start..start + STACK_SIZE].fill(FILL);
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
