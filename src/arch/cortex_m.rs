//! # Cortex-M Tick Source
//!
//! SysTick plumbing for ARM Cortex-M targets. The kernel never runs
//! inside an interrupt; the SysTick handler only counts, and the idle
//! loop picks the count up at the next dispatch boundary.
//!
//! ## Wiring
//!
//! ```text
//! SysTick_Handler ──► TickPump::isr_tick      (count one)
//!
//! Platform::wait_for_tick ──► TickPump::wait_one   (wfi until counted)
//! Platform::pending_ticks ──► TickPump::drain      (ticks missed while
//!                                                   a task body ran)
//! ```
//!
//! A board support layer owns a `static TickPump`, calls `isr_tick`
//! from its SysTick exception, and forwards the other two methods from
//! its `Platform` implementation.

use core::cell::Cell;

use cortex_m::asm;
use cortex_m::interrupt::{self, Mutex};
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SYST;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `tick_hz` from a `sysclk_hz` processor
/// clock. Each expiry must invoke [`TickPump::isr_tick`].
pub fn configure_systick(syst: &mut SYST, sysclk_hz: u32, tick_hz: u32) {
    let reload = sysclk_hz / tick_hz - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Tick accumulator
// ---------------------------------------------------------------------------

/// Interrupt-fed tick counter shared between the SysTick handler and
/// the kernel's idle loop.
pub struct TickPump {
    pending: Mutex<Cell<u32>>,
}

impl TickPump {
    pub const fn new() -> TickPump {
        TickPump {
            pending: Mutex::new(Cell::new(0)),
        }
    }

    /// Count one tick. Call this, and nothing else, from the SysTick
    /// exception handler.
    pub fn isr_tick(&self) {
        interrupt::free(|cs| {
            let pending = self.pending.borrow(cs);
            pending.set(pending.get().saturating_add(1));
        });
    }

    /// Take every pending tick at once.
    pub fn drain(&self) -> u32 {
        interrupt::free(|cs| self.pending.borrow(cs).take())
    }

    /// Sleep until at least one tick is pending, then consume exactly
    /// one. A tick landing between the check and `wfi` rides the next
    /// wake-up; the interrupt handler keeps the count either way.
    pub fn wait_one(&self) {
        loop {
            let got = interrupt::free(|cs| {
                let pending = self.pending.borrow(cs);
                let n = pending.get();
                if n > 0 {
                    pending.set(n - 1);
                    true
                } else {
                    false
                }
            });
            if got {
                return;
            }
            asm::wfi();
        }
    }
}

impl Default for TickPump {
    fn default() -> Self {
        TickPump::new()
    }
}
