//! Programmable Interval Timer (PIT) driver.
//!
//! Channel 0 is programmed for a fixed 120 Hz tick rate — the rate the
//! original kernel's scheduler and `sys_sleep` millisecond conversion
//! (`ms * TARGET_HZ / 1000`) assume. Every tick increments a global
//! counter and feeds the scheduler's preemption logic.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::x86::{pic, port};

/// Ticks per second the PIT is programmed for.
pub const TARGET_HZ: u32 = 120;

const PIT_FREQUENCY: u32 = 1_193_182;
const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Program PIT channel 0 for `TARGET_HZ` periodic interrupts and unmask IRQ0.
pub fn init() {
    let divisor = PIT_FREQUENCY / TARGET_HZ;

    // SAFETY: ports 0x40/0x43 are the standard PIT channel-0 data and
    // command ports; mode 3 (square wave generator), lobyte/hibyte access.
    unsafe {
        port::outb(PIT_COMMAND, 0x36);
        port::outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
        port::outb(PIT_CHANNEL0, ((divisor >> 8) & 0xFF) as u8);
    }

    pic::unmask(0);
    log::info!("pit: programmed for {} Hz (divisor={})", TARGET_HZ, divisor);
}

/// Called from the IRQ0 handler on every timer interrupt.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Ticks elapsed since `init()`.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Convert a millisecond duration to a tick count, rounding up by one tick
/// the way the original kernel's `sys_sleep` does (`ms * TARGET_HZ / 1000 + 1`).
pub fn ms_to_ticks(ms: u32) -> u64 {
    (ms as u64 * TARGET_HZ as u64 / 1000) + 1
}
