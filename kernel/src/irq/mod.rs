//! IRQ masking primitive shared by every subsystem that touches state also
//! touched from interrupt context (scheduler ready queues, the serial
//! logger, socket rings).
//!
//! The actual dispatch path — PIT tick, page fault, syscall vector — is
//! wired directly in [`crate::arch::x86::idt`], which owns the IDT and
//! knows the exact handler for each vector. This module only exposes the
//! save/mask/restore primitive those handlers (and everyone else) build
//! critical sections out of.

use core::sync::atomic::{AtomicU64, Ordering};

static IRQ_COUNT: AtomicU64 = AtomicU64::new(0);

/// Run `f` with interrupts disabled, restoring the prior IF state
/// afterward even if `f` panics.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    crate::arch::x86::idt::without_interrupts(f)
}

/// Record that an external interrupt was serviced. Called once per IRQ
/// from `idt::isr_common` for diagnostics (`cat /proc/interrupts`-style).
pub fn record_irq() {
    IRQ_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Total external interrupts serviced since boot.
pub fn count() -> u64 {
    IRQ_COUNT.load(Ordering::Relaxed)
}
