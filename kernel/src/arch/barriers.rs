//! Memory barrier primitives.
//!
//! x86's strongly-ordered memory model makes all three barriers below
//! equivalent to a compiler fence plus `mfence`; they're kept as distinct
//! names because call sites document *why* a barrier is needed even where
//! the underlying instruction is shared.

use core::sync::atomic::{fence, Ordering};

/// Full read/write memory fence.
#[inline(always)]
pub fn memory_fence() {
    fence(Ordering::SeqCst);
}

/// Data synchronization barrier (store must be visible before continuing).
#[inline(always)]
pub fn data_sync_barrier() {
    fence(Ordering::SeqCst);
}

/// Instruction stream synchronization barrier. No-op on x86: the strongly
/// ordered model and unified instruction/data view make it unnecessary.
#[inline(always)]
pub fn instruction_sync_barrier() {}
