//! IPC primitives exposed to user mode: pipes, named shared memory
//! regions, and futex wait/wake.

pub mod futex;
pub mod pipe;
pub mod shared_memory;

/// Reset all IPC state. Only meaningful for the in-kernel test harness,
/// which runs many independent scenarios in one boot image.
#[cfg(test)]
pub fn reset_for_test() {
    futex::reset_for_test();
}
