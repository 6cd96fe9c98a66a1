//! ImposOS kernel core: memory management, scheduler, VFS + journal,
//! TCP/IP stack, TLS client, and the IPC primitives exposed to user mode.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

// Bare-metal target: back the global allocator with `mm::heap`'s region.
#[cfg(all(target_arch = "x86", target_os = "none"))]
use linked_list_allocator::LockedHeap;

#[cfg(all(target_arch = "x86", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn get_allocator() -> &'static LockedHeap {
    &ALLOCATOR
}

// Host target: system allocator, so `cargo test` can allocate normally.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

mod intrinsics;

pub mod arch;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod ipc;
pub mod irq;
pub mod mm;
pub mod net;
pub mod sched;
pub mod serial;
pub mod sync;
pub mod syscall;
pub mod timer;
pub mod tls;

mod test_framework;

pub use test_framework::{
    cycles_to_ns, exit_qemu, read_timestamp, test_panic_handler, BenchmarkRunner, QemuExitCode,
    Testable,
};
#[cfg(test)]
pub use test_framework::test_runner;

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("panic: {}", info);
    loop {
        // SAFETY: halts the core; there is nothing left to do after a
        // kernel-mode panic.
        unsafe { core::arch::asm!("cli", "hlt", options(nomem, nostack)) }
    }
}

/// Heap allocation error handler. Panic is intentional: allocation failure
/// in a `no_std` kernel is unrecoverable and the ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}
