//! Boot sequencing: the single path from `rust_entry` to the idle loop.
//!
//! Order matters and each step depends on the one before it: the frame
//! allocator needs the memory map out of `info`, the heap needs paging
//! enabled, and nothing past `mm::init` can allocate before it returns.

use log::LevelFilter;

use crate::arch::x86::multiboot::MultibootInfo;

/// Run from `_start32` via `boot::rust_entry`, never returns.
pub fn run(info: MultibootInfo) -> ! {
    crate::serial::init(LevelFilter::Trace);
    log::info!(
        "imposos: booting, {} bytes reported by bios",
        info.reported_memory_bytes()
    );

    crate::arch::x86::init();
    log::info!("arch: gdt/idt/pic/pit/rtc up");

    crate::mm::init(&info);
    log::info!("mm: paging enabled, heap live");

    crate::sched::init();
    log::info!("sched: task table ready");

    crate::fs::init();
    log::info!("fs: root mounted");

    if let Err(e) = crate::net::init() {
        log::error!("net: init failed: {}", e);
    } else {
        log::info!("net: interfaces up");
    }

    if let Err(e) = crate::crypto::random::init() {
        log::error!("crypto: csprng init failed: {}", e);
    } else {
        log::info!("crypto: csprng seeded");
    }

    log::info!("imposos: boot complete, entering idle loop");
    crate::arch::x86::idle();
}
