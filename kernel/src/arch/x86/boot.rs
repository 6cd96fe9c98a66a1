//! Kernel entry point: Multiboot header and `_start32`.
//!
//! Uses the Multiboot 1 header (magic `0x1BADB002`), matching the
//! original kernel's `multiboot.h` — GRUB hands back a `multiboot_info_t`
//! pointer and the `0x2BADB002` magic in EAX, not the Multiboot2 tag list.

use core::arch::global_asm;

use crate::arch::x86::multiboot::MultibootInfo;

/// Magic GRUB leaves in EAX on Multiboot 1 boot.
pub const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BADB002;

const STACK_SIZE: usize = 64 * 1024;

#[repr(align(16))]
struct BootStack([u8; STACK_SIZE]);

#[no_mangle]
static mut BOOT_STACK: BootStack = BootStack([0; STACK_SIZE]);

global_asm!(
    ".intel_syntax noprefix",
    ".section .multiboot_header, \"a\"",
    ".align 4",
    ".long 0x1BADB002",                 // magic
    ".long 0x00000003",                 // flags: align modules + provide mem_*/mmap_*
    ".long -(0x1BADB002 + 0x00000003)", // checksum
    ".section .text",
    ".global _start32",
    "_start32:",
    "cli",
    "lea esp, [{stack} + {stack_size}]",
    "push ebx", // multiboot_info_t*
    "push eax", // magic
    "call {entry}",
    "2:",
    "hlt",
    "jmp 2b",
    stack = sym BOOT_STACK,
    stack_size = const STACK_SIZE,
    entry = sym rust_entry,
);

/// Called from `_start32` with the Multiboot magic and info pointer still
/// on the stack (pushed in reverse so they read as normal `extern "C"`
/// arguments).
///
/// Under the `testing` feature (used by the `kernel/tests/*.rs` QEMU
/// integration binaries and the crate's own `cfg(test)` build) this
/// hands off to the `_start` symbol the test binary itself defines,
/// instead of running the full production boot sequence — the linker
/// script's `ENTRY(_start32)` is fixed, so every binary built against it
/// needs a `_start32`, but what runs after the magic check differs.
#[no_mangle]
extern "C" fn rust_entry(magic: u32, info_addr: u32) -> ! {
    if magic != MULTIBOOT_BOOTLOADER_MAGIC {
        panic!("invalid multiboot magic: {:#x}", magic);
    }

    #[cfg(feature = "testing")]
    {
        let _ = info_addr;
        extern "C" {
            fn _start() -> !;
        }
        // SAFETY: every binary linked against this feature defines
        // `_start`; control reaches it with a live stack and nothing
        // else set up, same as this function's own caller convention.
        unsafe { _start() }
    }

    #[cfg(not(feature = "testing"))]
    {
        // SAFETY: GRUB guarantees `info_addr` points at a live
        // `multiboot_info_t` for the lifetime of early boot, before any
        // identity mapping changes.
        let info = unsafe { MultibootInfo::from_ptr(info_addr as *const _) };
        crate::arch::x86::bootstrap::run(info)
    }
}
