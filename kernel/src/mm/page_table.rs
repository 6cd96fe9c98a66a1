//! Raw two-level x86 page table structures.
//!
//! A page directory and its page tables are each exactly one 4 KiB frame
//! of 1024 `u32` entries. Three OS-defined bits live in the
//! architecturally-available bits 9-11: [`PteFlags::GUARD`] marks a
//! not-present page that should be demand-faulted in on next access,
//! [`PteFlags::COW`] marks a present read-only page whose write fault
//! must copy, and [`PteFlags::USER`] gates ring-3 access.

use core::arch::asm;

use bitflags::bitflags;

use crate::mm::{PhysAddr, VirtAddr};

pub const ENTRIES_PER_TABLE: usize = 1024;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        const GUARD    = 1 << 9;
        const COW      = 1 << 10;
    }
}

/// One page directory or page table: 1024 raw entries.
#[repr(C, align(4096))]
pub struct Table {
    pub entries: [u32; ENTRIES_PER_TABLE],
}

impl Table {
    pub const fn empty() -> Self {
        Self {
            entries: [0; ENTRIES_PER_TABLE],
        }
    }

    pub fn entry_addr(&self, index: usize) -> PhysAddr {
        PhysAddr::new(self.entries[index] & !0xFFF)
    }

    pub fn entry_flags(&self, index: usize) -> PteFlags {
        PteFlags::from_bits_truncate(self.entries[index])
    }

    pub fn set_entry(&mut self, index: usize, phys: PhysAddr, flags: PteFlags) {
        self.entries[index] = phys.as_u32() | flags.bits();
    }

    pub fn clear_entry(&mut self, index: usize) {
        self.entries[index] = 0;
    }
}

/// Read a raw table sitting at a known-mapped physical address.
///
/// # Safety
/// `phys` must point to a live, frame-aligned [`Table`], accessible via
/// the identity mapping covering `phys` (true for every frame under
/// 256 MiB once the kernel page directory is active, per
/// `vmm::init_kernel_pagedir`).
pub unsafe fn table_at(phys: PhysAddr) -> &'static mut Table {
    // SAFETY: forwarded from the caller's contract.
    unsafe { &mut *(phys.as_u32() as *mut Table) }
}

/// Load a new page directory into CR3, flushing the entire TLB.
///
/// # Safety
/// `pd` must describe a valid kernel-compatible page directory, or the
/// next instruction fetch after this call may fault irrecoverably.
pub unsafe fn load_page_directory(pd: PhysAddr) {
    #[cfg(target_os = "none")]
    // SAFETY: forwarded from the caller's contract.
    unsafe {
        asm!("mov cr3, {0:e}", in(reg) pd.as_u32(), options(nostack, preserves_flags));
    }
    #[cfg(not(target_os = "none"))]
    let _ = pd;
}

/// Enable paging (CR0.PG) and write-protect-for-ring0 (CR0.WP, so the
/// kernel honors read-only PTEs rather than silently bypassing them,
/// which the COW path depends on).
///
/// # Safety
/// A valid page directory must already be loaded via [`load_page_directory`]
/// and must map the currently-executing code's address.
pub unsafe fn enable_paging() {
    #[cfg(target_os = "none")]
    // SAFETY: forwarded from the caller's contract.
    unsafe {
        asm!(
            "mov {tmp:e}, cr0",
            "or {tmp:e}, 0x80010000", // PG | WP
            "mov cr0, {tmp:e}",
            tmp = out(reg) _,
            options(nostack, preserves_flags),
        );
    }
}

/// Invalidate a single page's TLB entry.
pub fn invalidate_page(va: VirtAddr) {
    #[cfg(target_os = "none")]
    // SAFETY: `invlpg` only affects TLB state, never memory.
    unsafe {
        asm!("invlpg [{0:e}]", in(reg) va.as_u32(), options(nostack, preserves_flags));
    }
    #[cfg(not(target_os = "none"))]
    let _ = va;
}
