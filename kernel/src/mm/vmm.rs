//! Page-directory lifecycle: kernel identity map, per-task user
//! directories, mapping/unmapping, guard pages, and copy-on-write.

use spin::Mutex;

use crate::error::KernelError;
use crate::mm::frame_allocator;
use crate::mm::page_table::{self, PteFlags, Table};
use crate::mm::{frame_refcount, PhysAddr, VirtAddr, FRAME_SIZE};

/// Frames identity-mapped by the kernel page directory — matches the
/// frame allocator's full span, so "kernel-visible" and "allocatable"
/// never disagree.
const IDENTITY_MAP_FRAMES: usize = frame_allocator::NUM_FRAMES;
const IDENTITY_MAP_TABLES: usize = IDENTITY_MAP_FRAMES / page_table::ENTRIES_PER_TABLE;

static KERNEL_PD_PHYS: Mutex<Option<PhysAddr>> = Mutex::new(None);

/// Build the kernel page directory, identity-mapping all frames the
/// allocator tracks, and switch the CPU into paged mode. Called once
/// during boot, before the heap (or anything else that allocates) exists.
///
/// # Safety
/// Must run exactly once, with interrupts disabled, before any other code
/// relies on a stable virtual-to-physical mapping.
pub unsafe fn init_kernel_pagedir() {
    let pd_phys = frame_allocator::alloc().expect("frame for kernel page directory");
    // SAFETY: paging is not active yet, so every physical address is
    // directly addressable as itself.
    let pd = unsafe { page_table::table_at(pd_phys) };
    *pd = Table::empty();

    for table_idx in 0..IDENTITY_MAP_TABLES {
        let pt_phys = frame_allocator::alloc().expect("frame for identity-map page table");
        // SAFETY: see above.
        let pt = unsafe { page_table::table_at(pt_phys) };
        *pt = Table::empty();
        for entry in 0..page_table::ENTRIES_PER_TABLE {
            let frame = table_idx * page_table::ENTRIES_PER_TABLE + entry;
            pt.set_entry(
                entry,
                PhysAddr::from_frame(frame),
                PteFlags::PRESENT | PteFlags::WRITABLE,
            );
        }
        pd.set_entry(table_idx, pt_phys, PteFlags::PRESENT | PteFlags::WRITABLE);
    }

    // SAFETY: `pd` was just built and identity-maps the code currently
    // executing (it lives within the first 256 MiB).
    unsafe {
        page_table::load_page_directory(pd_phys);
        page_table::enable_paging();
    }
    *KERNEL_PD_PHYS.lock() = Some(pd_phys);
}

pub fn kernel_pagedir() -> PhysAddr {
    KERNEL_PD_PHYS.lock().expect("kernel page directory not initialized")
}

/// Clone the kernel's upper-half PDEs into a fresh page directory for a
/// new task, leaving the lower (user) half empty.
pub fn create_user_pagedir() -> Result<PhysAddr, KernelError> {
    let pd_phys = frame_allocator::try_alloc()?;
    // SAFETY: the kernel identity map covers every allocatable frame.
    let pd = unsafe { page_table::table_at(pd_phys) };
    *pd = Table::empty();

    let kernel_pd = unsafe { page_table::table_at(kernel_pagedir()) };
    let user_pde_limit = (crate::mm::USER_SPACE_BASE as usize) / (FRAME_SIZE * page_table::ENTRIES_PER_TABLE);
    for idx in user_pde_limit..page_table::ENTRIES_PER_TABLE {
        pd.entries[idx] = kernel_pd.entries[idx];
    }
    Ok(pd_phys)
}

/// Map one page into `pd` at `va`, allocating a page table if the
/// covering PDE is empty. Returns the physical address of the page table
/// used, so the caller can track it for later teardown.
pub fn map_user_page(
    pd: PhysAddr,
    va: VirtAddr,
    pa: PhysAddr,
    flags: PteFlags,
) -> Result<PhysAddr, KernelError> {
    // SAFETY: `pd` is a live user page directory owned by the caller.
    let table = unsafe { page_table::table_at(pd) };
    let pd_index = va.pd_index();

    let pt_phys = if table.entry_flags(pd_index).contains(PteFlags::PRESENT) {
        table.entry_addr(pd_index)
    } else {
        let new_pt = frame_allocator::try_alloc()?;
        // SAFETY: freshly allocated frame, not yet aliased.
        let pt = unsafe { page_table::table_at(new_pt) };
        *pt = Table::empty();
        table.set_entry(
            pd_index,
            new_pt,
            PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER,
        );
        new_pt
    };

    // SAFETY: `pt_phys` was just created or already lived inside `pd`.
    let pt = unsafe { page_table::table_at(pt_phys) };
    pt.set_entry(va.pt_index(), pa, flags);
    page_table::invalidate_page(va);
    Ok(pt_phys)
}

/// Remove the mapping at `va` from `pd`, without freeing the underlying
/// frame (callers decide that based on refcount).
pub fn unmap_user_page(pd: PhysAddr, va: VirtAddr) {
    // SAFETY: `pd` is a live page directory owned by the caller.
    let table = unsafe { page_table::table_at(pd) };
    let pd_index = va.pd_index();
    if !table.entry_flags(pd_index).contains(PteFlags::PRESENT) {
        return;
    }
    let pt_phys = table.entry_addr(pd_index);
    // SAFETY: see above.
    let pt = unsafe { page_table::table_at(pt_phys) };
    pt.clear_entry(va.pt_index());
    page_table::invalidate_page(va);
}

/// Replace the not-present page at `va` with one carrying [`PteFlags::GUARD`].
pub fn set_guard_page(pd: PhysAddr, va: VirtAddr) -> Result<(), KernelError> {
    map_user_page(pd, va, PhysAddr::new(0), PteFlags::GUARD).map(|_| ())
}

/// If the faulting page is a guard page, arm it (clear GUARD, set
/// PRESENT+WRITABLE+USER backed by a freshly allocated zeroed frame) and
/// report that the faulting instruction should be retried.
pub fn check_guard_page(pd: PhysAddr, va: VirtAddr) -> Result<bool, KernelError> {
    // SAFETY: `pd` is a live page directory owned by the caller.
    let table = unsafe { page_table::table_at(pd) };
    let pd_index = va.pd_index();
    if !table.entry_flags(pd_index).contains(PteFlags::PRESENT) {
        return Ok(false);
    }
    let pt_phys = table.entry_addr(pd_index);
    // SAFETY: see above.
    let pt = unsafe { page_table::table_at(pt_phys) };
    if !pt.entry_flags(va.pt_index()).contains(PteFlags::GUARD) {
        return Ok(false);
    }
    let frame = frame_allocator::try_alloc()?;
    frame_refcount::set_to_one(frame);
    zero_frame(frame);
    pt.set_entry(
        va.pt_index(),
        frame,
        PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER,
    );
    page_table::invalidate_page(va);
    Ok(true)
}

/// Make every present, user, writable page in `pd` read-only and COW,
/// incrementing each underlying frame's refcount — the fork-time half of
/// copy-on-write. Intended to run on both parent and child directories
/// (the child's having just been built by [`clone_user_pagedir`]).
pub fn mark_cow(pd: PhysAddr) {
    // SAFETY: `pd` is a live page directory owned by the caller.
    let table = unsafe { page_table::table_at(pd) };
    let user_pde_limit = (crate::mm::USER_SPACE_BASE as usize) / (FRAME_SIZE * page_table::ENTRIES_PER_TABLE);
    for pd_index in 0..user_pde_limit {
        if !table.entry_flags(pd_index).contains(PteFlags::PRESENT) {
            continue;
        }
        let pt_phys = table.entry_addr(pd_index);
        // SAFETY: every present PDE under user_pde_limit points at a
        // page table this module allocated.
        let pt = unsafe { page_table::table_at(pt_phys) };
        for i in 0..page_table::ENTRIES_PER_TABLE {
            let flags = pt.entry_flags(i);
            if !flags.contains(PteFlags::PRESENT) || !flags.contains(PteFlags::WRITABLE) {
                continue;
            }
            let frame = pt.entry_addr(i);
            frame_refcount::inc(frame);
            pt.set_entry(
                i,
                frame,
                (flags - PteFlags::WRITABLE) | PteFlags::COW,
            );
        }
    }
}

/// Build a new user page directory that is a structural copy of `src`:
/// every present user PTE is duplicated (same underlying frame) so the
/// caller can mark both directories COW afterward.
pub fn clone_user_pagedir(src: PhysAddr) -> Result<PhysAddr, KernelError> {
    let dst = create_user_pagedir()?;
    // SAFETY: both are live page directories; `src` is the caller's,
    // `dst` was just allocated by `create_user_pagedir`.
    let src_table = unsafe { page_table::table_at(src) };
    let dst_table = unsafe { page_table::table_at(dst) };
    let user_pde_limit = (crate::mm::USER_SPACE_BASE as usize) / (FRAME_SIZE * page_table::ENTRIES_PER_TABLE);

    for pd_index in 0..user_pde_limit {
        if !src_table.entry_flags(pd_index).contains(PteFlags::PRESENT) {
            continue;
        }
        let src_pt_phys = src_table.entry_addr(pd_index);
        let dst_pt_phys = frame_allocator::try_alloc()?;
        // SAFETY: `src_pt_phys` is live; `dst_pt_phys` freshly allocated.
        let src_pt = unsafe { page_table::table_at(src_pt_phys) };
        let dst_pt = unsafe { page_table::table_at(dst_pt_phys) };
        *dst_pt = Table::empty();
        dst_pt.entries.copy_from_slice(&src_pt.entries);
        dst_table.set_entry(
            pd_index,
            dst_pt_phys,
            PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER,
        );
    }
    Ok(dst)
}

/// Handle a write fault on a COW page: allocate a fresh frame, copy the
/// shared page's contents, install it writable in `pd`, and drop the
/// shared frame's refcount.
pub fn handle_cow_fault(pd: PhysAddr, va: VirtAddr) -> Result<bool, KernelError> {
    // SAFETY: `pd` is a live page directory owned by the caller.
    let table = unsafe { page_table::table_at(pd) };
    let pd_index = va.pd_index();
    if !table.entry_flags(pd_index).contains(PteFlags::PRESENT) {
        return Ok(false);
    }
    let pt_phys = table.entry_addr(pd_index);
    // SAFETY: see above.
    let pt = unsafe { page_table::table_at(pt_phys) };
    let flags = pt.entry_flags(va.pt_index());
    if !flags.contains(PteFlags::COW) {
        return Ok(false);
    }
    let old_frame = pt.entry_addr(va.pt_index());
    let new_frame = frame_allocator::try_alloc()?;
    frame_refcount::set_to_one(new_frame);
    // SAFETY: both frames are identity-mapped and 4 KiB, non-overlapping.
    unsafe {
        core::ptr::copy_nonoverlapping(
            old_frame.as_u32() as *const u8,
            new_frame.as_u32() as *mut u8,
            FRAME_SIZE,
        );
    }
    pt.set_entry(
        va.pt_index(),
        new_frame,
        PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER,
    );
    page_table::invalidate_page(va);
    if frame_refcount::dec(old_frame) == 0 {
        frame_allocator::free(old_frame);
    }
    Ok(true)
}

/// Tear down a user page directory: decrement the refcount of every
/// mapped frame (freeing it when it reaches zero), free every page
/// table, then free the directory itself.
pub fn destroy_user_pagedir(pd: PhysAddr) {
    // SAFETY: `pd` is a live page directory the caller owns exclusively
    // and is discarding.
    let table = unsafe { page_table::table_at(pd) };
    let user_pde_limit = (crate::mm::USER_SPACE_BASE as usize) / (FRAME_SIZE * page_table::ENTRIES_PER_TABLE);
    for pd_index in 0..user_pde_limit {
        if !table.entry_flags(pd_index).contains(PteFlags::PRESENT) {
            continue;
        }
        let pt_phys = table.entry_addr(pd_index);
        // SAFETY: see above.
        let pt = unsafe { page_table::table_at(pt_phys) };
        for i in 0..page_table::ENTRIES_PER_TABLE {
            let flags = pt.entry_flags(i);
            if !flags.contains(PteFlags::PRESENT) {
                continue;
            }
            let frame = pt.entry_addr(i);
            if frame_refcount::dec(frame) == 0 {
                frame_allocator::free(frame);
            }
        }
        frame_allocator::free(pt_phys);
    }
    frame_allocator::free(pd);
}

fn zero_frame(phys: PhysAddr) {
    // SAFETY: `phys` was just allocated and is identity-mapped.
    unsafe {
        core::ptr::write_bytes(phys.as_u32() as *mut u8, 0, FRAME_SIZE);
    }
}
