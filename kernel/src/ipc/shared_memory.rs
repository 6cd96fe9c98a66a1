//! Named shared memory regions: `create` is idempotent on name, `attach`
//! maps a region into a task's page directory at a deterministic address
//! derived from its id, `detach` reverses this and frees the backing
//! frames once the last task has let go.

use alloc::string::String;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::{
    error::KernelError,
    mm::{
        frame_allocator, frame_refcount,
        page_table::PteFlags,
        vmm, PhysAddr, VirtAddr, FRAME_SIZE,
    },
};

pub const SHM_MAX_REGIONS: usize = 16;
pub const SHM_MAX_PAGES: usize = 16;
pub const SHM_MAX_SIZE: usize = SHM_MAX_PAGES * FRAME_SIZE;
pub const SHM_BASE: u32 = 0x4001_0000;

struct Region {
    name: String,
    pages: [Option<PhysAddr>; SHM_MAX_PAGES],
    num_pages: usize,
    refcount: u32,
}

lazy_static! {
    static ref REGIONS: Mutex<[Option<Region>; SHM_MAX_REGIONS]> =
        Mutex::new(core::array::from_fn(|_| None));
}

fn region_base(id: usize) -> u32 {
    SHM_BASE + (id as u32) * (SHM_MAX_SIZE as u32)
}

/// Create a region of `size` bytes (rounded up to a whole number of
/// pages, capped at [`SHM_MAX_PAGES`]). An existing region with the same
/// name returns its id instead of creating a duplicate.
pub fn create(name: &str, size: usize) -> Result<usize, KernelError> {
    let mut regions = REGIONS.lock();

    if let Some(id) = regions.iter().position(|r| r.as_ref().is_some_and(|r| r.name == name)) {
        return Ok(id);
    }

    let num_pages = size.div_ceil(FRAME_SIZE).max(1);
    if num_pages > SHM_MAX_PAGES {
        return Err(KernelError::InvalidArgument { name: "size", value: "exceeds SHM_MAX_PAGES" });
    }

    let slot = regions
        .iter()
        .position(|r| r.is_none())
        .ok_or(KernelError::ResourceExhausted { resource: "shm_region" })?;

    let mut pages = [None; SHM_MAX_PAGES];
    for page in pages.iter_mut().take(num_pages) {
        let frame = frame_allocator::try_alloc()?;
        frame_refcount::set_to_one(frame);
        *page = Some(frame);
    }

    regions[slot] = Some(Region { name: String::from(name), pages, num_pages, refcount: 0 });
    Ok(slot)
}

/// Map region `id` into `pd` at its deterministic base address and bump
/// its refcount. Returns the virtual base the task should record.
pub fn attach(id: usize, pd: PhysAddr) -> Result<u32, KernelError> {
    let mut regions = REGIONS.lock();
    let region = regions
        .get_mut(id)
        .and_then(Option::as_mut)
        .ok_or(KernelError::NotFound { resource: "shm_region", id: id as u64 })?;

    let base = region_base(id);
    for i in 0..region.num_pages {
        let frame = region.pages[i].expect("num_pages frames are always populated");
        let va = VirtAddr::new(base + (i as u32) * FRAME_SIZE as u32);
        vmm::map_user_page(pd, va, frame, PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER)?;
    }
    region.refcount += 1;
    Ok(base)
}

/// Unmap region `id` from `pd`. When the last attachment is released,
/// every backing frame's refcount is dropped and freed if it reaches 0.
pub fn detach(id: usize, pd: PhysAddr) -> Result<(), KernelError> {
    let mut regions = REGIONS.lock();
    let region = regions
        .get_mut(id)
        .and_then(Option::as_mut)
        .ok_or(KernelError::NotFound { resource: "shm_region", id: id as u64 })?;

    let base = region_base(id);
    for i in 0..region.num_pages {
        let va = VirtAddr::new(base + (i as u32) * FRAME_SIZE as u32);
        vmm::unmap_user_page(pd, va);
    }
    region.refcount = region.refcount.saturating_sub(1);

    if region.refcount == 0 {
        for i in 0..region.num_pages {
            if let Some(frame) = region.pages[i] {
                if frame_refcount::dec(frame) == 0 {
                    frame_allocator::free(frame);
                }
            }
        }
        regions[id] = None;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_idempotent_on_name() {
        let id_a = create("frame-buffer", FRAME_SIZE).unwrap();
        let id_b = create("frame-buffer", FRAME_SIZE).unwrap();
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn region_base_is_deterministic_per_id() {
        assert_eq!(region_base(0), SHM_BASE);
        assert_eq!(region_base(1), SHM_BASE + SHM_MAX_SIZE as u32);
    }

    #[test]
    fn oversized_request_is_rejected() {
        let name = "too-big";
        assert!(create(name, (SHM_MAX_PAGES + 1) * FRAME_SIZE).is_err());
    }
}
