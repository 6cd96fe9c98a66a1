//! Per-frame reference counts for copy-on-write sharing.
//!
//! A dense `u8` table, one entry per frame index — same cardinality as
//! [`super::frame_allocator`]'s bitmap. `inc`/`dec` saturate at 255; a
//! saturated frame is never freed again, trading a leaked page for
//! certainty against use-after-free in a sharing graph with more than
//! 254 holders. `map`/`unmap` in `vmm` are the only intended callers.

use spin::Mutex;

use crate::mm::{frame_allocator::NUM_FRAMES, PhysAddr};

static COUNTS: Mutex<[u8; NUM_FRAMES]> = Mutex::new([0; NUM_FRAMES]);

pub fn init() {
    // Table already zeroed by its `const` initializer; nothing to do, but
    // keep the call site symmetric with the rest of `mm::init`.
}

pub fn inc(phys: PhysAddr) {
    let mut counts = COUNTS.lock();
    let c = &mut counts[phys.frame()];
    *c = c.saturating_add(1);
}

/// Decrement, returning the new value. A saturated (255) counter never
/// decrements, so callers must not infer "now unused" from the return
/// value alone without also checking it was not already saturated.
pub fn dec(phys: PhysAddr) -> u8 {
    let mut counts = COUNTS.lock();
    let c = &mut counts[phys.frame()];
    if *c != 255 {
        *c = c.saturating_sub(1);
    }
    *c
}

pub fn get(phys: PhysAddr) -> u8 {
    COUNTS.lock()[phys.frame()]
}

/// Force a frame's count to exactly one, used when a fresh allocation is
/// about to be mapped for the first time.
pub fn set_to_one(phys: PhysAddr) {
    COUNTS.lock()[phys.frame()] = 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inc_dec_roundtrip() {
        let p = PhysAddr::from_frame(10);
        set_to_one(p);
        inc(p);
        assert_eq!(get(p), 2);
        assert_eq!(dec(p), 1);
        assert_eq!(dec(p), 0);
    }

    #[test]
    fn saturates_and_never_goes_back_down() {
        let p = PhysAddr::from_frame(11);
        set_to_one(p);
        for _ in 0..300 {
            inc(p);
        }
        assert_eq!(get(p), 255);
        assert_eq!(dec(p), 255);
    }
}
