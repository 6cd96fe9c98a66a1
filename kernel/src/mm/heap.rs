//! Kernel heap init.
//!
//! The global allocator (`linked_list_allocator::LockedHeap`, wired up in
//! `lib.rs`) needs one `init` call pointing it at a backing region before
//! the first `alloc`. That region is carved out of the same 16 MiB
//! reservation `frame_allocator::init` marks used right after the low
//! 1 MiB — the two numbers are the same constant so they cannot drift
//! apart.

#[cfg(target_os = "none")]
use crate::get_allocator;

/// Size of the region handed to the global allocator.
pub const HEAP_SIZE: usize = 16 * 1024 * 1024;

#[cfg(target_os = "none")]
extern "C" {
    static _heap_start: u8;
}

/// Initialize the kernel heap backing the global allocator.
///
/// # Errors
/// Never fails on the real target; the `Result` return matches the
/// teacher's convention of surfacing allocator setup failures rather than
/// panicking inside `mm::init`.
pub fn init() -> Result<(), &'static str> {
    #[cfg(target_os = "none")]
    {
        // SAFETY: `_heap_start` is the linker-provided end of the kernel
        // image; the identically-sized reservation in `frame_allocator`
        // guarantees nothing else claims these frames.
        let start = unsafe { &_heap_start as *const u8 as usize };
        // SAFETY: called exactly once, before any allocation is attempted,
        // over a region this module exclusively owns per the reservation
        // above.
        unsafe {
            get_allocator().lock().init(start as *mut u8, HEAP_SIZE);
        }
    }
    Ok(())
}
