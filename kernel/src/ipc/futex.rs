//! Futex wait/wake: the primitive userspace mutexes and condvars are
//! built on. `wait` checks `*addr == expected` and blocks atomically
//! with respect to a concurrent `wake` on the same address; `wake`
//! unblocks up to `n` waiters.
//!
//! The check-and-block step runs with interrupts off so no timer tick
//! can reschedule us between reading `*addr` and registering the wait
//! slot — otherwise a `wake` landing in that gap would be missed and
//! the waiter would sleep forever.

use spin::Mutex;

use crate::{arch::x86::idt::RegisterFrame, irq, sched};

const MAX_WAITERS: usize = 32;

#[derive(Clone, Copy)]
struct Waiter {
    addr: u32,
    tid: u64,
}

static WAITERS: Mutex<[Option<Waiter>; MAX_WAITERS]> = Mutex::new([None; MAX_WAITERS]);

/// SAFETY: `addr` must point at a live, properly aligned `u32` the
/// caller is allowed to read (validated against the calling task's VMA
/// table by the syscall layer before this is reached).
unsafe fn load(addr: u32) -> u32 {
    core::ptr::read_volatile(addr as *const u32)
}

/// Atomically check `*addr == expected` and, if so, block the current
/// task. Returns the frame to resume on (either the blocked task, once
/// woken, or whichever task the scheduler switches to). Returns
/// `Err(WouldBlock)`-shaped semantics via the `bool`: `false` means the
/// value had already changed and the caller did not block.
///
/// # Safety
/// `addr` must be a validated, live pointer as described on [`load`].
pub unsafe fn wait(frame: *mut RegisterFrame, addr: u32, expected: u32) -> (bool, *mut RegisterFrame) {
    let tid = sched::current_tid();

    let blocked = irq::without_interrupts(|| {
        if load(addr) != expected {
            return false;
        }
        let mut waiters = WAITERS.lock();
        match waiters.iter().position(Option::is_none) {
            Some(slot) => {
                waiters[slot] = Some(Waiter { addr, tid });
                true
            }
            // No free wait slot: treat like a spurious wakeup rather than
            // silently dropping the wait.
            None => false,
        }
    });

    if !blocked {
        return (false, frame);
    }

    (true, sched::block_current(frame, sched::TaskState::Blocked))
}

/// Wake up to `n` tids waiting on `addr`. Returns how many were woken.
pub fn wake(addr: u32, n: u32) -> u32 {
    let mut woken = 0;
    irq::without_interrupts(|| {
        let mut waiters = WAITERS.lock();
        for slot in waiters.iter_mut() {
            if woken >= n {
                break;
            }
            if slot.is_some_and(|w| w.addr == addr) {
                let tid = slot.take().unwrap().tid;
                sched::wake_tid(tid);
                woken += 1;
            }
        }
    });
    woken
}

/// Drop any wait registration the given tid holds, e.g. because the
/// task exited while still parked in `wait`.
pub fn clear_waiter(tid: u64) {
    let mut waiters = WAITERS.lock();
    for slot in waiters.iter_mut() {
        if slot.is_some_and(|w| w.tid == tid) {
            *slot = None;
        }
    }
}

#[cfg(test)]
pub fn reset_for_test() {
    let mut waiters = WAITERS.lock();
    for slot in waiters.iter_mut() {
        *slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_with_no_waiters_wakes_nothing() {
        reset_for_test();
        assert_eq!(wake(0x1000, 1), 0);
    }
}
