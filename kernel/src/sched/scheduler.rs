//! Tick dispatch: the four-step algorithm the timer interrupt drives.
//!
//! Each task's live register frame lives in a fixed, indexable slot
//! (`FRAME_SLOTS`) rather than behind the task-table lock, so
//! `timer_tick_frame` can hand `isr_common` a pointer to the next
//! task's frame without holding any lock across the return.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use alloc::vec::Vec;
use spin::Mutex;

use super::{
    queue::ReadyQueues,
    task::{PriorityClass, Task, TaskState, MAX_TASKS, TID_IDLE},
};
use crate::{arch::x86::idt::RegisterFrame, mm::page_table};

const ZERO_FRAME: RegisterFrame = RegisterFrame {
    gs: 0,
    fs: 0,
    es: 0,
    ds: 0,
    edi: 0,
    esi: 0,
    ebp: 0,
    esp: 0,
    ebx: 0,
    edx: 0,
    ecx: 0,
    eax: 0,
    int_no: 0,
    err_code: 0,
    eip: 0,
    cs: 0,
    eflags: 0,
    useresp: 0,
    ss: 0,
};

/// Saved register frame per task slot.
///
/// SAFETY: only ever touched from `isr_common`'s call path, which runs
/// with interrupts masked on this single core, so there is never a
/// concurrent reader or writer.
static mut FRAME_SLOTS: [RegisterFrame; MAX_TASKS] = [ZERO_FRAME; MAX_TASKS];

pub static TASKS: Mutex<Vec<Option<Task>>> = Mutex::new(Vec::new());
static READY: Mutex<ReadyQueues> = Mutex::new(ReadyQueues::new());
static CURRENT: AtomicUsize = AtomicUsize::new(TID_IDLE as usize);

/// Monotonic tick counter, separate from `arch::x86::timer::ticks()` so
/// tests can drive it without a PIT.
static SCHED_TICKS: AtomicU64 = AtomicU64::new(0);

pub fn current_slot() -> usize {
    CURRENT.load(Ordering::Relaxed)
}

pub fn frame_slot_mut(slot: usize) -> *mut RegisterFrame {
    // SAFETY: see FRAME_SLOTS's doc comment.
    unsafe { core::ptr::addr_of_mut!(FRAME_SLOTS[slot]) }
}

pub fn set_frame(slot: usize, frame: RegisterFrame) {
    // SAFETY: see FRAME_SLOTS's doc comment.
    unsafe {
        FRAME_SLOTS[slot] = frame;
    }
}

pub fn mark_ready(tasks: &mut [Option<Task>], ready: &mut ReadyQueues, slot: usize) {
    if let Some(task) = tasks[slot].as_mut() {
        task.state = TaskState::Ready;
        ready.push(task.priority, slot);
    }
}

/// Mark the task in `slot` ready and push it onto the scheduler's own
/// ready queues. Used by task-spawning code outside this module, which
/// doesn't hold the `READY` lock directly.
pub fn enqueue_ready(slot: usize) {
    let mut tasks = TASKS.lock();
    let mut ready = READY.lock();
    mark_ready(&mut tasks, &mut ready, slot);
}

fn wake_sleepers(tasks: &mut [Option<Task>], ready: &mut ReadyQueues, now: u64) {
    for (slot, task) in tasks.iter_mut().enumerate() {
        if let Some(t) = task {
            if t.state == TaskState::Sleeping && t.sleep_until <= now {
                t.state = TaskState::Ready;
                ready.push(t.priority, slot);
            }
        }
    }
}

/// The four-step timer-tick dispatch: wake sleepers, deliver a pending
/// signal to the current task if one's due, and otherwise either keep
/// running it or switch to the next ready task.
pub fn timer_tick_frame(frame: *mut RegisterFrame) -> *mut RegisterFrame {
    let now = SCHED_TICKS.fetch_add(1, Ordering::Relaxed) + 1;

    let mut tasks = TASKS.lock();
    let mut ready = READY.lock();

    wake_sleepers(&mut tasks, &mut ready, now);

    let current = current_slot();

    // SAFETY: frame is the live CPU frame for the current task, valid for
    // the duration of this call.
    let live_frame = unsafe { &mut *frame };

    if let Some(task) = tasks[current].as_mut() {
        if task.signals.pending != 0 && !task.signals.in_handler {
            super::signal::deliver(task, live_frame);
        }

        if task.ticks_remaining > 0 {
            task.ticks_remaining -= 1;
        }

        let slice_used = task.ticks_remaining == 0;
        let still_runnable = task.is_runnable();

        if !slice_used && still_runnable {
            return frame;
        }

        set_frame(current, *live_frame);
        if still_runnable {
            task.state = TaskState::Ready;
            ready.push(task.priority, current);
        }
    }

    let next = ready.pop_next().unwrap_or(TID_IDLE as usize);
    if let Some(task) = tasks[next].as_mut() {
        task.state = TaskState::Running;
        task.ticks_remaining = task.priority.slice_ticks();
        // SAFETY: task.page_dir was built by mm::vmm and is always a
        // valid page directory for this task.
        unsafe { page_table::load_page_directory(task.page_dir) };
    }
    CURRENT.store(next, Ordering::Relaxed);
    frame_slot_mut(next)
}

pub fn class_index(p: PriorityClass) -> usize {
    p.index()
}

/// Current value of the tick counter `timer_tick_frame` advances.
pub fn ticks() -> u64 {
    SCHED_TICKS.load(Ordering::Relaxed)
}

/// Pick the next ready task and hand back its frame slot, without
/// touching the current task's state. Shared by [`yield_current`] and
/// [`block_current`], which differ only in what they do to the task
/// being switched away from.
fn switch_to_next(tasks: &mut [Option<Task>], ready: &mut ReadyQueues) -> *mut RegisterFrame {
    let next = ready.pop_next().unwrap_or(TID_IDLE as usize);
    if let Some(task) = tasks[next].as_mut() {
        task.state = TaskState::Running;
        task.ticks_remaining = task.priority.slice_ticks();
        // SAFETY: task.page_dir was built by mm::vmm and is always a
        // valid page directory for this task.
        unsafe { page_table::load_page_directory(task.page_dir) };
    }
    CURRENT.store(next, Ordering::Relaxed);
    frame_slot_mut(next)
}

/// Voluntary `yield`: save the current task's frame, put it back on its
/// class's ready queue, and switch to the next ready task.
pub fn yield_current(frame: *mut RegisterFrame) -> *mut RegisterFrame {
    let mut tasks = TASKS.lock();
    let mut ready = READY.lock();
    let current = current_slot();

    // SAFETY: frame is the live CPU frame for the current task.
    let live_frame = unsafe { &*frame };
    set_frame(current, *live_frame);
    if let Some(task) = tasks[current].as_mut() {
        task.state = TaskState::Ready;
        ready.push(task.priority, current);
    }
    switch_to_next(&mut tasks, &mut ready)
}

/// Suspension point: save the current task's frame, move it to `state`
/// (not re-queued), and switch to the next ready task. Used by `sleep`,
/// blocking pipe/futex/socket reads, and `waitpid`.
pub fn block_current(frame: *mut RegisterFrame, state: TaskState) -> *mut RegisterFrame {
    let mut tasks = TASKS.lock();
    let mut ready = READY.lock();
    let current = current_slot();

    // SAFETY: frame is the live CPU frame for the current task.
    let live_frame = unsafe { &*frame };
    set_frame(current, *live_frame);
    if let Some(task) = tasks[current].as_mut() {
        task.state = state;
    }
    switch_to_next(&mut tasks, &mut ready)
}

/// Wake a specific task blocked on something other than a timed sleep
/// (pipe, futex, socket, `waitpid`). No-op if it isn't blocked.
pub fn wake_tid(tid: u64) {
    let mut tasks = TASKS.lock();
    let mut ready = READY.lock();
    if let Some(slot) = tasks.iter().position(|t| t.as_ref().is_some_and(|t| t.tid == tid)) {
        if tasks[slot].as_ref().is_some_and(|t| t.state == TaskState::Blocked) {
            mark_ready(&mut tasks, &mut ready, slot);
        }
    }
}

/// Terminate the current task with `code`, wake its parent in case it's
/// blocked in `waitpid`, and switch to the next ready task. The zombie
/// stays in the task table until its parent reaps it.
pub fn exit_current(frame: *mut RegisterFrame, code: i32) -> *mut RegisterFrame {
    let mut tasks = TASKS.lock();
    let mut ready = READY.lock();
    let current = current_slot();

    // SAFETY: frame is the live CPU frame for the current task.
    let live_frame = unsafe { &*frame };
    set_frame(current, *live_frame);

    let parent_tid = tasks[current].as_ref().map(|t| t.parent_tid);
    if let Some(task) = tasks[current].as_mut() {
        task.state = TaskState::Zombie;
        task.exit_code = code;
    }

    if let Some(parent) = parent_tid {
        if let Some(slot) = tasks.iter().position(|t| t.as_ref().is_some_and(|t| t.tid == parent)) {
            if tasks[slot].as_ref().is_some_and(|t| t.state == TaskState::Blocked) {
                mark_ready(&mut tasks, &mut ready, slot);
            }
        }
    }

    switch_to_next(&mut tasks, &mut ready)
}

/// Reap one zombie child of `parent_tid` (a specific `child_tid`, or any
/// child if `None`), freeing its task slot. Returns `(tid, exit_code)`.
pub fn reap_zombie_child(parent_tid: u64, child_tid: Option<u64>) -> Option<(u64, i32)> {
    let mut tasks = TASKS.lock();
    let slot = tasks.iter().position(|t| {
        t.as_ref().is_some_and(|t| {
            t.parent_tid == parent_tid
                && t.state == TaskState::Zombie
                && match child_tid {
                    Some(tid) => tid == t.tid,
                    None => true,
                }
        })
    })?;
    let task = tasks[slot].take()?;
    Some((task.tid, task.exit_code))
}

/// Whether `parent_tid` has any live (non-zombie) child, used by
/// `waitpid` to distinguish "no such child" from "not exited yet".
pub fn has_live_child(parent_tid: u64, child_tid: Option<u64>) -> bool {
    let tasks = TASKS.lock();
    tasks.iter().any(|t| {
        t.as_ref().is_some_and(|t| {
            t.parent_tid == parent_tid
                && t.state != TaskState::Zombie
                && match child_tid {
                    Some(tid) => tid == t.tid,
                    None => true,
                }
        })
    })
}
