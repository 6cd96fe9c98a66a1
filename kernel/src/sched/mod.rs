//! Preemptive priority scheduler: four priority classes, round-robin
//! within a class, tasks switched by handing the interrupt trampoline a
//! different register frame to restore (see [`scheduler`] and
//! `arch::x86::context`).

pub mod queue;
pub mod scheduler;
pub mod signal;
pub mod task;

use alloc::{boxed::Box, string::String};

use crate::{
    arch::x86::{context, idt::RegisterFrame},
    error::KernelError,
    mm::{self, vmm, PhysAddr},
};

pub use scheduler::{
    block_current, exit_current, has_live_child, reap_zombie_child, ticks, timer_tick_frame,
    wake_tid, yield_current,
};
pub use task::{PriorityClass, Task, TaskState, MAX_TASKS, TID_IDLE};

/// Kernel-task stacks are carved out of a static pool at spawn time and
/// leaked for the task's lifetime; ImposOS has no kernel stack reclamation
/// yet (tasks only ever exit by becoming zombies, not by being freed).
const KERNEL_STACK_SIZE: usize = 16 * 1024;

fn leak_kernel_stack() -> u32 {
    let stack: &'static mut [u8] =
        Box::leak(alloc::vec![0u8; KERNEL_STACK_SIZE].into_boxed_slice());
    stack.as_ptr() as u32 + stack.len() as u32
}

/// Build the idle task (tid 0) and seed the task table with it. Must run
/// after `mm::init` (needs the kernel page directory) and before the
/// timer is unmasked.
pub fn init() {
    crate::println!("[SCHED] Initializing scheduler...");

    let stack_top = leak_kernel_stack();
    let frame = context::new_kernel_frame(idle_entry as usize as u32, stack_top);

    let idle = Task::new(
        TID_IDLE,
        TID_IDLE,
        String::from("idle"),
        PriorityClass::Idle,
        frame,
        vmm::kernel_pagedir(),
        mm::USER_SPACE_BASE,
    );

    let mut tasks = scheduler::TASKS.lock();
    tasks.push(Some(idle));
    scheduler::set_frame(0, frame);
    drop(tasks);

    crate::println!("[SCHED] Scheduler initialized");
}

extern "C" fn idle_entry() -> ! {
    crate::arch::x86::idle()
}

/// Enter the scheduler's idle loop. Actual task switching happens inside
/// the timer interrupt handler; this just parks the boot CPU once the
/// first tick has taken over.
pub fn run() -> ! {
    crate::println!("[SCHED] Entering scheduler main loop");
    crate::arch::x86::idle()
}

/// tid of the task the timer last switched to.
pub fn current_tid() -> u64 {
    let tasks = scheduler::TASKS.lock();
    tasks[scheduler::current_slot()].as_ref().map(|t| t.tid).unwrap_or(TID_IDLE)
}

/// Page directory of the currently running task, for `mm::page_fault` to
/// consult when resolving a fault against the right address space.
pub fn current_page_dir() -> PhysAddr {
    let tasks = scheduler::TASKS.lock();
    tasks[scheduler::current_slot()]
        .as_ref()
        .map(|t| t.page_dir)
        .unwrap_or_else(vmm::kernel_pagedir)
}

/// Spawn a new kernel-mode task and mark it ready. Returns its tid.
pub fn spawn_kernel_task(
    name: &str,
    entry: extern "C" fn() -> !,
    priority: PriorityClass,
) -> Result<u64, KernelError> {
    let stack_top = leak_kernel_stack();
    let frame = context::new_kernel_frame(entry as usize as u32, stack_top);

    let slot = {
        let mut tasks = scheduler::TASKS.lock();
        let slot = tasks.iter().position(Option::is_none).unwrap_or(tasks.len());
        if slot >= MAX_TASKS {
            return Err(KernelError::ResourceExhausted { resource: "task_table" });
        }

        let tid = slot as u64;
        let task = Task::new(
            tid,
            TID_IDLE,
            String::from(name),
            priority,
            frame,
            vmm::kernel_pagedir(),
            mm::USER_SPACE_BASE,
        );

        if slot == tasks.len() {
            tasks.push(Some(task));
        } else {
            tasks[slot] = Some(task);
        }
        scheduler::set_frame(slot, frame);
        slot
    };

    scheduler::enqueue_ready(slot);
    Ok(slot as u64)
}

/// OR `sig` into `tid`'s pending signal mask.
pub fn send_signal(tid: u64, sig: u8) -> Result<(), KernelError> {
    let mut tasks = scheduler::TASKS.lock();
    let task = tasks
        .get_mut(tid as usize)
        .and_then(Option::as_mut)
        .ok_or(KernelError::ThreadNotFound { tid })?;
    signal::send(task, sig);
    Ok(())
}

/// Register a handler address for `sig` on `tid` (0 restores default).
pub fn set_signal_handler(tid: u64, sig: u8, handler_addr: u32) -> Result<(), KernelError> {
    let mut tasks = scheduler::TASKS.lock();
    let task = tasks
        .get_mut(tid as usize)
        .and_then(Option::as_mut)
        .ok_or(KernelError::ThreadNotFound { tid })?;
    signal::set_handler(task, sig, handler_addr);
    Ok(())
}

/// Run `f` against the currently running task's control block. `None` if
/// the current slot is somehow empty (never true once `init` has run).
pub fn with_current_task<R>(f: impl FnOnce(&mut Task) -> R) -> Option<R> {
    let mut tasks = scheduler::TASKS.lock();
    let slot = scheduler::current_slot();
    tasks.get_mut(slot).and_then(Option::as_mut).map(f)
}

/// Put the current task to sleep until tick `wake_at`, then reschedule.
pub fn sleep_current(frame: *mut RegisterFrame, wake_at: u64) -> *mut RegisterFrame {
    with_current_task(|task| task.sleep_until = wake_at);
    scheduler::block_current(frame, TaskState::Sleeping)
}

/// Restore the frame saved at signal-delivery time for the current task.
/// Returns `false` if it wasn't in a handler.
pub fn sigreturn_current(frame: &mut RegisterFrame) -> bool {
    let mut tasks = scheduler::TASKS.lock();
    let slot = scheduler::current_slot();
    match tasks.get_mut(slot).and_then(Option::as_mut) {
        Some(task) => signal::return_from_handler(task, frame),
        None => false,
    }
}
