//! Signal delivery: what `timer_tick_frame` does when a task has a
//! pending signal and isn't already inside a handler.
//!
//! There's no user-space binary loader yet, so handler entry is modeled
//! by directly rewriting the live register frame rather than by writing
//! a trampoline onto the user stack: `eip` is set to the handler address,
//! the interrupted frame is stashed in the task's `saved_frame`, and
//! `sigreturn` (see `syscall::signal`) restores it.

use crate::arch::x86::idt::RegisterFrame;

use super::task::{Task, SIG_KILL, SIG_SEGV};

/// Lowest-numbered pending signal, or `None` if `pending == 0`.
fn next_pending(pending: u32) -> Option<u8> {
    if pending == 0 {
        return None;
    }
    Some(pending.trailing_zeros() as u8 + 1)
}

/// Deliver the lowest-numbered pending signal to `task`, rewriting
/// `frame` in place.
///
/// `KILL` and `SEGV` without a registered handler terminate the task
/// unconditionally with exit code `128 + signal`; every other signal
/// without a handler is ignored. A registered handler always runs,
/// including for `KILL`/`SEGV`.
pub fn deliver(task: &mut Task, frame: &mut RegisterFrame) {
    let Some(sig) = next_pending(task.signals.pending) else {
        return;
    };
    task.signals.pending &= !(1 << (sig - 1));

    let handler = task.signals.handlers[(sig - 1) as usize];
    if handler == 0 {
        if sig == SIG_KILL || sig == SIG_SEGV {
            task.state = super::task::TaskState::Zombie;
            task.exit_code = 128 + sig as i32;
        }
        return;
    }

    task.signals.saved_frame = Some(*frame);
    task.signals.in_handler = true;
    frame.eip = handler;
}

/// Restore the frame a handler was entered with. Called from the
/// `sigreturn` syscall.
pub fn return_from_handler(task: &mut Task, frame: &mut RegisterFrame) -> bool {
    if let Some(saved) = task.signals.saved_frame.take() {
        *frame = saved;
        task.signals.in_handler = false;
        true
    } else {
        false
    }
}

/// Set the handler address for `sig` (0 clears it back to default).
pub fn set_handler(task: &mut Task, sig: u8, handler_addr: u32) {
    if sig >= 1 && (sig as usize) <= super::task::NSIG {
        task.signals.handlers[(sig - 1) as usize] = handler_addr;
    }
}

/// OR `sig` into the task's pending mask.
pub fn send(task: &mut Task, sig: u8) {
    if sig >= 1 && (sig as usize) <= super::task::NSIG {
        task.signals.pending |= 1 << (sig - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fs::file::FileTable,
        mm::{vas::VmaTable, PhysAddr},
    };
    use alloc::string::String;

    fn test_task() -> Task {
        Task {
            tid: 10,
            parent_tid: 1,
            name: String::from("test"),
            state: super::super::task::TaskState::Running,
            priority: super::super::task::PriorityClass::Normal,
            killable: true,
            frame: RegisterFrame::default(),
            page_dir: PhysAddr(0),
            vma_table: VmaTable::new(0x1000_0000),
            fd_table: FileTable::new(),
            ticks_remaining: 3,
            sleep_until: 0,
            wait_tid: None,
            signals: super::super::task::SignalState::new(),
            exit_code: 0,
        }
    }

    #[test]
    fn default_kill_terminates_with_128_plus_signal() {
        let mut task = test_task();
        let mut frame = RegisterFrame::default();
        send(&mut task, SIG_KILL);
        deliver(&mut task, &mut frame);
        assert_eq!(task.state, super::super::task::TaskState::Zombie);
        assert_eq!(task.exit_code, 128 + SIG_KILL as i32);
    }

    #[test]
    fn default_usr1_is_ignored() {
        let mut task = test_task();
        let mut frame = RegisterFrame::default();
        send(&mut task, super::super::task::SIG_USR1);
        deliver(&mut task, &mut frame);
        assert_eq!(task.state, super::super::task::TaskState::Running);
        assert_eq!(task.exit_code, 0);
    }

    #[test]
    fn handler_redirects_eip_and_sigreturn_restores() {
        let mut task = test_task();
        let mut frame = RegisterFrame { eip: 0x1000, ..RegisterFrame::default() };
        set_handler(&mut task, super::super::task::SIG_USR1, 0x4000);
        send(&mut task, super::super::task::SIG_USR1);
        deliver(&mut task, &mut frame);
        assert_eq!(frame.eip, 0x4000);
        assert!(task.signals.in_handler);

        assert!(return_from_handler(&mut task, &mut frame));
        assert_eq!(frame.eip, 0x1000);
        assert!(!task.signals.in_handler);
    }
}
