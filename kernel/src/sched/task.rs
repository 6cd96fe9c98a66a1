//! Task control block: the per-task state the scheduler switches
//! between and the signal/fd tables syscalls operate on.

use alloc::string::String;

use crate::{
    arch::x86::idt::RegisterFrame,
    fs::file::FileTable,
    mm::{vas::VmaTable, PhysAddr},
};

/// Upper bound on live tasks. Four slots are reserved for the core
/// system tasks; the rest are available to `spawn`.
pub const MAX_TASKS: usize = 64;

pub const TID_IDLE: u64 = 0;
pub const TID_KERNEL: u64 = 1;
pub const TID_WM: u64 = 2;
pub const TID_SHELL: u64 = 3;

/// Number of distinct signal numbers (`INT, ILL, FPE, SEGV, KILL, PIPE,
/// TERM, USR1, USR2, BUS`), numbered 1..=10.
pub const NSIG: usize = 10;

pub const SIG_INT: u8 = 1;
pub const SIG_ILL: u8 = 2;
pub const SIG_FPE: u8 = 3;
pub const SIG_SEGV: u8 = 4;
pub const SIG_KILL: u8 = 5;
pub const SIG_PIPE: u8 = 6;
pub const SIG_TERM: u8 = 7;
pub const SIG_USR1: u8 = 8;
pub const SIG_USR2: u8 = 9;
pub const SIG_BUS: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Unused,
    Ready,
    Running,
    Sleeping,
    /// Blocked on a pipe, futex, socket read, or `waitpid`.
    Blocked,
    Zombie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PriorityClass {
    Idle = 0,
    Background = 1,
    Normal = 2,
    Realtime = 3,
}

impl PriorityClass {
    /// Time slice in timer ticks for this class (scheduler dispatch
    /// contract: idle/background/normal/realtime get 12/6/3/1 ticks).
    pub const fn slice_ticks(self) -> u32 {
        match self {
            PriorityClass::Idle => 12,
            PriorityClass::Background => 6,
            PriorityClass::Normal => 3,
            PriorityClass::Realtime => 1,
        }
    }

    pub const COUNT: usize = 4;

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn from_index(i: usize) -> Self {
        match i {
            0 => PriorityClass::Idle,
            1 => PriorityClass::Background,
            2 => PriorityClass::Normal,
            _ => PriorityClass::Realtime,
        }
    }
}

/// Per-task signal handler table and pending state.
pub struct SignalState {
    /// Index `sig - 1` holds the user-mode handler address, or 0 for
    /// "default action".
    pub handlers: [u32; NSIG],
    pub pending: u32,
    pub in_handler: bool,
    /// Frame saved at signal-delivery time, restored by `sigreturn`.
    pub saved_frame: Option<RegisterFrame>,
}

impl SignalState {
    pub const fn new() -> Self {
        Self {
            handlers: [0; NSIG],
            pending: 0,
            in_handler: false,
            saved_frame: None,
        }
    }
}

pub struct Task {
    pub tid: u64,
    pub parent_tid: u64,
    pub name: String,
    pub state: TaskState,
    pub priority: PriorityClass,
    pub killable: bool,

    /// Owned register frame; the scheduler swaps tasks by handing
    /// `isr_common` a different task's `&mut frame` to restore from,
    /// not by switching kernel stacks.
    pub frame: RegisterFrame,
    pub page_dir: PhysAddr,
    pub vma_table: VmaTable,
    pub fd_table: FileTable,

    /// Ticks left in the current time slice.
    pub ticks_remaining: u32,
    /// Absolute tick count at which a sleeping task becomes ready.
    pub sleep_until: u64,
    /// Tid this task is blocked in `waitpid` on (`None` == any child).
    pub wait_tid: Option<u64>,

    pub signals: SignalState,
    pub exit_code: i32,
}

impl Task {
    pub fn new(
        tid: u64,
        parent_tid: u64,
        name: String,
        priority: PriorityClass,
        frame: RegisterFrame,
        page_dir: PhysAddr,
        mmap_base: u32,
    ) -> Self {
        Self {
            tid,
            parent_tid,
            name,
            state: TaskState::Ready,
            priority,
            killable: true,
            frame,
            page_dir,
            vma_table: VmaTable::new(mmap_base),
            fd_table: FileTable::new(),
            ticks_remaining: priority.slice_ticks(),
            sleep_until: 0,
            wait_tid: None,
            signals: SignalState::new(),
            exit_code: 0,
        }
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running)
    }
}
