//! The one syscall gate (`int 0x80`) ImposOS exposes to tasks: register
//! convention is `eax` = syscall number, `ebx, ecx, edx, esi, edi` = up
//! to five arguments, return value in `eax` (a Linux-style negative
//! errno on failure).
//!
//! Blocking syscalls (`sleep`, a pipe/futex read or write that can't
//! complete yet, `waitpid` on a still-live child) don't keep a
//! continuation around: they rewind `eip` back onto the `int 0x80`
//! instruction before handing off to the scheduler, so the task simply
//! re-traps into this same dispatcher and retries the call from
//! scratch once it's woken. This needs no saved syscall state, at the
//! cost of redoing the non-blocking part of the call on every wakeup.

use alloc::sync::Arc;

use crate::{
    arch::x86::idt::RegisterFrame,
    error::KernelError,
    fs::{self, file::OpenFlags, VfsNode},
    ipc::{futex, pipe, shared_memory},
    mm::{vas::VmaFlags, VirtAddr},
    sched::{self, task::SIG_PIPE, TaskState},
};

/// `int 0x80` is two bytes (`CD 80`); rewinding `eip` by this much makes
/// a woken task re-execute the trap instead of resuming past it.
const SYSCALL_INSN_LEN: u32 = 2;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syscall {
    Exit = 1,
    Yield = 2,
    Sleep = 3,
    GetPid = 4,
    Read = 5,
    Write = 6,
    Open = 7,
    Close = 8,
    Pipe = 9,
    Kill = 10,
    SigAction = 11,
    SigReturn = 12,
    ShmCreate = 13,
    ShmAttach = 14,
    ShmDetach = 15,
    Futex = 16,
    WaitPid = 17,
}

impl TryFrom<u32> for Syscall {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, ()> {
        Ok(match value {
            1 => Self::Exit,
            2 => Self::Yield,
            3 => Self::Sleep,
            4 => Self::GetPid,
            5 => Self::Read,
            6 => Self::Write,
            7 => Self::Open,
            8 => Self::Close,
            9 => Self::Pipe,
            10 => Self::Kill,
            11 => Self::SigAction,
            12 => Self::SigReturn,
            13 => Self::ShmCreate,
            14 => Self::ShmAttach,
            15 => Self::ShmDetach,
            16 => Self::Futex,
            17 => Self::WaitPid,
            _ => return Err(()),
        })
    }
}

fn errno_of(err: KernelError) -> i32 {
    match err {
        KernelError::NotFound { .. } | KernelError::ProcessNotFound { .. } | KernelError::ThreadNotFound { .. } => 2, // ENOENT
        KernelError::PermissionDenied { .. } => 13, // EACCES
        KernelError::ResourceExhausted { .. } | KernelError::OutOfMemory { .. } => 12, // ENOMEM
        KernelError::AlreadyExists { .. } => 17, // EEXIST
        KernelError::InvalidArgument { .. } | KernelError::InvalidAddress { .. } => 22, // EINVAL
        KernelError::WouldBlock => 11,  // EAGAIN
        KernelError::BrokenPipe => 32,  // EPIPE
        KernelError::FsError(fs_err) => match fs_err {
            crate::error::FsError::NotFound => 2,
            crate::error::FsError::AlreadyExists => 17,
            crate::error::FsError::PermissionDenied => 13,
            crate::error::FsError::NotADirectory => 20,
            crate::error::FsError::IsADirectory => 21,
            crate::error::FsError::BadFileDescriptor => 9,
            crate::error::FsError::TooManyOpenFiles => 24,
            crate::error::FsError::DirectoryNotEmpty => 39,
            crate::error::FsError::ReadOnly => 30,
            _ => 5, // EIO
        },
        KernelError::LegacyError { message } => match message {
            "would_block" => 11,
            "broken_pipe" => 32,
            "not a directory" => 20,
            _ => 5,
        },
        _ => 5, // EIO
    }
}

fn set_result(live: &mut RegisterFrame, result: Result<u32, KernelError>) {
    live.eax = match result {
        Ok(value) => value,
        Err(err) => (-errno_of(err)) as u32,
    };
}

/// Rewind `frame.eip` onto the `int 0x80` that trapped here, then block.
fn retry_after_block(frame: *mut RegisterFrame, state: TaskState) -> *mut RegisterFrame {
    // SAFETY: frame is the live interrupt frame for the current task.
    unsafe { (*frame).eip -= SYSCALL_INSN_LEN };
    sched::block_current(frame, state)
}

/// Single entry point called from `arch::x86::idt::isr_common` for
/// vector `SYSCALL_VECTOR`.
pub fn dispatch_frame(frame: *mut RegisterFrame) -> *mut RegisterFrame {
    // SAFETY: frame is the live CPU frame for the syscall gate; valid for
    // the duration of this call.
    let live = unsafe { &mut *frame };
    let (num, a1, a2, a3) = (live.eax, live.ebx, live.ecx, live.edx);

    let syscall = match Syscall::try_from(num) {
        Ok(s) => s,
        Err(()) => {
            live.eax = (-38i32) as u32; // ENOSYS
            return frame;
        }
    };

    match syscall {
        Syscall::Exit => return sched::exit_current(frame, a1 as i32),
        Syscall::Yield => return sched::yield_current(frame),
        Syscall::Sleep => return sys_sleep(frame, a1),
        Syscall::Read => return sys_read(frame, a1, a2, a3),
        Syscall::Write => return sys_write(frame, a1, a2, a3),
        Syscall::Futex => return sys_futex(frame, a1, a2, a3),
        Syscall::WaitPid => return sys_waitpid(frame, a1, a2),
        _ => {}
    }

    let result = match syscall {
        Syscall::GetPid => Ok(sched::current_tid() as u32),
        Syscall::Open => sys_open(a1, a2, a3),
        Syscall::Close => sys_close(a1),
        Syscall::Pipe => sys_pipe(a1),
        Syscall::Kill => sys_kill(a1, a2),
        Syscall::SigAction => sys_sigaction(a1, a2),
        Syscall::SigReturn => sys_sigreturn(live),
        Syscall::ShmCreate => sys_shm_create(a1, a2, a3),
        Syscall::ShmAttach => sys_shm_attach(a1),
        Syscall::ShmDetach => sys_shm_detach(a1),
        _ => unreachable!("handled above"),
    };
    set_result(live, result);
    frame
}

/// Validate that `[ptr, ptr+len)` lies inside one VMA of the current
/// task, with `WRITE` permission if the syscall is about to write
/// through it.
fn validate_buffer(ptr: u32, len: usize, write: bool) -> Result<(), KernelError> {
    if len == 0 {
        return Ok(());
    }
    let end = ptr
        .checked_add(len as u32)
        .ok_or(KernelError::InvalidAddress { addr: ptr as usize })?;

    sched::with_current_task(|task| {
        let vma = task
            .vma_table
            .find(VirtAddr::new(ptr))
            .ok_or(KernelError::InvalidAddress { addr: ptr as usize })?;
        if end > vma.end {
            return Err(KernelError::InvalidAddress { addr: ptr as usize });
        }
        if write && !vma.flags.contains(VmaFlags::WRITE) {
            return Err(KernelError::PermissionDenied { operation: "write through read-only mapping" });
        }
        Ok(())
    })
    .unwrap_or(Err(KernelError::InvalidAddress { addr: ptr as usize }))
}

/// SAFETY: `ptr`/`len` must already be validated by [`validate_buffer`].
unsafe fn user_slice_mut<'a>(ptr: u32, len: usize) -> &'a mut [u8] {
    core::slice::from_raw_parts_mut(ptr as *mut u8, len)
}

/// SAFETY: `ptr`/`len` must already be validated by [`validate_buffer`].
unsafe fn user_slice<'a>(ptr: u32, len: usize) -> &'a [u8] {
    core::slice::from_raw_parts(ptr as *const u8, len)
}

fn sys_sleep(frame: *mut RegisterFrame, ticks: u32) -> *mut RegisterFrame {
    if ticks == 0 {
        return frame;
    }
    let wake_at = sched::ticks() + ticks as u64;
    sched::sleep_current(frame, wake_at)
}

fn sys_read(frame: *mut RegisterFrame, fd: u32, buf_ptr: u32, len: u32) -> *mut RegisterFrame {
    let live = unsafe { &mut *frame };

    if let Err(e) = validate_buffer(buf_ptr, len as usize, true) {
        set_result(live, Err(e));
        return frame;
    }

    let file = sched::with_current_task(|task| task.fd_table.get(fd as usize));
    let file = match file.flatten() {
        Some(f) => f,
        None => {
            set_result(live, Err(KernelError::FsError(crate::error::FsError::BadFileDescriptor)));
            return frame;
        }
    };

    // SAFETY: buf_ptr/len validated above.
    let buffer = unsafe { user_slice_mut(buf_ptr, len as usize) };
    match file.read(buffer) {
        Ok(n) => {
            set_result(live, Ok(n as u32));
            frame
        }
        Err(KernelError::LegacyError { message: "would_block" }) if !file.flags.nonblock => {
            retry_after_block(frame, TaskState::Blocked)
        }
        Err(e) => {
            set_result(live, Err(e));
            frame
        }
    }
}

fn sys_write(frame: *mut RegisterFrame, fd: u32, buf_ptr: u32, len: u32) -> *mut RegisterFrame {
    let live = unsafe { &mut *frame };

    if let Err(e) = validate_buffer(buf_ptr, len as usize, false) {
        set_result(live, Err(e));
        return frame;
    }

    let file = sched::with_current_task(|task| task.fd_table.get(fd as usize));
    let file = match file.flatten() {
        Some(f) => f,
        None => {
            set_result(live, Err(KernelError::FsError(crate::error::FsError::BadFileDescriptor)));
            return frame;
        }
    };

    // SAFETY: buf_ptr/len validated above.
    let data = unsafe { user_slice(buf_ptr, len as usize) };
    match file.write(data) {
        Ok(n) => {
            set_result(live, Ok(n as u32));
            frame
        }
        Err(KernelError::LegacyError { message: "would_block" }) if !file.flags.nonblock => {
            retry_after_block(frame, TaskState::Blocked)
        }
        Err(KernelError::LegacyError { message: "broken_pipe" }) => {
            let tid = sched::current_tid();
            let _ = sched::send_signal(tid, SIG_PIPE);
            set_result(live, Err(KernelError::BrokenPipe));
            frame
        }
        Err(e) => {
            set_result(live, Err(e));
            frame
        }
    }
}

fn sys_open(path_ptr: u32, path_len: u32, flag_bits: u32) -> Result<u32, KernelError> {
    validate_buffer(path_ptr, path_len as usize, false)?;
    // SAFETY: validated above.
    let path_bytes = unsafe { user_slice(path_ptr, path_len as usize) };
    let path = core::str::from_utf8(path_bytes)
        .map_err(|_| KernelError::InvalidArgument { name: "path", value: "not valid utf-8" })?;

    let flags = OpenFlags::from_bits(flag_bits)
        .ok_or(KernelError::InvalidArgument { name: "flags", value: "unrecognized open flags" })?;

    let node = fs::get_vfs().read().open(path, flags)?;
    let file = Arc::new(fs::file::File::new(node, flags));
    let fd = sched::with_current_task(|task| task.fd_table.open(file))
        .ok_or(KernelError::NotFound { resource: "current_task", id: 0 })??;
    Ok(fd as u32)
}

fn sys_close(fd: u32) -> Result<u32, KernelError> {
    sched::with_current_task(|task| task.fd_table.close(fd as usize))
        .ok_or(KernelError::NotFound { resource: "current_task", id: 0 })??;
    Ok(0)
}

fn sys_pipe(fds_ptr: u32) -> Result<u32, KernelError> {
    validate_buffer(fds_ptr, 8, true)?;

    let (read_end, write_end) = pipe::create();
    let read_node: Arc<dyn VfsNode> = read_end;
    let write_node: Arc<dyn VfsNode> = write_end;
    let read_file = Arc::new(fs::file::File::new(read_node, OpenFlags::read_only()));
    let write_file = Arc::new(fs::file::File::new(write_node, OpenFlags::write_only()));

    sched::with_current_task(|task| -> Result<(u32, u32), KernelError> {
        let read_fd = task.fd_table.open(read_file)?;
        let write_fd = task.fd_table.open(write_file)?;
        Ok((read_fd as u32, write_fd as u32))
    })
    .ok_or(KernelError::NotFound { resource: "current_task", id: 0 })?
    .map(|(read_fd, write_fd)| {
        // SAFETY: fds_ptr validated above for 8 bytes (two u32s).
        let out = unsafe { user_slice_mut(fds_ptr, 8) };
        out[0..4].copy_from_slice(&read_fd.to_ne_bytes());
        out[4..8].copy_from_slice(&write_fd.to_ne_bytes());
        0
    })
}

fn sys_kill(tid: u32, sig: u32) -> Result<u32, KernelError> {
    if sig == 0 || sig as usize > crate::sched::task::NSIG {
        return Err(KernelError::InvalidArgument { name: "sig", value: "out of range" });
    }
    sched::send_signal(tid as u64, sig as u8)?;
    Ok(0)
}

fn sys_sigaction(sig: u32, handler_addr: u32) -> Result<u32, KernelError> {
    if sig == 0 || sig as usize > crate::sched::task::NSIG {
        return Err(KernelError::InvalidArgument { name: "sig", value: "out of range" });
    }
    sched::set_signal_handler(sched::current_tid(), sig as u8, handler_addr)?;
    Ok(0)
}

fn sys_sigreturn(live: &mut RegisterFrame) -> Result<u32, KernelError> {
    if sched::sigreturn_current(live) {
        Ok(live.eax)
    } else {
        Err(KernelError::InvalidState { expected: "in_handler", actual: "not in a signal handler" })
    }
}

fn sys_shm_create(name_ptr: u32, name_len: u32, size: u32) -> Result<u32, KernelError> {
    validate_buffer(name_ptr, name_len as usize, false)?;
    // SAFETY: validated above.
    let name_bytes = unsafe { user_slice(name_ptr, name_len as usize) };
    let name = core::str::from_utf8(name_bytes)
        .map_err(|_| KernelError::InvalidArgument { name: "name", value: "not valid utf-8" })?;
    Ok(shared_memory::create(name, size as usize)? as u32)
}

fn sys_shm_attach(id: u32) -> Result<u32, KernelError> {
    let pd = sched::current_page_dir();
    shared_memory::attach(id as usize, pd)
}

fn sys_shm_detach(id: u32) -> Result<u32, KernelError> {
    let pd = sched::current_page_dir();
    shared_memory::detach(id as usize, pd)?;
    Ok(0)
}

fn sys_futex(frame: *mut RegisterFrame, addr: u32, op: u32, val: u32) -> *mut RegisterFrame {
    let live = unsafe { &mut *frame };

    if let Err(e) = validate_buffer(addr, 4, false) {
        set_result(live, Err(e));
        return frame;
    }

    match op {
        0 => {
            // SAFETY: addr validated above for a 4-byte read; wait() does
            // its own read under IRQ-off.
            let (blocked, next_frame) = unsafe { futex::wait(frame, addr, val) };
            if blocked {
                next_frame
            } else {
                set_result(unsafe { &mut *frame }, Ok(0));
                frame
            }
        }
        1 => {
            let woken = futex::wake(addr, val);
            set_result(live, Ok(woken));
            frame
        }
        _ => {
            set_result(live, Err(KernelError::InvalidArgument { name: "op", value: "unknown futex op" }));
            frame
        }
    }
}

fn sys_waitpid(frame: *mut RegisterFrame, child_tid: u32, status_ptr: u32) -> *mut RegisterFrame {
    let live = unsafe { &mut *frame };
    let target = if child_tid == 0 { None } else { Some(child_tid as u64) };
    let parent = sched::current_tid();

    if status_ptr != 0 {
        if let Err(e) = validate_buffer(status_ptr, 4, true) {
            set_result(live, Err(e));
            return frame;
        }
    }

    match sched::reap_zombie_child(parent, target) {
        Some((tid, code)) => {
            if status_ptr != 0 {
                // SAFETY: validated above.
                let out = unsafe { user_slice_mut(status_ptr, 4) };
                out.copy_from_slice(&code.to_ne_bytes());
            }
            set_result(live, Ok(tid as u32));
            frame
        }
        None => {
            if sched::has_live_child(parent, target) {
                retry_after_block(frame, TaskState::Blocked)
            } else {
                set_result(live, Err(KernelError::NotFound { resource: "child", id: child_tid as u64 }));
                frame
            }
        }
    }
}
