//! First-launch trampoline: jump into a task's initial `RegisterFrame`
//! without having arrived there via a real interrupt.
//!
//! Shares its restore sequence with `isr_common_stub`'s tail half, since a
//! freshly scheduled task (kernel or user mode) needs exactly the same
//! `popa`/segment-pop/`iretd` dance a preempted task resumes through.

use core::arch::global_asm;

use crate::arch::x86::idt::RegisterFrame;

extern "C" {
    fn enter_frame_asm(frame: *const RegisterFrame) -> !;
}

global_asm!(
    ".intel_syntax noprefix",
    ".global enter_frame_asm",
    "enter_frame_asm:",
    "mov eax, [esp + 4]", // frame pointer argument
    "mov esp, eax",
    "pop gs",
    "pop fs",
    "pop es",
    "pop ds",
    "popa",
    "add esp, 8", // drop int_no, err_code
    "iretd",
);

/// Transfer control to `frame`, never returning. Used once per task to
/// start it running for the first time (the scheduler's normal path after
/// that is the interrupt-return frame swap in `isr_common`).
///
/// # Safety
/// `frame` must point to a fully initialized `RegisterFrame` sitting at
/// the top of a kernel stack big enough to hold it; the CS/SS selectors
/// must be valid GDT entries and, for ring-3 frames, the task's page
/// tables (if distinct from the kernel's) must already be loaded.
pub unsafe fn enter_frame(frame: *const RegisterFrame) -> ! {
    // SAFETY: forwarded from the caller's contract.
    unsafe { enter_frame_asm(frame) }
}
