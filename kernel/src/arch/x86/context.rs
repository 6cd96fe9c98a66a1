//! Task register-frame construction.
//!
//! ImposOS does not need a dedicated `context_switch` assembly routine: the
//! scheduler switches tasks by handing `isr_common` a *different*
//! `RegisterFrame` pointer to restore from before `iretd` — the same trick
//! the original kernel's `schedule(regs)` uses. This module only builds the
//! initial frame a brand-new task's kernel stack needs before it is first
//! scheduled.

use crate::arch::x86::{
    gdt::{KERNEL_CS, KERNEL_DS, USER_CS, USER_DS},
    idt::RegisterFrame,
};

/// RFLAGS with only the reserved bit 1 and IF (interrupts enabled) set.
const EFLAGS_IF: u32 = 0x202;

/// Build the initial register frame for a kernel-mode task (used for the
/// idle task and kernel worker threads).
pub fn new_kernel_frame(entry: u32, stack_top: u32) -> RegisterFrame {
    RegisterFrame {
        eip: entry,
        cs: KERNEL_CS as u32,
        eflags: EFLAGS_IF,
        useresp: stack_top,
        ss: KERNEL_DS as u32,
        esp: stack_top,
        ds: KERNEL_DS as u32,
        es: KERNEL_DS as u32,
        fs: KERNEL_DS as u32,
        gs: KERNEL_DS as u32,
        ..Default::default()
    }
}

/// Build the initial register frame for a ring-3 user task.
pub fn new_user_frame(entry: u32, user_stack_top: u32) -> RegisterFrame {
    RegisterFrame {
        eip: entry,
        cs: USER_CS as u32,
        eflags: EFLAGS_IF,
        useresp: user_stack_top,
        ss: USER_DS as u32,
        esp: user_stack_top,
        ds: USER_DS as u32,
        es: USER_DS as u32,
        fs: USER_DS as u32,
        gs: USER_DS as u32,
        ..Default::default()
    }
}
