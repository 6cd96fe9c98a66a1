//! Register convention for the `int 0x80` syscall gate.
//!
//! `eax` carries the syscall number, `ebx`/`ecx`/`edx`/`esi`/`edi` carry up
//! to five arguments, and the return value is written back into `eax` —
//! exactly the convention `syscall.c`'s `syscall_handler(registers_t*)`
//! uses in the original kernel. The actual dispatch table lives in
//! `crate::syscall`; this module only describes the calling convention.

use crate::arch::x86::idt::RegisterFrame;

/// A syscall request decoded from a trapped `RegisterFrame`.
#[derive(Debug, Clone, Copy)]
pub struct SyscallArgs {
    pub number: u32,
    pub args: [u32; 5],
}

impl SyscallArgs {
    pub fn from_frame(frame: &RegisterFrame) -> Self {
        Self {
            number: frame.eax,
            args: [frame.ebx, frame.ecx, frame.edx, frame.esi, frame.edi],
        }
    }
}

/// Write a syscall's return value back into the frame that will be
/// restored on `iretd`.
pub fn set_return_value(frame: &mut RegisterFrame, value: i32) {
    frame.eax = value as u32;
}
