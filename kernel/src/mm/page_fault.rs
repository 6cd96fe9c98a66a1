//! Page fault handling: the single place a `#PF` exception (vector 14)
//! is resolved into either a transparent fixup (copy-on-write, a guard
//! page firing to grow a stack) or a delivered `SIGSEGV`.
//!
//! Called from `arch::x86::idt::handle_exception` with the live register
//! frame; `CR2` holds the faulting address and `err_code` the Intel SDM
//! page-fault error code.

use crate::{
    arch::x86::{idt::RegisterFrame, port},
    mm::{vmm, VirtAddr},
    sched,
};

/// Error-code bit 0: 0 = not-present, 1 = protection violation.
const ERR_PRESENT: u32 = 1 << 0;
/// Error-code bit 2: 0 = supervisor, 1 = user-mode access.
const ERR_USER: u32 = 1 << 2;

fn was_user_mode(err_code: u32) -> bool {
    err_code & ERR_USER != 0
}

/// Resolve a page fault. Kernel-mode faults (a bug, since the kernel
/// never takes demand faults against its own identity-mapped region)
/// panic; user-mode faults are first offered to copy-on-write and guard
/// page handling, and only turn into `SIGSEGV` if neither claims them.
pub fn handle(regs: &mut RegisterFrame) {
    let fault_addr = port::read_cr2();
    let va = VirtAddr::new(fault_addr);

    if !was_user_mode(regs.err_code) {
        panic!(
            "kernel page fault at {:#010x} (eip {:#010x}, err {:#x})",
            fault_addr, regs.eip, regs.err_code
        );
    }

    let pd = sched::current_page_dir();

    if matches!(vmm::handle_cow_fault(pd, va), Ok(true)) {
        return;
    }
    if matches!(vmm::check_guard_page(pd, va), Ok(true)) {
        return;
    }

    log::warn!(
        "page fault: tid {} addr {:#010x} eip {:#010x} -> SIGSEGV",
        sched::current_tid(),
        fault_addr,
        regs.eip
    );
    let _ = sched::send_signal(sched::current_tid(), sched::task::SIG_SEGV);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_mode_bit_decoded() {
        assert!(was_user_mode(ERR_USER));
        assert!(was_user_mode(ERR_PRESENT | ERR_USER));
        assert!(!was_user_mode(0));
        assert!(!was_user_mode(ERR_PRESENT));
    }
}
