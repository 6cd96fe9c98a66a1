//! 32-bit x86 architecture backend.
//!
//! Brings up the GDT, IDT, 8259 PIC, and PIT in that order (each one's
//! init depends on the previous), matching the `idt_initialize()` sequence
//! from the original kernel. Interrupts stay masked until the caller
//! explicitly enables them once the scheduler is ready to receive ticks.

pub mod boot;
pub mod bootstrap;
pub mod context;
pub mod gdt;
pub mod idt;
pub mod multiboot;
pub mod pic;
pub mod port;
pub mod rtc;
pub mod serial;
pub mod syscall;
pub mod timer;
pub mod usermode;

/// Bring up GDT, IDT, PIC, and PIT. Does not enable interrupts.
pub fn init() {
    gdt::init();
    log::info!("gdt: installed, TSS loaded");
    idt::init();
    timer::init();
    rtc::init();
}

/// Enable interrupts and enter the halt loop forever.
pub fn idle() -> ! {
    idt::enable();
    loop {
        // SAFETY: hlt suspends the CPU until the next interrupt; always
        // safe at ring 0 with no side effects beyond resuming execution.
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) }
    }
}
