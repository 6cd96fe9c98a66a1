//! Interrupt Descriptor Table, exception handlers, and the IRQ/syscall
//! dispatch path for 32-bit protected mode.
//!
//! The `x86_64` crate's `extern "x86-interrupt"` ABI and `InterruptDescriptorTable`
//! type don't exist for 32-bit targets, so the table and its entry stubs are
//! hand-rolled: every vector pushes a `registers_t`-shaped frame (matching
//! the original kernel's `idt.h` layout byte-for-byte) and jumps to a single
//! Rust handler, `isr_common`. IRQ0 (the PIT) drives the scheduler tick;
//! vector 0x80 is the syscall gate (see `syscall.rs`).

use core::{arch::global_asm, mem::size_of};

use crate::arch::x86::{gdt::KERNEL_CS, pic, port};

/// Register frame pushed by every ISR stub, matching `registers_t` from
/// the original kernel's `idt.h`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

const IDT_ENTRIES: usize = 256;
/// IRQ0 (PIT) is remapped to vector 32, matching `pic::IRQ_BASE`.
pub const IRQ0_VECTOR: u8 = pic::IRQ_BASE;
/// Software interrupt used as the syscall gate (`int 0x80`).
pub const SYSCALL_VECTOR: u8 = 0x80;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, selector: u16, type_attr: u8) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

static mut IDT: [IdtEntry; IDT_ENTRIES] = [IdtEntry::missing(); IDT_ENTRIES];

/// Interrupt gate, present, DPL0: used for CPU exceptions and IRQs.
const GATE_INT_DPL0: u8 = 0x8E;
/// Interrupt gate, present, DPL3: `int 0x80` must be reachable from ring 3.
const GATE_INT_DPL3: u8 = 0xEE;

/// Build and load the IDT, then remap and mask the 8259 PIC.
///
/// Must run after `gdt::init()` (gate descriptors reference `KERNEL_CS`)
/// and before interrupts are unmasked.
pub fn init() {
    // SAFETY: IDT is only written here, before the table is loaded, on a
    // single core during boot.
    unsafe {
        for vector in 0..32u8 {
            set_gate(vector, exception_stub_addr(vector), GATE_INT_DPL0);
        }
        for irq in 0..16u8 {
            set_gate(IRQ0_VECTOR + irq, irq_stub_addr(irq), GATE_INT_DPL0);
        }
        set_gate(SYSCALL_VECTOR, syscall_stub_addr(), GATE_INT_DPL3);

        let ptr = IdtPointer {
            limit: (size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
            base: IDT.as_ptr() as u32,
        };
        core::arch::asm!("lidt [{0}]", in(reg) &ptr, options(nostack));
    }

    pic::remap_and_mask();
    log::info!("idt: {} exception vectors, 16 IRQ vectors, int 0x80 syscall gate installed", 32);
}

/// # Safety
/// `vector` must be a valid IDT index and `handler` the address of a stub
/// that pushes `int_no`/`err_code` and jumps to `isr_common_stub`.
unsafe fn set_gate(vector: u8, handler: u32, type_attr: u8) {
    // SAFETY: IDT is a static array sized 256; `vector` is a u8 so always
    // in bounds. Called only during single-threaded init.
    unsafe {
        IDT[vector as usize] = IdtEntry::new(handler, KERNEL_CS, type_attr);
    }
}

extern "C" {
    fn isr0();
    fn isr1();
    fn isr2();
    fn isr3();
    fn isr4();
    fn isr5();
    fn isr6();
    fn isr7();
    fn isr8();
    fn isr9();
    fn isr10();
    fn isr11();
    fn isr12();
    fn isr13();
    fn isr14();
    fn isr15();
    fn isr16();
    fn isr17();
    fn isr18();
    fn isr19();
    fn isr20();
    fn isr21();
    fn isr22();
    fn isr23();
    fn isr24();
    fn isr25();
    fn isr26();
    fn isr27();
    fn isr28();
    fn isr29();
    fn isr30();
    fn isr31();
    fn irq0();
    fn irq1();
    fn irq2();
    fn irq3();
    fn irq4();
    fn irq5();
    fn irq6();
    fn irq7();
    fn irq8();
    fn irq9();
    fn irq10();
    fn irq11();
    fn irq12();
    fn irq13();
    fn irq14();
    fn irq15();
    fn isr128();
}

fn exception_stub_addr(vector: u8) -> u32 {
    let fns: [unsafe extern "C" fn(); 32] = [
        isr0, isr1, isr2, isr3, isr4, isr5, isr6, isr7, isr8, isr9, isr10, isr11, isr12, isr13,
        isr14, isr15, isr16, isr17, isr18, isr19, isr20, isr21, isr22, isr23, isr24, isr25, isr26,
        isr27, isr28, isr29, isr30, isr31,
    ];
    fns[vector as usize] as u32
}

fn irq_stub_addr(irq: u8) -> u32 {
    let fns: [unsafe extern "C" fn(); 16] = [
        irq0, irq1, irq2, irq3, irq4, irq5, irq6, irq7, irq8, irq9, irq10, irq11, irq12, irq13,
        irq14, irq15,
    ];
    fns[irq as usize] as u32
}

fn syscall_stub_addr() -> u32 {
    isr128 as u32
}

macro_rules! isr_no_err {
    ($name:ident, $num:expr) => {
        concat!(
            ".global ", stringify!($name), "\n",
            stringify!($name), ":\n",
            "push dword 0\n",
            "push dword ", stringify!($num), "\n",
            "jmp isr_common_stub\n",
        )
    };
}

macro_rules! isr_err {
    ($name:ident, $num:expr) => {
        concat!(
            ".global ", stringify!($name), "\n",
            stringify!($name), ":\n",
            "push dword ", stringify!($num), "\n",
            "jmp isr_common_stub\n",
        )
    };
}

macro_rules! irq_stub {
    ($name:ident, $irq:expr, $vector:expr) => {
        concat!(
            ".global ", stringify!($name), "\n",
            stringify!($name), ":\n",
            "push dword 0\n",
            "push dword ", stringify!($vector), "\n",
            "jmp isr_common_stub\n",
        )
    };
}

// Field order of `RegisterFrame` mirrors push order here exactly: pusha
// pushes eax,ecx,edx,ebx,esp,ebp,esi,edi (in that chronological order, so
// edi ends up nearest the final ESP), then ds/es/fs/gs are pushed
// individually with gs last — landing at offset 0, matching the struct's
// first field. `iretd` is symmetric with CPU entry: it pops the trailing
// useresp/ss pair only when the CS it restores indicates a privilege
// change, exactly mirroring whether the CPU pushed them on entry, so
// `add esp, 8` (dropping int_no/err_code) is correct regardless of
// whether the trapped frame came from ring 0 or ring 3.
global_asm!(
    ".intel_syntax noprefix",
    "isr_common_stub:",
    "pusha",
    "push ds",
    "push es",
    "push fs",
    "push gs",
    "mov ax, {kdata}",
    "mov ds, ax",
    "mov es, ax",
    "mov fs, ax",
    "mov gs, ax",
    "push esp",
    "call {handler}",
    "add esp, 4",
    "mov esp, eax", // handler returns the (possibly different) frame to resume
    "pop gs",
    "pop fs",
    "pop es",
    "pop ds",
    "popa",
    "add esp, 8", // drop int_no, err_code
    "iretd",
    kdata = const KERNEL_DS_SEL,
    handler = sym isr_common,
);

const KERNEL_DS_SEL: u32 = 0x10;

global_asm!(isr_no_err!(isr0, 0));
global_asm!(isr_no_err!(isr1, 1));
global_asm!(isr_no_err!(isr2, 2));
global_asm!(isr_no_err!(isr3, 3));
global_asm!(isr_no_err!(isr4, 4));
global_asm!(isr_no_err!(isr5, 5));
global_asm!(isr_no_err!(isr6, 6));
global_asm!(isr_no_err!(isr7, 7));
global_asm!(isr_err!(isr8, 8));
global_asm!(isr_no_err!(isr9, 9));
global_asm!(isr_err!(isr10, 10));
global_asm!(isr_err!(isr11, 11));
global_asm!(isr_err!(isr12, 12));
global_asm!(isr_err!(isr13, 13));
global_asm!(isr_err!(isr14, 14));
global_asm!(isr_no_err!(isr15, 15));
global_asm!(isr_no_err!(isr16, 16));
global_asm!(isr_err!(isr17, 17));
global_asm!(isr_no_err!(isr18, 18));
global_asm!(isr_no_err!(isr19, 19));
global_asm!(isr_no_err!(isr20, 20));
global_asm!(isr_no_err!(isr21, 21));
global_asm!(isr_no_err!(isr22, 22));
global_asm!(isr_no_err!(isr23, 23));
global_asm!(isr_no_err!(isr24, 24));
global_asm!(isr_no_err!(isr25, 25));
global_asm!(isr_no_err!(isr26, 26));
global_asm!(isr_no_err!(isr27, 27));
global_asm!(isr_no_err!(isr28, 28));
global_asm!(isr_no_err!(isr29, 29));
global_asm!(isr_err!(isr30, 30));
global_asm!(isr_no_err!(isr31, 31));

global_asm!(irq_stub!(irq0, 0, 32));
global_asm!(irq_stub!(irq1, 1, 33));
global_asm!(irq_stub!(irq2, 2, 34));
global_asm!(irq_stub!(irq3, 3, 35));
global_asm!(irq_stub!(irq4, 4, 36));
global_asm!(irq_stub!(irq5, 5, 37));
global_asm!(irq_stub!(irq6, 6, 38));
global_asm!(irq_stub!(irq7, 7, 39));
global_asm!(irq_stub!(irq8, 8, 40));
global_asm!(irq_stub!(irq9, 9, 41));
global_asm!(irq_stub!(irq10, 10, 42));
global_asm!(irq_stub!(irq11, 11, 43));
global_asm!(irq_stub!(irq12, 12, 44));
global_asm!(irq_stub!(irq13, 13, 45));
global_asm!(irq_stub!(irq14, 14, 46));
global_asm!(irq_stub!(irq15, 15, 47));
global_asm!(isr_no_err!(isr128, 128));

/// Single entry point for every vector. Dispatches exceptions, IRQs, and
/// the syscall gate, and returns the frame pointer the assembly trampoline
/// should restore from (normally `frame` itself, but the scheduler may
/// substitute a different task's frame on a timer-driven context switch).
#[no_mangle]
extern "C" fn isr_common(frame: *mut RegisterFrame) -> *mut RegisterFrame {
    // SAFETY: `frame` was built by isr_common_stub from the live CPU frame
    // for the vector that just fired; it is valid for the duration of
    // this call.
    let regs = unsafe { &mut *frame };

    match regs.int_no {
        0..=31 => {
            handle_exception(regs);
            frame
        }
        n if n == IRQ0_VECTOR as u32 => {
            pic::send_eoi(0);
            crate::irq::record_irq();
            crate::arch::x86::timer::tick();
            crate::sched::timer_tick_frame(frame)
        }
        n if (IRQ0_VECTOR as u32 + 1..IRQ0_VECTOR as u32 + 16).contains(&n) => {
            let irq = (n - IRQ0_VECTOR as u32) as u8;
            pic::send_eoi(irq);
            crate::irq::record_irq();
            frame
        }
        n if n == SYSCALL_VECTOR as u32 => crate::syscall::dispatch_frame(frame),
        _ => frame,
    }
}

const EXCEPTION_NAMES: [&str; 20] = [
    "Divide-by-zero",
    "Debug",
    "NMI",
    "Breakpoint",
    "Overflow",
    "Bound Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack-Segment Fault",
    "General Protection Fault",
    "Page Fault",
    "Reserved",
    "x87 Floating-Point Exception",
    "Alignment Check",
    "Machine Check",
    "SIMD Floating-Point Exception",
];

fn handle_exception(regs: &mut RegisterFrame) {
    if regs.int_no == 14 {
        crate::mm::page_fault::handle(regs);
        return;
    }
    if regs.int_no == 3 {
        log::debug!("int3 breakpoint at eip={:#x}", { regs.eip });
        return;
    }
    let name = EXCEPTION_NAMES
        .get(regs.int_no as usize)
        .copied()
        .unwrap_or("Unknown exception");
    panic!(
        "CPU exception {} ({}) at eip={:#x} err={:#x}",
        regs.int_no, name, { regs.eip }, { regs.err_code }
    );
}

/// Enable hardware interrupts (set IF).
#[inline]
pub fn enable() {
    // SAFETY: sti takes no arguments and only sets the CPU's interrupt
    // flag; valid at any privilege level we run at (ring 0).
    unsafe { core::arch::asm!("sti", options(nomem, nostack)) }
}

/// Run `f` with interrupts disabled, restoring the prior IF state on exit
/// even if `f` panics.
pub fn without_interrupts<F: FnOnce() -> R, R>(f: F) -> R {
    let flags = port::irq_save();
    let result = f();
    // SAFETY: `flags` was captured by the matching `irq_save` immediately
    // above on this same call stack.
    unsafe { port::irq_restore(flags) };
    result
}
