//! Global Descriptor Table for 32-bit protected mode.
//!
//! Six entries: null, kernel code/data (ring 0), user code/data (ring 3),
//! and a TSS used only to hold the ring0 stack pointer (`esp0`) for
//! privilege-level transitions on interrupt/syscall entry. ImposOS runs
//! single-core and flat-mapped, so every segment base is 0 and the limit
//! spans the full 4 GiB.

use core::mem::size_of;

use lazy_static::lazy_static;
use spin::Mutex;

/// Kernel code segment selector (ring 0).
pub const KERNEL_CS: u16 = 0x08;
/// Kernel data segment selector (ring 0).
pub const KERNEL_DS: u16 = 0x10;
/// User code segment selector (ring 3, RPL already applied).
pub const USER_CS: u16 = 0x1B;
/// User data segment selector (ring 3, RPL already applied).
pub const USER_DS: u16 = 0x23;
/// TSS selector.
const TSS_SEL: u16 = 0x28;

const GDT_ENTRIES: usize = 6;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    flags_limit_high: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            flags_limit_high: 0,
            base_high: 0,
        }
    }

    /// Flat 4 GiB segment. `access` selects code/data, DPL and present bit;
    /// flags are fixed at 4 KiB granularity + 32-bit operand size.
    const fn flat(access: u8) -> Self {
        Self {
            limit_low: 0xFFFF,
            base_low: 0,
            base_mid: 0,
            access,
            flags_limit_high: 0xC_F, // granularity=4K, 32-bit, limit bits 16-19 = 0xF
            base_high: 0,
        }
    }

    fn tss(base: u32, limit: u32) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access: 0x89, // present, DPL0, 32-bit TSS (available)
            flags_limit_high: (((limit >> 16) & 0x0F) as u8) | 0x00,
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

/// Task State Segment. Only `esp0`/`ss0` are used (ring3->ring0 stack
/// switch on interrupt); the rest of the struct is dead weight the CPU
/// still expects to find at the selector's base.
#[repr(C, packed)]
pub struct Tss {
    prev_task: u32,
    pub esp0: u32,
    pub ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt: u32,
    trap: u16,
    iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        Self {
            prev_task: 0,
            esp0: 0,
            ss0: KERNEL_DS as u32,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldt: 0,
            trap: 0,
            iomap_base: size_of::<Tss>() as u16,
        }
    }
}

lazy_static! {
    static ref TSS: Mutex<Tss> = Mutex::new(Tss::new());
}

static mut GDT: [GdtEntry; GDT_ENTRIES] = [GdtEntry::null(); GDT_ENTRIES];

/// Build the GDT, load it, and load the TSS selector.
///
/// Must run before `idt::init()` — the IDT's interrupt gates reference
/// `KERNEL_CS` and ring transitions depend on the TSS being loaded so a
/// ring3->ring0 fault has somewhere to land.
pub fn init() {
    let tss_base = {
        let tss = TSS.lock();
        &*tss as *const Tss as u32
    };
    let tss_limit = size_of::<Tss>() as u32 - 1;

    // SAFETY: GDT is only mutated here, once, before the table is loaded
    // and before any other core could observe it (single-core boot).
    unsafe {
        GDT[0] = GdtEntry::null();
        GDT[1] = GdtEntry::flat(0x9A); // kernel code: present, ring0, exec/read
        GDT[2] = GdtEntry::flat(0x92); // kernel data: present, ring0, read/write
        GDT[3] = GdtEntry::flat(0xFA); // user code: present, ring3, exec/read
        GDT[4] = GdtEntry::flat(0xF2); // user data: present, ring3, read/write
        GDT[5] = GdtEntry::tss(tss_base, tss_limit);

        let ptr = GdtPointer {
            limit: (size_of::<[GdtEntry; GDT_ENTRIES]>() - 1) as u16,
            base: GDT.as_ptr() as u32,
        };
        load_gdt(&ptr);
        load_tss(TSS_SEL);
    }
}

/// # Safety
/// `ptr` must describe a GDT whose entries stay alive for as long as the
/// CPU keeps the table loaded (i.e. forever, for our static `GDT`).
unsafe fn load_gdt(ptr: *const GdtPointer) {
    // SAFETY: lgdt loads the table descriptor; the far jump that follows
    // reloads CS with the now-valid kernel code selector, and the data
    // segment moves reload DS/ES/FS/GS/SS. `ptr` points at our static
    // GdtPointer built from the static GDT array above.
    unsafe {
        core::arch::asm!(
            "lgdt [{ptr}]",
            "mov ax, {kdata}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            "push {kcode}",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            ptr = in(reg) ptr,
            kdata = const KERNEL_DS,
            kcode = const KERNEL_CS as u32,
            out("eax") _,
            options(nostack),
        );
    }
}

/// # Safety
/// `selector` must index a valid, present TSS descriptor in the loaded GDT.
unsafe fn load_tss(selector: u16) {
    // SAFETY: ltr loads the task register from a GDT selector we just
    // installed in `init()`.
    unsafe {
        core::arch::asm!("ltr {0:x}", in(reg) selector, options(nostack, nomem));
    }
}

/// Update the ring0 stack pointer used on the next ring3->ring0 transition.
/// Called by the scheduler on every context switch.
pub fn set_kernel_stack(esp0: u32) {
    TSS.lock().esp0 = esp0;
}

/// Read back the current ring0 stack pointer, for diagnostics/tests.
pub fn kernel_stack() -> u32 {
    TSS.lock().esp0
}
