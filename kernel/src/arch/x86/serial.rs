//! COM1 serial driver backing the kernel's debug console.
//!
//! Uses the `uart_16550` crate; its port I/O is width-generic and works
//! unmodified under the 32-bit `i686-impos` target. Output is wrapped in
//! `idt::without_interrupts` so a timer tick can't interleave partial
//! writes from two contexts.

use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;

const COM1: u16 = 0x3F8;

lazy_static! {
    pub static ref SERIAL1: Mutex<SerialPort> = {
        // SAFETY: 0x3F8 is the standard COM1 I/O base; constructing and
        // initializing it once at first use is the documented usage of
        // this crate.
        let mut port = unsafe { SerialPort::new(COM1) };
        port.init();
        Mutex::new(port)
    };
}

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    use core::fmt::Write;

    crate::arch::x86::idt::without_interrupts(|| {
        SERIAL1
            .lock()
            .write_fmt(args)
            .expect("serial write failed");
    });
}
