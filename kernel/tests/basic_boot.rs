//! Smoke test: the kernel boots far enough to run a test binary at all.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use impos_kernel::{exit_qemu, serial_println, test_panic_handler, QemuExitCode};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("starting basic boot test...");

    test_println();
    test_simple_assertion();

    serial_println!("all tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn test_println() {
    serial_println!("test_println output");
}

fn test_simple_assertion() {
    let x = 2 + 2;
    assert_eq!(x, 4);
}
