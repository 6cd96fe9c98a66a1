//! no_std test framework: serial output plus a QEMU exit-code device.
//!
//! Bare-metal integration tests under `kernel/tests/` and the
//! `#[cfg(test)]` modules sprinkled through `mm`/`sched`/`fs`/`net`/
//! `crypto` both funnel through [`Testable`] and [`exit_qemu`].

use core::{panic::PanicInfo, time::Duration};

use crate::{error::KernelError, serial_print, serial_println};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub trait Testable {
    fn run(&self) -> Result<(), KernelError>;
}

impl<T> Testable for T
where
    T: Fn() -> Result<(), KernelError>,
{
    fn run(&self) -> Result<(), KernelError> {
        serial_print!("{}...\t", core::any::type_name::<T>());
        match self() {
            Ok(()) => {
                serial_println!("[ok]");
                Ok(())
            }
            Err(e) => {
                serial_println!("[failed]: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub fn test_runner(tests: &[&dyn Testable]) -> ! {
    serial_println!("Running {} tests", tests.len());
    let mut passed = 0;
    let mut failed = 0;

    for test in tests {
        match test.run() {
            Ok(()) => passed += 1,
            Err(e) => {
                failed += 1;
                serial_println!("[ERROR] Test failed: {}", e);
            }
        }
    }

    serial_println!("\nTest Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        exit_qemu(QemuExitCode::Success);
    } else {
        exit_qemu(QemuExitCode::Failed);
    }
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failed);
}

/// Exit QEMU via its `isa-debug-exit` device at port 0xf4.
pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    #[cfg(target_os = "none")]
    // SAFETY: port 0xf4 is the `isa-debug-exit` device configured for
    // these kernel test binaries (see each `kernel/tests/*.rs`'s QEMU
    // invocation); writing to it is documented to terminate the VM.
    unsafe {
        crate::arch::x86::port::outl(0xf4, exit_code as u32);
        core::hint::unreachable_unchecked();
    }

    #[cfg(not(target_os = "none"))]
    {
        let _ = exit_code;
        loop {
            core::hint::spin_loop();
        }
    }
}

/// Current cycle count, for benchmarking and test timeouts.
#[inline(always)]
pub fn read_timestamp() -> u64 {
    crate::arch::entropy::read_timestamp()
}

#[inline(always)]
pub fn cycles_to_ns(cycles: u64) -> u64 {
    const CPU_FREQ_GHZ: u64 = 2;
    cycles / CPU_FREQ_GHZ
}

#[derive(Debug, Clone, Copy)]
pub struct BenchmarkResult {
    pub name: &'static str,
    pub iterations: u64,
    pub total_time: Duration,
    pub avg_time_ns: u64,
    pub min_time_ns: u64,
    pub max_time_ns: u64,
}

pub struct BenchmarkRunner {
    iterations: u64,
    warmup_iterations: u64,
}

impl Default for BenchmarkRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchmarkRunner {
    pub const fn new() -> Self {
        Self {
            iterations: 1000,
            warmup_iterations: 100,
        }
    }

    pub fn run_benchmark<F>(&self, name: &'static str, mut f: F) -> BenchmarkResult
    where
        F: FnMut(),
    {
        serial_print!("{}...\t", name);

        for _ in 0..self.warmup_iterations {
            f();
        }

        let mut min_cycles = u64::MAX;
        let mut max_cycles = 0u64;
        let mut total_cycles = 0u64;

        for _ in 0..self.iterations {
            let start = read_timestamp();
            f();
            let end = read_timestamp();
            let elapsed = end.saturating_sub(start);

            total_cycles += elapsed;
            min_cycles = min_cycles.min(elapsed);
            max_cycles = max_cycles.max(elapsed);
        }

        let avg_cycles = total_cycles / self.iterations;
        let result = BenchmarkResult {
            name,
            iterations: self.iterations,
            total_time: Duration::from_nanos(cycles_to_ns(total_cycles)),
            avg_time_ns: cycles_to_ns(avg_cycles),
            min_time_ns: cycles_to_ns(min_cycles),
            max_time_ns: cycles_to_ns(max_cycles),
        };

        serial_println!("[ok] avg: {} ns", result.avg_time_ns);
        result
    }
}

#[macro_export]
macro_rules! kernel_test {
    ($name:ident, $test:expr) => {
        #[test_case]
        const $name: &dyn $crate::test_framework::Testable =
            &|| -> Result<(), $crate::error::KernelError> { $test };
    };
}

#[macro_export]
macro_rules! test_module {
    ($name:ident, $($test_name:ident => $test_fn:expr),* $(,)?) => {
        #[cfg(test)]
        mod $name {
            use super::*;

            $(
                kernel_test!($test_name, $test_fn);
            )*
        }
    };
}

#[macro_export]
macro_rules! kernel_assert {
    ($cond:expr) => {
        if !$cond {
            serial_println!("Assertion failed: {}", stringify!($cond));
            panic!("Assertion failed");
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            serial_println!($($arg)*);
            panic!("Assertion failed");
        }
    };
}

#[macro_export]
macro_rules! kernel_assert_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            serial_println!(
                "Assertion failed: {} != {}\n  left: {:?}\n right: {:?}",
                stringify!($left),
                stringify!($right),
                $left,
                $right
            );
            panic!("Assertion failed: not equal");
        }
    };
}

#[macro_export]
macro_rules! kernel_assert_ne {
    ($left:expr, $right:expr) => {
        if $left == $right {
            serial_println!(
                "Assertion failed: {} == {}\n  left: {:?}\n right: {:?}",
                stringify!($left),
                stringify!($right),
                $left,
                $right
            );
            panic!("Assertion failed: equal");
        }
    };
}
