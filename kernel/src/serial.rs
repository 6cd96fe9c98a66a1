//! Serial console facade and `log` crate backend.
//!
//! User-visible boot banners and the panic screen go through
//! [`crate::print`]'s `print!`/`println!` macros; structured diagnostic
//! output (`log::info!` and friends, used throughout `mm`, `sched`, `fs`,
//! `net`) is routed here to the same COM1 port via a small [`log::Log`]
//! implementation, so both end up on `-serial stdio` under QEMU.

use core::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::arch::x86::serial as port;

/// Write formatted arguments to COM1, matching `println!`'s entry point so
/// `serial_print!`/`serial_println!` (used by the bare-metal test harness)
/// share the same underlying port as the logger.
pub fn _serial_print(args: fmt::Arguments) {
    port::_print(args);
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_serial_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*))
    };
}

struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        _serial_print(format_args!(
            "[{:<5} {}] {}\n",
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Install the serial-backed `log` facade. Must run after
/// [`crate::arch::x86::serial`]'s COM1 port is reachable, i.e. any time
/// after `arch::init()` — the port is lazily initialized on first write, so
/// this can safely run before that too.
pub fn init(filter: LevelFilter) {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(filter))
        .expect("logger already installed");
}
