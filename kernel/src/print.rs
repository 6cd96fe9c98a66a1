//! `print!`/`println!`, routed to the COM1 console.
//!
//! There is no VGA text buffer on this target; boot banners and the panic
//! screen share the same serial port as `log::info!` and `serial_print!`.

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::serial::_serial_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
