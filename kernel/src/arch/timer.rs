//! Architecture-independent timer facade.

/// Ticks elapsed since the PIT was programmed at boot.
pub fn get_ticks() -> u64 {
    crate::arch::x86::timer::ticks()
}

/// Convert a millisecond duration into a tick count.
pub fn ms_to_ticks(ms: u32) -> u64 {
    crate::arch::x86::timer::ms_to_ticks(ms)
}
