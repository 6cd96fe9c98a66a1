//! Architecture support.
//!
//! ImposOS targets 32-bit protected-mode x86 only; there is a single
//! backend module (`x86`) instead of the `#[cfg(target_arch)]` fan-out a
//! multi-platform kernel would need. `timer`, `context`, `barriers`, and
//! `entropy` are thin arch-independent facades kept for symmetry with the
//! rest of the kernel, which calls through them rather than `x86::*`
//! directly.

pub mod x86;

pub mod barriers;
pub mod context;
pub mod entropy;
pub mod timer;
