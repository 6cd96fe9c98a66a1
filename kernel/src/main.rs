//! Kernel binary entry point.
//!
//! All of the actual boot sequencing lives in `impos_kernel` (see
//! `arch::x86::boot::_start32` and `arch::x86::bootstrap::run`): this
//! crate only needs to link the lib in so its `global_asm!` entry point
//! and panic handler are present in the final image.

#![no_std]
#![no_main]

extern crate impos_kernel;
