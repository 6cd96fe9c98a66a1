//! Architecture-independent task context facade.

pub use crate::arch::x86::context::{new_kernel_frame, new_user_frame};
pub use crate::arch::x86::idt::RegisterFrame as Context;
