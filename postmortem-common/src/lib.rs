//! Shared types used across the post-mortem debugger core.
//!
//! This crate exposes:
//!
//!  - [`ByteView`]: direct memory access to binary data, mmapped or in-memory.
//!  - [`Arch`] / [`CpuFamily`]: architecture identification.
//!  - [`RegisterMap`] / [`RegisterTable`]: the register/ABI abstraction shared
//!    by the unwinder and the expression evaluator.

#![warn(missing_docs)]

mod byteview;
mod regs;
mod types;

pub use crate::byteview::*;
pub use crate::regs::*;
pub use crate::types::*;
