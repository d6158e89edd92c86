//! Thin re-export of the transfer kernel (§4.6.1).
//!
//! The hat kernel is shared with the MAC velocity-interpolation utility, so
//! it lives in `collaborators.rs`; this module only names it for the
//! `flip::` call sites that conceptually own it.

pub use crate::collaborators::{hat_kernel, hat_kernel_gradient};
