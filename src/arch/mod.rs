//! Platform layer. This tree targets the one reference platform the spec's
//! bring-up layer covers (x86_64/PC); the `Platform` trait in `context.rs`
//! is the seam a second architecture would implement against.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;
