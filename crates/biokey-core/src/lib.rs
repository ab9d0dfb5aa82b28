//! Shared constants, types and errors for the biokey enrollment stack.
//!
//! Everything in here is consumed by more than one crate: the sensor adapter
//! maps vendor result codes through [`ResultCode`], the store converts its
//! failures into [`Error`], and the session layer reports progress against
//! [`constants::DEFAULT_TARGET_SAMPLES`] and [`constants::MATCH_THRESHOLD`].

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
