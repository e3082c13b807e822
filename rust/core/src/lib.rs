//! regionmap - Core Module
//!
//! Platform flag tables, residency records, mapping configuration and the
//! error taxonomy shared by the region handle. Nothing in this crate calls
//! into the kernel.

pub mod config;
pub mod error;
pub mod flags;
pub mod residency;

pub use config::*;
pub use error::*;
pub use flags::*;
pub use residency::*;

/// Current crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
