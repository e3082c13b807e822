//! regionmap - Region Module
//!
//! Owned handles to memory-mapped regions of virtual address space, their
//! borrowed sub-views, and the process-wide lock controls. All kernel calls
//! live in [`platform`].

pub mod lock;
pub mod platform;
pub mod region;
pub mod view;

pub use lock::*;
pub use region::*;
pub use view::*;

pub use platform::{align_down, align_up, is_page_aligned, page_count, page_size};
