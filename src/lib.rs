//! regionmap
//!
//! Memory-mapped regions of virtual address space, file-backed or anonymous,
//! with explicit control over syncing, paging advice, residency queries,
//! page protection and swap locking.
//!
//! ```
//! use regionmap::prelude::*;
//!
//! let mut region = Region::map_anonymous(page_size(), Protection::READ_WRITE, MapFlags::PRIVATE)?;
//! region[0] = 1;
//! region.advise(Advice::WillNeed)?;
//! assert_eq!(region.residency()?.len(), 1);
//! region.unmap()?;
//! # Ok::<(), regionmap::MmapError>(())
//! ```

pub use regionmap_core::*;
pub use regionmap_region::*;

/// Re-export common types
pub mod prelude {
    pub use crate::{
        lock_all, page_size, unlock_all, Advice, Backing, LockAllFlags, MapConfig, MapFlags,
        MmapError, PageState, Protection, Region, RegionView, Residency, Result, SyncFlags,
    };
    pub use regionmap_core::{darwin, linux};
}
