//! Process-wide page locking
//!
//! These act on the whole address space, not on any one [`crate::Region`],
//! and therefore contend with every mapping in the process.

use nix::sys::mman::{mlockall, munlockall, MlockAllFlags};
use regionmap_core::{ErrorKind, LockAllFlags, MmapError, Result};
use tracing::debug;

/// Lock current and/or future mappings into physical memory
pub fn lock_all(flags: LockAllFlags) -> Result<()> {
    if !LockAllFlags::all().contains(flags) {
        return Err(MmapError::unsupported(ErrorKind::Resource, "unknown lock-all bits"));
    }
    let mut raw = MlockAllFlags::empty();
    if flags.contains(LockAllFlags::CURRENT) {
        raw |= MlockAllFlags::MCL_CURRENT;
    }
    if flags.contains(LockAllFlags::FUTURE) {
        raw |= MlockAllFlags::MCL_FUTURE;
    }
    mlockall(raw).map_err(MmapError::Resource)?;
    debug!("Locked all pages ({:?})", flags);
    Ok(())
}

/// Undo [`lock_all`], including the `FUTURE` request
pub fn unlock_all() -> Result<()> {
    munlockall().map_err(MmapError::Resource)?;
    debug!("Unlocked all pages");
    Ok(())
}
