//! Borrowed sub-ranges of a region

use std::ptr::NonNull;

use nix::errno::Errno;
use regionmap_core::{Advice, ErrorKind, MmapError, Residency, Result, SyncFlags};

use crate::{platform, Region};

/// A sub-range of a [`Region`] that cannot outlive it
///
/// Page-granular operations act on `[offset, offset + len)`. The kernel
/// needs a page-aligned start; a view whose start is not aligned fails with
/// `EINVAL` in the operation's error variant instead of silently widening
/// to the enclosing pages. A length that ends mid-page is rounded up by the
/// kernel to cover that whole page.
pub struct RegionView<'a> {
    region: &'a mut Region,
    offset: usize,
    len: usize,
}

impl<'a> RegionView<'a> {
    pub(crate) fn new(region: &'a mut Region, offset: usize, len: usize) -> Self {
        Self {
            region,
            offset,
            len,
        }
    }

    /// Byte offset of the view inside its region
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_page_aligned(&self) -> bool {
        platform::is_page_aligned(self.offset)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.region.as_slice()[self.offset..self.offset + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.region.as_mut_slice()[self.offset..self.offset + self.len]
    }

    fn start(&self, kind: ErrorKind) -> Result<NonNull<u8>> {
        if !self.is_page_aligned() {
            return Err(MmapError::from_errno(kind, Errno::EINVAL));
        }
        let (base, _) = self.region.raw_parts();
        // SAFETY: `offset <= region.len()` was checked when the view was made.
        Ok(unsafe { NonNull::new_unchecked(base.as_ptr().add(self.offset)) })
    }

    /// Same contract as [`Region::sync`]
    pub fn sync(&mut self, flags: SyncFlags) -> Result<()> {
        let raw = flags.to_raw()?;
        let start = self.start(ErrorKind::Sync)?;
        // SAFETY: the range is live and the view holds the only borrow.
        unsafe { platform::sync(start, self.len, raw) }.map_err(MmapError::Sync)
    }

    pub fn advise(&mut self, advice: Advice) -> Result<()> {
        let raw = advice.to_raw()?;
        let start = self.start(ErrorKind::Advise)?;
        // SAFETY: the range is live and the view holds the only borrow.
        unsafe { platform::advise(start, self.len, raw) }.map_err(MmapError::Advise)
    }

    pub fn lock(&self) -> Result<()> {
        let start = self.start(ErrorKind::Resource)?;
        // SAFETY: the range lies inside the borrowed, live region.
        unsafe { platform::lock(start, self.len) }.map_err(MmapError::Resource)
    }

    pub fn unlock(&self) -> Result<()> {
        let start = self.start(ErrorKind::Resource)?;
        // SAFETY: the range lies inside the borrowed, live region.
        unsafe { platform::unlock(start, self.len) }.map_err(MmapError::Resource)
    }

    /// Residency of the pages the view touches
    pub fn residency(&self) -> Result<Residency> {
        let start = self.start(ErrorKind::Query)?;
        // SAFETY: the range lies inside the borrowed, live region.
        let raw = unsafe { platform::residency(start, self.len) }.map_err(MmapError::Query)?;
        Ok(Residency::from_raw(raw))
    }
}
