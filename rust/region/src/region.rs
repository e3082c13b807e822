//! Mapped region handle

use std::mem::ManuallyDrop;
use std::num::NonZeroUsize;
use std::ops::{Bound, Deref, DerefMut, RangeBounds};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::ptr::NonNull;

use libc::off_t;
use nix::errno::Errno;
use regionmap_core::{
    Advice, ErrorKind, MapConfig, MapFlags, MmapError, Protection, Residency, Result, SyncFlags,
};
use tracing::{debug, warn};

use crate::platform;
use crate::RegionView;

/// What a region is mapped from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    Anonymous,
    /// The descriptor is only borrowed for the `mmap` call; the mapping stays
    /// valid after it is closed.
    File { fd: RawFd, offset: u64 },
}

/// A live mapping of virtual address space
///
/// The bytes are reachable through `Deref`/`DerefMut` for the whole lifetime
/// of the handle. Accessing pages whose [`Protection`] forbids it faults at
/// the OS boundary (usually `SIGSEGV`), exactly like raw memory.
///
/// Dropping the handle unmaps it. [`Region::unmap`] does the same but
/// reports the kernel's answer, and consumes the handle so nothing can use it
/// afterwards:
///
/// ```compile_fail
/// use regionmap_core::{MapFlags, Protection};
/// use regionmap_region::Region;
///
/// let region = Region::map_anonymous(4096, Protection::READ_WRITE, MapFlags::PRIVATE).unwrap();
/// region.unmap().unwrap();
/// region.unmap().unwrap(); // use of moved value
/// ```
#[derive(Debug)]
pub struct Region {
    ptr: NonNull<u8>,
    len: usize,
    protection: Protection,
    flags: MapFlags,
    backing: Backing,
}

impl Region {
    /// Map `len` bytes of `file` starting at `offset`
    ///
    /// `offset` must be a multiple of [`crate::page_size`]. The file must be
    /// open with access compatible with `protection` (and with `SHARED`
    /// writes, opened for writing).
    pub fn map_file<F: AsFd>(
        file: F,
        offset: u64,
        len: usize,
        protection: Protection,
        flags: MapFlags,
    ) -> Result<Self> {
        let fd = file.as_fd().as_raw_fd();
        // SAFETY: no address is requested, so no existing mapping is replaced.
        unsafe { Self::map_raw(None, fd, offset, len, protection, flags) }
    }

    /// Map `len` bytes of zero-filled memory with no backing file
    ///
    /// `ANONYMOUS` is always added to `flags`.
    pub fn map_anonymous(len: usize, protection: Protection, flags: MapFlags) -> Result<Self> {
        // SAFETY: no address is requested, so no existing mapping is replaced.
        unsafe { Self::map_raw(None, -1, 0, len, protection, flags.with_anonymous()) }
    }

    /// Like [`Region::map_file`], placed at `addr`
    ///
    /// Without `FIXED` the address is only a hint.
    ///
    /// # Safety
    /// With `FIXED`, whatever was mapped at `[addr, addr + len)` is silently
    /// replaced, including memory other code still references.
    pub unsafe fn map_file_at<F: AsFd>(
        addr: NonZeroUsize,
        file: F,
        offset: u64,
        len: usize,
        protection: Protection,
        flags: MapFlags,
    ) -> Result<Self> {
        let fd = file.as_fd().as_raw_fd();
        Self::map_raw(Some(addr), fd, offset, len, protection, flags)
    }

    /// Like [`Region::map_anonymous`], placed at `addr`
    ///
    /// # Safety
    /// Same contract as [`Region::map_file_at`].
    pub unsafe fn map_anonymous_at(
        addr: NonZeroUsize,
        len: usize,
        protection: Protection,
        flags: MapFlags,
    ) -> Result<Self> {
        Self::map_raw(Some(addr), -1, 0, len, protection, flags.with_anonymous())
    }

    /// Map a file as described by `config`, then apply its advice and lock
    pub fn map_file_with<F: AsFd>(file: F, offset: u64, len: usize, config: &MapConfig) -> Result<Self> {
        Self::map_file(file, offset, len, config.protection, config.flags)?.configure(config)
    }

    /// Map anonymous memory as described by `config`, then apply its advice and lock
    pub fn map_anonymous_with(len: usize, config: &MapConfig) -> Result<Self> {
        Self::map_anonymous(len, config.protection, config.flags)?.configure(config)
    }

    unsafe fn map_raw(
        addr: Option<NonZeroUsize>,
        fd: RawFd,
        offset: u64,
        len: usize,
        protection: Protection,
        flags: MapFlags,
    ) -> Result<Self> {
        let size = NonZeroUsize::new(len).ok_or(MmapError::Mapping(Errno::EINVAL))?;
        if offset % platform::page_size() as u64 != 0 {
            return Err(MmapError::Mapping(Errno::EINVAL));
        }
        let raw_offset = off_t::try_from(offset).map_err(|_| MmapError::Mapping(Errno::EOVERFLOW))?;
        let raw_flags = flags.to_raw()?;
        let raw_protection = protection
            .to_raw()
            .map_err(|_| MmapError::unsupported(ErrorKind::Mapping, "unknown protection bits"))?;

        let ptr = platform::map(addr, size, raw_protection, raw_flags, fd, raw_offset)
            .map_err(MmapError::Mapping)?;

        let backing = if flags.is_anonymous() {
            Backing::Anonymous
        } else {
            Backing::File { fd, offset }
        };
        debug!("Mapped {} bytes at {:p} ({:?}, {:?})", len, ptr, protection, backing);

        Ok(Self {
            ptr,
            len,
            protection,
            flags,
            backing,
        })
    }

    fn configure(mut self, config: &MapConfig) -> Result<Self> {
        if let Some(advice) = config.advice {
            if let Err(e) = self.advise(advice) {
                warn!("Ignoring advice {:?} for region at {:p}: {}", advice, self.ptr, e);
            }
        }
        // On failure `self` drops here and the region is unmapped.
        if config.lock {
            self.lock()?;
        }
        Ok(self)
    }

    /// Length in bytes, fixed at creation
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`: zero-length mappings are rejected
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of pages spanned, counting a partial last page
    pub fn page_count(&self) -> usize {
        platform::page_count(self.len)
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    pub fn backing(&self) -> Backing {
        self.backing
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping covers `len` bytes until `self` is gone.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` makes this the only view.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Borrow a sub-range for page-granular operations
    ///
    /// Page operations on a view require its start to be page aligned; see
    /// [`RegionView`]. Panics if `range` is out of bounds, like slicing.
    pub fn view<R: RangeBounds<usize>>(&mut self, range: R) -> RegionView<'_> {
        let start = match range.start_bound() {
            Bound::Included(&start) => Some(start),
            Bound::Excluded(&start) => start.checked_add(1),
            Bound::Unbounded => Some(0),
        };
        let end = match range.end_bound() {
            Bound::Included(&end) => end.checked_add(1),
            Bound::Excluded(&end) => Some(end),
            Bound::Unbounded => Some(self.len),
        };
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) if start <= end && end <= self.len => (start, end),
            _ => panic!(
                "view {:?}..{:?} out of bounds for region of {} bytes",
                range.start_bound(),
                range.end_bound(),
                self.len
            ),
        };
        RegionView::new(self, start, end - start)
    }

    /// Flush modifications to the backing store
    ///
    /// With `SyncFlags::ASYNC` this returns once the flush is scheduled; with
    /// `SyncFlags::SYNC` once it is durable.
    ///
    /// Takes `&mut self` because `SyncFlags::INVALIDATE` lets the kernel
    /// refetch pages from the backing store, and on some platforms that
    /// discards modified private pages.
    pub fn sync(&mut self, flags: SyncFlags) -> Result<()> {
        let raw = flags.to_raw()?;
        // SAFETY: the whole mapping is live and `&mut self` excludes borrows.
        unsafe { platform::sync(self.ptr, self.len, raw) }.map_err(MmapError::Sync)?;
        debug!("Synced {} bytes at {:p} ({:?})", self.len, self.ptr, flags);
        Ok(())
    }

    /// Hint the kernel about the expected access pattern
    ///
    /// Takes `&mut self` because some advice (`DontNeed` and friends) may
    /// zero or discard page contents.
    pub fn advise(&mut self, advice: Advice) -> Result<()> {
        let raw = advice.to_raw()?;
        // SAFETY: the whole mapping is live and `&mut self` excludes borrows.
        unsafe { platform::advise(self.ptr, self.len, raw) }.map_err(MmapError::Advise)
    }

    /// Keep every page resident and out of swap
    pub fn lock(&self) -> Result<()> {
        // SAFETY: the whole mapping is live.
        unsafe { platform::lock(self.ptr, self.len) }.map_err(MmapError::Resource)?;
        debug!("Locked {} bytes at {:p}", self.len, self.ptr);
        Ok(())
    }

    pub fn unlock(&self) -> Result<()> {
        // SAFETY: the whole mapping is live.
        unsafe { platform::unlock(self.ptr, self.len) }.map_err(MmapError::Resource)
    }

    /// Change the access permissions of every page
    pub fn protect(&mut self, protection: Protection) -> Result<()> {
        let raw = protection.to_raw()?;
        // SAFETY: the whole mapping is live and `&mut self` excludes borrows.
        unsafe { platform::protect(self.ptr, self.len, raw) }
            .map_err(MmapError::Protect)?;
        debug!("Protection of {:p} changed {:?} -> {:?}", self.ptr, self.protection, protection);
        self.protection = protection;
        Ok(())
    }

    /// Snapshot which pages are resident right now
    pub fn residency(&self) -> Result<Residency> {
        // SAFETY: the whole mapping is live.
        let raw = unsafe { platform::residency(self.ptr, self.len) }.map_err(MmapError::Query)?;
        Ok(Residency::from_raw(raw))
    }

    /// Release the mapping, reporting whether the kernel accepted it
    pub fn unmap(self) -> Result<()> {
        let region = ManuallyDrop::new(self);
        // SAFETY: `region` is never dropped or used again.
        unsafe { platform::unmap(region.ptr, region.len) }.map_err(MmapError::Unmap)?;
        debug!("Unmapped {} bytes at {:p}", region.len, region.ptr);
        Ok(())
    }

    pub(crate) fn raw_parts(&self) -> (NonNull<u8>, usize) {
        (self.ptr, self.len)
    }
}

impl Deref for Region {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl DerefMut for Region {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl AsRef<[u8]> for Region {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for Region {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: the handle is going away, nothing can reach the bytes.
        if let Err(e) = unsafe { platform::unmap(self.ptr, self.len) } {
            warn!("Failed to unmap region at {:p}: {}", self.ptr, e);
        }
    }
}

// Safety: Region owns its mapping; the pointer is not tied to a thread
unsafe impl Send for Region {}
// Safety: shared references only read; mutation requires &mut Region
unsafe impl Sync for Region {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_size;
    use regionmap_core::{darwin, linux};
    use std::io::{Read, Seek, SeekFrom};
    use tracing_test::traced_test;

    fn anonymous(pages: usize) -> Region {
        Region::map_anonymous(pages * page_size(), Protection::READ_WRITE, MapFlags::PRIVATE)
            .unwrap()
    }

    #[test]
    fn test_anonymous_is_zeroed() {
        let region = anonymous(3);
        assert_eq!(region.len(), 3 * page_size());
        assert_eq!(region.page_count(), 3);
        assert!(!region.is_empty());
        assert!(region.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_anonymous_flag_forced() {
        let region = Region::map_anonymous(page_size(), Protection::READ, MapFlags::PRIVATE).unwrap();
        assert!(region.flags().is_anonymous());
        assert!(region.flags().contains(MapFlags::PRIVATE));
        assert_eq!(region.backing(), Backing::Anonymous);
        assert_eq!(region.protection(), Protection::READ);
    }

    #[test]
    fn test_write_then_read() {
        let mut region = anonymous(2);
        region[0] = 0xAB;
        region[page_size()..page_size() + 4].copy_from_slice(b"page");
        assert_eq!(region.as_slice()[0], 0xAB);
        assert_eq!(&region[page_size()..page_size() + 4], b"page");
        region.unmap().unwrap();
    }

    #[test]
    fn test_zero_length_rejected() {
        let err = Region::map_anonymous(0, Protection::READ, MapFlags::PRIVATE).unwrap_err();
        assert_eq!(err, MmapError::Mapping(Errno::EINVAL));
    }

    #[test]
    fn test_unaligned_offset_rejected() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(2 * page_size() as u64).unwrap();

        let err = Region::map_file(&file, 1, page_size(), Protection::READ, MapFlags::SHARED)
            .unwrap_err();
        assert_eq!(err, MmapError::Mapping(Errno::EINVAL));
        assert_eq!(err.kind(), ErrorKind::Mapping);
    }

    #[test]
    fn test_read_only_descriptor_rejects_shared_write() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(page_size() as u64).unwrap();
        let read_only = std::fs::File::open(file.path()).unwrap();

        let err = Region::map_file(
            &read_only,
            0,
            page_size(),
            Protection::READ_WRITE,
            MapFlags::SHARED,
        )
        .unwrap_err();
        assert_eq!(err, MmapError::Mapping(Errno::EACCES));
    }

    #[test]
    fn test_file_backed_offset() {
        let mut file = tempfile::tempfile().unwrap();
        let page = page_size();
        let mut contents = vec![0u8; 2 * page];
        contents[page..page + 6].copy_from_slice(b"second");
        std::io::Write::write_all(&mut file, &contents).unwrap();

        let region = Region::map_file(&file, page as u64, page, Protection::READ, MapFlags::PRIVATE)
            .unwrap();
        assert_eq!(&region[..6], b"second");
        assert_eq!(
            region.backing(),
            Backing::File {
                fd: file.as_raw_fd(),
                offset: page as u64
            }
        );
    }

    #[test]
    fn test_private_writes_stay_private() {
        let mut file = tempfile::tempfile().unwrap();
        file.set_len(page_size() as u64).unwrap();

        let mut region =
            Region::map_file(&file, 0, page_size(), Protection::READ_WRITE, MapFlags::PRIVATE)
                .unwrap();
        region[..5].copy_from_slice(b"local");
        drop(region);

        let mut head = [0u8; 5];
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_exact(&mut head).unwrap();
        assert_eq!(head, [0u8; 5]);
    }

    #[test]
    fn test_protect_updates_state() {
        let mut region = anonymous(1);
        region[0] = 7;
        region.protect(Protection::READ).unwrap();
        assert_eq!(region.protection(), Protection::READ);
        assert_eq!(region[0], 7);

        region.protect(Protection::READ_WRITE).unwrap();
        region[0] = 8;
        assert_eq!(region[0], 8);
    }

    #[test]
    fn test_protect_rejected_keeps_state() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(page_size() as u64).unwrap();
        let read_only = std::fs::File::open(file.path()).unwrap();

        let mut region =
            Region::map_file(&read_only, 0, page_size(), Protection::READ, MapFlags::SHARED)
                .unwrap();
        let err = region.protect(Protection::READ_WRITE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protect);
        #[cfg(target_os = "linux")]
        assert_eq!(err, MmapError::Protect(Errno::EACCES));
        assert_eq!(region.protection(), Protection::READ);
        assert_eq!(region[0], 0);
    }

    #[test]
    fn test_protect_unnamed_bits_rejected() {
        let mut region = anonymous(1);
        let err = region
            .protect(Protection::READ | Protection::from_bits_retain(0x80))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protect);
        assert!(err.is_unsupported());
        assert_eq!(region.protection(), Protection::READ_WRITE);
    }

    #[test]
    fn test_map_unnamed_bits_rejected() {
        let err = Region::map_anonymous(
            page_size(),
            Protection::READ | Protection::from_bits_retain(0x80),
            MapFlags::PRIVATE,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Mapping);
        assert!(err.is_unsupported());

        let err = Region::map_anonymous(
            page_size(),
            Protection::READ,
            MapFlags::PRIVATE | linux::MapFlags::from_bits_retain(1 << 20),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Mapping);
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_unnamed_bits_from_config_rejected() {
        let config = MapConfig::from_toml_str(
            r#"
            protection = "READ | 0x80"

            [flags]
            portable = "PRIVATE"
            "#,
        )
        .unwrap();
        let err = Region::map_anonymous_with(page_size(), &config).unwrap_err();
        assert!(err.is_unsupported());

        let config = MapConfig::from_toml_str(
            r#"
            [flags]
            portable = "PRIVATE"
            linux = "0x100000"
            "#,
        )
        .unwrap();
        let err = Region::map_anonymous_with(page_size(), &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Mapping);
        assert!(err.is_unsupported());
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_view_inclusive_end_overflow_panics() {
        let mut region = anonymous(1);
        region.view(0..=usize::MAX);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_view_excluded_start_overflow_panics() {
        let mut region = anonymous(1);
        region.view((Bound::Excluded(usize::MAX), Bound::Unbounded));
    }

    #[test]
    fn test_residency_after_touch() {
        let pages = 4;
        let mut region = anonymous(pages);
        let residency = region.residency().unwrap();
        assert_eq!(residency.len(), pages);

        for page in 0..pages {
            region[page * page_size()] = 1;
        }

        // Residency is a snapshot; give the kernel a few chances.
        let resident = (0..5).any(|_| {
            let residency = region.residency().unwrap();
            assert_eq!(residency.len(), pages);
            residency.all_resident()
        });
        assert!(resident);
    }

    #[test]
    fn test_residency_partial_page() {
        let region =
            Region::map_anonymous(page_size() + 1, Protection::READ_WRITE, MapFlags::PRIVATE)
                .unwrap();
        assert_eq!(region.residency().unwrap().len(), 2);
    }

    #[test]
    fn test_lock_unlock() {
        let region = anonymous(1);
        match region.lock() {
            Ok(()) => region.unlock().unwrap(),
            // Unprivileged runners may have a tiny RLIMIT_MEMLOCK.
            Err(err) => assert_eq!(err.kind(), ErrorKind::Resource),
        }
    }

    #[test]
    fn test_advise_portable() {
        let mut region = anonymous(2);
        region.advise(Advice::Sequential).unwrap();
        region.advise(Advice::WillNeed).unwrap();
        region.advise(Advice::Normal).unwrap();
    }

    #[test]
    fn test_dont_need_discards_anonymous_pages() {
        let mut region = anonymous(1);
        region[0] = 42;
        region.advise(Advice::DontNeed).unwrap();
        // Private anonymous pages come back zero-filled on Linux.
        #[cfg(target_os = "linux")]
        assert_eq!(region[0], 0);
    }

    #[test]
    fn test_sync_async() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(page_size() as u64).unwrap();
        let mut region =
            Region::map_file(&file, 0, page_size(), Protection::READ_WRITE, MapFlags::SHARED)
                .unwrap();
        region[0] = 1;
        region.sync(SyncFlags::ASYNC).unwrap();
        region.sync(SyncFlags::SYNC | SyncFlags::INVALIDATE).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sync_conflicting_flags_rejected_by_kernel() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(page_size() as u64).unwrap();
        let mut region =
            Region::map_file(&file, 0, page_size(), Protection::READ_WRITE, MapFlags::SHARED)
                .unwrap();
        let err = region.sync(SyncFlags::ASYNC | SyncFlags::SYNC).unwrap_err();
        assert_eq!(err, MmapError::Sync(Errno::EINVAL));
        assert!(!err.is_unsupported());
    }

    #[test]
    fn test_sync_unnamed_bits_rejected() {
        let mut region = anonymous(1);
        let err = region
            .sync(SyncFlags::SYNC | SyncFlags::from_bits_retain(1 << 8))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Sync);
        assert!(err.is_unsupported());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_foreign_platform_flag_rejected() {
        let err = Region::map_anonymous(
            page_size(),
            Protection::READ,
            MapFlags::PRIVATE | darwin::MapFlags::NO_CACHE,
        )
        .unwrap_err();
        assert!(err.is_unsupported());
        assert_eq!(err.kind(), ErrorKind::Mapping);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_foreign_platform_advice_rejected() {
        let mut region = anonymous(1);
        let err = region.advise(darwin::Advice::Free.into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Advise);
        assert!(err.is_recoverable());
    }

    #[cfg(target_os = "linux")]
    #[traced_test]
    #[test]
    fn test_config_advice_failure_is_logged() {
        let config = MapConfig {
            flags: MapFlags::PRIVATE,
            advice: Some(Advice::Darwin(darwin::Advice::Free)),
            ..MapConfig::default()
        };
        let region = Region::map_anonymous_with(page_size(), &config).unwrap();
        assert_eq!(region.protection(), Protection::READ_WRITE);
        assert!(logs_contain("Ignoring advice"));
    }

    #[test]
    fn test_config_applies_advice() {
        let config = MapConfig {
            flags: MapFlags::PRIVATE,
            advice: Some(Advice::Random),
            ..MapConfig::default()
        };
        let region = Region::map_anonymous_with(2 * page_size(), &config).unwrap();
        assert!(region.flags().is_anonymous());
        assert_eq!(region.len(), 2 * page_size());
    }
}
