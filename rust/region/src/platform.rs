//! Platform-specific implementations for mapped regions
//!
//! Thin `unsafe` wrappers over the `mman.h` calls. They take the pointer and
//! length exactly as the kernel sees them and report failures as `Errno`;
//! callers decide which [`regionmap_core::MmapError`] variant a failure
//! becomes.

use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::os::fd::RawFd;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use libc::{c_int, off_t};
use nix::errno::Errno;

static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Size of a virtual-memory page in bytes
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        assert!(size > 0, "sysconf(_SC_PAGESIZE) failed");
        size as usize
    })
}

pub fn is_page_aligned(value: usize) -> bool {
    value % page_size() == 0
}

/// Round down to a page boundary
pub fn align_down(value: usize) -> usize {
    value & !(page_size() - 1)
}

/// Round up to a page boundary
pub fn align_up(value: usize) -> usize {
    let page_size = page_size();
    (value + page_size - 1) & !(page_size - 1)
}

/// Number of pages needed to cover `len` bytes
pub fn page_count(len: usize) -> usize {
    let page_size = page_size();
    (len + page_size - 1) / page_size
}

/// # Safety
/// With `MAP_FIXED` in `flags`, any existing mapping at `addr` is replaced.
pub(crate) unsafe fn map(
    addr: Option<NonZeroUsize>,
    len: NonZeroUsize,
    prot: c_int,
    flags: c_int,
    fd: RawFd,
    offset: off_t,
) -> nix::Result<NonNull<u8>> {
    let hint = addr.map_or(ptr::null_mut(), |addr| addr.get() as *mut c_void);
    let ptr = libc::mmap(hint, len.get(), prot, flags, fd, offset);
    if ptr == libc::MAP_FAILED {
        return Err(Errno::last());
    }
    NonNull::new(ptr.cast::<u8>()).ok_or(Errno::EINVAL)
}

/// # Safety
/// Nothing may touch `[ptr, ptr + len)` afterwards.
pub(crate) unsafe fn unmap(ptr: NonNull<u8>, len: usize) -> nix::Result<()> {
    Errno::result(libc::munmap(ptr.as_ptr().cast(), len)).map(drop)
}

/// # Safety
/// `[ptr, ptr + len)` must lie inside a live mapping.
pub(crate) unsafe fn sync(ptr: NonNull<u8>, len: usize, flags: c_int) -> nix::Result<()> {
    Errno::result(libc::msync(ptr.as_ptr().cast(), len, flags)).map(drop)
}

/// # Safety
/// `[ptr, ptr + len)` must lie inside a live mapping, and destructive advice
/// must not race with live borrows of the range.
pub(crate) unsafe fn advise(ptr: NonNull<u8>, len: usize, advice: c_int) -> nix::Result<()> {
    Errno::result(libc::madvise(ptr.as_ptr().cast(), len, advice)).map(drop)
}

/// # Safety
/// `[ptr, ptr + len)` must lie inside a live mapping.
pub(crate) unsafe fn lock(ptr: NonNull<u8>, len: usize) -> nix::Result<()> {
    Errno::result(libc::mlock(ptr.as_ptr().cast_const().cast(), len)).map(drop)
}

/// # Safety
/// `[ptr, ptr + len)` must lie inside a live mapping.
pub(crate) unsafe fn unlock(ptr: NonNull<u8>, len: usize) -> nix::Result<()> {
    Errno::result(libc::munlock(ptr.as_ptr().cast_const().cast(), len)).map(drop)
}

/// # Safety
/// `[ptr, ptr + len)` must lie inside a live mapping with no outstanding
/// borrows that the new protection would invalidate.
pub(crate) unsafe fn protect(ptr: NonNull<u8>, len: usize, prot: c_int) -> nix::Result<()> {
    Errno::result(libc::mprotect(ptr.as_ptr().cast(), len, prot)).map(drop)
}

/// Residency bytes for `[ptr, ptr + len)`, one per page
///
/// # Safety
/// `[ptr, ptr + len)` must lie inside a live mapping.
pub(crate) unsafe fn residency(ptr: NonNull<u8>, len: usize) -> nix::Result<Vec<u8>> {
    let mut vec = vec![0u8; page_count(len)];
    if vec.is_empty() {
        return Ok(vec);
    }
    Errno::result(libc::mincore(ptr.as_ptr().cast::<c_void>(), len, vec.as_mut_ptr().cast()))?;
    Ok(vec)
}
