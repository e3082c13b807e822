//! Flag tables shared by every platform
//!
//! Each concept (protection, mapping flags, sync flags, advice, lock-all
//! flags) has one type. The portable subset is defined here; values that
//! only exist on one platform family live in the [`linux`] and [`darwin`]
//! namespaces and are resolved to raw OS values only on that family.
//! Resolving them anywhere else yields [`MmapError::Unsupported`].

use std::ops::{BitOr, BitOrAssign};

use bitflags::bitflags;
use libc::c_int;
use serde::{Deserialize, Serialize};

use crate::{ErrorKind, MmapError, Result};

pub mod darwin;
pub mod linux;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Platform family this build resolves flags for
        pub const PLATFORM: &str = "linux";
    } else if #[cfg(any(target_os = "macos", target_os = "ios"))] {
        /// Platform family this build resolves flags for
        pub const PLATFORM: &str = "darwin";
    } else {
        /// Platform family this build resolves flags for
        pub const PLATFORM: &str = std::env::consts::OS;
    }
}

/// Fail with [`MmapError::Unsupported`] unless every set bit has a name
pub(crate) fn reject_unknown(known: bool, op: ErrorKind, what: &'static str) -> Result<()> {
    if known {
        Ok(())
    } else {
        Err(MmapError::unsupported(op, what))
    }
}

bitflags! {
    /// Access permitted on mapped pages
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Protection: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

impl Protection {
    /// Pages cannot be accessed at all
    pub const NONE: Self = Self::empty();
    pub const READ_WRITE: Self = Self::READ.union(Self::WRITE);

    /// Resolve to `PROT_*` bits, failing if any bit has no name
    pub fn to_raw(self) -> Result<c_int> {
        reject_unknown(
            Self::all().contains(self),
            ErrorKind::Protect,
            "unknown protection bits",
        )?;
        let mut raw = libc::PROT_NONE;
        if self.contains(Self::READ) {
            raw |= libc::PROT_READ;
        }
        if self.contains(Self::WRITE) {
            raw |= libc::PROT_WRITE;
        }
        if self.contains(Self::EXEC) {
            raw |= libc::PROT_EXEC;
        }
        Ok(raw)
    }
}

impl Default for Protection {
    fn default() -> Self {
        Self::READ_WRITE
    }
}

bitflags! {
    /// Mapping flags every Unix platform understands
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PortableMapFlags: u32 {
        const ANONYMOUS = 1 << 0;
        const FILE = 1 << 1;
        const FIXED = 1 << 2;
        const PRIVATE = 1 << 3;
        const SHARED = 1 << 4;
    }
}

impl Default for PortableMapFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl PortableMapFlags {
    pub fn to_raw(self) -> Result<c_int> {
        reject_unknown(
            Self::all().contains(self),
            ErrorKind::Mapping,
            "unknown mapping flag bits",
        )?;
        let table = [
            (Self::ANONYMOUS, libc::MAP_ANON),
            (Self::FILE, libc::MAP_FILE),
            (Self::FIXED, libc::MAP_FIXED),
            (Self::PRIVATE, libc::MAP_PRIVATE),
            (Self::SHARED, libc::MAP_SHARED),
        ];
        Ok(table
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .fold(0, |raw, (_, value)| raw | value))
    }
}

/// Complete set of mapping flags: the portable part plus each platform's
/// extension part.
///
/// ```
/// use regionmap_core::{linux, MapFlags};
///
/// let flags = MapFlags::SHARED | linux::MapFlags::POPULATE;
/// assert!(flags.contains(MapFlags::SHARED));
/// assert_eq!(flags.linux(), linux::MapFlags::POPULATE);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct MapFlags {
    portable: PortableMapFlags,
    linux: linux::MapFlags,
    darwin: darwin::MapFlags,
}

impl MapFlags {
    pub const ANONYMOUS: Self = Self::from_portable(PortableMapFlags::ANONYMOUS);
    pub const FILE: Self = Self::from_portable(PortableMapFlags::FILE);
    pub const FIXED: Self = Self::from_portable(PortableMapFlags::FIXED);
    pub const PRIVATE: Self = Self::from_portable(PortableMapFlags::PRIVATE);
    pub const SHARED: Self = Self::from_portable(PortableMapFlags::SHARED);

    pub const fn empty() -> Self {
        Self::from_portable(PortableMapFlags::empty())
    }

    const fn from_portable(portable: PortableMapFlags) -> Self {
        Self {
            portable,
            linux: linux::MapFlags::empty(),
            darwin: darwin::MapFlags::empty(),
        }
    }

    pub fn portable(&self) -> PortableMapFlags {
        self.portable
    }

    pub fn linux(&self) -> linux::MapFlags {
        self.linux
    }

    pub fn darwin(&self) -> darwin::MapFlags {
        self.darwin
    }

    pub fn is_empty(&self) -> bool {
        self.portable.is_empty() && self.linux.is_empty() && self.darwin.is_empty()
    }

    /// Check that every flag of `other` is also set here
    pub fn contains(&self, other: impl Into<MapFlags>) -> bool {
        let other = other.into();
        self.portable.contains(other.portable)
            && self.linux.contains(other.linux)
            && self.darwin.contains(other.darwin)
    }

    pub fn insert(&mut self, other: impl Into<MapFlags>) {
        *self |= other.into();
    }

    pub fn is_anonymous(&self) -> bool {
        self.portable.contains(PortableMapFlags::ANONYMOUS)
    }

    /// Same flags with anonymous backing forced on
    pub fn with_anonymous(mut self) -> Self {
        self.portable.insert(PortableMapFlags::ANONYMOUS);
        self
    }

    /// Resolve to the value passed to `mmap(2)`
    pub fn to_raw(self) -> Result<c_int> {
        Ok(self.portable.to_raw()? | self.linux.to_raw()? | self.darwin.to_raw()?)
    }
}

impl From<PortableMapFlags> for MapFlags {
    fn from(portable: PortableMapFlags) -> Self {
        Self::from_portable(portable)
    }
}

impl From<linux::MapFlags> for MapFlags {
    fn from(linux: linux::MapFlags) -> Self {
        Self {
            linux,
            ..Self::empty()
        }
    }
}

impl From<darwin::MapFlags> for MapFlags {
    fn from(darwin: darwin::MapFlags) -> Self {
        Self {
            darwin,
            ..Self::empty()
        }
    }
}

impl<T: Into<MapFlags>> BitOr<T> for MapFlags {
    type Output = MapFlags;

    fn bitor(mut self, rhs: T) -> MapFlags {
        self |= rhs;
        self
    }
}

impl<T: Into<MapFlags>> BitOrAssign<T> for MapFlags {
    fn bitor_assign(&mut self, rhs: T) {
        let rhs = rhs.into();
        self.portable |= rhs.portable;
        self.linux |= rhs.linux;
        self.darwin |= rhs.darwin;
    }
}

bitflags! {
    /// How `msync(2)` flushes and what it guarantees
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SyncFlags: u32 {
        /// Schedule the flush and return
        const ASYNC = 1 << 0;
        /// Return once the flush is durable
        const SYNC = 1 << 1;
        /// Drop cached copies so later reads come from the backing store
        const INVALIDATE = 1 << 2;
    }
}

impl SyncFlags {
    pub fn to_raw(self) -> Result<c_int> {
        reject_unknown(
            Self::all().contains(self),
            ErrorKind::Sync,
            "unknown sync flag bits",
        )?;
        let mut raw = 0;
        if self.contains(Self::ASYNC) {
            raw |= libc::MS_ASYNC;
        }
        if self.contains(Self::SYNC) {
            raw |= libc::MS_SYNC;
        }
        if self.contains(Self::INVALIDATE) {
            raw |= libc::MS_INVALIDATE;
        }
        Ok(raw)
    }
}

bitflags! {
    /// Process-wide `mlockall(2)` scope
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct LockAllFlags: u32 {
        /// Pages mapped right now
        const CURRENT = 1 << 0;
        /// Pages mapped from now on
        const FUTURE = 1 << 1;
    }
}

/// Access-pattern hint for `madvise(2)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Advice {
    Normal,
    Random,
    Sequential,
    WillNeed,
    DontNeed,
    Linux(linux::Advice),
    Darwin(darwin::Advice),
}

impl Advice {
    pub fn to_raw(self) -> Result<c_int> {
        let raw = match self {
            Advice::Normal => libc::MADV_NORMAL,
            Advice::Random => libc::MADV_RANDOM,
            Advice::Sequential => libc::MADV_SEQUENTIAL,
            Advice::WillNeed => libc::MADV_WILLNEED,
            Advice::DontNeed => libc::MADV_DONTNEED,
            Advice::Linux(advice) => advice
                .raw()
                .ok_or_else(|| MmapError::unsupported(ErrorKind::Advise, advice.name()))?,
            Advice::Darwin(advice) => advice
                .raw()
                .ok_or_else(|| MmapError::unsupported(ErrorKind::Advise, advice.name()))?,
        };
        Ok(raw)
    }

    /// Check if the kernel may discard or rewrite page contents
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            Advice::DontNeed
                | Advice::Linux(linux::Advice::Remove | linux::Advice::HwPoison)
                | Advice::Darwin(darwin::Advice::Free | darwin::Advice::ZeroWiredPages)
        )
    }
}

impl From<linux::Advice> for Advice {
    fn from(advice: linux::Advice) -> Self {
        Advice::Linux(advice)
    }
}

impl From<darwin::Advice> for Advice {
    fn from(advice: darwin::Advice) -> Self {
        Advice::Darwin(advice)
    }
}
