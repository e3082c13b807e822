//! Linux-only mapping flags and advice
//!
//! These resolve to raw values only when building for Linux. Kernel version
//! notes give the first release that accepts the value; older kernels
//! reject it with `EINVAL`, which surfaces as a regular OS error.

use bitflags::bitflags;
use libc::c_int;
use serde::{Deserialize, Serialize};

use crate::{ErrorKind, MmapError, Result};

bitflags! {
    /// Linux extension part of [`crate::MapFlags`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MapFlags: u32 {
        /// Place the mapping in the first 2GB (x86-64 only)
        const BIT32 = 1 << 0;
        const DENY_WRITE = 1 << 1;
        const EXECUTABLE = 1 << 2;
        /// Stack-like mapping that grows downward
        const GROWS_DOWN = 1 << 3;
        /// Back with huge pages (2.6.32)
        const HUGE_TLB = 1 << 4;
        /// Lock pages like `mlock(2)` (2.5.37)
        const LOCKED = 1 << 5;
        /// With POPULATE, skip read-ahead (2.5.46)
        const NON_BLOCK = 1 << 6;
        /// Do not reserve swap space
        const NO_RESERVE = 1 << 7;
        /// Prefault page tables on map (2.5.46)
        const POPULATE = 1 << 8;
        /// Address suitable for a thread stack (2.6.27)
        const STACK = 1 << 9;
        /// Skip zeroing anonymous pages; needs a kernel built for it (2.6.33)
        const UNINITIALIZED = 1 << 10;
    }
}

impl Default for MapFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Value from `include/uapi/asm-generic/mman-common.h`; not exported by libc.
#[cfg(target_os = "linux")]
const MAP_UNINITIALIZED: c_int = 0x400_0000;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        fn raw_map_flag(flag: MapFlags) -> Option<c_int> {
            if flag == MapFlags::BIT32 {
                return map_32bit();
            }
            let table = [
                (MapFlags::DENY_WRITE, libc::MAP_DENYWRITE),
                (MapFlags::EXECUTABLE, libc::MAP_EXECUTABLE),
                (MapFlags::GROWS_DOWN, libc::MAP_GROWSDOWN),
                (MapFlags::HUGE_TLB, libc::MAP_HUGETLB),
                (MapFlags::LOCKED, libc::MAP_LOCKED),
                (MapFlags::NON_BLOCK, libc::MAP_NONBLOCK),
                (MapFlags::NO_RESERVE, libc::MAP_NORESERVE),
                (MapFlags::POPULATE, libc::MAP_POPULATE),
                (MapFlags::STACK, libc::MAP_STACK),
                (MapFlags::UNINITIALIZED, MAP_UNINITIALIZED),
            ];
            table
                .iter()
                .find(|(candidate, _)| *candidate == flag)
                .map(|(_, raw)| *raw)
        }

        #[cfg(target_arch = "x86_64")]
        fn map_32bit() -> Option<c_int> {
            Some(libc::MAP_32BIT)
        }

        #[cfg(not(target_arch = "x86_64"))]
        fn map_32bit() -> Option<c_int> {
            None
        }
    } else {
        fn raw_map_flag(_flag: MapFlags) -> Option<c_int> {
            None
        }
    }
}

impl MapFlags {
    /// Resolve to `MAP_*` bits, failing for any flag this target lacks
    pub fn to_raw(self) -> Result<c_int> {
        super::reject_unknown(
            Self::all().contains(self),
            ErrorKind::Mapping,
            "unknown mapping flag bits",
        )?;
        let mut raw = 0;
        for (name, flag) in self.iter_names() {
            raw |= raw_map_flag(flag)
                .ok_or_else(|| MmapError::unsupported(ErrorKind::Mapping, name))?;
        }
        Ok(raw)
    }
}

/// Linux extension variants of [`crate::Advice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Advice {
    /// Free the range and its backing store (2.6.16)
    Remove,
    /// Do not share the range with a forked child (2.6.16)
    DontFork,
    /// Undo `DontFork` (2.6.16)
    DoFork,
    /// Simulate a hardware memory error; needs CAP_SYS_ADMIN (2.6.32)
    HwPoison,
    /// Allow KSM to merge identical pages (2.6.32)
    Mergeable,
    /// Undo `Mergeable` (2.6.32)
    Unmergeable,
    /// Soft-offline the pages; needs CAP_SYS_ADMIN (2.6.33)
    SoftOffline,
    /// Enable transparent huge pages (2.6.38)
    HugePage,
    /// Disable transparent huge pages (2.6.38)
    NoHugePage,
    /// Exclude from core dumps (3.4)
    DontDump,
    /// Undo `DontDump` (3.4)
    DoDump,
}

impl Advice {
    pub fn name(self) -> &'static str {
        match self {
            Advice::Remove => "MADV_REMOVE",
            Advice::DontFork => "MADV_DONTFORK",
            Advice::DoFork => "MADV_DOFORK",
            Advice::HwPoison => "MADV_HWPOISON",
            Advice::Mergeable => "MADV_MERGEABLE",
            Advice::Unmergeable => "MADV_UNMERGEABLE",
            Advice::SoftOffline => "MADV_SOFT_OFFLINE",
            Advice::HugePage => "MADV_HUGEPAGE",
            Advice::NoHugePage => "MADV_NOHUGEPAGE",
            Advice::DontDump => "MADV_DONTDUMP",
            Advice::DoDump => "MADV_DODUMP",
        }
    }

    #[cfg(target_os = "linux")]
    pub(crate) fn raw(self) -> Option<c_int> {
        let raw = match self {
            Advice::Remove => libc::MADV_REMOVE,
            Advice::DontFork => libc::MADV_DONTFORK,
            Advice::DoFork => libc::MADV_DOFORK,
            Advice::HwPoison => libc::MADV_HWPOISON,
            Advice::Mergeable => libc::MADV_MERGEABLE,
            Advice::Unmergeable => libc::MADV_UNMERGEABLE,
            Advice::SoftOffline => libc::MADV_SOFT_OFFLINE,
            Advice::HugePage => libc::MADV_HUGEPAGE,
            Advice::NoHugePage => libc::MADV_NOHUGEPAGE,
            Advice::DontDump => libc::MADV_DONTDUMP,
            Advice::DoDump => libc::MADV_DODUMP,
        };
        Some(raw)
    }

    #[cfg(not(target_os = "linux"))]
    pub(crate) fn raw(self) -> Option<c_int> {
        None
    }
}
