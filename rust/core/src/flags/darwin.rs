//! Darwin-only (macOS, iOS) mapping flags and advice

use bitflags::bitflags;
use libc::c_int;
use serde::{Deserialize, Serialize};

use crate::{ErrorKind, MmapError, Result};

bitflags! {
    /// Darwin extension part of [`crate::MapFlags`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MapFlags: u32 {
        /// Pages are the first to be reclaimed under memory pressure
        const NO_CACHE = 1 << 0;
        /// The region may hold semaphores
        const HAS_SEMAPHORE = 1 << 1;
    }
}

impl Default for MapFlags {
    fn default() -> Self {
        Self::empty()
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "macos", target_os = "ios"))] {
        fn raw_map_flag(flag: MapFlags) -> Option<c_int> {
            if flag == MapFlags::NO_CACHE {
                Some(libc::MAP_NOCACHE)
            } else if flag == MapFlags::HAS_SEMAPHORE {
                Some(libc::MAP_HASSEMAPHORE)
            } else {
                None
            }
        }
    } else {
        fn raw_map_flag(_flag: MapFlags) -> Option<c_int> {
            None
        }
    }
}

impl MapFlags {
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

/// Darwin extension variants of [`crate::Advice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Advice {
    /// Pages may be reclaimed without writing them back
    Free,
    /// Zero wired pages when the region is unmapped
    ZeroWiredPages,
}

impl Advice {
    pub fn name(self) -> &'static str {
        match self {
            Advice::Free => "MADV_FREE",
            Advice::ZeroWiredPages => "MADV_ZERO_WIRED_PAGES",
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub(crate) fn raw(self) -> Option<c_int> {
        match self {
            Advice::Free => Some(libc::MADV_FREE),
            Advice::ZeroWiredPages => Some(libc::MADV_ZERO_WIRED_PAGES),
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    pub(crate) fn raw(self) -> Option<c_int> {
        None
    }
}
