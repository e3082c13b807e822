//! Page residency records returned by `mincore(2)`

use std::ops::Index;

use bitflags::bitflags;

bitflags! {
    /// State of one page at query time
    ///
    /// Only [`PageState::INCORE`] is reported everywhere. The remaining bits
    /// are filled in on Darwin and always clear elsewhere; use the
    /// `Option`-returning accessors to tell "not set" from "not reported".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageState: u8 {
        const INCORE = 0x1;
        const REFERENCED = 0x2;
        const MODIFIED = 0x4;
        const REFERENCED_OTHER = 0x8;
        const MODIFIED_OTHER = 0x10;
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "macos", target_os = "ios"))] {
        const REPORTED_BITS: u8 = 0x1f;
    } else {
        // Linux leaves every bit but the lowest undefined.
        const REPORTED_BITS: u8 = 0x1;
    }
}

impl PageState {
    /// Decode one byte of the `mincore(2)` vector
    pub fn from_raw(raw: u8) -> Self {
        Self::from_bits_truncate(raw & REPORTED_BITS)
    }

    pub fn is_resident(self) -> bool {
        self.contains(Self::INCORE)
    }

    /// `None` where the platform does not track references
    pub fn referenced(self) -> Option<bool> {
        Self::reports(Self::REFERENCED).then(|| self.contains(Self::REFERENCED))
    }

    pub fn modified(self) -> Option<bool> {
        Self::reports(Self::MODIFIED).then(|| self.contains(Self::MODIFIED))
    }

    pub fn referenced_by_other(self) -> Option<bool> {
        Self::reports(Self::REFERENCED_OTHER).then(|| self.contains(Self::REFERENCED_OTHER))
    }

    pub fn modified_by_other(self) -> Option<bool> {
        Self::reports(Self::MODIFIED_OTHER).then(|| self.contains(Self::MODIFIED_OTHER))
    }

    fn reports(bit: Self) -> bool {
        REPORTED_BITS & bit.bits() != 0
    }
}

/// Point-in-time residency snapshot, one entry per page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Residency {
    pages: Vec<PageState>,
}

impl Residency {
    pub fn from_raw(raw: Vec<u8>) -> Self {
        Self {
            pages: raw.into_iter().map(PageState::from_raw).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn resident_count(&self) -> usize {
        self.pages.iter().filter(|page| page.is_resident()).count()
    }

    pub fn all_resident(&self) -> bool {
        self.pages.iter().all(|page| page.is_resident())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PageState> {
        self.pages.iter()
    }

    pub fn as_slice(&self) -> &[PageState] {
        &self.pages
    }
}

impl Index<usize> for Residency {
    type Output = PageState;

    fn index(&self, page: usize) -> &PageState {
        &self.pages[page]
    }
}

impl<'a> IntoIterator for &'a Residency {
    type Item = &'a PageState;
    type IntoIter = std::slice::Iter<'a, PageState>;

    fn into_iter(self) -> Self::IntoIter {
        self.pages.iter()
    }
}

impl IntoIterator for Residency {
    type Item = PageState;
    type IntoIter = std::vec::IntoIter<PageState>;

    fn into_iter(self) -> Self::IntoIter {
        self.pages.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_residency_counts() {
        let residency = Residency::from_raw(vec![1, 0, 1, 1]);
        assert_eq!(residency.len(), 4);
        assert_eq!(residency.resident_count(), 3);
        assert!(!residency.all_resident());
        assert!(residency[0].is_resident());
        assert!(!residency[1].is_resident());

        let resident: Vec<bool> = residency.iter().map(|page| page.is_resident()).collect();
        assert_eq!(resident, vec![true, false, true, true]);
    }

    #[test]
    fn test_empty_residency() {
        let residency = Residency::from_raw(Vec::new());
        assert!(residency.is_empty());
        assert!(residency.all_resident());
    }

    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    #[test]
    fn test_undefined_bits_masked() {
        let page = PageState::from_raw(0xff);
        assert_eq!(page, PageState::INCORE);
        assert_eq!(page.referenced(), None);
        assert_eq!(page.modified(), None);
        assert_eq!(page.modified_by_other(), None);
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    #[test]
    fn test_darwin_reference_bits() {
        let page = PageState::from_raw(0x1 | 0x4);
        assert!(page.is_resident());
        assert_eq!(page.referenced(), Some(false));
        assert_eq!(page.modified(), Some(true));
        assert_eq!(page.referenced_by_other(), Some(false));
    }
}
