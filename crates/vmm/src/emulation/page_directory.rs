//! Software page directory.
//!
//! A flat map from page number to leaf [`PageEntry`]. Multi-level walks are irrelevant to
//! the paging core, which only needs the leaf entry for a given page.

use alloc::collections::BTreeMap;

use crate::{AddressSpace, PageNumber, PhysicalAddress};

use super::entry::PageEntry;
use super::flags::PageFlags;

/// An emulated per-process page directory.
#[derive(Default)]
pub struct PageDirectory {
    entries: spin::Mutex<BTreeMap<PageNumber, PageEntry>>,
}

impl PageDirectory {
    /// Creates an empty page directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the leaf entry for `page`, if mapped.
    pub fn entry(&self, page: PageNumber) -> Option<PageEntry> {
        self.entries.lock().get(&page).copied()
    }

    /// Returns the number of mapped pages.
    pub fn mapped_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Records an access to `page` the way the MMU would, setting the accessed bit and,
    /// for writes, the dirty bit.
    ///
    /// Returns false if the page is not mapped or a write hits a read-only mapping.
    pub fn touch(&self, page: PageNumber, write: bool) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&page) else {
            return false;
        };

        let mut flags = entry.flags();
        if write && !flags.is_writable() {
            return false;
        }

        flags.set_accessed(true);
        if write {
            flags.set_dirty(true);
        }
        entry.set_flags(flags);
        true
    }

    fn update(&self, page: PageNumber, f: impl FnOnce(&mut PageFlags)) {
        if let Some(entry) = self.entries.lock().get_mut(&page) {
            let mut flags = entry.flags();
            f(&mut flags);
            entry.set_flags(flags);
        }
    }

    fn flags(&self, page: PageNumber) -> PageFlags {
        self.entry(page)
            .map(PageEntry::flags)
            .unwrap_or_else(PageFlags::empty)
    }
}

impl AddressSpace for PageDirectory {
    fn map(&self, page: PageNumber, frame: PhysicalAddress, writable: bool) {
        let entry = PageEntry::new(frame, PageFlags::user_page(writable));
        self.entries.lock().insert(page, entry);
    }

    fn unmap(&self, page: PageNumber) {
        if let Some(mut entry) = self.entries.lock().remove(&page) {
            entry.clear();
        }
    }

    fn translate(&self, page: PageNumber) -> Option<PhysicalAddress> {
        self.entry(page).and_then(PageEntry::address)
    }

    fn is_accessed(&self, page: PageNumber) -> bool {
        self.flags(page).is_accessed()
    }

    fn set_accessed(&self, page: PageNumber, accessed: bool) {
        self.update(page, |flags| flags.set_accessed(accessed));
    }

    fn is_dirty(&self, page: PageNumber) -> bool {
        self.flags(page).is_dirty()
    }

    fn set_dirty(&self, page: PageNumber, dirty: bool) {
        self.update(page, |flags| flags.set_dirty(dirty));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: PageNumber = PageNumber::new(0x100);
    const FRAME: PhysicalAddress = PhysicalAddress::new(0x3000);

    #[test]
    fn map_then_translate() {
        let dir = PageDirectory::new();
        dir.map(PAGE, FRAME, true);
        assert_eq!(dir.translate(PAGE), Some(FRAME));
        assert_eq!(dir.mapped_count(), 1);
    }

    #[test]
    fn unmap_unmapped_page_is_harmless() {
        let dir = PageDirectory::new();
        dir.unmap(PAGE);
        assert_eq!(dir.translate(PAGE), None);
    }

    #[test]
    fn new_mapping_has_clear_bits() {
        let dir = PageDirectory::new();
        dir.map(PAGE, FRAME, true);
        assert!(!dir.is_accessed(PAGE));
        assert!(!dir.is_dirty(PAGE));
    }

    #[test]
    fn touch_sets_accessed_and_dirty() {
        let dir = PageDirectory::new();
        dir.map(PAGE, FRAME, true);

        assert!(dir.touch(PAGE, false));
        assert!(dir.is_accessed(PAGE));
        assert!(!dir.is_dirty(PAGE));

        assert!(dir.touch(PAGE, true));
        assert!(dir.is_dirty(PAGE));
    }

    #[test]
    fn touch_rejects_write_to_read_only_mapping() {
        let dir = PageDirectory::new();
        dir.map(PAGE, FRAME, false);
        assert!(!dir.touch(PAGE, true));
        assert!(!dir.is_dirty(PAGE));
        assert!(!dir.touch(PageNumber::new(1), false));
    }

    #[test]
    fn remap_clears_bits() {
        let dir = PageDirectory::new();
        dir.map(PAGE, FRAME, true);
        dir.touch(PAGE, true);
        dir.unmap(PAGE);
        assert!(!dir.is_dirty(PAGE));

        dir.map(PAGE, FRAME, true);
        assert!(!dir.is_accessed(PAGE));
        assert!(!dir.is_dirty(PAGE));
    }
}
