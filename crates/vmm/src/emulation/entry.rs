//! Page table entry for software emulation.

use crate::{PAGE_SIZE, PhysicalAddress};

use super::flags::PageFlags;

/// A single leaf page table entry.
///
/// Same layout as an x86_64 4 KiB leaf: bits 12-51 hold the frame address and the low
/// bits hold [`PageFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(usize);

impl PageEntry {
    /// Physical address mask (bits 12-51).
    const ADDRESS_MASK: usize = 0x000F_FFFF_FFFF_F000;

    /// Creates a new page table entry.
    pub fn new(address: PhysicalAddress, flags: PageFlags) -> Self {
        debug_assert!(
            address.is_aligned(PAGE_SIZE),
            "physical address must be page-aligned"
        );

        Self((address.as_usize() & Self::ADDRESS_MASK) | flags.to_raw())
    }

    /// Returns the physical address stored in this entry.
    ///
    /// Returns None if the entry is not present.
    pub fn address(self) -> Option<PhysicalAddress> {
        if self.is_present() {
            Some(PhysicalAddress::new(self.0 & Self::ADDRESS_MASK))
        } else {
            None
        }
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_raw(self.0)
    }

    /// Sets the flags for this entry, preserving the address.
    pub fn set_flags(&mut self, flags: PageFlags) {
        self.0 = (self.0 & Self::ADDRESS_MASK) | flags.to_raw();
    }

    /// Returns whether this entry is present (valid).
    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Clears this entry (sets it to zero).
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_address_and_flags() {
        let entry = PageEntry::new(PhysicalAddress::new(0x5000), PageFlags::user_page(true));
        assert_eq!(entry.address(), Some(PhysicalAddress::new(0x5000)));
        assert!(entry.flags().is_writable());
    }

    #[test]
    fn set_flags_preserves_address() {
        let mut entry = PageEntry::new(PhysicalAddress::new(0x7000), PageFlags::user_page(false));
        let mut flags = entry.flags();
        flags.set_dirty(true);
        entry.set_flags(flags);

        assert_eq!(entry.address(), Some(PhysicalAddress::new(0x7000)));
        assert!(entry.flags().is_dirty());
    }

    #[test]
    fn cleared_entry_has_no_address() {
        let mut entry = PageEntry::new(PhysicalAddress::new(0x1000), PageFlags::user_page(true));
        entry.clear();
        assert!(!entry.is_present());
        assert_eq!(entry.address(), None);
    }
}
