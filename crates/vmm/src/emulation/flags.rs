//! Page table entry flags for software emulation.

/// Page table entry flags for software emulation.
///
/// Bit positions follow x86_64 so that traces read the same as on hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageFlags(usize);

impl PageFlags {
    /// Present bit (bit 0).
    const PRESENT: usize = 1 << 0;

    /// Writable bit (bit 1).
    const WRITABLE: usize = 1 << 1;

    /// User-accessible bit (bit 2).
    const USER: usize = 1 << 2;

    /// Accessed bit (bit 5), set by the MMU on any access.
    const ACCESSED: usize = 1 << 5;

    /// Dirty bit (bit 6), set by the MMU on a write.
    const DIRTY: usize = 1 << 6;

    /// Mask of all defined flag bits.
    pub(crate) const MASK: usize =
        Self::PRESENT | Self::WRITABLE | Self::USER | Self::ACCESSED | Self::DIRTY;

    /// Creates empty page flags (page not present).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates page flags from a raw value, dropping undefined bits.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw & Self::MASK)
    }

    /// Returns the raw value of these flags.
    pub const fn to_raw(self) -> usize {
        self.0
    }

    /// Flags for a present user page.
    pub const fn user_page(writable: bool) -> Self {
        let mut raw = Self::PRESENT | Self::USER;
        if writable {
            raw |= Self::WRITABLE;
        }
        Self(raw)
    }

    fn assign(&mut self, bit: usize, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    /// Returns whether the present bit is set.
    pub fn is_present(self) -> bool {
        (self.0 & Self::PRESENT) != 0
    }

    /// Returns whether the writable bit is set.
    pub fn is_writable(self) -> bool {
        (self.0 & Self::WRITABLE) != 0
    }

    /// Returns whether the user-accessible bit is set.
    pub fn is_user(self) -> bool {
        (self.0 & Self::USER) != 0
    }

    /// Returns whether the accessed bit is set.
    pub fn is_accessed(self) -> bool {
        (self.0 & Self::ACCESSED) != 0
    }

    /// Sets or clears the accessed bit.
    pub fn set_accessed(&mut self, accessed: bool) {
        self.assign(Self::ACCESSED, accessed);
    }

    /// Returns whether the dirty bit is set.
    pub fn is_dirty(self) -> bool {
        (self.0 & Self::DIRTY) != 0
    }

    /// Sets or clears the dirty bit.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.assign(Self::DIRTY, dirty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_page_flags() {
        let flags = PageFlags::user_page(false);
        assert!(flags.is_present());
        assert!(flags.is_user());
        assert!(!flags.is_writable());
        assert!(PageFlags::user_page(true).is_writable());
    }

    #[test]
    fn accessed_and_dirty_toggle_independently() {
        let mut flags = PageFlags::user_page(true);
        flags.set_accessed(true);
        assert!(flags.is_accessed());
        assert!(!flags.is_dirty());

        flags.set_dirty(true);
        flags.set_accessed(false);
        assert!(!flags.is_accessed());
        assert!(flags.is_dirty());
        assert!(flags.is_present());
    }

    #[test]
    fn from_raw_drops_unknown_bits() {
        assert_eq!(PageFlags::from_raw(1 << 11).to_raw(), 0);
    }
}
