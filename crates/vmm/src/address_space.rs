//! Hardware address space interface.
//!
//! The paging core never touches page tables directly. Each process supplies an
//! implementation of [`AddressSpace`] (the kernel's page directory, or the software
//! `emulation::PageDirectory` under emulation) that installs and clears
//! virtual-to-physical mappings and exposes the accessed and dirty bits.
//!
//! Implementations must be safe to call from any thread: eviction running on behalf of
//! one process clears mappings and accessed bits in another process's address space.

use crate::{PageNumber, PhysicalAddress};

/// A per-process virtual-to-physical mapping.
pub trait AddressSpace: Send + Sync {
    /// Maps `page` to the frame at `frame`, writable if `writable` is set.
    ///
    /// The accessed and dirty bits of the new mapping are clear.
    fn map(&self, page: PageNumber, frame: PhysicalAddress, writable: bool);

    /// Clears the mapping for `page`, if any.
    fn unmap(&self, page: PageNumber);

    /// Returns the frame `page` is mapped to, if any.
    fn translate(&self, page: PageNumber) -> Option<PhysicalAddress>;

    /// Returns the accessed bit of the mapping for `page` (false if unmapped).
    fn is_accessed(&self, page: PageNumber) -> bool;

    /// Sets the accessed bit of the mapping for `page`. Ignored if unmapped.
    fn set_accessed(&self, page: PageNumber, accessed: bool);

    /// Returns the dirty bit of the mapping for `page` (false if unmapped).
    fn is_dirty(&self, page: PageNumber) -> bool;

    /// Sets the dirty bit of the mapping for `page`. Ignored if unmapped.
    fn set_dirty(&self, page: PageNumber, dirty: bool);
}
