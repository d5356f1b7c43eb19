//! Interfaces to the block and file collaborators.
//!
//! Both are synchronous: a call blocks the calling thread until the transfer completes.

use alloc::sync::Arc;

/// A sector-addressed block device used as the swap store.
pub trait BlockDevice: Send + Sync {
    /// Returns the device size in sectors.
    fn sector_count(&self) -> usize;

    /// Reads sector `sector` into `buf`, which is exactly [`SECTOR_SIZE`](crate::SECTOR_SIZE) bytes.
    fn read_sector(&self, sector: usize, buf: &mut [u8]);

    /// Writes `buf`, which is exactly [`SECTOR_SIZE`](crate::SECTOR_SIZE) bytes, to sector `sector`.
    fn write_sector(&self, sector: usize, buf: &[u8]);
}

/// An open file that can back lazily loaded pages.
pub trait File: Send + Sync {
    /// Returns the file length in bytes.
    fn len(&self) -> usize;

    /// Returns true if the file is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, returning the number read.
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize;

    /// Writes up to `buf.len()` bytes starting at `offset`, returning the number written.
    fn write_at(&self, buf: &[u8], offset: usize) -> usize;

    /// Opens an independent handle to the same underlying file.
    ///
    /// The new handle stays valid after this one is closed.
    fn reopen(&self) -> Arc<dyn File>;
}
