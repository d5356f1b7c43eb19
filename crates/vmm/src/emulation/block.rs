//! In-memory block device.

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{BlockDevice, SECTOR_SIZE};

/// A RAM-backed block device with transfer counters.
pub struct MemoryBlockDevice {
    data: spin::Mutex<Vec<u8>>,
    sector_count: usize,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBlockDevice {
    /// Creates a zeroed device of `sector_count` sectors.
    pub fn new(sector_count: usize) -> Self {
        Self {
            data: spin::Mutex::new(vec![0; sector_count * SECTOR_SIZE]),
            sector_count,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Returns the number of sectors read so far.
    pub fn sectors_read(&self) -> usize {
        self.reads.load(Ordering::Acquire)
    }

    /// Returns the number of sectors written so far.
    pub fn sectors_written(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }

    /// Returns a copy of the bytes in `sectors` consecutive sectors starting at `first`.
    pub fn snapshot(&self, first: usize, sectors: usize) -> Vec<u8> {
        let start = first * SECTOR_SIZE;
        self.data.lock()[start..start + sectors * SECTOR_SIZE].to_vec()
    }

    fn range(&self, sector: usize, len: usize) -> core::ops::Range<usize> {
        assert!(
            sector < self.sector_count,
            "sector {sector} beyond device end ({} sectors)",
            self.sector_count
        );
        assert_eq!(len, SECTOR_SIZE, "transfers are exactly one sector");
        let start = sector * SECTOR_SIZE;
        start..start + SECTOR_SIZE
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn sector_count(&self) -> usize {
        self.sector_count
    }

    fn read_sector(&self, sector: usize, buf: &mut [u8]) {
        let range = self.range(sector, buf.len());
        buf.copy_from_slice(&self.data.lock()[range]);
        self.reads.fetch_add(1, Ordering::AcqRel);
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) {
        let range = self.range(sector, buf.len());
        self.data.lock()[range].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_sector() {
        let device = MemoryBlockDevice::new(4);
        let data = [0xAB; SECTOR_SIZE];
        device.write_sector(2, &data);

        let mut buf = [0; SECTOR_SIZE];
        device.read_sector(2, &mut buf);
        assert_eq!(buf, data);
        assert_eq!(device.sectors_written(), 1);
        assert_eq!(device.sectors_read(), 1);
    }

    #[test]
    fn other_sectors_untouched() {
        let device = MemoryBlockDevice::new(4);
        device.write_sector(1, &[0x11; SECTOR_SIZE]);
        assert!(device.snapshot(0, 1).iter().all(|&b| b == 0));
        assert!(device.snapshot(2, 2).iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic(expected = "beyond device end")]
    fn out_of_range_sector_panics() {
        let device = MemoryBlockDevice::new(1);
        let mut buf = [0; SECTOR_SIZE];
        device.read_sector(1, &mut buf);
    }
}
