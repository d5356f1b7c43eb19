//! Physical page pool.
//!
//! Backs the frame table with a fixed number of page-sized frames. Each frame's contents
//! sit behind their own lock, so the frame table never has to hold the pool lock while
//! a frame is being filled or written to swap.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::bitmap::Bitmap;
use crate::{FrameNumber, PAGE_SIZE};

/// Contents of one physical frame.
pub type FrameContents = [u8; PAGE_SIZE];

/// A fixed pool of physical frames with a first-fit allocator.
pub struct PhysicalMemory {
    frames: Box<[spin::Mutex<FrameContents>]>,
    used: spin::Mutex<Bitmap>,
}

impl PhysicalMemory {
    /// Creates a pool of `frame_count` zeroed frames.
    pub fn new(frame_count: usize) -> Self {
        let frames: Vec<_> = (0..frame_count)
            .map(|_| spin::Mutex::new([0; PAGE_SIZE]))
            .collect();

        Self {
            frames: frames.into_boxed_slice(),
            used: spin::Mutex::new(Bitmap::new(frame_count)),
        }
    }

    /// Returns the total number of frames in the pool.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of frames not currently allocated.
    pub fn free_frames(&self) -> usize {
        self.frame_count() - self.used.lock().count_ones()
    }

    /// Allocates a zero-filled frame, or returns None if the pool is exhausted.
    pub fn allocate(&self) -> Option<FrameNumber> {
        let index = self.used.lock().scan_and_set()?;
        self.frames[index].lock().fill(0);
        Some(FrameNumber::new(index))
    }

    /// Returns a frame to the pool.
    ///
    /// # Panics
    /// Panics if the frame is not currently allocated.
    pub fn deallocate(&self, number: FrameNumber) {
        let mut used = self.used.lock();
        assert!(
            used.test(number.as_usize()),
            "double free of frame {number}"
        );
        used.set(number.as_usize(), false);
    }

    /// Locks and returns the contents of frame `number`.
    pub fn contents(&self, number: FrameNumber) -> spin::MutexGuard<'_, FrameContents> {
        self.frames[number.as_usize()].lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_until_exhausted() {
        let memory = PhysicalMemory::new(2);
        assert_eq!(memory.allocate(), Some(FrameNumber::new(0)));
        assert_eq!(memory.allocate(), Some(FrameNumber::new(1)));
        assert_eq!(memory.allocate(), None);
        assert_eq!(memory.free_frames(), 0);
    }

    #[test]
    fn reallocated_frame_is_zeroed() {
        let memory = PhysicalMemory::new(1);
        let frame = memory.allocate().unwrap();
        memory.contents(frame).fill(0xEE);
        memory.deallocate(frame);

        let frame = memory.allocate().unwrap();
        assert!(memory.contents(frame).iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let memory = PhysicalMemory::new(1);
        let frame = memory.allocate().unwrap();
        memory.deallocate(frame);
        memory.deallocate(frame);
    }
}
