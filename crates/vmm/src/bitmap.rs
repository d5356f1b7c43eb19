//! Fixed-size occupancy bitmap.
//!
//! Used for the swap slot table and for the physical frame allocator. A set bit means the
//! corresponding slot or frame is occupied.

use alloc::boxed::Box;
use alloc::vec;

const BITS_PER_WORD: usize = u64::BITS as usize;

/// A fixed-capacity bitmap, all bits clear on creation.
pub struct Bitmap {
    words: Box<[u64]>,
    len: usize,
}

impl Bitmap {
    /// Creates a bitmap with `len` bits, all clear.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(BITS_PER_WORD)].into_boxed_slice(),
            len,
        }
    }

    /// Returns the number of bits in the bitmap.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns the value of bit `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn test(&self, index: usize) -> bool {
        assert!(index < self.len, "bit index {index} out of range");
        let mask = 1 << (index % BITS_PER_WORD);
        (self.words[index / BITS_PER_WORD] & mask) != 0
    }

    /// Sets bit `index` to `value`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn set(&mut self, index: usize, value: bool) {
        assert!(index < self.len, "bit index {index} out of range");
        let mask = 1 << (index % BITS_PER_WORD);
        let word = &mut self.words[index / BITS_PER_WORD];
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    /// Finds the lowest clear bit, sets it and returns its index.
    pub fn scan_and_set(&mut self) -> Option<usize> {
        let (word_index, word) = self
            .words
            .iter_mut()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)?;

        let index = word_index * BITS_PER_WORD + word.trailing_ones() as usize;
        if index >= self.len {
            // Only the padding bits of the last word are clear.
            return None;
        }

        *word |= 1 << (index % BITS_PER_WORD);
        Some(index)
    }

    /// Returns the number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Clears every bit.
    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }
}
