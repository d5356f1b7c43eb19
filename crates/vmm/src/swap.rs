//! Swap space.
//!
//! Swap is a headerless array of page-sized slots on a block device. Slot `i` occupies
//! sectors `[i * SECTORS_PER_PAGE, (i + 1) * SECTORS_PER_PAGE)`. Occupancy is tracked in
//! a bitmap that is only touched under the swap lock, and the lock is held across the
//! sector transfers so a slot is never reused while its content is in flight.

use alloc::sync::Arc;
use core::fmt;

use crate::bitmap::Bitmap;
use crate::{
    BlockDevice, Frame, FrameContents, FrameNumber, FrameOwner, FrameTable, PhysicalMemory,
    Result, SECTOR_SIZE, SECTORS_PER_PAGE, VmError,
};

/// Index of a page-sized slot in swap space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(usize);

impl SwapSlot {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }

    /// Returns the first device sector of the slot.
    pub const fn first_sector(self) -> usize {
        self.0 * SECTORS_PER_PAGE
    }

    /// Returns the slot starting at `sector`.
    ///
    /// # Panics
    /// Panics if `sector` is not the first sector of a slot.
    pub const fn from_sector(sector: usize) -> Self {
        assert!(
            sector % SECTORS_PER_PAGE == 0,
            "sector is not slot-aligned"
        );
        Self(sector / SECTORS_PER_PAGE)
    }
}

impl fmt::Debug for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SwapSlot({})", self.0)
    }
}

/// Manages the swap slots of a single block device.
pub struct SwapManager {
    device: Arc<dyn BlockDevice>,
    slots: spin::Mutex<Bitmap>,
}

impl SwapManager {
    /// Creates a swap manager over `device` with every slot free.
    ///
    /// Sectors beyond the last whole slot are unused.
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let capacity = device.sector_count() / SECTORS_PER_PAGE;
        log::info!(
            "swap: {capacity} slots ({} sectors)",
            device.sector_count()
        );

        Self {
            device,
            slots: spin::Mutex::new(Bitmap::new(capacity)),
        }
    }

    /// Returns the total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns the number of occupied slots.
    pub fn used_slots(&self) -> usize {
        self.slots.lock().count_ones()
    }

    /// Returns whether `slot` currently holds a page.
    pub fn is_occupied(&self, slot: SwapSlot) -> bool {
        self.slots.lock().test(slot.index())
    }

    /// Writes the contents of frame `number` to the first free slot.
    ///
    /// # Errors
    /// Returns [`VmError::SwapExhausted`] if every slot is occupied.
    pub fn swap_out(&self, memory: &PhysicalMemory, number: FrameNumber) -> Result<SwapSlot> {
        let mut slots = self.slots.lock();
        let Some(index) = slots.scan_and_set() else {
            log::warn!("swap exhausted ({} slots)", slots.len());
            return Err(VmError::SwapExhausted);
        };

        let slot = SwapSlot::new(index);
        let contents = memory.contents(number);
        for (i, sector) in contents.chunks_exact(SECTOR_SIZE).enumerate() {
            self.device.write_sector(slot.first_sector() + i, sector);
        }

        log::debug!("frame {number} -> {slot:?}");
        Ok(slot)
    }

    /// Reads `slot` into a newly allocated frame for `owner` and frees the slot.
    ///
    /// The frame is returned pinned; the caller unpins it after installing the mapping.
    ///
    /// # Errors
    /// Returns [`VmError::SwapExhausted`] if making room for the frame required an
    /// eviction that could not be written to swap.
    ///
    /// # Panics
    /// Panics if `slot` is not occupied.
    pub fn swap_in(&self, frames: &FrameTable, slot: SwapSlot, owner: FrameOwner) -> Result<Frame> {
        let frame = frames.allocate(owner, true, self)?;

        let mut slots = self.slots.lock();
        assert!(slots.test(slot.index()), "swapping in free slot {slot:?}");

        let mut contents = frames.memory().contents(frame.number());
        for (i, sector) in contents.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            self.device.read_sector(slot.first_sector() + i, sector);
        }
        slots.set(slot.index(), false);

        log::debug!("{slot:?} -> frame {}", frame.number());
        Ok(frame)
    }

    /// Copies `slot` into `buf`. The slot stays occupied.
    ///
    /// # Panics
    /// Panics if `slot` is not occupied.
    pub fn read_slot(&self, slot: SwapSlot, buf: &mut FrameContents) {
        let slots = self.slots.lock();
        assert!(slots.test(slot.index()), "reading free slot {slot:?}");

        for (i, sector) in buf.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            self.device.read_sector(slot.first_sector() + i, sector);
        }
        log::trace!("{slot:?} read in place");
    }

    /// Releases `slot` without reading it.
    ///
    /// # Panics
    /// Panics if `slot` is not occupied.
    pub fn delete_slot(&self, slot: SwapSlot) {
        let mut slots = self.slots.lock();
        assert!(slots.test(slot.index()), "deleting free slot {slot:?}");
        slots.set(slot.index(), false);
        log::debug!("{slot:?} released");
    }

    /// Releases every slot at shutdown, logging any that are still occupied.
    pub fn finalize(&self) {
        let mut slots = self.slots.lock();
        let leaked = slots.count_ones();
        if leaked > 0 {
            log::warn!("swap: {leaked} slots still occupied at shutdown");
        }
        slots.clear_all();
    }
}
