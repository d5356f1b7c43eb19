//! Frame handles and ownership records.

use alloc::sync::Arc;
use core::fmt;

use crate::{FrameNumber, PageNumber, PhysicalAddress, ProcessId, SupplementalPageTable};

/// A handle to an allocated physical frame.
///
/// The generation changes every time the frame number is handed out, so a handle kept
/// across an eviction or a free no longer refers to the frame's new occupant and is
/// rejected by [`FrameTable::pin`](crate::FrameTable::pin).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
    number: FrameNumber,
    generation: u32,
}

impl Frame {
    pub(crate) const fn new(number: FrameNumber, generation: u32) -> Self {
        Self { number, generation }
    }

    /// Returns the physical frame number.
    pub const fn number(self) -> FrameNumber {
        self.number
    }

    /// Returns the generation this handle was issued for.
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Returns the physical address of the start of the frame.
    pub const fn address(self) -> PhysicalAddress {
        self.number.start()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({}#{})", self.number, self.generation)
    }
}

/// The virtual page a frame is backing.
#[derive(Clone)]
pub struct FrameOwner {
    table: Arc<SupplementalPageTable>,
    page: PageNumber,
}

impl FrameOwner {
    pub fn new(table: Arc<SupplementalPageTable>, page: PageNumber) -> Self {
        Self { table, page }
    }

    pub fn process(&self) -> ProcessId {
        self.table.process()
    }

    pub fn page(&self) -> PageNumber {
        self.page
    }

    pub(crate) fn table(&self) -> &Arc<SupplementalPageTable> {
        &self.table
    }
}

impl fmt::Debug for FrameOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameOwner")
            .field("process", &self.process())
            .field("page", &self.page)
            .finish()
    }
}

/// Frame table bookkeeping for one allocated frame.
#[derive(Debug)]
pub(crate) struct FrameRecord {
    pub owner: FrameOwner,
    /// Outstanding pins. The frame is only an eviction candidate at zero.
    pub pins: u32,
}
