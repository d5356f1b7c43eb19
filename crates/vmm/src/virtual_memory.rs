//! The shared virtual memory context.

use alloc::sync::Arc;

use crate::{
    BlockDevice, Frame, FrameOwner, FrameTable, PhysicalMemory, Result, SwapManager, SwapSlot,
    VmConfig,
};

/// System-wide paging state: the frame table, swap space and configuration.
///
/// Built once at boot and shared by reference with every process.
pub struct VirtualMemory {
    frames: FrameTable,
    swap: SwapManager,
    config: VmConfig,
}

impl VirtualMemory {
    pub fn new(memory: PhysicalMemory, swap_device: Arc<dyn BlockDevice>, config: VmConfig) -> Self {
        let frames = FrameTable::new(memory, config.eviction_passes);
        let swap = SwapManager::new(swap_device);
        log::info!(
            "virtual memory ready: {} frames, {} swap slots, user space below {}",
            frames.capacity(),
            swap.capacity(),
            config.user_top
        );

        Self {
            frames,
            swap,
            config,
        }
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap(&self) -> &SwapManager {
        &self.swap
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Allocates a frame for `owner`, evicting to swap if memory is full.
    pub fn allocate_frame(&self, owner: FrameOwner, pin: bool) -> Result<Frame> {
        self.frames.allocate(owner, pin, &self.swap)
    }

    /// Reads `slot` into a new pinned frame for `owner`.
    pub fn swap_in(&self, slot: SwapSlot, owner: FrameOwner) -> Result<Frame> {
        self.swap.swap_in(&self.frames, slot, owner)
    }
}
