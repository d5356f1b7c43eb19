//! Per-process virtual memory.

use alloc::sync::Arc;
use core::fmt;

use crate::{
    AddressSpace, File, FileMappings, Frame, MappingId, PageFault, Result,
    SupplementalPageTable, VirtualAddress, VirtualMemory, uaccess,
};

/// Identifies the process that owns a page.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u32);

impl ProcessId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessId({})", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// The paging state of one process: its supplemental page table and file mappings.
///
/// Call [`ProcessMemory::exit`] before the process's address space is destroyed.
pub struct ProcessMemory {
    pages: Arc<SupplementalPageTable>,
    mappings: FileMappings,
}

impl ProcessMemory {
    pub fn new(id: ProcessId, space: Arc<dyn AddressSpace>) -> Self {
        Self {
            pages: SupplementalPageTable::new(id, space),
            mappings: FileMappings::new(),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.pages.process()
    }

    pub fn pages(&self) -> &Arc<SupplementalPageTable> {
        &self.pages
    }

    pub fn mappings(&self) -> &FileMappings {
        &self.mappings
    }

    /// Resolves a page fault raised by this process.
    pub fn handle_fault(&self, vm: &VirtualMemory, fault: PageFault) -> Result<Frame> {
        self.pages.resolve_fault(vm, fault)
    }

    /// Maps `file` at `address`. See [`FileMappings::map`].
    pub fn map(&self, vm: &VirtualMemory, file: &dyn File, address: VirtualAddress) -> Result<MappingId> {
        self.mappings.map(vm, &self.pages, file, address)
    }

    /// Removes mapping `id`. See [`FileMappings::unmap`].
    pub fn unmap(&self, vm: &VirtualMemory, id: MappingId) {
        self.mappings.unmap(vm, &self.pages, id);
    }

    /// Copies from this process's memory at `address` into `buf`.
    pub fn read(&self, vm: &VirtualMemory, address: VirtualAddress, buf: &mut [u8]) -> Result<()> {
        uaccess::read_user(vm, &self.pages, address, buf)
    }

    /// Copies `buf` into this process's memory at `address`.
    pub fn write(&self, vm: &VirtualMemory, address: VirtualAddress, buf: &[u8]) -> Result<()> {
        uaccess::write_user(vm, &self.pages, address, buf)
    }

    /// Tears down the process's memory: unmaps every file mapping, then releases every
    /// remaining page.
    pub fn exit(&self, vm: &VirtualMemory) {
        log::debug!(
            "{} exiting: {} mappings, {} pages",
            self.id(),
            self.mappings.len(),
            self.pages.len()
        );
        self.mappings.unmap_all(vm, &self.pages);
        self.pages.finalize(vm);
    }
}
