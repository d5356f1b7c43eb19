//! Memory-mapped files.
//!
//! A mapping registers one lazy page per page of the file in the process's supplemental
//! page table. Nothing is read until the pages are touched. On unmap, pages that were
//! written are copied back to the file before their entries are released.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::{
    File, FrameContents, PAGE_SIZE, PageNumber, PageState, Result, SupplementalPageTable,
    VirtualAddress, VirtualMemory, VmError,
};

/// Identifies a mapping within a process.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MappingId(u32);

impl MappingId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for MappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MappingId({})", self.0)
    }
}

impl fmt::Display for MappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An active file mapping.
struct FileMapping {
    id: MappingId,
    /// The mapping's own handle, closed when the mapping is dropped.
    file: Arc<dyn File>,
    base: PageNumber,
    size: usize,
}

impl FileMapping {
    fn base(&self) -> VirtualAddress {
        self.base.start()
    }

    fn pages(&self) -> impl Iterator<Item = PageNumber> {
        let base = self.base;
        (0..self.size.div_ceil(PAGE_SIZE)).map(move |i| base + i)
    }
}

impl fmt::Debug for FileMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileMapping")
            .field("id", &self.id)
            .field("base", &self.base())
            .field("size", &self.size)
            .finish()
    }
}

/// The file mappings of one process.
pub struct FileMappings {
    records: spin::Mutex<BTreeMap<MappingId, FileMapping>>,
    next_id: AtomicU32,
}

impl Default for FileMappings {
    fn default() -> Self {
        Self::new()
    }
}

impl FileMappings {
    pub fn new() -> Self {
        Self {
            records: spin::Mutex::new(BTreeMap::new()),
            next_id: AtomicU32::new(0),
        }
    }

    /// Returns the number of active mappings.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn contains(&self, id: MappingId) -> bool {
        self.records.lock().contains_key(&id)
    }

    /// Maps the whole of `file` at `address`.
    ///
    /// The mapping holds its own reopened handle, so it outlives `file`. The last page's
    /// bytes past the end of the file read as zero and are never written back.
    ///
    /// # Errors
    /// - [`VmError::NullAddress`] or [`VmError::Misaligned`] for a bad `address`.
    /// - [`VmError::EmptyFile`] if `file` has no content.
    /// - [`VmError::NotUserAddress`] if the mapping would leave user space.
    /// - [`VmError::Overlap`] if any covered page is already in use.
    pub fn map(
        &self,
        vm: &VirtualMemory,
        pages: &SupplementalPageTable,
        file: &dyn File,
        address: VirtualAddress,
    ) -> Result<MappingId> {
        let size = file.len();
        let checked = if address.is_null() {
            Err(VmError::NullAddress)
        } else if !address.is_aligned(PAGE_SIZE) {
            Err(VmError::Misaligned(address))
        } else if size == 0 {
            Err(VmError::EmptyFile)
        } else if !vm
            .config()
            .is_user_range(address, size.next_multiple_of(PAGE_SIZE))
        {
            Err(VmError::NotUserAddress(address))
        } else {
            Ok(())
        };
        if let Err(err) = checked {
            log::warn!("{}: mmap rejected: {err}", pages.process());
            return Err(err);
        }

        let file = file.reopen();
        let base = address.page_number();
        let zero_bytes = size.next_multiple_of(PAGE_SIZE) - size;
        if let Err(err) = pages.register_segment(base, Arc::clone(&file), 0, size, zero_bytes, true)
        {
            log::warn!("{}: mmap rejected: {err}", pages.process());
            return Err(err);
        }

        let id = MappingId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mapping = FileMapping {
            id,
            file,
            base,
            size,
        };
        log::debug!("{}: mapped {mapping:?}", pages.process());
        self.records.lock().insert(id, mapping);
        Ok(id)
    }

    /// Removes mapping `id`, writing modified pages back to the file.
    ///
    /// Unknown ids are ignored.
    pub fn unmap(&self, vm: &VirtualMemory, pages: &Arc<SupplementalPageTable>, id: MappingId) {
        let Some(mapping) = self.records.lock().remove(&id) else {
            log::debug!("{}: unmap of unknown {id:?}", pages.process());
            return;
        };

        for page in mapping.pages() {
            Self::write_back(vm, pages, &mapping, page);
            pages.deallocate(vm, page);
        }
        log::debug!("{}: unmapped {mapping:?}", pages.process());
    }

    /// Removes every mapping in id order.
    pub fn unmap_all(&self, vm: &VirtualMemory, pages: &Arc<SupplementalPageTable>) {
        let ids: Vec<MappingId> = self.records.lock().keys().copied().collect();
        for id in ids {
            self.unmap(vm, pages, id);
        }
    }

    /// Copies `page` back to the mapped file if it has been written.
    ///
    /// A swapped page is copied from its slot without being swapped in.
    fn write_back(
        vm: &VirtualMemory,
        pages: &Arc<SupplementalPageTable>,
        mapping: &FileMapping,
        page: PageNumber,
    ) {
        let loaded = matches!(
            pages.state(page),
            Some(PageState::Resident(_) | PageState::Swapped(_))
        );
        if !loaded || !pages.is_modified(page) {
            return;
        }
        let Some(source) = pages.file_source(page) else {
            panic!("mapped page {page} has no file source");
        };

        let mut buf: Box<FrameContents> = Box::new([0; PAGE_SIZE]);
        let written = loop {
            if pages.read_swapped(vm.swap(), page, &mut buf) {
                break mapping
                    .file
                    .write_at(&buf[..source.read_bytes], source.offset);
            }

            if let Some(frame) = pages.frame_of(page)
                && vm.frames().pin(frame)
            {
                let contents = vm.frames().memory().contents(frame.number());
                let written = mapping
                    .file
                    .write_at(&contents[..source.read_bytes], source.offset);
                drop(contents);
                vm.frames().unpin(frame);
                break written;
            }

            // Moving between frame and swap.
            core::hint::spin_loop();
        };

        if written != source.read_bytes {
            log::warn!(
                "short write-back of page {page}: {written} of {} bytes",
                source.read_bytes
            );
        }
    }
}
