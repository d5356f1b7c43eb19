//! Supplemental page table.
//!
//! Each process owns one table describing, for every virtual page it may touch, where the
//! page's content currently lives: still in a file, in a physical frame, or in a swap
//! slot. Page faults consult the table to materialize pages, and the frame table calls
//! back into it to move a victim page to swap.
//!
//! The table lock is never held while calling into the frame table. A page that is being
//! filled by one thread is marked as loading, and other threads that need the same page
//! wait for the load to finish instead of loading it twice.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::{
    AddressSpace, File, Frame, FrameContents, FrameOwner, PAGE_SIZE, PageFault, PageNumber,
    PhysicalMemory, ProcessId, Result, SwapManager, SwapSlot, VirtualAddress, VirtualMemory,
    VmError,
};

/// Where the content of a registered page currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Not loaded yet; the content comes from the page's file source on first touch.
    LazyFileBacked,
    /// Backed by a physical frame and mapped in the address space.
    Resident(Frame),
    /// Evicted to a swap slot.
    Swapped(SwapSlot),
}

/// Classification of a user page for direct kernel access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The page is in a frame and may be pinned and accessed.
    Resident,
    /// The page is valid but must be faulted in first.
    NeedsFault,
    /// The page is not registered, or a write targets a read-only page.
    Invalid,
}

/// The portion of a file that backs a page.
#[derive(Clone)]
pub(crate) struct FileSource {
    pub file: Arc<dyn File>,
    pub offset: usize,
    /// Bytes read from the file. The rest of the page is zero.
    pub read_bytes: usize,
}

struct PageRecord {
    state: PageState,
    writable: bool,
    modified: bool,
    loading: bool,
    source: Option<FileSource>,
}

impl PageRecord {
    fn lazy(source: FileSource, writable: bool) -> Self {
        Self {
            state: PageState::LazyFileBacked,
            writable,
            modified: false,
            loading: false,
            source: Some(source),
        }
    }
}

/// What a fault needs to do once the table lock is released.
enum FaultAction {
    Load(FileSource),
    SwapIn(SwapSlot),
    Present(Frame),
    Grow,
    Wait,
}

/// Per-process table of virtual page backing state.
pub struct SupplementalPageTable {
    process: ProcessId,
    space: Arc<dyn AddressSpace>,
    entries: spin::Mutex<BTreeMap<PageNumber, PageRecord>>,
}

impl SupplementalPageTable {
    pub fn new(process: ProcessId, space: Arc<dyn AddressSpace>) -> Arc<Self> {
        Arc::new(Self {
            process,
            space,
            entries: spin::Mutex::new(BTreeMap::new()),
        })
    }

    pub fn process(&self) -> ProcessId {
        self.process
    }

    pub fn address_space(&self) -> &Arc<dyn AddressSpace> {
        &self.space
    }

    /// Returns the number of registered pages.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, page: PageNumber) -> bool {
        self.entries.lock().contains_key(&page)
    }

    /// Registers `page` to be loaded from `file` on first access.
    ///
    /// `read_bytes` bytes are read from `offset` and the remaining `zero_bytes` are
    /// zero-filled.
    ///
    /// # Errors
    /// Returns [`VmError::Overlap`] if `page` is already registered.
    ///
    /// # Panics
    /// Panics if `read_bytes + zero_bytes` is not exactly one page.
    pub fn register_lazy(
        &self,
        page: PageNumber,
        file: Arc<dyn File>,
        offset: usize,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Result<()> {
        assert_eq!(
            read_bytes + zero_bytes,
            PAGE_SIZE,
            "lazy page must cover exactly one page"
        );

        let mut entries = self.entries.lock();
        if entries.contains_key(&page) {
            return Err(VmError::Overlap(page.start()));
        }

        let source = FileSource {
            file,
            offset,
            read_bytes,
        };
        entries.insert(page, PageRecord::lazy(source, writable));
        log::trace!("{} page {page} lazy from offset {offset:#x}", self.process);
        Ok(())
    }

    /// Registers a run of pages starting at `base` backed by `read_bytes` bytes of
    /// `file` at `offset`, followed by `zero_bytes` of zeroes.
    ///
    /// Either every page is registered or, if any page already exists, none is.
    ///
    /// # Errors
    /// Returns [`VmError::Overlap`] naming the first page that already exists.
    ///
    /// # Panics
    /// Panics if `read_bytes + zero_bytes` is not a whole number of pages.
    pub fn register_segment(
        &self,
        base: PageNumber,
        file: Arc<dyn File>,
        offset: usize,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Result<usize> {
        let total = read_bytes + zero_bytes;
        assert!(
            total % PAGE_SIZE == 0,
            "segment of {total} bytes is not page-sized"
        );
        let page_count = total / PAGE_SIZE;

        let mut entries = self.entries.lock();
        if let Some(existing) = (0..page_count)
            .map(|i| base + i)
            .find(|page| entries.contains_key(page))
        {
            return Err(VmError::Overlap(existing.start()));
        }

        for i in 0..page_count {
            let source = FileSource {
                file: Arc::clone(&file),
                offset: offset + i * PAGE_SIZE,
                read_bytes: read_bytes.saturating_sub(i * PAGE_SIZE).min(PAGE_SIZE),
            };
            entries.insert(base + i, PageRecord::lazy(source, writable));
        }
        Ok(page_count)
    }

    /// Makes the page containing the faulting address resident.
    ///
    /// Returns the frame now backing the page. The frame is not pinned.
    ///
    /// # Errors
    /// - [`VmError::InvalidAccess`] if the page is not registered and the fault is not
    ///   stack growth, or if a write targets a read-only page.
    /// - [`VmError::SwapExhausted`] if no frame could be made available.
    pub fn resolve_fault(self: &Arc<Self>, vm: &VirtualMemory, fault: PageFault) -> Result<Frame> {
        let page = fault.address.page_number();
        log::trace!("{} fault at {fault:?}", self.process);

        loop {
            match self.begin_fault(page, fault)? {
                FaultAction::Wait => core::hint::spin_loop(),
                FaultAction::Present(frame) => {
                    if self.space.translate(page).is_none() {
                        let entries = self.entries.lock();
                        if let Some(record) = entries.get(&page)
                            && record.state == PageState::Resident(frame)
                        {
                            self.space.map(page, frame.address(), record.writable);
                        }
                    }
                    return Ok(frame);
                }
                FaultAction::Load(source) => {
                    let owner = FrameOwner::new(Arc::clone(self), page);
                    let frame = match vm.allocate_frame(owner, true) {
                        Ok(frame) => frame,
                        Err(err) => {
                            self.abandon_load(page);
                            return Err(err);
                        }
                    };

                    Self::load(vm, frame, &source);
                    self.install(page, frame, fault.write);
                    vm.frames().unpin(frame);
                    return Ok(frame);
                }
                FaultAction::SwapIn(slot) => {
                    let owner = FrameOwner::new(Arc::clone(self), page);
                    let frame = match vm.swap_in(slot, owner) {
                        Ok(frame) => frame,
                        Err(err) => {
                            self.abandon_load(page);
                            return Err(err);
                        }
                    };

                    self.install(page, frame, fault.write);
                    vm.frames().unpin(frame);
                    return Ok(frame);
                }
                FaultAction::Grow => {
                    let owner = FrameOwner::new(Arc::clone(self), page);
                    let frame = vm.allocate_frame(owner, true)?;

                    let mut entries = self.entries.lock();
                    if entries.contains_key(&page) {
                        // Another thread grew the stack into this page first.
                        drop(entries);
                        vm.frames().free(frame);
                        continue;
                    }

                    entries.insert(
                        page,
                        PageRecord {
                            state: PageState::Resident(frame),
                            writable: true,
                            modified: fault.write,
                            loading: false,
                            source: None,
                        },
                    );
                    self.space.map(page, frame.address(), true);
                    drop(entries);

                    vm.frames().unpin(frame);
                    log::debug!("{} stack grown to page {page}", self.process);
                    return Ok(frame);
                }
            }
        }
    }

    /// Decides how to handle a fault on `page`, claiming the page if it must be loaded.
    fn begin_fault(&self, page: PageNumber, fault: PageFault) -> Result<FaultAction> {
        let mut entries = self.entries.lock();
        let Some(record) = entries.get_mut(&page) else {
            if fault.stack_growth {
                return Ok(FaultAction::Grow);
            }
            log::warn!("{}: {fault:?} hits an unmapped page", self.process);
            return Err(VmError::InvalidAccess {
                address: fault.address,
                write: fault.write,
            });
        };

        if fault.write && !record.writable {
            log::warn!("{}: {fault:?} hits a read-only page", self.process);
            return Err(VmError::InvalidAccess {
                address: fault.address,
                write: fault.write,
            });
        }
        if record.loading {
            return Ok(FaultAction::Wait);
        }

        let action = match record.state {
            PageState::Resident(frame) => return Ok(FaultAction::Present(frame)),
            PageState::Swapped(slot) => FaultAction::SwapIn(slot),
            PageState::LazyFileBacked => match &record.source {
                Some(source) => FaultAction::Load(source.clone()),
                None => panic!("lazy page {page} has no file source"),
            },
        };
        record.loading = true;
        Ok(action)
    }

    /// Fills a pinned frame from its file source.
    fn load(vm: &VirtualMemory, frame: Frame, source: &FileSource) {
        let mut contents = vm.frames().memory().contents(frame.number());
        let read = source
            .file
            .read_at(&mut contents[..source.read_bytes], source.offset);
        if read != source.read_bytes {
            log::warn!(
                "short read at offset {:#x}: {read} of {} bytes",
                source.offset,
                source.read_bytes
            );
        }
        contents[read..].fill(0);
    }

    /// Records a claimed page as resident in `frame` and maps it.
    fn install(&self, page: PageNumber, frame: Frame, write: bool) {
        let mut entries = self.entries.lock();
        let Some(record) = entries.get_mut(&page) else {
            panic!("loaded page {page} vanished from the table");
        };

        record.state = PageState::Resident(frame);
        record.modified |= write;
        record.loading = false;
        self.space.map(page, frame.address(), record.writable);
        log::trace!("{} page {page} resident in {frame:?}", self.process);
    }

    fn abandon_load(&self, page: PageNumber) {
        if let Some(record) = self.entries.lock().get_mut(&page) {
            record.loading = false;
        }
    }

    /// Removes `page` from the table, releasing its frame or swap slot.
    ///
    /// # Panics
    /// Panics if `page` is not registered.
    pub fn deallocate(&self, vm: &VirtualMemory, page: PageNumber) {
        loop {
            let mut entries = self.entries.lock();
            let Some(record) = entries.get(&page) else {
                panic!("{}: deallocating unregistered page {page}", self.process);
            };
            if record.loading {
                drop(entries);
                core::hint::spin_loop();
                continue;
            }

            match record.state {
                PageState::LazyFileBacked => {
                    entries.remove(&page);
                }
                PageState::Swapped(slot) => {
                    entries.remove(&page);
                    drop(entries);
                    vm.swap().delete_slot(slot);
                }
                PageState::Resident(frame) => {
                    drop(entries);
                    if !vm.frames().pin(frame) {
                        // Evicted since the lookup.
                        continue;
                    }

                    let mut entries = self.entries.lock();
                    let record = entries.remove(&page);
                    assert!(
                        record.is_some_and(|r| r.state == PageState::Resident(frame)),
                        "pinned page {page} changed state"
                    );
                    self.space.unmap(page);
                    drop(entries);
                    vm.frames().free(frame);
                }
            }
            log::trace!("{} page {page} deallocated", self.process);
            return;
        }
    }

    /// Deallocates every remaining page.
    pub fn finalize(&self, vm: &VirtualMemory) {
        let pages: Vec<PageNumber> = self.entries.lock().keys().copied().collect();
        log::debug!("{}: releasing {} pages", self.process, pages.len());
        for page in pages {
            self.deallocate(vm, page);
        }
    }

    /// Returns the backing state of `page`, or None if it is not registered.
    pub fn state(&self, page: PageNumber) -> Option<PageState> {
        self.entries.lock().get(&page).map(|record| record.state)
    }

    /// Returns the frame backing `page` if it is resident.
    pub fn frame_of(&self, page: PageNumber) -> Option<Frame> {
        match self.state(page)? {
            PageState::Resident(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn is_writable(&self, page: PageNumber) -> bool {
        self.entries
            .lock()
            .get(&page)
            .is_some_and(|record| record.writable)
    }

    /// Returns whether `page` has been written since it was registered.
    ///
    /// Combines the recorded flag, which survives eviction, with the live dirty bit of a
    /// resident page.
    pub fn is_modified(&self, page: PageNumber) -> bool {
        let entries = self.entries.lock();
        let Some(record) = entries.get(&page) else {
            return false;
        };
        record.modified
            || (matches!(record.state, PageState::Resident(_)) && self.space.is_dirty(page))
    }

    pub(crate) fn file_source(&self, page: PageNumber) -> Option<FileSource> {
        self.entries
            .lock()
            .get(&page)
            .and_then(|record| record.source.clone())
    }

    /// Classifies the page containing `address` for a kernel access.
    pub fn probe(&self, address: VirtualAddress, write: bool) -> Probe {
        let entries = self.entries.lock();
        match entries.get(&address.page_number()) {
            None => Probe::Invalid,
            Some(record) if write && !record.writable => Probe::Invalid,
            Some(PageRecord {
                state: PageState::Resident(_),
                loading: false,
                ..
            }) => Probe::Resident,
            Some(_) => Probe::NeedsFault,
        }
    }

    /// Faults in the page containing `address` if needed and pins its frame.
    ///
    /// The caller must unpin the returned frame.
    pub fn pin_page(
        self: &Arc<Self>,
        vm: &VirtualMemory,
        address: VirtualAddress,
        write: bool,
    ) -> Result<Frame> {
        let page = address.page_number();
        loop {
            match self.probe(address, write) {
                Probe::Invalid => {
                    return Err(VmError::InvalidAccess { address, write });
                }
                Probe::NeedsFault => {
                    self.resolve_fault(vm, PageFault::new(address, write))?;
                }
                Probe::Resident => {
                    if let Some(frame) = self.frame_of(page)
                        && vm.frames().pin(frame)
                    {
                        return Ok(frame);
                    }
                }
            }
        }
    }

    /// Copies the content of a swapped `page` into `buf` without swapping it in.
    ///
    /// Returns false if the page is not in swap or is being loaded.
    pub(crate) fn read_swapped(
        &self,
        swap: &SwapManager,
        page: PageNumber,
        buf: &mut FrameContents,
    ) -> bool {
        let entries = self.entries.lock();
        match entries.get(&page) {
            Some(PageRecord {
                state: PageState::Swapped(slot),
                loading: false,
                ..
            }) => {
                swap.read_slot(*slot, buf);
                true
            }
            _ => false,
        }
    }

    /// Moves the resident `page` to swap. Called by the frame table with its lock held.
    ///
    /// On failure the page stays resident and mapped.
    pub(crate) fn evict(
        &self,
        page: PageNumber,
        victim: Frame,
        memory: &PhysicalMemory,
        swap: &SwapManager,
    ) -> Result<SwapSlot> {
        let mut entries = self.entries.lock();
        let Some(record) = entries.get_mut(&page) else {
            panic!("{}: evicting unregistered page {page}", self.process);
        };
        assert_eq!(
            record.state,
            PageState::Resident(victim),
            "evicting page {page} from a frame it does not own"
        );

        record.modified |= self.space.is_dirty(page);
        self.space.unmap(page);

        match swap.swap_out(memory, victim.number()) {
            Ok(slot) => {
                record.state = PageState::Swapped(slot);
                Ok(slot)
            }
            Err(err) => {
                self.space.map(page, victim.address(), record.writable);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::MemoryFile;
    use crate::tests::Harness;

    fn file(len: usize) -> Arc<dyn File> {
        let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8 + 1).collect();
        Arc::new(MemoryFile::new(bytes))
    }

    #[test]
    fn register_lazy_rejects_overlap() {
        let harness = Harness::new(2, 2);
        let (process, _) = harness.process(1);
        let pages = process.pages();
        let page = PageNumber::new(0x100);

        pages
            .register_lazy(page, file(PAGE_SIZE), 0, PAGE_SIZE, 0, false)
            .unwrap();
        assert_eq!(
            pages.register_lazy(page, file(PAGE_SIZE), 0, PAGE_SIZE, 0, false),
            Err(VmError::Overlap(page.start()))
        );
        assert_eq!(pages.state(page), Some(PageState::LazyFileBacked));
        assert!(!pages.is_writable(page));
    }

    #[test]
    #[should_panic(expected = "exactly one page")]
    fn register_lazy_requires_a_whole_page() {
        let harness = Harness::new(1, 1);
        let (process, _) = harness.process(1);
        let _ = process
            .pages()
            .register_lazy(PageNumber::new(1), file(10), 0, 10, 10, true);
    }

    #[test]
    fn segment_is_all_or_nothing() {
        let harness = Harness::new(2, 2);
        let (process, _) = harness.process(1);
        let pages = process.pages();

        pages
            .register_lazy(PageNumber::new(0x102), file(PAGE_SIZE), 0, PAGE_SIZE, 0, true)
            .unwrap();
        let result =
            pages.register_segment(PageNumber::new(0x100), file(100), 0, 100, 4 * PAGE_SIZE - 100, true);

        assert_eq!(result, Err(VmError::Overlap(PageNumber::new(0x102).start())));
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn lazy_fault_reads_file_and_zero_fills() {
        let harness = Harness::new(2, 2);
        let (process, directory) = harness.process(1);
        let pages = process.pages();
        let page = PageNumber::new(0x100);
        let backing = file(PAGE_SIZE * 2);

        pages
            .register_lazy(page, Arc::clone(&backing), PAGE_SIZE, 100, PAGE_SIZE - 100, false)
            .unwrap();
        let frame = pages
            .resolve_fault(&harness.vm, PageFault::new(page.start() + 8, false))
            .unwrap();

        let contents = harness.vm.frames().memory().contents(frame.number());
        let mut expected = [0; 100];
        backing.read_at(&mut expected, PAGE_SIZE);
        assert_eq!(&contents[..100], &expected);
        assert!(contents[100..].iter().all(|&b| b == 0));
        drop(contents);

        assert_eq!(pages.state(page), Some(PageState::Resident(frame)));
        assert_eq!(directory.translate(page), Some(frame.address()));
        assert!(!harness.vm.frames().is_pinned(frame));
        assert!(!pages.is_modified(page));
    }

    #[test]
    fn write_fault_on_read_only_page_is_invalid() {
        let harness = Harness::new(2, 2);
        let (process, _) = harness.process(1);
        let pages = process.pages();
        let page = PageNumber::new(0x100);

        pages
            .register_lazy(page, file(PAGE_SIZE), 0, PAGE_SIZE, 0, false)
            .unwrap();
        let result = pages.resolve_fault(&harness.vm, PageFault::new(page.start(), true));
        assert_eq!(
            result,
            Err(VmError::InvalidAccess {
                address: page.start(),
                write: true
            })
        );
        assert_eq!(pages.state(page), Some(PageState::LazyFileBacked));
        assert_eq!(pages.probe(page.start(), true), Probe::Invalid);
        assert_eq!(pages.probe(page.start(), false), Probe::NeedsFault);
    }

    #[test]
    fn write_fault_marks_page_modified() {
        let harness = Harness::new(2, 2);
        let (process, _) = harness.process(1);
        let pages = process.pages();
        let page = PageNumber::new(0x100);

        pages
            .register_lazy(page, file(PAGE_SIZE), 0, PAGE_SIZE, 0, true)
            .unwrap();
        pages
            .resolve_fault(&harness.vm, PageFault::new(page.start(), true))
            .unwrap();
        assert!(pages.is_modified(page));
        assert_eq!(pages.probe(page.start(), true), Probe::Resident);
    }

    #[test]
    fn dirty_bit_counts_as_modified() {
        let harness = Harness::new(2, 2);
        let (process, directory) = harness.process(1);
        let page = harness.stack_page(0);

        process.handle_fault(&harness.vm, harness.stack_fault(0)).unwrap();
        assert!(!process.pages().is_modified(page));
        directory.touch(page, true);
        assert!(process.pages().is_modified(page));
    }

    #[test]
    fn failed_eviction_keeps_victim_resident() {
        let harness = Harness::new(1, 0);
        let (process, directory) = harness.process(1);

        let frame = process.handle_fault(&harness.vm, harness.stack_fault(0)).unwrap();
        let result = process.handle_fault(&harness.vm, harness.stack_fault(1));

        assert_eq!(result, Err(VmError::SwapExhausted));
        let pages = process.pages();
        assert_eq!(pages.state(harness.stack_page(0)), Some(PageState::Resident(frame)));
        assert_eq!(directory.translate(harness.stack_page(0)), Some(frame.address()));
        assert!(!pages.contains(harness.stack_page(1)));
    }

    #[test]
    fn deallocate_releases_each_backing() {
        let harness = Harness::new(1, 4);
        let (process, directory) = harness.process(1);
        let pages = process.pages();
        let lazy = PageNumber::new(0x100);
        pages
            .register_lazy(lazy, file(PAGE_SIZE), 0, PAGE_SIZE, 0, true)
            .unwrap();

        process.handle_fault(&harness.vm, harness.stack_fault(0)).unwrap();
        process.handle_fault(&harness.vm, harness.stack_fault(1)).unwrap();
        assert_eq!(harness.vm.swap().used_slots(), 1);

        pages.deallocate(&harness.vm, harness.stack_page(0));
        assert_eq!(harness.vm.swap().used_slots(), 0);

        pages.deallocate(&harness.vm, harness.stack_page(1));
        assert_eq!(harness.vm.frames().resident_count(), 0);
        assert_eq!(directory.translate(harness.stack_page(1)), None);

        pages.deallocate(&harness.vm, lazy);
        assert!(pages.is_empty());
    }

    #[test]
    #[should_panic(expected = "deallocating unregistered page")]
    fn deallocate_unknown_page_panics() {
        let harness = Harness::new(1, 1);
        let (process, _) = harness.process(1);
        process.pages().deallocate(&harness.vm, PageNumber::new(7));
    }

    #[test]
    fn finalize_releases_everything() {
        let harness = Harness::new(2, 8);
        let (process, _) = harness.process(1);
        for index in 0..5 {
            process.handle_fault(&harness.vm, harness.stack_fault(index)).unwrap();
        }

        process.pages().finalize(&harness.vm);
        assert!(process.pages().is_empty());
        assert_eq!(harness.vm.frames().resident_count(), 0);
        assert_eq!(harness.vm.swap().used_slots(), 0);
    }
}
