//! Frame table with second-chance clock eviction.
//!
//! The frame table owns every physical frame handed out to user pages. It keeps two
//! views of the allocated frames: a record per frame number (owner and pin count) for
//! constant-time `pin`/`free`, and a clock queue of frame numbers in eviction order.
//!
//! A frame joins the clock the first time it is allocated and never leaves it. Freeing
//! only clears the record, and the next allocation of that frame reuses its place in the
//! queue. Eviction runs only when every frame is allocated, so it never meets a frame
//! without a record.
//!
//! When the pool is exhausted, [`FrameTable::allocate`] walks the clock:
//!
//! - pinned frames go to the back of the queue untouched;
//! - frames whose accessed bit is set get the bit cleared and go to the back;
//! - the first remaining frame is the victim. Its owner's supplemental page table
//!   writes it to swap and marks the page swapped, and the frame is handed to the new
//!   owner.
//!
//! The walk is bounded at `passes` full turns of the clock. Exceeding the bound means
//! every frame is pinned or continuously accessed and is fatal.

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use crate::frame::FrameRecord;
use crate::{
    Frame, FrameNumber, FrameOwner, PageNumber, PhysicalMemory, ProcessId, Result, SwapManager,
};

/// Frame bookkeeping protected by the frame table lock.
struct FramePool {
    records: Vec<Option<FrameRecord>>,
    generations: Vec<u32>,
    /// Whether each frame number is already on the clock.
    queued: Vec<bool>,
    clock: VecDeque<FrameNumber>,
    resident: usize,
}

impl FramePool {
    /// Returns the record for `frame` if the handle is still current.
    fn record_mut(&mut self, frame: Frame) -> Option<&mut FrameRecord> {
        let index = frame.number().as_usize();
        if self.generations.get(index) != Some(&frame.generation()) {
            return None;
        }
        self.records[index].as_mut()
    }

    fn record(&self, frame: Frame) -> Option<&FrameRecord> {
        let index = frame.number().as_usize();
        if self.generations.get(index) != Some(&frame.generation()) {
            return None;
        }
        self.records[index].as_ref()
    }
}

/// The system-wide table of frames allocated to user pages.
pub struct FrameTable {
    memory: PhysicalMemory,
    passes: usize,
    pool: spin::Mutex<FramePool>,
}

impl FrameTable {
    /// Creates a frame table over `memory`, scanning at most `passes` full turns of the
    /// clock when looking for a victim.
    pub fn new(memory: PhysicalMemory, passes: usize) -> Self {
        assert!(passes > 0, "eviction needs at least one pass");
        let capacity = memory.frame_count();
        log::info!("frame table: {capacity} frames, eviction bound {passes} passes");

        Self {
            memory,
            passes,
            pool: spin::Mutex::new(FramePool {
                records: (0..capacity).map(|_| None).collect(),
                generations: vec![0; capacity],
                queued: vec![false; capacity],
                clock: VecDeque::with_capacity(capacity),
                resident: 0,
            }),
        }
    }

    /// Returns the number of frames the table manages.
    pub fn capacity(&self) -> usize {
        self.memory.frame_count()
    }

    /// Returns the number of frames currently allocated to pages.
    pub fn resident_count(&self) -> usize {
        self.pool.lock().resident
    }

    /// Returns the physical memory backing the table.
    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    /// Allocates a zero-filled frame for `owner`.
    ///
    /// Uses a free frame when one exists and evicts a resident page otherwise. A frame
    /// allocated with `pin` set must be released with [`FrameTable::unpin`] once the
    /// caller has installed it.
    ///
    /// # Errors
    /// Returns [`VmError::SwapExhausted`](crate::VmError::SwapExhausted) if the victim
    /// could not be written to swap.
    ///
    /// # Panics
    /// Panics if no frame can be evicted within the scan bound.
    pub fn allocate(&self, owner: FrameOwner, pin: bool, swap: &SwapManager) -> Result<Frame> {
        let mut pool = self.pool.lock();

        let number = match self.memory.allocate() {
            Some(number) => {
                if !pool.queued[number.as_usize()] {
                    pool.queued[number.as_usize()] = true;
                    pool.clock.push_back(number);
                }
                pool.resident += 1;
                number
            }
            None => {
                let number = self.evict(&mut pool, swap)?;
                self.memory.contents(number).fill(0);
                number
            }
        };

        let index = number.as_usize();
        let generation = pool.generations[index].wrapping_add(1);
        pool.generations[index] = generation;
        log::trace!(
            "frame {number} -> {} page {} (pinned: {pin})",
            owner.process(),
            owner.page()
        );
        pool.records[index] = Some(FrameRecord {
            owner,
            pins: u32::from(pin),
        });

        Ok(Frame::new(number, generation))
    }

    /// Releases `frame` back to physical memory.
    ///
    /// # Panics
    /// Panics if `frame` is not a current allocation.
    pub fn free(&self, frame: Frame) {
        let mut pool = self.pool.lock();
        assert!(
            pool.record(frame).is_some(),
            "freeing unallocated frame {frame:?}"
        );

        pool.records[frame.number().as_usize()] = None;
        pool.resident -= 1;
        self.memory.deallocate(frame.number());
        log::trace!("frame {} freed", frame.number());
    }

    /// Pins `frame`, making it ineligible for eviction.
    ///
    /// Returns false if the handle is stale: the frame was freed or evicted and possibly
    /// handed to another page since the handle was issued.
    pub fn pin(&self, frame: Frame) -> bool {
        match self.pool.lock().record_mut(frame) {
            Some(record) => {
                record.pins += 1;
                log::trace!("pin {frame:?} ({} outstanding)", record.pins);
                true
            }
            None => false,
        }
    }

    /// Releases one pin on `frame`.
    ///
    /// # Panics
    /// Panics if the frame is not allocated or is not pinned.
    pub fn unpin(&self, frame: Frame) {
        let mut pool = self.pool.lock();
        let Some(record) = pool.record_mut(frame) else {
            panic!("unpinning unallocated frame {frame:?}");
        };
        assert!(record.pins > 0, "unpinning frame {frame:?} that is not pinned");
        record.pins -= 1;
        log::trace!("unpin {frame:?} ({} outstanding)", record.pins);
    }

    /// Returns whether `frame` is allocated and pinned.
    pub fn is_pinned(&self, frame: Frame) -> bool {
        self.pool
            .lock()
            .record(frame)
            .is_some_and(|record| record.pins > 0)
    }

    /// Returns the process and page that `frame` currently backs.
    pub fn owner_of(&self, frame: Frame) -> Option<(ProcessId, PageNumber)> {
        self.pool
            .lock()
            .record(frame)
            .map(|record| (record.owner.process(), record.owner.page()))
    }

    /// Runs the clock until a victim is written to swap, and returns its frame number.
    ///
    /// The victim stays at the back of the clock for its new owner.
    fn evict(&self, pool: &mut FramePool, swap: &SwapManager) -> Result<FrameNumber> {
        let bound = self.passes * pool.resident;

        for _ in 0..bound {
            let Some(number) = pool.clock.pop_front() else {
                break;
            };
            pool.clock.push_back(number);

            let index = number.as_usize();
            let Some(record) = pool.records[index].as_ref() else {
                panic!("frame {number} is on the clock but has no record");
            };
            if record.pins > 0 {
                continue;
            }

            let owner = record.owner.clone();
            let space = owner.table().address_space();
            if space.is_accessed(owner.page()) {
                space.set_accessed(owner.page(), false);
                continue;
            }

            let victim = Frame::new(number, pool.generations[index]);
            let slot = owner
                .table()
                .evict(owner.page(), victim, &self.memory, swap)?;
            log::debug!(
                "evicted {} page {} from frame {number} to {slot:?}",
                owner.process(),
                owner.page()
            );
            pool.records[index] = None;
            return Ok(number);
        }

        panic!("no evictable frame found after scanning {bound} candidates");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::Harness;
    use crate::{AddressSpace, PageFault, PageState};
    use proptest::prelude::*;

    #[test]
    fn allocation_prefers_free_frames() {
        let harness = Harness::new(4, 4);
        let (process, _) = harness.process(1);

        let frame = process.handle_fault(&harness.vm, harness.stack_fault(0)).unwrap();
        assert_eq!(harness.vm.frames().resident_count(), 1);
        assert_eq!(
            harness.vm.frames().owner_of(frame),
            Some((ProcessId::new(1), harness.stack_page(0)))
        );
        assert!(!harness.vm.frames().is_pinned(frame));
        assert_eq!(harness.vm.swap().used_slots(), 0);
    }

    #[test]
    fn pin_counts_nest() {
        let harness = Harness::new(2, 2);
        let (process, _) = harness.process(1);
        let frames = harness.vm.frames();

        let frame = process.handle_fault(&harness.vm, harness.stack_fault(0)).unwrap();
        assert!(frames.pin(frame));
        assert!(frames.pin(frame));
        frames.unpin(frame);
        assert!(frames.is_pinned(frame));
        frames.unpin(frame);
        assert!(!frames.is_pinned(frame));
    }

    #[test]
    #[should_panic(expected = "not pinned")]
    fn unpin_without_pin_panics() {
        let harness = Harness::new(2, 2);
        let (process, _) = harness.process(1);

        let frame = process.handle_fault(&harness.vm, harness.stack_fault(0)).unwrap();
        harness.vm.frames().unpin(frame);
    }

    #[test]
    fn stale_handle_cannot_be_pinned() {
        let harness = Harness::new(1, 4);
        let (process, _) = harness.process(1);
        let frames = harness.vm.frames();

        let first = process.handle_fault(&harness.vm, harness.stack_fault(0)).unwrap();
        let second = process.handle_fault(&harness.vm, harness.stack_fault(1)).unwrap();

        // Same physical frame, new occupant.
        assert_eq!(first.number(), second.number());
        assert_ne!(first, second);
        assert!(!frames.pin(first));
        assert_eq!(frames.owner_of(first), None);
        assert!(matches!(
            process.pages().state(harness.stack_page(0)),
            Some(PageState::Swapped(_))
        ));
    }

    #[test]
    fn accessed_frames_get_a_second_chance() {
        let harness = Harness::new(2, 4);
        let (process, directory) = harness.process(1);

        process.handle_fault(&harness.vm, harness.stack_fault(0)).unwrap();
        process.handle_fault(&harness.vm, harness.stack_fault(1)).unwrap();
        directory.touch(harness.stack_page(0), false);

        process.handle_fault(&harness.vm, harness.stack_fault(2)).unwrap();

        let pages = process.pages();
        assert!(matches!(
            pages.state(harness.stack_page(0)),
            Some(PageState::Resident(_))
        ));
        assert!(matches!(
            pages.state(harness.stack_page(1)),
            Some(PageState::Swapped(_))
        ));
        assert!(!directory.is_accessed(harness.stack_page(0)));
    }

    #[test]
    #[should_panic(expected = "no evictable frame")]
    fn all_pinned_is_fatal() {
        let harness = Harness::new(2, 4);
        let (process, _) = harness.process(1);
        let frames = harness.vm.frames();

        for index in 0..2 {
            let frame = process.handle_fault(&harness.vm, harness.stack_fault(index)).unwrap();
            assert!(frames.pin(frame));
        }
        let _ = process.handle_fault(&harness.vm, harness.stack_fault(2));
    }

    #[test]
    fn freed_frame_is_reused_in_place() {
        let harness = Harness::new(2, 4);
        let (process, _) = harness.process(1);
        let frames = harness.vm.frames();

        let first = process.handle_fault(&harness.vm, harness.stack_fault(0)).unwrap();
        process.handle_fault(&harness.vm, harness.stack_fault(1)).unwrap();
        process.pages().deallocate(&harness.vm, harness.stack_page(0));
        assert_eq!(frames.resident_count(), 1);
        assert_eq!(frames.memory().free_frames(), 1);
        assert_eq!(frames.owner_of(first), None);

        let reused = process.handle_fault(&harness.vm, harness.stack_fault(2)).unwrap();
        assert_eq!(reused.number(), first.number());
        assert_eq!(frames.resident_count(), 2);
        assert_eq!(harness.vm.swap().used_slots(), 0);

        // The pool is full again, so the next page evicts one of the two.
        process.handle_fault(&harness.vm, harness.stack_fault(3)).unwrap();
        assert_eq!(frames.resident_count(), 2);
        assert_eq!(harness.vm.swap().used_slots(), 1);
    }

    #[test]
    fn fault_outside_stack_is_not_an_allocation() {
        let harness = Harness::new(2, 2);
        let (process, _) = harness.process(1);
        let fault = PageFault::new(harness.stack_page(0).start(), true);
        assert!(process.handle_fault(&harness.vm, fault).is_err());
        assert_eq!(harness.vm.frames().resident_count(), 0);
    }

    proptest! {
        #[test]
        fn resident_frames_never_exceed_capacity(
            capacity in 1usize..6,
            steps in proptest::collection::vec((0usize..12, any::<bool>(), any::<bool>()), 1..40),
        ) {
            let harness = Harness::new(capacity, 16);
            let (process, directory) = harness.process(1);
            let frames = harness.vm.frames();

            for (index, accessed, release) in steps {
                let page = harness.stack_page(index);
                if release && process.pages().contains(page) {
                    process.pages().deallocate(&harness.vm, page);
                } else {
                    process.handle_fault(&harness.vm, harness.stack_fault(index)).unwrap();
                    if accessed {
                        directory.touch(page, false);
                    }
                }
                prop_assert!(frames.resident_count() <= capacity);
                prop_assert_eq!(
                    frames.resident_count() + frames.memory().free_frames(),
                    capacity
                );
            }
        }

        #[test]
        fn pinned_frames_are_never_evicted(
            capacity in 2usize..6,
            extra in 1usize..8,
        ) {
            let harness = Harness::new(capacity, 16);
            let (process, _) = harness.process(1);
            let frames = harness.vm.frames();

            let pinned = process.handle_fault(&harness.vm, harness.stack_fault(0)).unwrap();
            prop_assert!(frames.pin(pinned));

            for index in 1..capacity + extra {
                process.handle_fault(&harness.vm, harness.stack_fault(index)).unwrap();
                prop_assert_eq!(
                    process.pages().state(harness.stack_page(0)),
                    Some(PageState::Resident(pinned))
                );
            }
            frames.unpin(pinned);
        }
    }
}
