//! In-memory file with reopen semantics.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::File;

/// Shared state of every handle opened on the same file.
struct Inode {
    data: spin::Mutex<Vec<u8>>,
    writes: AtomicUsize,
    open_handles: AtomicUsize,
}

/// A handle to a RAM-backed file.
///
/// Handles produced by [`File::reopen`] share contents with the original. Writes never
/// extend the file, matching a fixed-size file system.
pub struct MemoryFile {
    inode: Arc<Inode>,
}

impl MemoryFile {
    /// Creates a file holding `contents` and returns the first handle to it.
    pub fn new(contents: impl Into<Vec<u8>>) -> Self {
        let inode = Arc::new(Inode {
            data: spin::Mutex::new(contents.into()),
            writes: AtomicUsize::new(0),
            open_handles: AtomicUsize::new(0),
        });
        Self::open(inode)
    }

    fn open(inode: Arc<Inode>) -> Self {
        inode.open_handles.fetch_add(1, Ordering::AcqRel);
        Self { inode }
    }

    /// Returns a copy of the file contents.
    pub fn contents(&self) -> Vec<u8> {
        self.inode.data.lock().clone()
    }

    /// Returns how many `write_at` calls have reached the file through any handle.
    pub fn write_calls(&self) -> usize {
        self.inode.writes.load(Ordering::Acquire)
    }

    /// Returns how many handles are currently open on the file.
    pub fn open_handles(&self) -> usize {
        self.inode.open_handles.load(Ordering::Acquire)
    }
}

impl Drop for MemoryFile {
    fn drop(&mut self) {
        self.inode.open_handles.fetch_sub(1, Ordering::AcqRel);
    }
}

impl File for MemoryFile {
    fn len(&self) -> usize {
        self.inode.data.lock().len()
    }

    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let data = self.inode.data.lock();
        let Some(available) = data.get(offset..) else {
            return 0;
        };
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        count
    }

    fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        let mut data = self.inode.data.lock();
        self.inode.writes.fetch_add(1, Ordering::AcqRel);
        let Some(available) = data.get_mut(offset..) else {
            return 0;
        };
        let count = available.len().min(buf.len());
        available[..count].copy_from_slice(&buf[..count]);
        count
    }

    fn reopen(&self) -> Arc<dyn File> {
        Arc::new(Self::open(Arc::clone(&self.inode)))
    }
}
