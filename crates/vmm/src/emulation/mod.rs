//! Software emulation of the paging core's collaborators.
//!
//! Provides host-side implementations of the block device, file and address space
//! interfaces so the paging core can be exercised without hardware:
//!
//! - [`MemoryBlockDevice`]: a RAM-backed swap device with transfer counters.
//! - [`MemoryFile`]: a RAM-backed file whose reopened handles share contents.
//! - [`PageDirectory`]: a page directory with x86_64-style accessed and dirty bits.

mod block;
mod entry;
mod file;
mod flags;
mod page_directory;

pub use block::MemoryBlockDevice;
pub use entry::PageEntry;
pub use file::MemoryFile;
pub use flags::PageFlags;
pub use page_directory::PageDirectory;
