#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Polaris Virtual Memory Manager (VMM)
//!
//! The demand paging core of the Polaris kernel. It provides:
//!
//! - A frame table that hands out physical frames to user pages and reclaims them with a
//!   second-chance clock when memory runs out.
//! - Swap space on a block device for evicted pages.
//! - A per-process supplemental page table that loads pages lazily from files or swap.
//! - Memory-mapped files with write-back of modified pages on unmap.
//! - Software emulation of the block device, file and page directory collaborators for
//!   testing in non-kernel environments.

extern crate alloc;

mod address;
mod address_space;
mod bitmap;
mod config;
mod device;
mod error;
mod fault;
mod frame;
mod frame_table;
mod mmap;
mod numbers;
mod physical_memory;
mod process;
mod supplemental;
mod swap;
mod uaccess;
mod virtual_memory;

#[cfg(any(test, feature = "software-emulation"))]
pub mod emulation;


pub use address::{PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use config::VmConfig;
pub use device::{BlockDevice, File};
pub use error::{Result, VmError};
pub use fault::{PageFault, StackGrowthPolicy};
pub use frame::{Frame, FrameOwner};
pub use frame_table::FrameTable;
pub use mmap::{FileMappings, MappingId};
pub use numbers::{FrameNumber, PageNumber};
pub use physical_memory::{FrameContents, PhysicalMemory};
pub use process::{ProcessId, ProcessMemory};
pub use supplemental::{PageState, Probe, SupplementalPageTable};
pub use swap::{SwapManager, SwapSlot};
pub use uaccess::{read_user, write_user};
pub use virtual_memory::VirtualMemory;

/// Size of a page and of a physical frame, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Size of a block device sector, in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Sectors needed to hold one page.
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;
