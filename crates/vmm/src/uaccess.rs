//! Kernel access to user memory.
//!
//! Copies go page by page. Each page is faulted in if needed and pinned for the duration
//! of its copy, so eviction cannot pull it out from under the kernel. The accessed and
//! dirty bits are set as the MMU would set them for the same access.

use alloc::sync::Arc;

use crate::{PAGE_SIZE, Result, SupplementalPageTable, VirtualAddress, VirtualMemory, VmError};

/// Splits `len` bytes at `address` into per-page chunks of (address, buffer offset, length).
fn chunks(
    address: VirtualAddress,
    len: usize,
    write: bool,
) -> Result<impl Iterator<Item = (VirtualAddress, usize, usize)>> {
    if address.checked_add(len).is_none() {
        return Err(VmError::InvalidAccess { address, write });
    }

    let mut done = 0;
    Ok(core::iter::from_fn(move || {
        if done == len {
            return None;
        }
        let current = address + done;
        let count = (PAGE_SIZE - current.page_offset()).min(len - done);
        let chunk = (current, done, count);
        done += count;
        Some(chunk)
    }))
}

/// Copies `buf.len()` bytes from user memory at `address` into `buf`.
///
/// # Errors
/// Returns [`VmError::InvalidAccess`] if any byte is outside a registered page. Bytes
/// before the failing page have already been copied.
pub fn read_user(
    vm: &VirtualMemory,
    pages: &Arc<SupplementalPageTable>,
    address: VirtualAddress,
    buf: &mut [u8],
) -> Result<()> {
    for (current, offset, count) in chunks(address, buf.len(), false)? {
        let frame = pages.pin_page(vm, current, false)?;
        let start = current.page_offset();
        {
            let contents = vm.frames().memory().contents(frame.number());
            buf[offset..offset + count].copy_from_slice(&contents[start..start + count]);
        }
        pages.address_space().set_accessed(current.page_number(), true);
        vm.frames().unpin(frame);
    }
    Ok(())
}

/// Copies `buf` into user memory at `address`.
///
/// # Errors
/// Returns [`VmError::InvalidAccess`] if any byte is outside a registered page or in a
/// read-only page.
pub fn write_user(
    vm: &VirtualMemory,
    pages: &Arc<SupplementalPageTable>,
    address: VirtualAddress,
    buf: &[u8],
) -> Result<()> {
    for (current, offset, count) in chunks(address, buf.len(), true)? {
        let frame = pages.pin_page(vm, current, true)?;
        let start = current.page_offset();
        {
            let mut contents = vm.frames().memory().contents(frame.number());
            contents[start..start + count].copy_from_slice(&buf[offset..offset + count]);
        }
        let space = pages.address_space();
        space.set_accessed(current.page_number(), true);
        space.set_dirty(current.page_number(), true);
        vm.frames().unpin(frame);
    }
    Ok(())
}
