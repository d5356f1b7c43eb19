//! Reportable virtual memory errors.
//!
//! Only conditions a caller can recover from are represented here. Broken invariants
//! (no evictable frame, unbalanced pins, a missing entry that must exist) panic instead.

use crate::VirtualAddress;

/// Errors reported by the virtual memory subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// The address has no backing and is not a stack-growth candidate, or a write
    /// targeted a read-only page. The caller terminates the offending process.
    #[error("invalid access at {address} (write: {write})")]
    InvalidAccess { address: VirtualAddress, write: bool },
    /// Every swap slot is occupied, so no frame could be reclaimed.
    #[error("swap space exhausted")]
    SwapExhausted,
    /// A mapping was requested at the null address.
    #[error("cannot map at the null address")]
    NullAddress,
    /// A mapping was requested at an address that is not page-aligned.
    #[error("mapping address {0} is not page-aligned")]
    Misaligned(VirtualAddress),
    /// A page covered by the request already has an entry.
    #[error("page at {0} is already mapped")]
    Overlap(VirtualAddress),
    /// A zero-length file cannot be mapped.
    #[error("cannot map an empty file")]
    EmptyFile,
    /// The requested range extends beyond user space.
    #[error("range starting at {0} leaves user space")]
    NotUserAddress(VirtualAddress),
}

/// Result type for virtual memory operations.
pub type Result<T> = core::result::Result<T, VmError>;
