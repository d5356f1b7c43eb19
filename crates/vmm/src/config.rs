//! Boot-time configuration of the virtual memory subsystem.

use crate::{StackGrowthPolicy, VirtualAddress};

/// Parameters fixed when the subsystem is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// The first address above user space. Mappings must end at or below it.
    pub user_top: VirtualAddress,
    pub stack: StackGrowthPolicy,
    /// Full turns of the clock the frame table may make looking for a victim.
    pub eviction_passes: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            user_top: VirtualAddress::new(0xC000_0000),
            stack: StackGrowthPolicy::default(),
            eviction_passes: 2,
        }
    }
}

impl VmConfig {
    /// Returns whether `len` bytes starting at `address` lie entirely in user space.
    pub fn is_user_range(&self, address: VirtualAddress, len: usize) -> bool {
        address
            .checked_add(len)
            .is_some_and(|end| end <= self.user_top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_range_ends_at_user_top() {
        let config = VmConfig::default();
        assert!(config.is_user_range(VirtualAddress::new(0xBFFF_F000), 0x1000));
        assert!(!config.is_user_range(VirtualAddress::new(0xBFFF_F000), 0x1001));
        assert!(!config.is_user_range(VirtualAddress::new(usize::MAX), 2));
    }
}
