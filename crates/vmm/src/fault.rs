//! Page fault descriptions and the stack growth heuristic.

use core::fmt;

use crate::VirtualAddress;

/// A page fault as reported by the fault handler.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    pub address: VirtualAddress,
    pub write: bool,
    /// Whether an access to an unregistered page may grow the stack.
    pub stack_growth: bool,
}

impl PageFault {
    /// A fault that must hit a registered page.
    pub const fn new(address: VirtualAddress, write: bool) -> Self {
        Self {
            address,
            write,
            stack_growth: false,
        }
    }

    /// A fault that allocates a fresh zero page if the page is unregistered.
    pub const fn with_stack_growth(address: VirtualAddress, write: bool) -> Self {
        Self {
            address,
            write,
            stack_growth: true,
        }
    }
}

impl fmt::Debug for PageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.write { "write" } else { "read" };
        write!(f, "{kind} at {}", self.address)?;
        if self.stack_growth {
            write!(f, " (stack growth)")?;
        }
        Ok(())
    }
}

/// Decides whether a fault on an unregistered page is the user stack growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackGrowthPolicy {
    /// The address just above the highest stack byte.
    pub stack_top: VirtualAddress,
    /// The largest the stack may grow, in bytes.
    pub max_size: usize,
    /// How far below the stack pointer an access may land. `PUSHA` writes 32 bytes below
    /// the stack pointer before adjusting it.
    pub slack: usize,
}

impl Default for StackGrowthPolicy {
    fn default() -> Self {
        Self {
            stack_top: VirtualAddress::new(0xC000_0000),
            max_size: 8 * 1024 * 1024,
            slack: 32,
        }
    }
}

impl StackGrowthPolicy {
    /// Returns whether an access at `address` with the user stack pointer at
    /// `stack_pointer` may grow the stack.
    pub fn permits(&self, address: VirtualAddress, stack_pointer: VirtualAddress) -> bool {
        let floor = self.stack_top.as_usize().saturating_sub(self.max_size);
        let address = address.as_usize();

        address < self.stack_top.as_usize()
            && address >= floor
            && address.saturating_add(self.slack) >= stack_pointer.as_usize()
    }

    /// Builds the fault for an access at `address`, deciding stack growth from the user
    /// stack pointer.
    pub fn classify(
        &self,
        address: VirtualAddress,
        write: bool,
        stack_pointer: VirtualAddress,
    ) -> PageFault {
        PageFault {
            address,
            write,
            stack_growth: self.permits(address, stack_pointer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(value: usize) -> VirtualAddress {
        VirtualAddress::new(value)
    }

    #[test]
    fn push_just_below_stack_pointer_grows() {
        let policy = StackGrowthPolicy::default();
        let sp = addr(0xBFFF_F000);
        assert!(policy.permits(addr(0xBFFF_EFE0), sp));
        assert!(policy.permits(addr(0xBFFF_F100), sp));
        assert!(!policy.permits(addr(0xBFFF_EFDF), sp));
    }

    #[test]
    fn stack_is_bounded() {
        let policy = StackGrowthPolicy::default();
        let floor = 0xC000_0000 - 8 * 1024 * 1024;
        assert!(policy.permits(addr(floor), addr(floor)));
        assert!(!policy.permits(addr(floor - 1), addr(floor - 1)));
        assert!(!policy.permits(addr(0xC000_0000), addr(0xBFFF_FFF0)));
    }

    #[test]
    fn classify_carries_the_verdict() {
        let policy = StackGrowthPolicy::default();
        let fault = policy.classify(addr(0xBFFF_FFFC), true, addr(0xBFFF_FFFC));
        assert_eq!(fault, PageFault::with_stack_growth(addr(0xBFFF_FFFC), true));

        let fault = policy.classify(addr(0x0804_8000), false, addr(0xBFFF_FFFC));
        assert_eq!(fault, PageFault::new(addr(0x0804_8000), false));
    }

    #[test]
    fn debug_describes_the_access() {
        let fault = PageFault::with_stack_growth(addr(0x1000), true);
        assert_eq!(format!("{fault:?}"), "write at 0x1000 (stack growth)");
    }
}
