//! # MMU Abstraction
//!
//! Page-table entry flags, hardware address-space tags, and the operations
//! needed to bind an address space to the CPU.

use crate::PhysAddr;
use bitflags::bitflags;

bitflags! {
    /// Page table entry flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        /// Entry is valid
        const VALID = 1 << 0;
        /// Page is writable
        const WRITABLE = 1 << 1;
        /// Page is accessible from user mode
        const USER = 1 << 2;
        /// Page is global (shared by every address space)
        const GLOBAL = 1 << 3;
        /// Page caching is disabled
        const NO_CACHE = 1 << 4;
        /// Page has been accessed
        const ACCESSED = 1 << 5;
        /// Page has been written to
        const DIRTY = 1 << 6;
    }
}

impl PageFlags {
    /// Mask of the bits an entry reserves for flags
    pub const MASK: u64 = 0xfff;

    /// Flags for kernel data shared by every address space
    pub const fn kernel_data() -> Self {
        Self::VALID.union(Self::WRITABLE).union(Self::GLOBAL)
    }

    /// Flags for an intermediate page table
    pub const fn table() -> Self {
        Self::VALID.union(Self::WRITABLE).union(Self::USER)
    }

    /// Single permission profile used for every page of a loaded image
    pub const fn user_image() -> Self {
        Self::VALID.union(Self::WRITABLE).union(Self::USER)
    }

    /// Flags for user read-only data
    pub const fn user_rodata() -> Self {
        Self::VALID.union(Self::USER)
    }
}

/// Hardware address-space tag
///
/// Binds cached translations to one address space; the hardware offers only
/// [`Asid::LIMIT`] of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Asid(u8);

impl Asid {
    /// Number of tags the hardware distinguishes
    pub const LIMIT: usize = 64;

    /// Create a tag, rejecting values the hardware cannot hold
    pub const fn new(raw: u8) -> Option<Self> {
        if (raw as usize) < Self::LIMIT {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Raw tag value
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

/// MMU abstraction trait
pub trait MmuAbstraction {
    /// Get the number of address space IDs available
    fn max_asid(&self) -> usize {
        Asid::LIMIT
    }

    /// Bind the page-table root and its tag for subsequent user execution
    fn switch_address_space(&mut self, root: PhysAddr, asid: Asid);

    /// Invalidate TLB entries for a specific ASID
    fn invalidate_asid(&mut self, asid: Asid);
}
