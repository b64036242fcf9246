//! # Lattice Memory Subsystem
//!
//! The memory subsystem provides:
//! - The user/kernel virtual layout shared by every address space
//! - A reference-counted physical frame pool
//! - A two-level page-table mapper
//! - Address-space construction, teardown and user-memory copy-in
//!
//! ## Key Principle
//!
//! The execution core only ever talks to the [`FrameAllocator`] trait and
//! the [`AddressSpace`] type; the frame pool behind them can be swapped.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod layout;
pub mod physical;
pub mod virtual_memory;

pub use physical::{bitmap::BitmapFrameAllocator, FrameAllocator};
pub use virtual_memory::address_space::AddressSpace;
pub use virtual_memory::mapper::PageTableMapper;

use lattice_hal::{PhysAddr, PAGE_SIZE};

/// Memory subsystem result type
pub type MemResult<T> = Result<T, MemError>;

/// Memory subsystem errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// Out of memory
    OutOfMemory,
    /// Invalid address
    InvalidAddress,
    /// Region not mapped
    NotMapped,
    /// Permission denied
    PermissionDenied,
}

impl core::fmt::Display for MemError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            MemError::OutOfMemory => "out of physical memory",
            MemError::InvalidAddress => "invalid address",
            MemError::NotMapped => "address not mapped",
            MemError::PermissionDenied => "permission denied",
        };
        f.write_str(msg)
    }
}

/// Frame - represents a physical page
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Frame {
    /// Physical address of the frame
    address: PhysAddr,
}

impl Frame {
    /// Create the frame containing `address`
    pub const fn containing(address: PhysAddr) -> Self {
        Self {
            address: address.page_base(),
        }
    }

    /// Get the physical address
    pub const fn address(&self) -> PhysAddr {
        self.address
    }

    /// Check if address is within this frame
    pub fn contains(&self, addr: PhysAddr) -> bool {
        addr >= self.address && addr.as_u64() < self.address.as_u64() + PAGE_SIZE
    }
}
