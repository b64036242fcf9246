//! # Virtual Memory Management
//!
//! Page-table entry encoding plus the mapper and address-space types built on
//! it. Page tables are ordinary frames from the pool holding
//! [`ENTRIES_PER_TABLE`](crate::layout::ENTRIES_PER_TABLE) little-endian
//! 64-bit entries.

pub mod address_space;
pub mod mapper;

use crate::physical::FrameAllocator;
use crate::{Frame, MemResult};
use lattice_hal::{PageFlags, PhysAddr};

/// One page-table entry: frame address in the upper bits, flags below
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    /// An invalid entry
    pub const EMPTY: Self = Self(0);

    /// Entry pointing at `frame` with `flags`
    pub const fn new(frame: Frame, flags: PageFlags) -> Self {
        Self((frame.address().as_u64() & !PageFlags::MASK) | flags.bits())
    }

    /// Raw entry value
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether the entry is valid
    pub const fn is_valid(self) -> bool {
        self.0 & PageFlags::VALID.bits() != 0
    }

    /// Frame the entry points at
    pub const fn frame(self) -> Frame {
        Frame::containing(PhysAddr::new(self.0 & !PageFlags::MASK))
    }

    /// Flags of the entry
    pub const fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & PageFlags::MASK)
    }
}

/// Read entry `index` of the table held in `table`
pub(crate) fn read_entry<A: FrameAllocator + ?Sized>(
    allocator: &A,
    table: Frame,
    index: usize,
) -> MemResult<PageTableEntry> {
    let bytes = allocator.frame_bytes(table)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[index * 8..index * 8 + 8]);
    Ok(PageTableEntry(u64::from_le_bytes(raw)))
}

/// Write entry `index` of the table held in `table`
pub(crate) fn write_entry<A: FrameAllocator + ?Sized>(
    allocator: &mut A,
    table: Frame,
    index: usize,
    entry: PageTableEntry,
) -> MemResult<()> {
    let bytes = allocator.frame_bytes_mut(table)?;
    bytes[index * 8..index * 8 + 8].copy_from_slice(&entry.0.to_le_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_encoding() {
        let frame = Frame::containing(PhysAddr::new(0x12_3000));
        let entry = PageTableEntry::new(frame, PageFlags::user_rodata());
        assert!(entry.is_valid());
        assert_eq!(entry.frame(), frame);
        assert_eq!(entry.flags(), PageFlags::user_rodata());
        assert!(!PageTableEntry::EMPTY.is_valid());
    }
}
