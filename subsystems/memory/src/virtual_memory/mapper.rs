//! # Page Table Mapper
//!
//! Walks and edits the two-level table rooted at one directory frame.
//! Intermediate tables are allocated on demand and hold a reference to
//! themselves; every mapped frame holds one reference per mapping.

use super::{read_entry, write_entry, PageTableEntry};
use crate::layout::{pdx, ptx, ADDRESS_SPACE_SIZE};
use crate::physical::FrameAllocator;
use crate::{Frame, MemError, MemResult};
use lattice_hal::{PageFlags, VirtAddr};

/// Page table mapper over one directory
#[derive(Debug)]
pub struct PageTableMapper<'a, A: FrameAllocator> {
    /// Root page table frame
    root: Frame,
    /// Frame pool holding the tables and the mapped frames
    allocator: &'a mut A,
}

impl<'a, A: FrameAllocator> PageTableMapper<'a, A> {
    /// Create a mapper over the directory in `root`
    pub fn new(root: Frame, allocator: &'a mut A) -> Self {
        Self { root, allocator }
    }

    /// Get root table frame
    pub fn root(&self) -> Frame {
        self.root
    }

    /// Locate the leaf table covering `virt`, creating it if asked
    fn leaf_table(&mut self, virt: VirtAddr, create: bool) -> MemResult<Option<Frame>> {
        if virt.as_u64() >= ADDRESS_SPACE_SIZE {
            return Err(MemError::InvalidAddress);
        }
        let dir = read_entry(&*self.allocator, self.root, pdx(virt))?;
        if dir.is_valid() {
            return Ok(Some(dir.frame()));
        }
        if !create {
            return Ok(None);
        }

        let table = self.allocator.allocate_frame()?;
        self.allocator.incref(table);
        write_entry(
            &mut *self.allocator,
            self.root,
            pdx(virt),
            PageTableEntry::new(table, PageFlags::table()),
        )?;
        log::trace!("mapper: new table {} for pdx {}", table.address(), pdx(virt));
        Ok(Some(table))
    }

    /// Map the page containing `virt` to `frame`
    ///
    /// An existing mapping of a different frame is removed first; remapping
    /// the same frame only updates its flags.
    pub fn map(&mut self, virt: VirtAddr, frame: Frame, flags: PageFlags) -> MemResult<()> {
        let table = self
            .leaf_table(virt, true)?
            .ok_or(MemError::OutOfMemory)?;
        let old = read_entry(&*self.allocator, table, ptx(virt))?;
        if old.is_valid() {
            if old.frame() == frame {
                return write_entry(
                    &mut *self.allocator,
                    table,
                    ptx(virt),
                    PageTableEntry::new(frame, flags | PageFlags::VALID),
                );
            }
            self.unmap(virt)?;
        }

        self.allocator.incref(frame);
        write_entry(
            &mut *self.allocator,
            table,
            ptx(virt),
            PageTableEntry::new(frame, flags | PageFlags::VALID),
        )?;
        log::trace!(
            "Mapping {} -> {} with flags {:?}",
            virt.align_down(lattice_hal::PAGE_SIZE),
            frame.address(),
            flags
        );
        Ok(())
    }

    /// Remove the mapping of the page containing `virt`, returning its frame
    ///
    /// The frame loses the reference the mapping held.
    pub fn unmap(&mut self, virt: VirtAddr) -> MemResult<Frame> {
        let table = self.leaf_table(virt, false)?.ok_or(MemError::NotMapped)?;
        let entry = read_entry(&*self.allocator, table, ptx(virt))?;
        if !entry.is_valid() {
            return Err(MemError::NotMapped);
        }
        write_entry(&mut *self.allocator, table, ptx(virt), PageTableEntry::EMPTY)?;
        self.allocator.decref(entry.frame());
        log::trace!("Unmapping {}", virt.align_down(lattice_hal::PAGE_SIZE));
        Ok(entry.frame())
    }

    /// Change the flags of an existing mapping
    pub fn update_flags(&mut self, virt: VirtAddr, flags: PageFlags) -> MemResult<()> {
        let (frame, _) = self.translate(virt).ok_or(MemError::NotMapped)?;
        let table = self.leaf_table(virt, false)?.ok_or(MemError::NotMapped)?;
        write_entry(
            &mut *self.allocator,
            table,
            ptx(virt),
            PageTableEntry::new(frame, flags | PageFlags::VALID),
        )
    }

    /// Look up the frame and flags mapped at `virt`
    pub fn translate(&self, virt: VirtAddr) -> Option<(Frame, PageFlags)> {
        translate(&*self.allocator, self.root, virt)
    }
}

/// Look up the mapping of `virt` in the directory `root`
pub fn translate<A: FrameAllocator + ?Sized>(
    allocator: &A,
    root: Frame,
    virt: VirtAddr,
) -> Option<(Frame, PageFlags)> {
    if virt.as_u64() >= ADDRESS_SPACE_SIZE {
        return None;
    }
    let dir = read_entry(allocator, root, pdx(virt)).ok()?;
    if !dir.is_valid() {
        return None;
    }
    let entry = read_entry(allocator, dir.frame(), ptx(virt)).ok()?;
    entry.is_valid().then(|| (entry.frame(), entry.flags()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BitmapFrameAllocator;
    use lattice_hal::PhysAddr;

    fn pool() -> BitmapFrameAllocator {
        BitmapFrameAllocator::new(PhysAddr::new(0x10_0000), 16)
    }

    #[test]
    fn test_map_and_translate() {
        let mut pool = pool();
        let root = pool.allocate_frame().unwrap();
        let page = pool.allocate_frame().unwrap();
        let mut mapper = PageTableMapper::new(root, &mut pool);
        mapper.map(VirtAddr::new(0x40_1000), page, PageFlags::user_image()).unwrap();

        let (frame, flags) = mapper.translate(VirtAddr::new(0x40_1abc)).unwrap();
        assert_eq!(frame, page);
        assert!(flags.contains(PageFlags::USER));
        assert!(mapper.translate(VirtAddr::new(0x40_2000)).is_none());
        assert_eq!(pool.refcount(page), 1);
    }

    #[test]
    fn test_remap_replaces_old_frame() {
        let mut pool = pool();
        let root = pool.allocate_frame().unwrap();
        let first = pool.allocate_frame().unwrap();
        let second = pool.allocate_frame().unwrap();
        {
            let mut mapper = PageTableMapper::new(root, &mut pool);
            mapper.map(VirtAddr::new(0x1000), first, PageFlags::user_image()).unwrap();
        }
        let free_before = pool.free_frames();
        {
            let mut mapper = PageTableMapper::new(root, &mut pool);
            mapper.map(VirtAddr::new(0x1000), second, PageFlags::user_image()).unwrap();
            assert_eq!(mapper.translate(VirtAddr::new(0x1000)).unwrap().0, second);
        }
        // first frame lost its only reference
        assert_eq!(pool.free_frames(), free_before + 1);
    }

    #[test]
    fn test_unmap() {
        let mut pool = pool();
        let root = pool.allocate_frame().unwrap();
        let page = pool.allocate_frame().unwrap();
        let mut mapper = PageTableMapper::new(root, &mut pool);
        mapper.map(VirtAddr::new(0x2000), page, PageFlags::user_image()).unwrap();
        assert_eq!(mapper.unmap(VirtAddr::new(0x2000)), Ok(page));
        assert_eq!(mapper.unmap(VirtAddr::new(0x2000)), Err(MemError::NotMapped));
        assert_eq!(pool.refcount(page), 0);
    }

    #[test]
    fn test_update_flags() {
        let mut pool = pool();
        let root = pool.allocate_frame().unwrap();
        let page = pool.allocate_frame().unwrap();
        let mut mapper = PageTableMapper::new(root, &mut pool);
        mapper.map(VirtAddr::new(0x3000), page, PageFlags::user_image()).unwrap();
        mapper.update_flags(VirtAddr::new(0x3000), PageFlags::user_rodata()).unwrap();
        let (_, flags) = mapper.translate(VirtAddr::new(0x3000)).unwrap();
        assert!(!flags.contains(PageFlags::WRITABLE));
        assert_eq!(
            mapper.update_flags(VirtAddr::new(0x5000), PageFlags::user_rodata()),
            Err(MemError::NotMapped)
        );
    }

    #[test]
    fn test_out_of_range() {
        let mut pool = pool();
        let root = pool.allocate_frame().unwrap();
        let page = pool.allocate_frame().unwrap();
        let mut mapper = PageTableMapper::new(root, &mut pool);
        assert_eq!(
            mapper.map(VirtAddr::new(ADDRESS_SPACE_SIZE), page, PageFlags::user_image()),
            Err(MemError::InvalidAddress)
        );
    }
}
