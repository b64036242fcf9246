//! # Address Space Management
//!
//! An address space is a directory frame whose kernel half is copied from a
//! boot-time template and whose user half starts empty. The directory slot
//! covering [`UVPT`] maps the directory onto itself, read-only, so a process
//! can inspect its own page tables.

use super::mapper::{self, PageTableMapper};
use super::{read_entry, write_entry, PageTableEntry};
use crate::layout::{page_address, pdx, ENTRIES_PER_TABLE, UTOP, UVPT};
use crate::physical::FrameAllocator;
use crate::{Frame, MemError, MemResult};
use lattice_hal::{PageFlags, VirtAddr, PAGE_SIZE};

/// Address space
#[derive(Debug, PartialEq, Eq)]
pub struct AddressSpace {
    /// Directory frame
    root: Frame,
}

impl AddressSpace {
    /// Build the boot template holding the shared kernel mappings
    ///
    /// `kernel_pages` frames are mapped from [`UTOP`] upward with global
    /// kernel flags.
    pub fn bootstrap_kernel<A: FrameAllocator>(
        allocator: &mut A,
        kernel_pages: usize,
    ) -> MemResult<Self> {
        let root = allocator.allocate_frame()?;
        allocator.incref(root);
        let space = Self { root };
        for i in 0..kernel_pages as u64 {
            let frame = allocator.allocate_frame()?;
            space
                .mapper(allocator)
                .map(VirtAddr::new(UTOP + i * PAGE_SIZE), frame, PageFlags::kernel_data())?;
        }
        log::info!("kernel template at {} ({} pages)", root.address(), kernel_pages);
        Ok(space)
    }

    /// Create a fresh address space sharing `kernel`'s mappings above [`UTOP`]
    pub fn create<A: FrameAllocator>(allocator: &mut A, kernel: &AddressSpace) -> MemResult<Self> {
        let root = allocator.allocate_frame()?;
        allocator.incref(root);

        let uvpt = pdx(VirtAddr::new(UVPT));
        for index in pdx(VirtAddr::new(UTOP))..ENTRIES_PER_TABLE {
            if index == uvpt {
                continue;
            }
            let entry = read_entry(&*allocator, kernel.root, index)?;
            write_entry(allocator, root, index, entry)?;
        }
        write_entry(
            allocator,
            root,
            uvpt,
            PageTableEntry::new(root, PageFlags::user_rodata()),
        )?;

        log::trace!("address space created at {}", root.address());
        Ok(Self { root })
    }

    /// Directory frame
    pub fn root(&self) -> Frame {
        self.root
    }

    /// Mapper over this address space
    pub fn mapper<'a, A: FrameAllocator>(&self, allocator: &'a mut A) -> PageTableMapper<'a, A> {
        PageTableMapper::new(self.root, allocator)
    }

    /// Look up the mapping of `virt`
    pub fn translate<A: FrameAllocator>(
        &self,
        allocator: &A,
        virt: VirtAddr,
    ) -> Option<(Frame, PageFlags)> {
        mapper::translate(allocator, self.root, virt)
    }

    /// Number of pages mapped below [`UTOP`]
    pub fn user_page_count<A: FrameAllocator>(&self, allocator: &A) -> usize {
        let mut count = 0;
        for dir_index in 0..pdx(VirtAddr::new(UTOP)) {
            let Ok(dir) = read_entry(allocator, self.root, dir_index) else {
                continue;
            };
            if !dir.is_valid() {
                continue;
            }
            count += (0..ENTRIES_PER_TABLE)
                .filter(|&i| {
                    read_entry(allocator, dir.frame(), i).map_or(false, PageTableEntry::is_valid)
                })
                .count();
        }
        count
    }

    /// Copy `buf.len()` bytes starting at user address `virt` into `buf`
    ///
    /// Every byte must lie below [`UTOP`] in a user-accessible mapping.
    pub fn copy_from_user<A: FrameAllocator>(
        &self,
        allocator: &A,
        virt: VirtAddr,
        buf: &mut [u8],
    ) -> MemResult<()> {
        if !crate::layout::is_user_range(virt, buf.len() as u64) {
            return Err(MemError::InvalidAddress);
        }
        let mut copied = 0;
        while copied < buf.len() {
            let va = virt.add(copied as u64);
            let (frame, flags) = self.translate(allocator, va).ok_or(MemError::NotMapped)?;
            if !flags.contains(PageFlags::USER) {
                return Err(MemError::PermissionDenied);
            }
            let offset = va.page_offset() as usize;
            let chunk = (PAGE_SIZE as usize - offset).min(buf.len() - copied);
            let bytes = allocator.frame_bytes(frame)?;
            buf[copied..copied + chunk].copy_from_slice(&bytes[offset..offset + chunk]);
            copied += chunk;
        }
        Ok(())
    }

    /// Tear the address space down
    ///
    /// Every user page and user page table loses its reference, then the
    /// directory itself is released. Kernel tables are shared and untouched.
    pub fn destroy<A: FrameAllocator>(self, allocator: &mut A) -> MemResult<()> {
        for dir_index in 0..pdx(VirtAddr::new(UTOP)) {
            let dir = read_entry(&*allocator, self.root, dir_index)?;
            if !dir.is_valid() {
                continue;
            }
            {
                let mut mapper = self.mapper(allocator);
                for index in 0..ENTRIES_PER_TABLE {
                    match mapper.unmap(page_address(dir_index, index)) {
                        Ok(_) | Err(MemError::NotMapped) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
            write_entry(allocator, self.root, dir_index, PageTableEntry::EMPTY)?;
            allocator.decref(dir.frame());
        }
        allocator.decref(self.root);
        log::trace!("address space at {} destroyed", self.root.address());
        Ok(())
    }
}
