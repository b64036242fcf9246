//! # Bitmap Allocator
//!
//! A bitmap-based physical frame pool with per-frame reference counts. Frame
//! contents live in a host buffer so page tables and loaded images can be
//! inspected directly.

use super::{AllocatorStats, FrameAllocator};
use crate::{Frame, MemError, MemResult};
use alloc::vec;
use alloc::vec::Vec;
use lattice_hal::{PhysAddr, PAGE_SIZE};

/// Bitmap allocator
#[derive(Debug)]
pub struct BitmapFrameAllocator {
    /// Bitmap data (1 = used, 0 = free)
    bitmap: Vec<u64>,
    /// Reference count per frame
    refcounts: Vec<u32>,
    /// Backing store for frame contents
    memory: Vec<u8>,
    /// Base address
    base: PhysAddr,
    /// Total number of frames
    total_frames: usize,
    /// Free frame count
    free_count: usize,
    /// Statistics
    allocations: u64,
    deallocations: u64,
}

impl BitmapFrameAllocator {
    /// Create a pool of `frames` frames starting at `base`
    pub fn new(base: PhysAddr, frames: usize) -> Self {
        let base = base.page_base();
        log::info!("Bitmap allocator initialized: {} frames at {}", frames, base);
        Self {
            bitmap: vec![0; (frames + 63) / 64],
            refcounts: vec![0; frames],
            memory: vec![0; frames * PAGE_SIZE as usize],
            base,
            total_frames: frames,
            free_count: frames,
            allocations: 0,
            deallocations: 0,
        }
    }

    /// Find first free bit
    fn find_free(&self) -> Option<usize> {
        for (word_idx, &word) in self.bitmap.iter().enumerate() {
            if word != u64::MAX {
                let bit = (!word).trailing_zeros() as usize;
                let frame_idx = word_idx * 64 + bit;
                if frame_idx < self.total_frames {
                    return Some(frame_idx);
                }
            }
        }
        None
    }

    fn is_used(&self, frame_idx: usize) -> bool {
        self.bitmap[frame_idx / 64] & (1 << (frame_idx % 64)) != 0
    }

    /// Set frame as used
    fn set_used(&mut self, frame_idx: usize) {
        self.bitmap[frame_idx / 64] |= 1 << (frame_idx % 64);
    }

    /// Set frame as free
    fn set_free(&mut self, frame_idx: usize) {
        self.bitmap[frame_idx / 64] &= !(1 << (frame_idx % 64));
    }

    /// Get frame index from address, if the frame belongs to this pool
    fn frame_index(&self, frame: Frame) -> Option<usize> {
        let addr = frame.address().as_u64();
        let base = self.base.as_u64();
        if addr < base {
            return None;
        }
        let idx = ((addr - base) / PAGE_SIZE) as usize;
        (idx < self.total_frames).then_some(idx)
    }

    /// Get address from frame index
    fn frame_address(&self, idx: usize) -> PhysAddr {
        self.base.add(idx as u64 * PAGE_SIZE)
    }

    fn byte_range(idx: usize) -> core::ops::Range<usize> {
        let start = idx * PAGE_SIZE as usize;
        start..start + PAGE_SIZE as usize
    }

    fn release(&mut self, idx: usize) {
        self.set_free(idx);
        self.free_count += 1;
        self.deallocations += 1;
    }

    /// Get statistics
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            allocations: self.allocations,
            deallocations: self.deallocations,
            current_allocations: self.allocations - self.deallocations,
        }
    }
}

impl FrameAllocator for BitmapFrameAllocator {
    fn allocate_frame(&mut self) -> MemResult<Frame> {
        let idx = self.find_free().ok_or(MemError::OutOfMemory)?;

        self.set_used(idx);
        self.refcounts[idx] = 0;
        self.memory[Self::byte_range(idx)].fill(0);
        self.free_count -= 1;
        self.allocations += 1;

        Ok(Frame::containing(self.frame_address(idx)))
    }

    fn incref(&mut self, frame: Frame) {
        if let Some(idx) = self.frame_index(frame) {
            self.refcounts[idx] += 1;
        }
    }

    fn decref(&mut self, frame: Frame) {
        let Some(idx) = self.frame_index(frame) else {
            return;
        };
        if !self.is_used(idx) {
            log::warn!("decref on free frame {}", frame.address());
            return;
        }
        self.refcounts[idx] = self.refcounts[idx].saturating_sub(1);
        if self.refcounts[idx] == 0 {
            self.release(idx);
        }
    }

    fn refcount(&self, frame: Frame) -> u32 {
        self.frame_index(frame).map_or(0, |idx| self.refcounts[idx])
    }

    fn frame_bytes(&self, frame: Frame) -> MemResult<&[u8]> {
        let idx = self.frame_index(frame).ok_or(MemError::InvalidAddress)?;
        Ok(&self.memory[Self::byte_range(idx)])
    }

    fn frame_bytes_mut(&mut self, frame: Frame) -> MemResult<&mut [u8]> {
        let idx = self.frame_index(frame).ok_or(MemError::InvalidAddress)?;
        Ok(&mut self.memory[Self::byte_range(idx)])
    }

    fn free_frames(&self) -> usize {
        self.free_count
    }

    fn total_frames(&self) -> usize {
        self.total_frames
    }
}
