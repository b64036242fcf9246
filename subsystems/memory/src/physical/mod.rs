//! # Physical Memory Management
//!
//! The frame pool contract consumed by the page-table mapper and the
//! execution core.

pub mod bitmap;

use crate::{Frame, MemResult};

/// Reference-counted physical frame pool
///
/// Freshly allocated frames are zeroed and carry a reference count of zero;
/// mapping a frame takes a reference, unmapping drops it, and the frame
/// returns to the pool when the count falls to zero.
pub trait FrameAllocator {
    /// Allocate a zeroed frame
    fn allocate_frame(&mut self) -> MemResult<Frame>;

    /// Take a reference on `frame`
    fn incref(&mut self, frame: Frame);

    /// Drop a reference on `frame`, freeing it once none remain
    ///
    /// Dropping on an unreferenced frame frees it immediately, which is how
    /// a caller discards a frame it allocated but never mapped.
    fn decref(&mut self, frame: Frame);

    /// Current reference count of `frame`
    fn refcount(&self, frame: Frame) -> u32;

    /// Contents of `frame`
    fn frame_bytes(&self, frame: Frame) -> MemResult<&[u8]>;

    /// Mutable contents of `frame`
    fn frame_bytes_mut(&mut self, frame: Frame) -> MemResult<&mut [u8]>;

    /// Get free frame count
    fn free_frames(&self) -> usize;

    /// Get total frame count
    fn total_frames(&self) -> usize;
}

/// Allocator statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Total allocations
    pub allocations: u64,
    /// Total deallocations
    pub deallocations: u64,
    /// Current allocation count
    pub current_allocations: u64,
}
