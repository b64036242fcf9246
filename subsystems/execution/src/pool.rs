//! # Address-Space Tag Pool
//!
//! A 64-bit bitmap of hardware tags. Allocation hands out the lowest free
//! tag; a tag returns to the pool only when its process is destroyed.

use crate::{ExecError, ExecResult, Resource};
use lattice_hal::Asid;

/// Pool of hardware address-space tags
#[derive(Debug, Clone)]
pub struct AsidPool {
    /// Bit `n` set means tag `n` is bound to a live process
    bitmap: u64,
    /// Tags available for allocation
    mask: u64,
}

impl AsidPool {
    /// Create a pool handing out tags `0..count` (`count` ≤ 64)
    pub const fn new(count: usize) -> Self {
        let mask = if count >= 64 { u64::MAX } else { (1u64 << count) - 1 };
        Self { bitmap: 0, mask }
    }

    /// Take the lowest free tag
    pub fn allocate(&mut self) -> ExecResult<Asid> {
        let free = !self.bitmap & self.mask;
        if free == 0 {
            log::warn!("address-space tags exhausted");
            return Err(ExecError::ResourceExhausted(Resource::AddressSpaceTag));
        }
        let bit = free.trailing_zeros();
        self.bitmap |= 1 << bit;
        Asid::new(bit as u8).ok_or(ExecError::ResourceExhausted(Resource::AddressSpaceTag))
    }

    /// Return `asid` to the pool
    pub fn free(&mut self, asid: Asid) {
        self.bitmap &= !(1u64 << asid.as_u8());
    }

    /// Whether `asid` is currently bound
    pub fn is_allocated(&self, asid: Asid) -> bool {
        self.bitmap & (1u64 << asid.as_u8()) != 0
    }

    /// Number of tags in use
    pub fn in_use(&self) -> usize {
        self.bitmap.count_ones() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_first() {
        let mut pool = AsidPool::new(64);
        assert_eq!(pool.allocate().unwrap().as_u8(), 0);
        assert_eq!(pool.allocate().unwrap().as_u8(), 1);
        pool.free(Asid::new(0).unwrap());
        assert_eq!(pool.allocate().unwrap().as_u8(), 0);
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn test_exhaustion_is_error() {
        let mut pool = AsidPool::new(64);
        for expected in 0..64u8 {
            assert_eq!(pool.allocate().unwrap().as_u8(), expected);
        }
        assert_eq!(
            pool.allocate(),
            Err(ExecError::ResourceExhausted(Resource::AddressSpaceTag))
        );
    }

    #[test]
    fn test_reduced_count() {
        let mut pool = AsidPool::new(2);
        pool.allocate().unwrap();
        let second = pool.allocate().unwrap();
        assert!(pool.allocate().is_err());
        pool.free(second);
        assert!(!pool.is_allocated(second));
        assert_eq!(pool.allocate(), Ok(second));
    }
}
