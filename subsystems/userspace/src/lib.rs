//! # Lattice Userspace Subsystem
//!
//! The user-level threading library:
//! - Thread create, exit and join
//! - Cooperative cancellation (deferred or immediate) and detach
//! - A counting semaphore
//!
//! Everything here goes through the [`ThreadSyscalls`] boundary; the
//! library keeps no thread state of its own beyond counters. Per-thread
//! bookkeeping lives in the kernel's thread descriptors, which user code
//! reaches only for threads of its own process.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod semaphore;
pub mod syscalls;
pub mod threads;

#[cfg(test)]
mod tests;

use core::sync::atomic::{AtomicU64, Ordering};

// Re-exports
pub use semaphore::Semaphore;
pub use syscalls::ThreadSyscalls;
pub use threads::ThreadLibrary;

/// Statistics for the threading library
#[derive(Debug, Default)]
pub struct LibraryStats {
    /// Threads started
    pub threads_created: AtomicU64,
    /// Joins that returned an exit value
    pub threads_joined: AtomicU64,
    /// Accepted cancellation requests
    pub cancels_requested: AtomicU64,
}

impl LibraryStats {
    /// Create new stats
    pub const fn new() -> Self {
        Self {
            threads_created: AtomicU64::new(0),
            threads_joined: AtomicU64::new(0),
            cancels_requested: AtomicU64::new(0),
        }
    }

    /// Increment threads created
    pub fn thread_created(&self) {
        self.threads_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment threads joined
    pub fn thread_joined(&self) {
        self.threads_joined.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment cancellation requests
    pub fn cancel_requested(&self) {
        self.cancels_requested.fetch_add(1, Ordering::Relaxed);
    }
}
