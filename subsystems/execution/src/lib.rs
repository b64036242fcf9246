//! # Lattice Execution Subsystem
//!
//! The execution subsystem manages:
//! - Resource pools (process slots, address-space tags)
//! - Process and thread allocation and teardown
//! - Loading executable images into fresh address spaces
//! - The two-queue priority round-robin scheduler
//! - Context switching and the syscall boundary
//!
//! ## Key Principle
//!
//! All mutable kernel state lives in one [`Kernel`] value. Handles are
//! generation-tagged ids, never references, so a stale id is always caught
//! by lookup instead of touching a reused slot.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod allocator;
pub mod config;
pub mod context;
pub mod kernel;
pub mod loader;
pub mod pool;
pub mod process;
pub mod scheduler;
pub mod syscall;
pub mod thread;

pub use config::ExecConfig;
pub use context::SwitchReason;
pub use kernel::{Kernel, KernelLock};
pub use lattice_memory::layout::THREAD_MAX;
pub use scheduler::{Decision, Priority};
pub use syscall::{JoinState, Syscall, ThreadDescriptor};
pub use thread::{CancelState, CancelType, ThreadControl, ThreadExit, ThreadFlags, ThreadStatus};

use lattice_hal::Asid;
use lattice_memory::MemError;

/// Identifier of a process
///
/// Layout (low to high): slot index (10 bits), a marker bit that keeps every
/// valid id non-zero, the bound address-space tag (6 bits), and the slot's
/// generation (15 bits). Raw value `0` is reserved for "the caller".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Bits holding the slot index
    pub const SLOT_BITS: u32 = 10;
    /// Number of addressable process slots
    pub const MAX_SLOTS: usize = 1 << Self::SLOT_BITS;
    const MARKER: u32 = 1 << Self::SLOT_BITS;
    const ASID_SHIFT: u32 = Self::SLOT_BITS + 1;
    const GENERATION_SHIFT: u32 = Self::ASID_SHIFT + 6;
    /// Mask applied to slot generations
    pub const GENERATION_MASK: u16 = 0x7fff;

    /// Compose an id
    pub const fn new(slot: usize, asid: Asid, generation: u16) -> Self {
        Self(
            (slot as u32 & (Self::MARKER - 1))
                | Self::MARKER
                | ((asid.as_u8() as u32) << Self::ASID_SHIFT)
                | (((generation & Self::GENERATION_MASK) as u32) << Self::GENERATION_SHIFT),
        )
    }

    /// Reinterpret a raw value, rejecting ones no allocation could produce
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if raw & Self::MARKER == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Get the raw ID value
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Slot index in the process table
    pub const fn slot(self) -> usize {
        (self.0 & (Self::MARKER - 1)) as usize
    }

    /// Address-space tag bound at creation
    pub const fn asid(self) -> u8 {
        ((self.0 >> Self::ASID_SHIFT) & 0x3f) as u8
    }

    /// Generation of the slot at creation
    pub const fn generation(self) -> u16 {
        (self.0 >> Self::GENERATION_SHIFT) as u16
    }
}

/// Identifier of a thread
///
/// Layout (low to high): slot within the process (3 bits), the thread slot's
/// generation (13 bits), then the owning [`ProcessId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    const SLOT_BITS: u32 = 3;
    const PROCESS_SHIFT: u32 = 16;
    /// Mask applied to thread slot generations
    pub const GENERATION_MASK: u16 = 0x1fff;

    /// Compose an id
    pub const fn new(process: ProcessId, generation: u16, slot: usize) -> Self {
        Self(
            ((process.as_u32() as u64) << Self::PROCESS_SHIFT)
                | (((generation & Self::GENERATION_MASK) as u64) << Self::SLOT_BITS)
                | (slot as u64 & ((1 << Self::SLOT_BITS) - 1)),
        )
    }

    /// Reinterpret a raw value, rejecting ones no allocation could produce
    pub const fn from_raw(raw: u64) -> Option<Self> {
        if raw >> 48 != 0 {
            return None;
        }
        match ProcessId::from_raw((raw >> Self::PROCESS_SHIFT) as u32) {
            Some(_) => Some(Self(raw)),
            None => None,
        }
    }

    /// Get the raw ID value
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Owning process
    pub const fn process(self) -> ProcessId {
        ProcessId((self.0 >> Self::PROCESS_SHIFT) as u32)
    }

    /// Slot within the owning process
    pub const fn slot(self) -> usize {
        (self.0 & ((1 << Self::SLOT_BITS) - 1)) as usize
    }

    /// Generation of the thread slot at creation
    pub const fn generation(self) -> u16 {
        ((self.0 >> Self::SLOT_BITS) as u16) & Self::GENERATION_MASK
    }
}

static_assertions::const_assert!(ProcessId::MAX_SLOTS.is_power_of_two());
static_assertions::const_assert!(THREAD_MAX <= 1 << ThreadId::SLOT_BITS);
static_assertions::const_assert!(Asid::LIMIT <= 64);

/// Exhaustible kernel resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// No free process descriptor
    ProcessSlot,
    /// No free hardware address-space tag
    AddressSpaceTag,
    /// No free physical page
    PhysicalPage,
}

/// Execution result type
pub type ExecResult<T> = Result<T, ExecError>;

/// Execution errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// A bounded pool ran dry
    ResourceExhausted(Resource),
    /// Stale, free or foreign id
    InvalidId,
    /// Target is neither the caller nor its direct child
    PermissionDenied,
    /// Process already holds the maximum number of threads
    ThreadLimit,
    /// Target never existed or was already reclaimed
    NotFound,
    /// Target disabled cancellation
    NotCancelable,
    /// Invalid argument
    InvalidArgument,
    /// Executable image rejected by the parser
    InvalidImage,
    /// A caller-relative operation ran with no thread bound
    NoCurrentThread,
}

impl ExecError {
    /// Negative code reported across the syscall boundary
    pub const fn code(self) -> i64 {
        match self {
            ExecError::InvalidId => -2,
            ExecError::InvalidArgument => -3,
            ExecError::ResourceExhausted(Resource::PhysicalPage) => -4,
            ExecError::ResourceExhausted(Resource::ProcessSlot) => -5,
            ExecError::ResourceExhausted(Resource::AddressSpaceTag) => -6,
            ExecError::PermissionDenied => -7,
            ExecError::ThreadLimit => -8,
            ExecError::NotFound => -9,
            ExecError::NotCancelable => -10,
            ExecError::InvalidImage => -11,
            ExecError::NoCurrentThread => -12,
        }
    }

    /// Error carried by a negative syscall result
    pub const fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            -2 => ExecError::InvalidId,
            -3 => ExecError::InvalidArgument,
            -4 => ExecError::ResourceExhausted(Resource::PhysicalPage),
            -5 => ExecError::ResourceExhausted(Resource::ProcessSlot),
            -6 => ExecError::ResourceExhausted(Resource::AddressSpaceTag),
            -7 => ExecError::PermissionDenied,
            -8 => ExecError::ThreadLimit,
            -9 => ExecError::NotFound,
            -10 => ExecError::NotCancelable,
            -11 => ExecError::InvalidImage,
            -12 => ExecError::NoCurrentThread,
            _ => return None,
        })
    }
}

impl core::fmt::Display for ExecError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ExecError::ResourceExhausted(Resource::ProcessSlot) => f.write_str("no free process slot"),
            ExecError::ResourceExhausted(Resource::AddressSpaceTag) => {
                f.write_str("no free address-space tag")
            }
            ExecError::ResourceExhausted(Resource::PhysicalPage) => f.write_str("out of physical memory"),
            ExecError::InvalidId => f.write_str("invalid id"),
            ExecError::PermissionDenied => f.write_str("permission denied"),
            ExecError::ThreadLimit => f.write_str("thread limit exceeded"),
            ExecError::NotFound => f.write_str("thread not found"),
            ExecError::NotCancelable => f.write_str("thread not cancelable"),
            ExecError::InvalidArgument => f.write_str("invalid argument"),
            ExecError::InvalidImage => f.write_str("invalid executable image"),
            ExecError::NoCurrentThread => f.write_str("no current thread"),
        }
    }
}

impl From<MemError> for ExecError {
    fn from(err: MemError) -> Self {
        match err {
            MemError::OutOfMemory => ExecError::ResourceExhausted(Resource::PhysicalPage),
            MemError::PermissionDenied => ExecError::PermissionDenied,
            MemError::InvalidAddress | MemError::NotMapped => ExecError::InvalidArgument,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asid(raw: u8) -> Asid {
        Asid::new(raw).unwrap()
    }

    #[test]
    fn test_process_id_layout() {
        let pid = ProcessId::new(1023, asid(63), 0x7fff);
        assert_eq!(pid.slot(), 1023);
        assert_eq!(pid.asid(), 63);
        assert_eq!(pid.generation(), 0x7fff);
        assert_eq!(ProcessId::from_raw(pid.as_u32()), Some(pid));
        assert_eq!(ProcessId::from_raw(0), None);
    }

    #[test]
    fn test_generation_distinguishes_reuse() {
        let first = ProcessId::new(4, asid(1), 1);
        let second = ProcessId::new(4, asid(1), 2);
        assert_ne!(first, second);
        assert_eq!(first.slot(), second.slot());
    }

    #[test]
    fn test_thread_id_layout() {
        let pid = ProcessId::new(7, asid(2), 3);
        let tid = ThreadId::new(pid, 0x1abc, 5);
        assert_eq!(tid.process(), pid);
        assert_eq!(tid.slot(), 5);
        assert_eq!(tid.generation(), 0x1abc);
        assert_eq!(ThreadId::from_raw(tid.as_u64()), Some(tid));
        assert_eq!(ThreadId::from_raw(0), None);
        assert_eq!(ThreadId::from_raw(1 << 60), None);
    }

    #[test]
    fn test_error_codes_round_trip() {
        let all = [
            ExecError::ResourceExhausted(Resource::ProcessSlot),
            ExecError::ResourceExhausted(Resource::AddressSpaceTag),
            ExecError::ResourceExhausted(Resource::PhysicalPage),
            ExecError::InvalidId,
            ExecError::PermissionDenied,
            ExecError::ThreadLimit,
            ExecError::NotFound,
            ExecError::NotCancelable,
            ExecError::InvalidArgument,
            ExecError::InvalidImage,
            ExecError::NoCurrentThread,
        ];
        for err in all {
            assert!(err.code() < 0);
            assert_eq!(ExecError::from_code(err.code()), Some(err));
        }
        assert_eq!(ExecError::from_code(0), None);
    }

    #[test]
    fn test_mem_error_conversion() {
        assert_eq!(
            ExecError::from(MemError::OutOfMemory),
            ExecError::ResourceExhausted(Resource::PhysicalPage)
        );
    }
}
