//! # Thread Structure
//!
//! A thread slot inside its process. Free slots keep their generation so the
//! next allocation produces a fresh id.

use super::{CancelState, CancelType, ThreadExit, ThreadStatus};
use crate::scheduler::Priority;
use crate::{ThreadId, THREAD_MAX};
use lattice_hal::TrapFrame;

/// Thread flags
pub mod flags {
    use bitflags::bitflags;

    bitflags! {
        /// Thread flags
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct ThreadFlags: u32 {
            /// No thread may join this one
            const DETACHED = 1 << 0;
            /// A deferred cancellation request awaits a cancellation point
            const CANCEL_PENDING = 1 << 1;
            /// A wake-up arrived while the thread was still runnable; its
            /// next self-block returns at once
            const WAKE_PENDING = 1 << 2;
        }
    }
}

pub use flags::ThreadFlags;

/// Per-thread control block shared with user code
///
/// Lives in the thread descriptor the owning process can reach; the
/// threading library reads and writes it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadControl {
    /// Whether cancellation requests are accepted
    pub cancel_state: CancelState,
    /// When accepted requests take effect
    pub cancel_type: CancelType,
    /// Detach and pending-cancel flags
    pub flags: ThreadFlags,
    /// Value handed to joiners when the thread is reclaimed
    pub exit: ThreadExit,
}

impl ThreadControl {
    /// Defaults for a fresh thread
    pub fn new() -> Self {
        Self::default()
    }
}

/// Thread structure
#[derive(Debug, Clone)]
pub struct Thread {
    /// Identity while allocated
    pub(crate) id: Option<ThreadId>,
    /// Bumped on every allocation of this slot
    pub(crate) generation: u16,
    /// Scheduling status
    pub(crate) status: ThreadStatus,
    /// Quantum length
    pub(crate) priority: Priority,
    /// Saved register state
    pub(crate) context: TrapFrame,
    /// Cancellation and exit bookkeeping
    pub(crate) control: ThreadControl,
    /// Threads blocked joining this one
    pub(crate) join_waiters: heapless::Vec<ThreadId, THREAD_MAX>,
    /// Exit value delivered to this thread by a completed join
    pub(crate) join_result: Option<ThreadExit>,
}

impl Thread {
    /// An unallocated slot
    pub const fn free() -> Self {
        Self {
            id: None,
            generation: 0,
            status: ThreadStatus::Free,
            priority: Priority::DEFAULT,
            context: TrapFrame::new(),
            control: ThreadControl {
                cancel_state: CancelState::NotCancelable,
                cancel_type: CancelType::Deferred,
                flags: ThreadFlags::empty(),
                exit: ThreadExit::Returned(0),
            },
            join_waiters: heapless::Vec::new(),
            join_result: None,
        }
    }

    /// Generation the next allocation of this slot will carry
    pub(crate) fn next_generation(&mut self) -> u16 {
        self.generation = self.generation.wrapping_add(1) & ThreadId::GENERATION_MASK;
        self.generation
    }

    /// Bring a free slot to life
    pub(crate) fn activate(&mut self, id: ThreadId, priority: Priority, context: TrapFrame) {
        self.id = Some(id);
        self.status = ThreadStatus::Blocked;
        self.priority = priority;
        self.context = context;
        self.control = ThreadControl::new();
        self.join_waiters.clear();
        self.join_result = None;
    }

    /// Return the slot to the free state
    pub(crate) fn reset(&mut self) {
        self.id = None;
        self.status = ThreadStatus::Free;
        self.join_waiters.clear();
        self.join_result = None;
    }

    /// Get thread ID
    pub fn id(&self) -> Option<ThreadId> {
        self.id
    }

    /// Whether the slot is available
    pub fn is_free(&self) -> bool {
        self.status == ThreadStatus::Free
    }

    /// Get current status
    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    /// Get priority
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Saved register state
    pub fn context(&self) -> &TrapFrame {
        &self.context
    }

    /// Control block
    pub fn control(&self) -> &ThreadControl {
        &self.control
    }

    /// Threads currently joining this one
    pub fn join_waiters(&self) -> &[ThreadId] {
        &self.join_waiters
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::free()
    }
}
