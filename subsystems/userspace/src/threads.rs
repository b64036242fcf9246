//! # Threads
//!
//! Create, exit, join, cancel and detach for the threads of one process.
//!
//! A new thread starts at `entry` with its argument in `a0` and the exit
//! trampoline in `ra`, so returning from the entry function exits with the
//! returned value. Cancellation is cooperative: an immediate request
//! reclaims the target on the spot (a thread that is not running is always
//! parked at a trap boundary), a deferred one waits for the target's next
//! [`ThreadLibrary::test_cancel`].

use crate::syscalls::ThreadSyscalls;
use crate::LibraryStats;
use lattice_execution::{
    CancelState, CancelType, ExecError, ExecResult, ThreadExit, ThreadFlags, ThreadId,
    ThreadStatus,
};
use lattice_hal::{reg, CpuContext, VirtAddr};

/// Threading library bound to one syscall implementation
#[derive(Debug)]
pub struct ThreadLibrary<S: ThreadSyscalls> {
    sys: S,
    exit_trampoline: VirtAddr,
    stats: LibraryStats,
}

/// Stale or reclaimed ids surface as not-found to library callers
fn not_found(err: ExecError) -> ExecError {
    match err {
        ExecError::InvalidId => ExecError::NotFound,
        other => other,
    }
}

impl<S: ThreadSyscalls> ThreadLibrary<S> {
    /// Create the library; returning threads land on `exit_trampoline`
    pub fn new(sys: S, exit_trampoline: VirtAddr) -> Self {
        Self {
            sys,
            exit_trampoline,
            stats: LibraryStats::new(),
        }
    }

    /// Underlying syscalls
    pub fn syscalls(&self) -> &S {
        &self.sys
    }

    /// Counters
    pub fn stats(&self) -> &LibraryStats {
        &self.stats
    }

    /// Start a thread running `entry(arg)`
    ///
    /// On failure no thread is left behind.
    pub fn thread_create(&self, entry: VirtAddr, arg: u64) -> ExecResult<ThreadId> {
        let id = self.sys.thread_alloc()?;
        let trampoline = self.exit_trampoline;
        let prepared = self
            .sys
            .with_descriptor(id, |desc| {
                desc.context.set_instruction_pointer(entry);
                desc.context.set_syscall_arg(0, arg);
                desc.context.regs[reg::RA] = trampoline.as_u64();
            })
            .and_then(|()| self.sys.set_thread_status(id, ThreadStatus::Runnable));

        if let Err(err) = prepared {
            if let Err(undo) = self.sys.thread_destroy(id) {
                log::warn!("thread {:#x} left behind by failed create: {}", id.as_u64(), undo);
            }
            return Err(err);
        }
        self.stats.thread_created();
        log::debug!("thread {:#x} created at {}", id.as_u64(), entry);
        Ok(id)
    }

    /// Record `value` and reclaim the calling thread
    ///
    /// Does not return when the thread is reclaimed.
    pub fn thread_exit(&self, value: u64) -> ExecResult<()> {
        self.exit_with(ThreadExit::Returned(value))
    }

    fn exit_with(&self, exit: ThreadExit) -> ExecResult<()> {
        let me = self.sys.current_thread_id()?;
        self.sys.with_descriptor(me, |desc| desc.control.exit = exit)?;
        self.sys.thread_destroy(me)
    }

    /// Wait for `id` to be reclaimed and return its exit value
    pub fn thread_join(&self, id: ThreadId) -> ExecResult<ThreadExit> {
        let exit = self.sys.thread_join(id)?;
        self.stats.thread_joined();
        Ok(exit)
    }

    /// Id of the calling thread
    pub fn thread_self(&self) -> ExecResult<ThreadId> {
        self.sys.current_thread_id()
    }

    /// Give up the current turn
    pub fn thread_yield(&self) -> ExecResult<()> {
        self.sys.yield_now()
    }

    /// Enable or disable cancellation of the caller; returns the old state
    pub fn set_cancel_state(&self, state: CancelState) -> ExecResult<CancelState> {
        let me = self.sys.current_thread_id()?;
        self.sys
            .with_descriptor(me, |desc| core::mem::replace(&mut desc.control.cancel_state, state))
    }

    /// Choose when accepted cancellations act; returns the old type
    pub fn set_cancel_type(&self, kind: CancelType) -> ExecResult<CancelType> {
        let me = self.sys.current_thread_id()?;
        self.sys
            .with_descriptor(me, |desc| core::mem::replace(&mut desc.control.cancel_type, kind))
    }

    /// Cancellation point: exit as canceled if a deferred request is pending
    ///
    /// Returns normally when there is nothing to act on, including when the
    /// caller switched to immediate cancellation after the request.
    pub fn test_cancel(&self) -> ExecResult<()> {
        let me = self.sys.current_thread_id()?;
        let pending = self.sys.with_descriptor(me, |desc| {
            desc.control.cancel_state == CancelState::Cancelable
                && desc.control.cancel_type == CancelType::Deferred
                && desc.control.flags.contains(ThreadFlags::CANCEL_PENDING)
        })?;
        if pending {
            log::debug!("thread {:#x} honours pending cancel", me.as_u64());
            self.exit_with(ThreadExit::Canceled)?;
        }
        Ok(())
    }

    /// Request cancellation of `id`
    pub fn cancel(&self, id: ThreadId) -> ExecResult<()> {
        let immediate = self
            .sys
            .with_descriptor(id, |desc| {
                if desc.control.cancel_state == CancelState::NotCancelable {
                    return Err(ExecError::NotCancelable);
                }
                match desc.control.cancel_type {
                    CancelType::Immediate => {
                        desc.control.exit = ThreadExit::Canceled;
                        Ok(true)
                    }
                    CancelType::Deferred => {
                        desc.control.flags.insert(ThreadFlags::CANCEL_PENDING);
                        Ok(false)
                    }
                }
            })
            .map_err(not_found)??;

        self.stats.cancel_requested();
        if immediate {
            log::debug!("thread {:#x} canceled immediately", id.as_u64());
            self.sys.thread_destroy(id).map_err(not_found)?;
        }
        Ok(())
    }

    /// Mark `id` as not joinable
    pub fn detach(&self, id: ThreadId) -> ExecResult<()> {
        self.sys
            .with_descriptor(id, |desc| desc.control.flags.insert(ThreadFlags::DETACHED))
            .map_err(not_found)
    }
}
