//! # Syscall Interface
//!
//! The kernel operations the threading library is built on.
//!
//! Every id is a full [`ThreadId`]; errors come back as the same
//! [`ExecError`] values the kernel reports as negative codes.

use lattice_execution::{ExecResult, ThreadDescriptor, ThreadExit, ThreadId, ThreadStatus};

/// Thread syscalls as seen from user mode
///
/// Calls that block or reclaim the caller return only once the caller is
/// scheduled again; a reclaimed caller never returns.
pub trait ThreadSyscalls {
    /// Allocate a blocked thread in the caller's process
    fn thread_alloc(&self) -> ExecResult<ThreadId>;

    /// Change a thread's status
    fn set_thread_status(&self, id: ThreadId, status: ThreadStatus) -> ExecResult<()>;

    /// Id of the calling thread
    fn current_thread_id(&self) -> ExecResult<ThreadId>;

    /// Reclaim a thread of the caller's process
    fn thread_destroy(&self, id: ThreadId) -> ExecResult<()>;

    /// Block until `id` is reclaimed and return its exit value
    fn thread_join(&self, id: ThreadId) -> ExecResult<ThreadExit>;

    /// Give up the current turn
    fn yield_now(&self) -> ExecResult<()>;

    /// Run `f` on a descriptor of the caller's process
    fn with_descriptor<R>(
        &self,
        id: ThreadId,
        f: impl FnOnce(ThreadDescriptor<'_>) -> R,
    ) -> ExecResult<R>;
}
