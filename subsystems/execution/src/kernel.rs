//! # Kernel State
//!
//! [`Kernel`] owns every piece of mutable execution state: the process table,
//! the tag pool, the scheduler, the binding of the currently running thread,
//! and the collaborators (frame pool, machine backend) they act through.
//! [`KernelLock`] is the single exclusive-access guard around it.

use crate::config::ExecConfig;
use crate::pool::AsidPool;
use crate::process::{Process, ProcessTable};
use crate::scheduler::{PriorityRoundRobin, SchedulerMetrics};
use crate::thread::Thread;
use crate::{ExecError, ExecResult, ProcessId, ThreadId};
use lattice_hal::Machine;
use lattice_memory::{AddressSpace, FrameAllocator};
use spin::{Mutex, MutexGuard};

/// Execution core state
#[derive(Debug)]
pub struct Kernel<A: FrameAllocator, M: Machine> {
    pub(crate) config: ExecConfig,
    pub(crate) frames: A,
    pub(crate) machine: M,
    pub(crate) kernel_space: AddressSpace,
    pub(crate) processes: ProcessTable,
    pub(crate) asids: AsidPool,
    pub(crate) scheduler: PriorityRoundRobin,
    pub(crate) current: Option<ThreadId>,
    pub(crate) metrics: SchedulerMetrics,
}

impl<A: FrameAllocator, M: Machine> Kernel<A, M> {
    /// Build the kernel over a frame pool and a machine backend
    pub fn new(config: ExecConfig, mut frames: A, machine: M) -> ExecResult<Self> {
        config.validate()?;
        let asid_count = config.asid_count.min(machine.max_asid());
        let kernel_space = AddressSpace::bootstrap_kernel(&mut frames, config.kernel_template_pages)?;
        log::info!(
            "execution core up: {} process slots, {} address-space tags",
            config.process_capacity,
            asid_count
        );
        Ok(Self {
            processes: ProcessTable::new(config.process_capacity),
            asids: AsidPool::new(asid_count),
            config,
            frames,
            machine,
            kernel_space,
            scheduler: PriorityRoundRobin::new(),
            current: None,
            metrics: SchedulerMetrics::new(),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Frame pool
    pub fn frames(&self) -> &A {
        &self.frames
    }

    /// Machine backend
    pub fn machine(&self) -> &M {
        &self.machine
    }

    /// Mutable machine backend
    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    /// Shared kernel template
    pub fn kernel_space(&self) -> &AddressSpace {
        &self.kernel_space
    }

    /// Scheduler state
    pub fn scheduler(&self) -> &PriorityRoundRobin {
        &self.scheduler
    }

    /// Scheduler counters
    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    /// Address-space tag pool
    pub fn asids(&self) -> &AsidPool {
        &self.asids
    }

    /// Process table
    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// Thread bound to the CPU
    pub fn current_thread(&self) -> Option<ThreadId> {
        self.current
    }

    /// Process of the thread bound to the CPU
    pub fn current_process(&self) -> Option<ProcessId> {
        self.current.map(ThreadId::process)
    }

    /// Live process `pid`
    pub fn process(&self, pid: ProcessId) -> ExecResult<&Process> {
        self.processes.get(pid).ok_or(ExecError::InvalidId)
    }

    /// Live thread `tid`
    pub fn thread(&self, tid: ThreadId) -> ExecResult<&Thread> {
        self.processes.thread(tid).ok_or(ExecError::InvalidId)
    }

    pub(crate) fn thread_mut(&mut self, tid: ThreadId) -> ExecResult<&mut Thread> {
        self.processes.thread_mut(tid).ok_or(ExecError::InvalidId)
    }

    /// Resolve a raw process id as seen from the running thread
    ///
    /// Raw `0` names the caller's own process. With `check_perm` the target
    /// must be the caller itself or one of its direct children.
    pub fn lookup_process(&self, raw: u32, check_perm: bool) -> ExecResult<ProcessId> {
        let pid = if raw == 0 {
            self.current_process().ok_or(ExecError::NoCurrentThread)?
        } else {
            ProcessId::from_raw(raw).ok_or(ExecError::InvalidId)?
        };
        let process = self.process(pid)?;

        if check_perm {
            let caller = self.current_process().ok_or(ExecError::NoCurrentThread)?;
            if pid != caller && process.parent != Some(caller) {
                log::warn!("{:?} denied access to {:?}", caller, pid);
                return Err(ExecError::PermissionDenied);
            }
        }
        Ok(pid)
    }

    /// Resolve a raw thread id; raw `0` names the running thread
    pub fn lookup_thread(&self, raw: u64) -> ExecResult<ThreadId> {
        let tid = if raw == 0 {
            self.current.ok_or(ExecError::NoCurrentThread)?
        } else {
            ThreadId::from_raw(raw).ok_or(ExecError::InvalidId)?
        };
        self.thread(tid)?;
        Ok(tid)
    }

    /// Number of non-free thread slots across all processes
    pub fn live_thread_count(&self) -> usize {
        self.processes
            .live()
            .map(|p| p.threads.iter().filter(|t| !t.is_free()).count())
            .sum()
    }
}

/// Exclusive-access guard around the kernel
///
/// Every entry from the trap layer takes this lock for the whole operation,
/// so allocator and scheduler state are never observed half-updated.
#[derive(Debug)]
pub struct KernelLock<A: FrameAllocator, M: Machine> {
    inner: Mutex<Kernel<A, M>>,
}

impl<A: FrameAllocator, M: Machine> KernelLock<A, M> {
    /// Wrap a kernel
    pub const fn new(kernel: Kernel<A, M>) -> Self {
        Self {
            inner: Mutex::new(kernel),
        }
    }

    /// Acquire exclusive access
    pub fn lock(&self) -> MutexGuard<'_, Kernel<A, M>> {
        self.inner.lock()
    }

    /// Run `f` with exclusive access
    pub fn with<R>(&self, f: impl FnOnce(&mut Kernel<A, M>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lattice_hal::arch_stubs::SimulatedMachine;
    use lattice_hal::PhysAddr;
    use lattice_memory::BitmapFrameAllocator;

    pub(crate) type TestKernel = Kernel<BitmapFrameAllocator, SimulatedMachine>;

    pub(crate) fn kernel_with(capacity: usize, frames: usize) -> TestKernel {
        Kernel::new(
            ExecConfig::with_capacity(capacity),
            BitmapFrameAllocator::new(PhysAddr::new(0x10_0000), frames),
            SimulatedMachine::new(),
        )
        .unwrap()
    }

    pub(crate) fn kernel() -> TestKernel {
        kernel_with(16, 512)
    }

    #[test]
    fn test_new_kernel_is_empty() {
        let k = kernel();
        assert_eq!(k.current_thread(), None);
        assert_eq!(k.live_thread_count(), 0);
        assert_eq!(k.processes().free_count(), 16);
        assert_eq!(k.asids().in_use(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Kernel::new(
            ExecConfig::with_capacity(0),
            BitmapFrameAllocator::new(PhysAddr::new(0), 8),
            SimulatedMachine::new(),
        );
        assert_eq!(result.err(), Some(ExecError::InvalidArgument));
    }

    #[test]
    fn test_lookup_without_current() {
        let k = kernel();
        assert_eq!(k.lookup_process(0, false), Err(ExecError::NoCurrentThread));
        assert_eq!(k.lookup_thread(0), Err(ExecError::NoCurrentThread));
        assert_eq!(k.lookup_process(1, false), Err(ExecError::InvalidId));
    }

    #[test]
    fn test_lock_serializes_access() {
        let lock = KernelLock::new(kernel());
        let free = lock.with(|k| k.processes().free_count());
        assert_eq!(free, 16);
        assert!(lock.lock().current_thread().is_none());
    }
}
