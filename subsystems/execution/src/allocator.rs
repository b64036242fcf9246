//! # Process/Thread Allocator
//!
//! Creation and reclamation of processes and threads.
//!
//! A process is born with a fresh address space, a fresh tag and exactly one
//! runnable thread. Threads are reclaimed one by one; reclaiming the last
//! one tears the whole process down. Reclaiming the running thread hands the
//! CPU straight to the scheduler.

use crate::context::SwitchReason;
use crate::kernel::Kernel;
use crate::thread::{ThreadExit, ThreadStatus};
use crate::{ExecError, ExecResult, ProcessId, Resource, ThreadId, THREAD_MAX};
use lattice_hal::{reg, CpuContext, Machine, MmuAbstraction, TrapFrame};
use lattice_memory::layout::stack_top;
use lattice_memory::{AddressSpace, FrameAllocator};

impl<A: FrameAllocator, M: Machine> Kernel<A, M> {
    /// Create a process with one runnable (not yet queued) thread
    pub fn create_process(&mut self, parent: Option<ProcessId>) -> ExecResult<ProcessId> {
        let slot = self
            .processes
            .peek_free()
            .ok_or(ExecError::ResourceExhausted(Resource::ProcessSlot))?;
        let asid = self.asids.allocate()?;
        let space = match AddressSpace::create(&mut self.frames, &self.kernel_space) {
            Ok(space) => space,
            Err(err) => {
                self.asids.free(asid);
                return Err(err.into());
            }
        };
        self.processes.pop_free();

        let process = self.processes.slot_mut(slot);
        let generation = process.next_generation();
        let pid = ProcessId::new(slot, asid, generation);
        process.id = Some(pid);
        process.parent = parent;
        process.address_space = Some(space);
        process.thread_count = 0;
        process.run_count = 0;

        let first = self.create_thread(pid)?;
        self.thread_mut(first)?.status = ThreadStatus::Runnable;

        log::info!("process {:#x} created (parent {:?})", pid.as_u32(), parent.map(ProcessId::as_u32));
        Ok(pid)
    }

    /// Allocate a thread in `pid`
    ///
    /// The thread starts `Blocked` with its stack pointer at the top of its
    /// slot's stack band; it becomes schedulable once set runnable.
    pub fn create_thread(&mut self, pid: ProcessId) -> ExecResult<ThreadId> {
        let priority = self.config.default_priority;
        let status_word = self.config.initial_status;
        let process = self.processes.get_mut(pid).ok_or(ExecError::InvalidId)?;
        if process.thread_count >= THREAD_MAX {
            return Err(ExecError::ThreadLimit);
        }
        let slot = process
            .threads
            .iter()
            .position(|t| t.is_free())
            .ok_or(ExecError::ThreadLimit)?;

        let thread = &mut process.threads[slot];
        let tid = ThreadId::new(pid, thread.next_generation(), slot);
        let mut context = TrapFrame::new();
        context.status = status_word;
        context.set_stack_pointer(stack_top(slot));
        thread.activate(tid, priority, context);
        process.thread_count += 1;

        log::debug!("thread {:#x} allocated in slot {}", tid.as_u64(), slot);
        Ok(tid)
    }

    /// Reclaim thread `tid`
    ///
    /// Joiners are woken with the thread's recorded exit value. Reclaiming
    /// the last thread destroys the process; reclaiming the running thread
    /// reschedules before returning.
    pub fn destroy_thread(&mut self, tid: ThreadId) -> ExecResult<()> {
        let thread = self.thread_mut(tid)?;
        let exit = thread.control.exit;
        let waiters = core::mem::take(&mut thread.join_waiters);
        thread.reset();
        self.scheduler.remove(tid);

        let pid = tid.process();
        let process = self.processes.get_mut(pid).ok_or(ExecError::InvalidId)?;
        process.thread_count -= 1;
        let last = process.thread_count == 0;
        log::debug!("thread {:#x} freed ({:?})", tid.as_u64(), exit);

        for waiter in waiters {
            self.wake_joiner(waiter, exit);
        }

        let was_current = self.current == Some(tid);
        if was_current {
            self.current = None;
        }
        if last {
            self.release_process(pid)?;
        }
        if was_current {
            self.schedule(SwitchReason::Exit);
        }
        Ok(())
    }

    /// Destroy process `pid` and everything it owns
    ///
    /// Safe with some threads already reclaimed. If the running thread
    /// belongs to `pid` the CPU is rescheduled.
    pub fn destroy_process(&mut self, pid: ProcessId) -> ExecResult<()> {
        self.process(pid)?;
        let was_current = self.current_process() == Some(pid);
        if was_current {
            self.current = None;
        }
        self.release_process(pid)?;
        if was_current {
            self.schedule(SwitchReason::Exit);
        }
        Ok(())
    }

    fn release_process(&mut self, pid: ProcessId) -> ExecResult<()> {
        let process = self.processes.get_mut(pid).ok_or(ExecError::InvalidId)?;
        let mut dequeued: heapless::Vec<ThreadId, THREAD_MAX> = heapless::Vec::new();
        for thread in process.threads.iter_mut() {
            if let Some(tid) = thread.id {
                let _ = dequeued.push(tid);
            }
            thread.reset();
        }
        process.thread_count = 0;
        process.id = None;
        process.parent = None;
        process.run_count = 0;
        let space = process.address_space.take();

        for tid in dequeued {
            self.scheduler.remove(tid);
        }
        if let Some(space) = space {
            space.destroy(&mut self.frames)?;
        }
        if let Some(asid) = lattice_hal::Asid::new(pid.asid()) {
            self.asids.free(asid);
            self.machine.invalidate_asid(asid);
        }
        self.processes.push_free(pid.slot());

        log::info!("process {:#x} freed", pid.as_u32());
        Ok(())
    }

    /// Deliver `exit` to a thread blocked joining a reclaimed target
    pub(crate) fn wake_joiner(&mut self, waiter: ThreadId, exit: ThreadExit) {
        let Ok(thread) = self.thread_mut(waiter) else {
            return;
        };
        thread.join_result = Some(exit);
        thread.context.regs[reg::V0] = 0;
        thread.context.regs[reg::V1] = exit.to_word();
        let wake = thread.status == ThreadStatus::Blocked;
        if wake {
            thread.status = ThreadStatus::Runnable;
            if !self.scheduler.contains(waiter) {
                self.scheduler.enqueue(waiter);
            }
        }
        log::debug!("join waiter {:#x} woken", waiter.as_u64());
    }

    /// Change a thread's scheduling status
    ///
    /// Runnable threads are queued if they are not already. Blocking the
    /// running thread reschedules.
    pub fn set_thread_status(&mut self, tid: ThreadId, status: ThreadStatus) -> ExecResult<()> {
        if status == ThreadStatus::Free {
            return Err(ExecError::InvalidArgument);
        }
        self.thread_mut(tid)?.status = status;
        if status == ThreadStatus::Runnable && !self.scheduler.contains(tid) {
            self.scheduler.enqueue(tid);
        }
        if status == ThreadStatus::Blocked && self.current == Some(tid) {
            self.schedule(SwitchReason::Blocked);
        }
        Ok(())
    }

    /// Change a thread's priority; takes effect at its next dispatch
    pub fn set_thread_priority(&mut self, tid: ThreadId, priority: crate::Priority) -> ExecResult<()> {
        self.thread_mut(tid)?.priority = priority;
        Ok(())
    }
}
