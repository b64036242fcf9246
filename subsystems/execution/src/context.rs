//! # Context Switching
//!
//! Binding threads to the CPU.
//!
//! The trap layer leaves the interrupted thread's registers in the machine's
//! scratch frame. Switching away copies that frame into the outgoing
//! thread's descriptor; switching in binds the incoming process's directory
//! and tag and installs the incoming thread's saved frame for the trap
//! return.

use crate::kernel::Kernel;
use crate::scheduler::Decision;
use crate::{ExecError, ExecResult, ThreadId};
use lattice_hal::{Asid, CpuAbstraction, Machine, MmuAbstraction};
use lattice_memory::FrameAllocator;

/// Context switch reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    /// Voluntary yield
    Yield,
    /// Timer preemption
    Preemption,
    /// Thread blocked
    Blocked,
    /// Thread exited or was reclaimed
    Exit,
}

impl<A: FrameAllocator, M: Machine> Kernel<A, M> {
    /// Pick the next thread and bind it to the CPU
    pub fn schedule(&mut self, reason: SwitchReason) -> Decision {
        let processes = &self.processes;
        let decision = self.scheduler.select(self.current, |tid| {
            processes.thread(tid).map(|t| (t.status, t.priority))
        });
        log::trace!("schedule ({:?}): {:?}", reason, decision);

        match decision {
            Decision::Resume(_) => {}
            Decision::Switch(next) => {
                if let Err(err) = self.dispatch(next) {
                    log::error!("dispatch of {:#x} failed: {}", next.as_u64(), err);
                }
            }
            Decision::Idle => self.idle(),
        }
        decision
    }

    /// Make `next` the running thread
    ///
    /// The outgoing thread's registers are saved first so they are never
    /// clobbered by the incoming frame.
    pub(crate) fn dispatch(&mut self, next: ThreadId) -> ExecResult<()> {
        self.save_current();

        let process = self.processes.get(next.process()).ok_or(ExecError::InvalidId)?;
        let root = process
            .address_space
            .as_ref()
            .ok_or(ExecError::InvalidId)?
            .root();
        let asid = Asid::new(next.process().asid()).ok_or(ExecError::InvalidId)?;

        self.current = Some(next);
        self.machine.switch_address_space(root.address(), asid);

        let process = self.processes.get_mut(next.process()).ok_or(ExecError::InvalidId)?;
        process.run_count += 1;
        let context = process
            .threads
            .get(next.slot())
            .map(|t| t.context)
            .ok_or(ExecError::InvalidId)?;

        self.metrics.record_context_switch();
        self.machine.resume_user(&context);
        log::debug!("dispatched {:#x} at {}", next.as_u64(), context.pc);
        Ok(())
    }

    /// Copy the trap frame into the running thread's descriptor and unbind it
    fn save_current(&mut self) {
        let Some(current) = self.current.take() else {
            return;
        };
        let frame = *self.machine.trap_frame();
        if let Some(thread) = self.processes.thread_mut(current) {
            thread.context = frame;
            thread.context.pc = frame.epc;
        }
    }

    fn idle(&mut self) {
        self.save_current();
        self.metrics.record_idle();
        log::warn!("no runnable threads, waiting for interrupt");
        self.machine.wait_for_interrupt();
    }

    /// Clock tick: charge the running thread and possibly preempt it
    pub fn timer_interrupt(&mut self) -> Decision {
        self.metrics.record_tick();
        let previous = self.current;
        let decision = self.schedule(SwitchReason::Preemption);
        if let (Some(prev), Decision::Switch(next)) = (previous, decision) {
            if prev != next {
                self.metrics.record_preemption();
            }
        }
        decision
    }

    /// Give up the running thread's current turn
    pub fn yield_now(&mut self) -> Decision {
        self.metrics.record_yield();
        self.schedule(SwitchReason::Yield)
    }

    /// Live threads whose status is runnable
    pub fn runnable_threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.processes.live().flat_map(|p| {
            p.threads
                .iter()
                .filter(|t| t.status.is_runnable())
                .filter_map(|t| t.id)
        })
    }
}
