//! # Syscall Boundary
//!
//! The operations user code reaches through the trap path.
//!
//! ## Convention
//! - Syscall number: `v0`
//! - Arguments: `a0..a3`
//! - Return: `v0` (negative = error code), secondary result in `v1`
//! - The resume address is advanced past the trapping instruction before
//!   the operation runs, so a caller switched out mid-call resumes after it.
//!
//! Raw id `0` names the caller. Thread operations are confined to the
//! caller's own process; process operations accept the caller or a direct
//! child.

use crate::kernel::Kernel;
use crate::loader::ImageParser;
use crate::thread::{ThreadControl, ThreadExit, ThreadFlags, ThreadStatus};
use crate::{ExecError, ExecResult, Priority, ProcessId, Resource, ThreadId};
use alloc::vec::Vec;
use lattice_hal::cpu::INSTRUCTION_SIZE;
use lattice_hal::{reg, CpuAbstraction, Machine, TrapFrame, VirtAddr};
use lattice_memory::layout::is_user_range;
use lattice_memory::FrameAllocator;

/// Syscall numbers
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    /// Give up the current turn
    Yield = 0,
    /// Id of the calling thread
    GetThreadId = 1,
    /// Allocate a thread in the caller's process
    ThreadAlloc = 2,
    /// Reclaim a thread: `a0` = id
    ThreadDestroy = 3,
    /// Change a thread's status: `a0` = id, `a1` = status
    SetThreadStatus = 4,
    /// Block until a thread is reclaimed: `a0` = id; exit word in `v1`
    ThreadJoin = 5,
    /// Spawn a child: `a0` = image address, `a1` = length, `a2` = priority
    CreateProcess = 6,
    /// Destroy the caller or a direct child: `a0` = id
    DestroyProcess = 7,
}

impl Syscall {
    /// Convert from syscall number
    pub fn from_num(num: u64) -> Option<Self> {
        match num {
            0 => Some(Syscall::Yield),
            1 => Some(Syscall::GetThreadId),
            2 => Some(Syscall::ThreadAlloc),
            3 => Some(Syscall::ThreadDestroy),
            4 => Some(Syscall::SetThreadStatus),
            5 => Some(Syscall::ThreadJoin),
            6 => Some(Syscall::CreateProcess),
            7 => Some(Syscall::DestroyProcess),
            _ => None,
        }
    }
}

/// Progress of a join as seen by the joining thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    /// The target has not been reclaimed yet
    Pending,
    /// The target was reclaimed with this exit value
    Complete(ThreadExit),
}

/// Mutable view of a thread descriptor in the caller's process
#[derive(Debug)]
pub struct ThreadDescriptor<'a> {
    /// Thread the view belongs to
    pub id: ThreadId,
    /// Register state the thread starts or resumes with
    pub context: &'a mut TrapFrame,
    /// Cancellation and exit control block
    pub control: &'a mut ThreadControl,
}

impl<A: FrameAllocator, M: Machine> Kernel<A, M> {
    fn caller(&self) -> ExecResult<ThreadId> {
        self.current.ok_or(ExecError::NoCurrentThread)
    }

    /// Resolve `raw` to a live thread of the caller's process
    fn own_thread(&self, raw: u64) -> ExecResult<ThreadId> {
        let caller = self.caller()?;
        let tid = self.lookup_thread(raw)?;
        if tid.process() != caller.process() {
            log::warn!("{:#x} denied access to thread {:#x}", caller.as_u64(), tid.as_u64());
            return Err(ExecError::PermissionDenied);
        }
        Ok(tid)
    }

    /// Give up the current turn
    pub fn sys_yield(&mut self) -> ExecResult<()> {
        self.caller()?;
        self.yield_now();
        Ok(())
    }

    /// Id of the calling thread
    pub fn sys_current_thread_id(&self) -> ExecResult<ThreadId> {
        self.caller()
    }

    /// Allocate a blocked thread in the caller's process
    pub fn sys_thread_alloc(&mut self) -> ExecResult<ThreadId> {
        let pid = self.caller()?.process();
        self.create_thread(pid)
    }

    /// Reclaim a thread of the caller's process
    pub fn sys_thread_destroy(&mut self, raw: u64) -> ExecResult<()> {
        let tid = self.own_thread(raw)?;
        self.destroy_thread(tid)
    }

    /// Set a thread's status from its raw encoding
    ///
    /// Making another, still runnable thread runnable leaves a pending
    /// wake-up on it, and that thread's next attempt to block itself consumes
    /// the wake-up instead of blocking. A thread preempted between queueing
    /// itself somewhere and blocking cannot miss the wake-up that way.
    pub fn sys_set_thread_status(&mut self, raw: u64, status: u32) -> ExecResult<()> {
        let status = ThreadStatus::from_u32(status).ok_or(ExecError::InvalidArgument)?;
        let tid = self.own_thread(raw)?;
        let is_caller = self.current == Some(tid);
        let thread = self.thread_mut(tid)?;
        let flags = &mut thread.control.flags;
        match status {
            ThreadStatus::Runnable if thread.status == ThreadStatus::Runnable && !is_caller => {
                flags.insert(ThreadFlags::WAKE_PENDING);
            }
            ThreadStatus::Runnable => flags.remove(ThreadFlags::WAKE_PENDING),
            ThreadStatus::Blocked if is_caller && flags.contains(ThreadFlags::WAKE_PENDING) => {
                flags.remove(ThreadFlags::WAKE_PENDING);
                log::trace!("{:#x} consumed a pending wake-up", tid.as_u64());
                return Ok(());
            }
            _ => {}
        }
        self.set_thread_status(tid, status)
    }

    /// Start joining `raw`
    ///
    /// The caller is blocked and descheduled; it is woken with the target's
    /// exit value once the target is reclaimed. A join can only start while
    /// the target is live.
    pub fn sys_thread_join(&mut self, raw: u64) -> ExecResult<()> {
        let caller = self.caller()?;
        if raw == 0 || raw == caller.as_u64() {
            return Err(ExecError::InvalidArgument);
        }
        let target = ThreadId::from_raw(raw).ok_or(ExecError::NotFound)?;
        if target.process() != caller.process() {
            return Err(ExecError::PermissionDenied);
        }
        let thread = self.thread_mut(target).map_err(|_| ExecError::NotFound)?;
        if thread.control.flags.contains(ThreadFlags::DETACHED) {
            return Err(ExecError::InvalidArgument);
        }
        if !thread.join_waiters.contains(&caller) {
            thread
                .join_waiters
                .push(caller)
                .map_err(|_| ExecError::ThreadLimit)?;
        }

        self.thread_mut(caller)?.join_result = None;
        log::debug!("{:#x} joins {:#x}", caller.as_u64(), target.as_u64());
        self.set_thread_status(caller, ThreadStatus::Blocked)
    }

    /// Collect the result of a completed join, once
    pub fn take_join_result(&mut self, tid: ThreadId) -> ExecResult<JoinState> {
        let thread = self.thread_mut(tid)?;
        Ok(match thread.join_result.take() {
            Some(exit) => JoinState::Complete(exit),
            None => JoinState::Pending,
        })
    }

    /// Spawn a child of the caller from an image in the caller's memory
    pub fn sys_create_process<P: ImageParser + ?Sized>(
        &mut self,
        image_va: u64,
        len: u64,
        priority: u32,
        parser: &P,
    ) -> ExecResult<ProcessId> {
        let parent = self.caller()?.process();
        let priority = Priority::new(priority).ok_or(ExecError::InvalidArgument)?;
        if !is_user_range(VirtAddr::new(image_va), len) {
            return Err(ExecError::InvalidArgument);
        }
        let len = usize::try_from(len).map_err(|_| ExecError::InvalidArgument)?;

        let mut image = Vec::new();
        image
            .try_reserve_exact(len)
            .map_err(|_| ExecError::ResourceExhausted(Resource::PhysicalPage))?;
        image.resize(len, 0u8);
        let space = self
            .process(parent)?
            .address_space
            .as_ref()
            .ok_or(ExecError::InvalidId)?;
        space.copy_from_user(&self.frames, VirtAddr::new(image_va), &mut image)?;

        self.create_process_with_priority(Some(parent), &image, parser, priority)
    }

    /// Destroy the caller's process or one of its children
    pub fn sys_process_destroy(&mut self, raw: u32) -> ExecResult<()> {
        let pid = self.lookup_process(raw, true)?;
        self.destroy_process(pid)
    }

    /// Mark a thread of the caller's process as not joinable
    pub fn sys_thread_detach(&mut self, raw: u64) -> ExecResult<()> {
        self.with_descriptor(raw, |desc| desc.control.flags.insert(ThreadFlags::DETACHED))
    }

    /// Run `f` on the descriptor of thread `raw` of the caller's process
    pub fn with_descriptor<R>(
        &mut self,
        raw: u64,
        f: impl FnOnce(ThreadDescriptor<'_>) -> R,
    ) -> ExecResult<R> {
        let tid = self.own_thread(raw)?;
        let thread = self.thread_mut(tid)?;
        Ok(f(ThreadDescriptor {
            id: tid,
            context: &mut thread.context,
            control: &mut thread.control,
        }))
    }

    /// Decode and run the syscall in the machine's trap frame
    ///
    /// The result lands in the caller's `v0`/`v1`: in the live frame if the
    /// caller still runs, otherwise in its saved context.
    pub fn handle_syscall<P: ImageParser + ?Sized>(&mut self, parser: &P) -> ExecResult<()> {
        let caller = self.caller()?;
        let frame = *self.machine.trap_frame();
        self.machine.trap_frame_mut().epc = frame.epc + INSTRUCTION_SIZE;
        let [a0, a1, a2, _] = [
            frame.regs[reg::A0],
            frame.regs[reg::A1],
            frame.regs[reg::A2],
            frame.regs[reg::A3],
        ];

        let number = frame.syscall_number();
        let result = match Syscall::from_num(number) {
            Some(Syscall::Yield) => self.sys_yield().map(|()| (0, 0)),
            Some(Syscall::GetThreadId) => self.sys_current_thread_id().map(|t| (t.as_u64(), 0)),
            Some(Syscall::ThreadAlloc) => self.sys_thread_alloc().map(|t| (t.as_u64(), 0)),
            Some(Syscall::ThreadDestroy) => self.sys_thread_destroy(a0).map(|()| (0, 0)),
            Some(Syscall::SetThreadStatus) => {
                let status = u32::try_from(a1).unwrap_or(u32::MAX);
                self.sys_set_thread_status(a0, status).map(|()| (0, 0))
            }
            Some(Syscall::ThreadJoin) => self.sys_thread_join(a0).map(|()| (0, 0)),
            Some(Syscall::CreateProcess) => {
                let priority = u32::try_from(a2).unwrap_or(0);
                self.sys_create_process(a0, a1, priority, parser)
                    .map(|pid| (u64::from(pid.as_u32()), 0))
            }
            Some(Syscall::DestroyProcess) => {
                let raw = u32::try_from(a0).map_err(|_| ExecError::InvalidId);
                raw.and_then(|raw| self.sys_process_destroy(raw)).map(|()| (0, 0))
            }
            None => Err(ExecError::InvalidArgument),
        };

        let (v0, v1) = match result {
            Ok(values) => values,
            Err(err) => {
                log::warn!("syscall {} from {:#x} failed: {}", number, caller.as_u64(), err);
                (err.code() as u64, 0)
            }
        };
        self.deliver(caller, v0, v1);
        Ok(())
    }

    fn deliver(&mut self, caller: ThreadId, v0: u64, v1: u64) {
        let frame = if self.current == Some(caller) {
            self.machine.trap_frame_mut()
        } else {
            match self.thread_mut(caller) {
                Ok(thread) => &mut thread.context,
                Err(_) => return,
            }
        };
        frame.regs[reg::V0] = v0;
        frame.regs[reg::V1] = v1;
    }
}
