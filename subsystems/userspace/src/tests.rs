//! Library scenarios on the real kernel, one host thread per kernel thread.
//!
//! A host thread only runs while its kernel thread is the current one. Every
//! syscall takes the world lock, runs the kernel operation, starts a host
//! thread for a newly dispatched kernel thread, and then waits until the
//! caller is current again. A reclaimed caller unwinds out of its host
//! thread.

use super::*;
use lattice_execution::{
    CancelState, CancelType, ExecConfig, ExecError, ExecResult, Kernel, ThreadDescriptor,
    ThreadExit, ThreadId, ThreadStatus, THREAD_MAX,
};
use lattice_hal::arch_stubs::SimulatedMachine;
use lattice_hal::{PhysAddr, VirtAddr};
use lattice_memory::BitmapFrameAllocator;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

type SimKernel = Kernel<BitmapFrameAllocator, SimulatedMachine>;
type Entry = fn(&ThreadLibrary<Sim>, u64) -> u64;

const ENTRY_BASE: u64 = 0x40_0000;
const TRAMPOLINE: VirtAddr = VirtAddr::new(0x3f_fff0);

struct State {
    kernel: SimKernel,
    started: HashSet<ThreadId>,
    entries: Vec<Entry>,
}

struct World {
    state: Mutex<State>,
    turn: Condvar,
}

/// Unwind payload of a host thread whose kernel thread was reclaimed
struct Reclaimed;

#[derive(Clone)]
struct Sim {
    world: Arc<World>,
}

impl std::fmt::Debug for Sim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Sim")
    }
}

impl Sim {
    /// Boot a kernel with one process whose first thread is the test body
    fn boot(entries: &[Entry]) -> (ThreadLibrary<Sim>, Vec<VirtAddr>) {
        let mut kernel = Kernel::new(
            ExecConfig::with_capacity(4),
            BitmapFrameAllocator::new(PhysAddr::new(0x10_0000), 256),
            SimulatedMachine::new(),
        )
        .unwrap();
        let pid = kernel.create_process(None).unwrap();
        let main = kernel.process(pid).unwrap().thread_ids().next().unwrap();
        kernel.set_thread_status(main, ThreadStatus::Runnable).unwrap();
        kernel.timer_interrupt();
        assert_eq!(kernel.current_thread(), Some(main));

        let sim = Sim {
            world: Arc::new(World {
                state: Mutex::new(State {
                    kernel,
                    started: HashSet::from([main]),
                    entries: entries.to_vec(),
                }),
                turn: Condvar::new(),
            }),
        };
        let addrs = (0..entries.len() as u64)
            .map(|i| VirtAddr::new(ENTRY_BASE + 4 * i))
            .collect();
        (ThreadLibrary::new(sim, TRAMPOLINE), addrs)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.world.state.lock().unwrap()
    }

    fn inspect<R>(&self, f: impl FnOnce(&SimKernel) -> R) -> R {
        f(&self.lock().kernel)
    }

    /// Block until `me` is the running thread
    fn wait_turn<'a>(&'a self, mut state: MutexGuard<'a, State>, me: ThreadId) -> MutexGuard<'a, State> {
        loop {
            if state.kernel.current_thread() == Some(me) {
                return state;
            }
            if state.kernel.thread(me).is_err() {
                drop(state);
                std::panic::resume_unwind(Box::new(Reclaimed));
            }
            let (next, timeout) = self
                .world
                .turn
                .wait_timeout(state, Duration::from_secs(10))
                .unwrap();
            assert!(!timeout.timed_out(), "thread {:#x} never scheduled again", me.as_u64());
            state = next;
        }
    }

    /// Give a newly dispatched kernel thread its host thread
    fn launch(&self, state: &mut State) {
        let Some(current) = state.kernel.current_thread() else {
            return;
        };
        if !state.started.insert(current) {
            return;
        }
        let context = *state.kernel.thread(current).unwrap().context();
        let index = ((context.pc - ENTRY_BASE) / 4) as usize;
        let entry = state.entries[index];
        let arg = context.regs[lattice_hal::reg::A0];

        let sim = self.clone();
        std::thread::spawn(move || {
            drop(sim.wait_turn(sim.lock(), current));
            let lib = ThreadLibrary::new(sim, TRAMPOLINE);
            let value = entry(&lib, arg);
            // returning lands on the exit trampoline
            let _ = lib.thread_exit(value);
        });
    }

    fn call<R>(&self, op: impl FnOnce(&mut SimKernel) -> ExecResult<R>) -> ExecResult<R> {
        let mut state = self.lock();
        let me = state
            .kernel
            .current_thread()
            .expect("syscall from a thread that is not running");
        let result = op(&mut state.kernel);
        self.launch(&mut state);
        self.world.turn.notify_all();
        drop(self.wait_turn(state, me));
        result
    }
}

impl ThreadSyscalls for Sim {
    fn thread_alloc(&self) -> ExecResult<ThreadId> {
        self.call(|k| k.sys_thread_alloc())
    }

    fn set_thread_status(&self, id: ThreadId, status: ThreadStatus) -> ExecResult<()> {
        self.call(|k| k.sys_set_thread_status(id.as_u64(), status.as_u32()))
    }

    fn current_thread_id(&self) -> ExecResult<ThreadId> {
        self.call(|k| k.sys_current_thread_id())
    }

    fn thread_destroy(&self, id: ThreadId) -> ExecResult<()> {
        self.call(|k| k.sys_thread_destroy(id.as_u64()))
    }

    fn thread_join(&self, id: ThreadId) -> ExecResult<ThreadExit> {
        self.call(|k| k.sys_thread_join(id.as_u64()))?;
        let me = self.current_thread_id()?;
        match self.call(|k| k.take_join_result(me))? {
            lattice_execution::JoinState::Complete(exit) => Ok(exit),
            lattice_execution::JoinState::Pending => Err(ExecError::NotFound),
        }
    }

    fn yield_now(&self) -> ExecResult<()> {
        self.call(|k| k.sys_yield())
    }

    fn with_descriptor<R>(
        &self,
        id: ThreadId,
        f: impl FnOnce(ThreadDescriptor<'_>) -> R,
    ) -> ExecResult<R> {
        self.call(|k| k.with_descriptor(id.as_u64(), f))
    }
}

/// Syscalls whose caller is preempted right before it blocks itself
struct PreemptedBeforeBlock(Sim);

impl ThreadSyscalls for PreemptedBeforeBlock {
    fn thread_alloc(&self) -> ExecResult<ThreadId> {
        self.0.thread_alloc()
    }

    fn set_thread_status(&self, id: ThreadId, status: ThreadStatus) -> ExecResult<()> {
        if status == ThreadStatus::Blocked && self.0.current_thread_id()? == id {
            self.0.yield_now()?;
        }
        self.0.set_thread_status(id, status)
    }

    fn current_thread_id(&self) -> ExecResult<ThreadId> {
        self.0.current_thread_id()
    }

    fn thread_destroy(&self, id: ThreadId) -> ExecResult<()> {
        self.0.thread_destroy(id)
    }

    fn thread_join(&self, id: ThreadId) -> ExecResult<ThreadExit> {
        self.0.thread_join(id)
    }

    fn yield_now(&self) -> ExecResult<()> {
        self.0.yield_now()
    }

    fn with_descriptor<R>(
        &self,
        id: ThreadId,
        f: impl FnOnce(ThreadDescriptor<'_>) -> R,
    ) -> ExecResult<R> {
        self.0.with_descriptor(id, f)
    }
}

fn returns_arg(_: &ThreadLibrary<Sim>, arg: u64) -> u64 {
    arg
}

fn exits_early(lib: &ThreadLibrary<Sim>, arg: u64) -> u64 {
    lib.thread_exit(arg).unwrap();
    unreachable!("reclaimed thread kept running")
}

fn polls_for_cancel(lib: &ThreadLibrary<Sim>, _: u64) -> u64 {
    assert_eq!(lib.set_cancel_state(CancelState::Cancelable), Ok(CancelState::NotCancelable));
    for _ in 0..100 {
        lib.test_cancel().unwrap();
        lib.thread_yield().unwrap();
    }
    7
}

fn cancelable_now(lib: &ThreadLibrary<Sim>, _: u64) -> u64 {
    lib.set_cancel_state(CancelState::Cancelable).unwrap();
    assert_eq!(lib.set_cancel_type(CancelType::Immediate), Ok(CancelType::Deferred));
    for _ in 0..100 {
        lib.thread_yield().unwrap();
    }
    7
}

fn turns_immediate_after_request(lib: &ThreadLibrary<Sim>, _: u64) -> u64 {
    lib.set_cancel_state(CancelState::Cancelable).unwrap();
    // the request arrives while this thread is off the CPU
    lib.thread_yield().unwrap();
    assert_eq!(lib.set_cancel_type(CancelType::Immediate), Ok(CancelType::Deferred));
    lib.test_cancel().unwrap();
    55
}

static SEM: Semaphore = Semaphore::new(0);
static EARLY_SEM: Semaphore = Semaphore::new(0);
static POSTED: AtomicU32 = AtomicU32::new(0);

fn posts_once(lib: &ThreadLibrary<Sim>, _: u64) -> u64 {
    POSTED.fetch_add(1, Ordering::SeqCst);
    SEM.post(lib.syscalls()).unwrap();
    0
}

fn posts_early(lib: &ThreadLibrary<Sim>, _: u64) -> u64 {
    EARLY_SEM.post(lib.syscalls()).unwrap();
    0
}

#[test]
fn test_join_returns_exit_value_once() {
    let (lib, entry) = Sim::boot(&[returns_arg]);
    let child = lib.thread_create(entry[0], 42).unwrap();
    assert_eq!(lib.thread_join(child), Ok(ThreadExit::Returned(42)));
    assert_eq!(lib.thread_join(child), Err(ExecError::NotFound));
    assert_eq!(lib.stats().threads_joined.load(Ordering::Relaxed), 1);
}

#[test]
fn test_explicit_exit() {
    let (lib, entry) = Sim::boot(&[exits_early]);
    let child = lib.thread_create(entry[0], 9).unwrap();
    assert_eq!(lib.thread_join(child), Ok(ThreadExit::Returned(9)));
    assert_eq!(lib.syscalls().inspect(|k| k.live_thread_count()), 1);
}

#[test]
fn test_cancel_refused_by_default() {
    let (lib, entry) = Sim::boot(&[returns_arg]);
    let child = lib.thread_create(entry[0], 1).unwrap();
    assert_eq!(lib.cancel(child), Err(ExecError::NotCancelable));
    assert_eq!(lib.thread_join(child), Ok(ThreadExit::Returned(1)));
    assert_eq!(lib.cancel(child), Err(ExecError::NotFound));
}

#[test]
fn test_thread_cap() {
    let (lib, entry) = Sim::boot(&[returns_arg]);
    let children: Vec<_> = (1..THREAD_MAX as u64)
        .map(|i| lib.thread_create(entry[0], i).unwrap())
        .collect();
    let me = lib.thread_self().unwrap();
    let before = lib.syscalls().inspect(|k| k.process(me.process()).unwrap().thread_count());
    assert_eq!(before, THREAD_MAX);
    assert_eq!(lib.thread_create(entry[0], 0), Err(ExecError::ThreadLimit));
    assert_eq!(lib.stats().threads_created.load(Ordering::Relaxed), (THREAD_MAX - 1) as u64);

    // the first join lets every runnable child finish
    assert_eq!(lib.thread_join(children[0]), Ok(ThreadExit::Returned(1)));
    assert_eq!(lib.syscalls().inspect(|k| k.live_thread_count()), 1);
    assert_eq!(lib.thread_join(children[1]), Err(ExecError::NotFound));
    assert!(lib.thread_create(entry[0], 0).is_ok());
}

#[test]
fn test_deferred_cancel_at_cancellation_point() {
    let (lib, entry) = Sim::boot(&[polls_for_cancel]);
    let child = lib.thread_create(entry[0], 0).unwrap();
    // let the child switch cancellation on
    lib.thread_yield().unwrap();
    lib.cancel(child).unwrap();
    assert_eq!(lib.thread_join(child), Ok(ThreadExit::Canceled));
}

#[test]
fn test_immediate_cancel_reclaims_target() {
    let (lib, entry) = Sim::boot(&[cancelable_now]);
    let child = lib.thread_create(entry[0], 0).unwrap();
    lib.thread_yield().unwrap();
    lib.cancel(child).unwrap();
    assert_eq!(lib.thread_join(child), Err(ExecError::NotFound));
    assert_eq!(lib.syscalls().inspect(|k| k.live_thread_count()), 1);
}

#[test]
fn test_detached_thread_not_joinable() {
    let (lib, entry) = Sim::boot(&[returns_arg]);
    let child = lib.thread_create(entry[0], 3).unwrap();
    lib.detach(child).unwrap();
    assert_eq!(lib.thread_join(child), Err(ExecError::InvalidArgument));
    lib.thread_yield().unwrap();
    assert_eq!(lib.detach(child), Err(ExecError::NotFound));
}

#[test]
fn test_semaphore_wakes_waiter() {
    let (lib, entry) = Sim::boot(&[posts_once]);
    for _ in 0..3 {
        lib.thread_create(entry[0], 0).unwrap();
    }
    for _ in 0..3 {
        SEM.wait(lib.syscalls()).unwrap();
    }
    assert_eq!(POSTED.load(Ordering::SeqCst), 3);
    assert_eq!(SEM.value(), 0);
}

#[test]
fn test_cancellation_point_ignores_request_after_switch_to_immediate() {
    let (lib, entry) = Sim::boot(&[turns_immediate_after_request]);
    let child = lib.thread_create(entry[0], 0).unwrap();
    lib.thread_yield().unwrap();
    lib.cancel(child).unwrap();
    assert_eq!(lib.thread_join(child), Ok(ThreadExit::Returned(55)));
}

#[test]
fn test_semaphore_post_before_waiter_blocks() {
    let (lib, entry) = Sim::boot(&[posts_early]);
    let poster = lib.thread_create(entry[0], 0).unwrap();
    let me = lib.thread_self().unwrap();

    EARLY_SEM.wait(&PreemptedBeforeBlock(lib.syscalls().clone())).unwrap();
    assert_eq!(EARLY_SEM.value(), 0);
    lib.syscalls().inspect(|k| {
        assert!(k.thread(poster).is_err());
        let control = *k.thread(me).unwrap().control();
        assert!(!control.flags.contains(lattice_execution::ThreadFlags::WAKE_PENDING));
        assert_eq!(k.thread(me).unwrap().status(), ThreadStatus::Runnable);
    });
}
