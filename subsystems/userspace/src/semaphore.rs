//! # Semaphore
//!
//! Counting semaphore for threads of one process. Waiters block through
//! set-thread-status; `post` hands its unit directly to the oldest waiter
//! as a grant. A waiter only returns once it holds a grant or took a unit,
//! and the kernel keeps a wake-up that reaches a waiter before it blocked.

use crate::syscalls::ThreadSyscalls;
use lattice_execution::{ExecError, ExecResult, ThreadId, ThreadStatus, THREAD_MAX};
use spin::Mutex;

#[derive(Debug)]
struct State {
    value: u32,
    waiters: heapless::Deque<ThreadId, THREAD_MAX>,
    granted: heapless::Vec<ThreadId, THREAD_MAX>,
}

impl State {
    fn take_grant(&mut self, id: ThreadId) -> bool {
        match self.granted.iter().position(|&g| g == id) {
            Some(pos) => {
                self.granted.swap_remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Counting semaphore
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<State>,
}

impl Semaphore {
    /// Create a semaphore holding `value` units
    pub const fn new(value: u32) -> Self {
        Self {
            state: Mutex::new(State {
                value,
                waiters: heapless::Deque::new(),
                granted: heapless::Vec::new(),
            }),
        }
    }

    /// Units currently available
    pub fn value(&self) -> u32 {
        self.state.lock().value
    }

    /// Take a unit without blocking
    pub fn try_wait(&self) -> bool {
        let mut state = self.state.lock();
        if state.value == 0 {
            return false;
        }
        state.value -= 1;
        true
    }

    /// Take a unit, blocking the caller until one is posted
    pub fn wait<S: ThreadSyscalls>(&self, sys: &S) -> ExecResult<()> {
        let me = sys.current_thread_id()?;
        loop {
            {
                let mut state = self.state.lock();
                if state.take_grant(me) {
                    return Ok(());
                }
                if state.value > 0 {
                    state.value -= 1;
                    return Ok(());
                }
                if !state.waiters.iter().any(|&w| w == me) {
                    state.waiters.push_back(me).map_err(|_| ExecError::ThreadLimit)?;
                }
            }
            sys.set_thread_status(me, ThreadStatus::Blocked)?;
        }
    }

    /// Release a unit, waking the oldest waiter if there is one
    pub fn post<S: ThreadSyscalls>(&self, sys: &S) -> ExecResult<()> {
        let waiter = {
            let mut state = self.state.lock();
            match state.waiters.pop_front() {
                Some(id) => {
                    if state.granted.push(id).is_err() {
                        log::warn!("grant list full; {:#x} must retake the unit", id.as_u64());
                        state.value += 1;
                    }
                    Some(id)
                }
                None => {
                    state.value += 1;
                    None
                }
            }
        };
        match waiter {
            Some(id) => sys.set_thread_status(id, ThreadStatus::Runnable),
            None => Ok(()),
        }
    }
}
