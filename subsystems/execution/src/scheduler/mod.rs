//! # Scheduler
//!
//! Priority-weighted round robin over two ready queues.
//!
//! New and woken threads join the tail of the *intake* queue. A thread that
//! uses up its quantum, or stops being runnable, is rotated to the tail of
//! the *other* queue; once the intake queue drains the two swap roles. A
//! thread's priority sets how many consecutive turns it keeps the CPU.
//!
//! The policy only sees thread ids; the caller supplies a probe reporting
//! each id's status and priority, or `None` once the id is stale.

pub mod metrics;
pub mod priority;
pub mod queue;
pub mod traits;

pub use metrics::SchedulerMetrics;
pub use priority::Priority;
pub use queue::FifoQueue;
pub use traits::RunQueue;

use crate::thread::ThreadStatus;
use crate::ThreadId;

/// Outcome of one scheduling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep running the current thread; its quantum is not exhausted
    Resume(ThreadId),
    /// Dispatch a thread with a fresh quantum
    Switch(ThreadId),
    /// Nothing is runnable
    Idle,
}

impl Decision {
    /// Thread chosen to run, if any
    pub fn thread(self) -> Option<ThreadId> {
        match self {
            Decision::Resume(id) | Decision::Switch(id) => Some(id),
            Decision::Idle => None,
        }
    }
}

/// Two-queue priority round-robin policy
#[derive(Debug, Clone, Default)]
pub struct PriorityRoundRobin {
    queues: [FifoQueue; 2],
    intake: usize,
    remaining: u32,
}

impl PriorityRoundRobin {
    /// Create an empty scheduler
    pub const fn new() -> Self {
        Self {
            queues: [FifoQueue::new(), FifoQueue::new()],
            intake: 0,
            remaining: 0,
        }
    }

    /// Append `id` to the intake queue
    pub fn enqueue(&mut self, id: ThreadId) {
        self.queues[self.intake].enqueue(id);
    }

    /// Drop `id` from whichever queue holds it
    pub fn remove(&mut self, id: ThreadId) -> bool {
        let first = self.queues[0].remove(id);
        let second = self.queues[1].remove(id);
        first || second
    }

    /// Whether `id` is queued anywhere
    pub fn contains(&self, id: ThreadId) -> bool {
        self.queues.iter().any(|q| q.contains(id))
    }

    /// Total queued entries
    pub fn len(&self) -> usize {
        self.queues.iter().map(RunQueue::len).sum()
    }

    /// Whether both queues are empty
    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(RunQueue::is_empty)
    }

    /// Index of the intake queue
    pub fn intake(&self) -> usize {
        self.intake
    }

    /// Queue `index` (0 or 1)
    pub fn queue(&self, index: usize) -> &FifoQueue {
        &self.queues[index & 1]
    }

    /// Turns left in the running thread's quantum
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    fn other(&self) -> usize {
        1 - self.intake
    }

    /// Consume one turn and pick the thread to run next
    pub fn select<F>(&mut self, current: Option<ThreadId>, mut probe: F) -> Decision
    where
        F: FnMut(ThreadId) -> Option<(ThreadStatus, Priority)>,
    {
        self.remaining = self.remaining.saturating_sub(1);

        if let Some(cur) = current {
            match probe(cur) {
                Some((ThreadStatus::Runnable, _)) if self.remaining > 0 => {
                    return Decision::Resume(cur);
                }
                Some(_) => {
                    self.remove(cur);
                    let other = self.other();
                    self.queues[other].enqueue(cur);
                }
                None => {
                    self.remove(cur);
                }
            }
        }

        // Every entry is examined at most once before giving up.
        let mut budget = self.len();
        loop {
            let Some(head) = self.queues[self.intake].peek() else {
                if self.queues[self.other()].is_empty() {
                    self.remaining = 0;
                    return Decision::Idle;
                }
                self.intake = self.other();
                log::trace!("sched: intake swapped to queue {}", self.intake);
                continue;
            };

            match probe(head) {
                Some((ThreadStatus::Runnable, priority)) => {
                    self.remaining = priority.quantum();
                    return Decision::Switch(head);
                }
                state => {
                    if budget == 0 {
                        self.remaining = 0;
                        return Decision::Idle;
                    }
                    budget -= 1;
                    self.queues[self.intake].dequeue();
                    if state.is_some() {
                        let other = self.other();
                        self.queues[other].enqueue(head);
                    }
                }
            }
        }
    }
}
