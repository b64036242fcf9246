//! # Scheduler Run Queues

use super::traits::RunQueue;
use crate::ThreadId;
use alloc::collections::VecDeque;

/// Simple FIFO run queue
#[derive(Debug, Clone, Default)]
pub struct FifoQueue {
    queue: VecDeque<ThreadId>,
}

impl FifoQueue {
    /// Create a new FIFO queue
    pub const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Queued threads, head first
    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.queue.iter().copied()
    }
}

impl RunQueue for FifoQueue {
    fn enqueue(&mut self, id: ThreadId) {
        self.queue.push_back(id);
    }

    fn dequeue(&mut self) -> Option<ThreadId> {
        self.queue.pop_front()
    }

    fn peek(&self) -> Option<ThreadId> {
        self.queue.front().copied()
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn remove(&mut self, id: ThreadId) -> bool {
        if let Some(pos) = self.queue.iter().position(|&x| x == id) {
            self.queue.remove(pos);
            true
        } else {
            false
        }
    }

    fn contains(&self, id: ThreadId) -> bool {
        self.queue.contains(&id)
    }
}
