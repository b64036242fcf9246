//! # Scheduler Traits

use crate::ThreadId;

/// Run queue interface
pub trait RunQueue {
    /// Add a thread at the tail
    fn enqueue(&mut self, id: ThreadId);

    /// Remove and return the head
    fn dequeue(&mut self) -> Option<ThreadId>;

    /// Peek at the head
    fn peek(&self) -> Option<ThreadId>;

    /// Check if empty
    fn is_empty(&self) -> bool;

    /// Get length
    fn len(&self) -> usize;

    /// Remove a specific thread
    fn remove(&mut self, id: ThreadId) -> bool;

    /// Whether `id` is queued
    fn contains(&self, id: ThreadId) -> bool;
}
