//! # Process Management
//!
//! Process descriptors and the fixed-capacity table that owns them.
//!
//! The table is an arena: slots are addressed by the index inside a
//! [`ProcessId`] and validated against the id stored in the slot, so a stale
//! id never reaches a reused descriptor. Free slots sit on a LIFO free list
//! seeded so slot 0 is handed out first.

use crate::thread::Thread;
use crate::{ProcessId, ThreadId, THREAD_MAX};
use alloc::vec::Vec;
use lattice_memory::AddressSpace;

/// Process structure
#[derive(Debug)]
pub struct Process {
    /// Identity while allocated
    pub(crate) id: Option<ProcessId>,
    /// Creator, `None` for a root process
    pub(crate) parent: Option<ProcessId>,
    /// Bumped on every allocation of this slot
    pub(crate) generation: u16,
    /// Owned address space
    pub(crate) address_space: Option<AddressSpace>,
    /// Thread slots
    pub(crate) threads: [Thread; THREAD_MAX],
    /// Number of non-free thread slots
    pub(crate) thread_count: usize,
    /// Times one of its threads was dispatched
    pub(crate) run_count: u64,
}

impl Process {
    /// An unallocated descriptor
    pub fn empty() -> Self {
        Self {
            id: None,
            parent: None,
            generation: 0,
            address_space: None,
            threads: core::array::from_fn(|_| Thread::free()),
            thread_count: 0,
            run_count: 0,
        }
    }

    /// Get process ID
    pub fn id(&self) -> Option<ProcessId> {
        self.id
    }

    /// Get parent process
    pub fn parent(&self) -> Option<ProcessId> {
        self.parent
    }

    /// Owned address space
    pub fn address_space(&self) -> Option<&AddressSpace> {
        self.address_space.as_ref()
    }

    /// Thread slots
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    /// Ids of all allocated threads
    pub fn thread_ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.threads.iter().filter_map(Thread::id)
    }

    /// Number of live threads
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Dispatch count
    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    pub(crate) fn next_generation(&mut self) -> u16 {
        self.generation = self.generation.wrapping_add(1) & ProcessId::GENERATION_MASK;
        self.generation
    }
}

/// Fixed-capacity process table
#[derive(Debug)]
pub struct ProcessTable {
    slots: Vec<Process>,
    free: Vec<usize>,
}

impl ProcessTable {
    /// Create a table of `capacity` free descriptors
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Process::empty()).collect(),
            free: (0..capacity).rev().collect(),
        }
    }

    /// Number of descriptors
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of free descriptors
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Slot the next allocation will take
    pub fn peek_free(&self) -> Option<usize> {
        self.free.last().copied()
    }

    /// Take the next free slot
    pub(crate) fn pop_free(&mut self) -> Option<usize> {
        self.free.pop()
    }

    /// Return a slot to the free list
    pub(crate) fn push_free(&mut self, slot: usize) {
        self.free.push(slot);
    }

    pub(crate) fn slot_mut(&mut self, slot: usize) -> &mut Process {
        &mut self.slots[slot]
    }

    /// Live process with id `pid`
    pub fn get(&self, pid: ProcessId) -> Option<&Process> {
        self.slots
            .get(pid.slot())
            .filter(|process| process.id == Some(pid))
    }

    /// Mutable live process with id `pid`
    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.slots
            .get_mut(pid.slot())
            .filter(|process| process.id == Some(pid))
    }

    /// Live thread with id `tid`
    pub fn thread(&self, tid: ThreadId) -> Option<&Thread> {
        self.get(tid.process())?
            .threads
            .get(tid.slot())
            .filter(|thread| thread.id == Some(tid))
    }

    /// Mutable live thread with id `tid`
    pub fn thread_mut(&mut self, tid: ThreadId) -> Option<&mut Thread> {
        self.get_mut(tid.process())?
            .threads
            .get_mut(tid.slot())
            .filter(|thread| thread.id == Some(tid))
    }

    /// Live processes
    pub fn live(&self) -> impl Iterator<Item = &Process> + '_ {
        self.slots.iter().filter(|process| process.id.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_hal::Asid;

    #[test]
    fn test_free_list_hands_out_slot_zero_first() {
        let mut table = ProcessTable::new(4);
        assert_eq!(table.pop_free(), Some(0));
        assert_eq!(table.pop_free(), Some(1));
        table.push_free(0);
        assert_eq!(table.peek_free(), Some(0));
        assert_eq!(table.free_count(), 3);
    }

    #[test]
    fn test_lookup_checks_identity() {
        let mut table = ProcessTable::new(2);
        let slot = table.pop_free().unwrap();
        let generation = table.slot_mut(slot).next_generation();
        let pid = ProcessId::new(slot, Asid::new(3).unwrap(), generation);
        table.slot_mut(slot).id = Some(pid);

        assert!(table.get(pid).is_some());
        let stale = ProcessId::new(slot, Asid::new(3).unwrap(), generation + 1);
        assert!(table.get(stale).is_none());
        let foreign = ProcessId::new(1, Asid::new(3).unwrap(), generation);
        assert!(table.get(foreign).is_none());
        assert_eq!(table.live().count(), 1);
    }

    #[test]
    fn test_out_of_range_slot() {
        let table = ProcessTable::new(2);
        let pid = ProcessId::new(7, Asid::new(0).unwrap(), 1);
        assert!(table.get(pid).is_none());
    }
}
