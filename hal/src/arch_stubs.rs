//! # Simulated Machine
//!
//! A host-side backend for the HAL traits. It keeps the trap scratch frame in
//! memory, records address-space switches, and treats `resume_user` as "the
//! thread is now running with this frame": the scratch frame becomes the
//! restored one, exactly what the trap handler would deposit on the thread's
//! next trap from that point.

use crate::cpu::{reg, CpuAbstraction, TrapFrame};
use crate::mmu::{Asid, MmuAbstraction};
use crate::PhysAddr;
use alloc::vec::Vec;

/// Simulated single-CPU machine
#[derive(Debug, Default)]
pub struct SimulatedMachine {
    scratch: TrapFrame,
    bound: Option<(PhysAddr, Asid)>,
    resumes: u64,
    idle_waits: u64,
    invalidated: Vec<Asid>,
}

impl SimulatedMachine {
    /// Create a machine with an empty scratch frame and no bound space
    pub const fn new() -> Self {
        Self {
            scratch: TrapFrame::new(),
            bound: None,
            resumes: 0,
            idle_waits: 0,
            invalidated: Vec::new(),
        }
    }

    /// Emulate the running thread executing a syscall instruction
    pub fn raise_syscall(&mut self, number: u64, args: [u64; 4]) {
        self.scratch.regs[reg::V0] = number;
        for (i, arg) in args.iter().enumerate() {
            self.scratch.regs[reg::A0 + i] = *arg;
        }
    }

    /// Address space currently bound, if any
    pub fn bound(&self) -> Option<(PhysAddr, Asid)> {
        self.bound
    }

    /// Number of times a frame was restored into the machine
    pub fn resume_count(&self) -> u64 {
        self.resumes
    }

    /// Number of idle waits entered
    pub fn idle_waits(&self) -> u64 {
        self.idle_waits
    }

    /// Tags whose cached translations were invalidated, oldest first
    pub fn invalidated(&self) -> &[Asid] {
        &self.invalidated
    }
}

impl CpuAbstraction for SimulatedMachine {
    fn trap_frame(&self) -> &TrapFrame {
        &self.scratch
    }

    fn trap_frame_mut(&mut self) -> &mut TrapFrame {
        &mut self.scratch
    }

    fn resume_user(&mut self, frame: &TrapFrame) {
        self.scratch = *frame;
        self.scratch.epc = frame.pc;
        self.resumes += 1;
    }

    fn wait_for_interrupt(&mut self) {
        self.idle_waits += 1;
    }
}

impl MmuAbstraction for SimulatedMachine {
    fn switch_address_space(&mut self, root: PhysAddr, asid: Asid) {
        log::trace!("sim: bind root {} asid {}", root, asid.as_u8());
        self.bound = Some((root, asid));
    }

    fn invalidate_asid(&mut self, asid: Asid) {
        self.invalidated.push(asid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_installs_frame() {
        let mut machine = SimulatedMachine::new();
        let mut frame = TrapFrame::new();
        frame.pc = 0x40_0100;
        frame.regs[reg::A0] = 9;
        machine.resume_user(&frame);
        assert_eq!(machine.trap_frame().epc, 0x40_0100);
        assert_eq!(machine.trap_frame().regs[reg::A0], 9);
        assert_eq!(machine.resume_count(), 1);
    }

    #[test]
    fn test_raise_syscall() {
        let mut machine = SimulatedMachine::new();
        machine.raise_syscall(3, [1, 2, 3, 4]);
        let frame = machine.trap_frame();
        assert_eq!(frame.syscall_number(), 3);
        assert_eq!(frame.regs[reg::A3], 4);
    }
}
