//! # CPU Abstraction
//!
//! The trapped register frame and the operations the kernel needs from the
//! CPU: reading the frame the trap handler deposited, restoring a frame into
//! the machine, and waiting for the next interrupt.

use crate::VirtAddr;

/// General-purpose register indices of the trap frame
///
/// The numbering follows the o32-style register file the frame mirrors.
pub mod reg {
    /// Hard-wired zero
    pub const ZERO: usize = 0;
    /// First return value (also carries the syscall number on entry)
    pub const V0: usize = 2;
    /// Second return value
    pub const V1: usize = 3;
    /// First argument
    pub const A0: usize = 4;
    /// Second argument
    pub const A1: usize = 5;
    /// Third argument
    pub const A2: usize = 6;
    /// Fourth argument
    pub const A3: usize = 7;
    /// Stack pointer
    pub const SP: usize = 29;
    /// Return address
    pub const RA: usize = 31;
}

/// Width of one instruction; syscalls resume past the trapping one
pub const INSTRUCTION_SIZE: u64 = 4;

/// Full register and exception-return state of a suspended thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct TrapFrame {
    /// General-purpose registers
    pub regs: [u64; 32],
    /// Status word (mode and interrupt enable bits)
    pub status: u64,
    /// Multiply/divide high result
    pub hi: u64,
    /// Multiply/divide low result
    pub lo: u64,
    /// Faulting address of the last address exception
    pub badvaddr: u64,
    /// Cause of the last trap
    pub cause: u64,
    /// Address of the instruction that trapped
    pub epc: u64,
    /// Address execution resumes at when this frame is restored
    pub pc: u64,
}

static_assertions::const_assert_eq!(core::mem::size_of::<TrapFrame>(), 39 * 8);

impl TrapFrame {
    /// Create a zeroed frame
    pub const fn new() -> Self {
        Self {
            regs: [0; 32],
            status: 0,
            hi: 0,
            lo: 0,
            badvaddr: 0,
            cause: 0,
            epc: 0,
            pc: 0,
        }
    }

    /// Syscall number carried in `v0` on entry
    pub const fn syscall_number(&self) -> u64 {
        self.regs[reg::V0]
    }
}

/// Accessors shared by every saved CPU context
pub trait CpuContext: Clone + Default {
    /// Get the resume address
    fn instruction_pointer(&self) -> VirtAddr;

    /// Set the resume address
    fn set_instruction_pointer(&mut self, ip: VirtAddr);

    /// Get the stack pointer
    fn stack_pointer(&self) -> VirtAddr;

    /// Set the stack pointer
    fn set_stack_pointer(&mut self, sp: VirtAddr);

    /// Get the return value register
    fn return_value(&self) -> u64;

    /// Set the return value register
    fn set_return_value(&mut self, value: u64);

    /// Get syscall argument by index (0-3)
    fn syscall_arg(&self, index: usize) -> u64;

    /// Set syscall argument by index (0-3)
    fn set_syscall_arg(&mut self, index: usize, value: u64);
}

impl CpuContext for TrapFrame {
    fn instruction_pointer(&self) -> VirtAddr {
        VirtAddr::new(self.pc)
    }

    fn set_instruction_pointer(&mut self, ip: VirtAddr) {
        self.pc = ip.as_u64();
    }

    fn stack_pointer(&self) -> VirtAddr {
        VirtAddr::new(self.regs[reg::SP])
    }

    fn set_stack_pointer(&mut self, sp: VirtAddr) {
        self.regs[reg::SP] = sp.as_u64();
    }

    fn return_value(&self) -> u64 {
        self.regs[reg::V0]
    }

    fn set_return_value(&mut self, value: u64) {
        self.regs[reg::V0] = value;
    }

    fn syscall_arg(&self, index: usize) -> u64 {
        match index {
            0..=3 => self.regs[reg::A0 + index],
            _ => 0,
        }
    }

    fn set_syscall_arg(&mut self, index: usize, value: u64) {
        if index <= 3 {
            self.regs[reg::A0 + index] = value;
        }
    }
}

/// CPU abstraction trait
///
/// The trap layer deposits the interrupted thread's frame in a fixed scratch
/// location before calling into the kernel; this trait exposes that location
/// and the return path to user mode.
pub trait CpuAbstraction {
    /// The frame the trap handler last deposited
    fn trap_frame(&self) -> &TrapFrame;

    /// Mutable access to the deposited frame (syscall results, resume address)
    fn trap_frame_mut(&mut self) -> &mut TrapFrame;

    /// Install `frame` as the state restored when the trap returns to user mode
    ///
    /// The kernel may still adjust the installed frame through
    /// [`trap_frame_mut`](Self::trap_frame_mut) before the trap returns.
    fn resume_user(&mut self, frame: &TrapFrame);

    /// Halt the CPU until an interrupt occurs
    fn wait_for_interrupt(&mut self);
}
