//! Saved execution context of a guest thread.
//!
//! The register file follows the guest's AAPCS-like calling convention:
//! r0-r3 carry call arguments (further arguments spill to the guest stack),
//! r0 carries the return value, r13 is the stack pointer, r14 the link
//! register, and r15 the program counter.

use std::fmt;

/// Index of the stack pointer in the register file.
pub const REG_SP: usize = 13;
/// Index of the link register in the register file.
pub const REG_LR: usize = 14;
/// Index of the program counter in the register file.
pub const REG_PC: usize = 15;
/// Number of registers that carry call arguments.
pub const ARG_REGISTERS: usize = 4;

/// One guest thread's register file.
///
/// A `CpuContext` is plain data: the engine checks a context out of its
/// thread while running and writes it back at every suspension point and on
/// termination, so observers reading through the thread handle always see a
/// consistent snapshot.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CpuContext {
    regs: [u32; 16],
}

impl CpuContext {
    /// Creates a zeroed context.
    #[must_use]
    pub fn new() -> Self {
        CpuContext { regs: [0; 16] }
    }

    /// Returns general register `index` (0-15).
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range; register indices come from the
    /// 4-bit fields of decoded instructions, never from unchecked guest data.
    #[must_use]
    pub fn reg(&self, index: usize) -> u32 {
        self.regs[index]
    }

    /// Sets general register `index` (0-15).
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn set_reg(&mut self, index: usize, value: u32) {
        self.regs[index] = value;
    }

    /// Returns the program counter.
    #[must_use]
    pub fn pc(&self) -> u32 {
        self.regs[REG_PC]
    }

    /// Sets the program counter.
    pub fn set_pc(&mut self, value: u32) {
        self.regs[REG_PC] = value;
    }

    /// Returns the stack pointer.
    #[must_use]
    pub fn sp(&self) -> u32 {
        self.regs[REG_SP]
    }

    /// Sets the stack pointer.
    pub fn set_sp(&mut self, value: u32) {
        self.regs[REG_SP] = value;
    }

    /// Returns the link register.
    #[must_use]
    pub fn lr(&self) -> u32 {
        self.regs[REG_LR]
    }

    /// Sets the link register.
    pub fn set_lr(&mut self, value: u32) {
        self.regs[REG_LR] = value;
    }

    /// Returns the register window carrying the first call arguments.
    #[must_use]
    pub fn arg_regs(&self) -> [u32; ARG_REGISTERS] {
        [self.regs[0], self.regs[1], self.regs[2], self.regs[3]]
    }

    /// Returns the call return value (r0).
    #[must_use]
    pub fn return_value(&self) -> u32 {
        self.regs[0]
    }

    /// Writes a call result into the guest return slot (r0).
    pub fn set_return(&mut self, value: u32) {
        self.regs[0] = value;
    }
}

impl Default for CpuContext {
    fn default() -> Self {
        CpuContext::new()
    }
}

impl fmt::Debug for CpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CpuContext {{ pc: {:#010x}, sp: {:#010x}, lr: {:#010x}, r0: {:#010x} }}",
            self.pc(),
            self.sp(),
            self.lr(),
            self.regs[0]
        )
    }
}
