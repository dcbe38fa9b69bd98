//! Single-cycle interpreter: one instruction per step, no timing model.

use emu_core::{Breakpoints, Cpu, Fault, Memory};

use crate::execute::Effect;
use crate::inst::Inst;
use crate::registers::Registers;

/// Functional interpreter over a (memory, register file) pair.
pub struct SimpleCpu {
    mem: Memory,
    reg: Registers,
    breakpoints: Breakpoints,
}

impl SimpleCpu {
    /// Create an interpreter over `mem` with entry state `reg`.
    #[must_use]
    pub fn new(mem: Memory, reg: Registers) -> Self {
        Self {
            mem,
            reg,
            breakpoints: Breakpoints::new(),
        }
    }

    /// Access the memory.
    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    /// Mutably access the memory.
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    fn step_inner(&mut self) -> Result<(), Fault> {
        let inst = Inst::decode(self.mem.fetch(self.reg.pc)?);
        tracing::trace!("{:#x}: {}", self.reg.pc, inst);
        match inst.execute(&mut self.reg)? {
            Effect::None => self.reg.pc = self.reg.pc.wrapping_add(4),
            Effect::Mem(req) => {
                inst.memory_finish(&mut self.reg, &mut self.mem, &req)?;
                self.reg.pc = self.reg.pc.wrapping_add(4);
            }
            Effect::Jump(jump) => self.reg.pc = jump.target,
            Effect::Syscall => {
                self.reg.pc = self.reg.pc.wrapping_add(4);
                return Err(Fault::Syscall);
            }
        }
        Ok(())
    }
}

impl Cpu for SimpleCpu {
    type Registers = Registers;

    fn step(&mut self) -> Result<(), Fault> {
        self.step_inner()
    }

    fn exec(&mut self, limit: u64, ignore_breakpoints: bool) -> u64 {
        let mut retired = 0;
        loop {
            if limit != 0 && retired == limit {
                break;
            }
            if !ignore_breakpoints && self.breakpoints.contains(self.reg.pc) {
                break;
            }
            match self.step_inner() {
                Ok(()) => retired += 1,
                Err(Fault::Syscall) => {
                    retired += 1;
                    tracing::info!("program issued a syscall at {:#x}", self.reg.pc);
                }
                Err(Fault::Halt) => break,
                Err(fault) => {
                    tracing::warn!("run terminated: {fault}");
                    break;
                }
            }
        }
        retired
    }

    fn pc(&self) -> u64 {
        self.reg.pc
    }

    fn registers(&self) -> Registers {
        self.reg
    }

    fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    fn breakpoints_mut(&mut self) -> &mut Breakpoints {
        &mut self.breakpoints
    }
}
