//! Multi-cycle accountant: the architectural behavior of the
//! single-cycle interpreter plus a cycle model without pipeline overlap.
//!
//! Every retired non-branch dispatch pays 2 bookkeeping cycles on top
//! of the instruction latency. Memory traffic pays the memory latency,
//! reads one cycle more than writes. An adjacent divide/remainder pair
//! over the same operands retires in a single dispatch for one divide
//! latency, since the remainder falls out of the same division.

use emu_core::{Breakpoints, Cpu, Dir, Fault, Memory};

use crate::execute::Effect;
use crate::inst::Inst;
use crate::registers::Registers;
use crate::stats::Stats;

/// Cycle-accounting interpreter.
pub struct MultiCycleCpu {
    mem: Memory,
    reg: Registers,
    breakpoints: Breakpoints,
    stats: Stats,
}

impl MultiCycleCpu {
    /// Create an accountant over `mem` with entry state `reg`.
    #[must_use]
    pub fn new(mem: Memory, reg: Registers) -> Self {
        Self {
            mem,
            reg,
            breakpoints: Breakpoints::new(),
            stats: Stats::default(),
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

    /// Counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    fn step_inner(&mut self) -> Result<(), Fault> {
        let inst = Inst::decode(self.mem.fetch(self.reg.pc)?);
        tracing::trace!("{:#x}: {}", self.reg.pc, inst);
        if let Some(companion) = self.fuse_candidate(&inst) {
            return self.step_fused(inst, companion);
        }
        self.stats.executed_cycles += inst.exec_cycle();
        if !inst.is_branch() {
            self.stats.executed_cycles += 2;
        }
        match inst.execute(&mut self.reg)? {
            Effect::None => self.reg.pc = self.reg.pc.wrapping_add(4),
            Effect::Mem(req) => {
                inst.memory_finish(&mut self.reg, &mut self.mem, &req)?;
                self.stats.executed_cycles +=
                    self.mem.latency() + u64::from(req.dir == Dir::Read);
                self.reg.pc = self.reg.pc.wrapping_add(4);
            }
            Effect::Jump(jump) => self.reg.pc = jump.target,
            Effect::Syscall => {
                self.reg.pc = self.reg.pc.wrapping_add(4);
                self.stats.count(inst.mnemonic());
                return Err(Fault::Syscall);
            }
        }
        if inst.is_branch() {
            self.stats.branch_insts += 1;
        }
        self.stats.count(inst.mnemonic());
        Ok(())
    }

    /// Decode the following word and check for a fusable
    /// divide/remainder companion.
    fn fuse_candidate(&self, inst: &Inst) -> Option<Inst> {
        let word = self.mem.fetch(self.reg.pc.wrapping_add(4)).ok()?;
        let next = Inst::decode(word);
        inst.div_rem_ok(&next).then_some(next)
    }

    /// Retire a fused (div, rem) pair in one dispatch: both counted,
    /// one divide latency, one bookkeeping charge.
    fn step_fused(&mut self, div: Inst, rem: Inst) -> Result<(), Fault> {
        self.stats.executed_cycles += div.exec_cycle() + 2;
        div.execute(&mut self.reg)?;
        rem.execute(&mut self.reg)?;
        self.stats.count(div.mnemonic());
        self.stats.count(rem.mnemonic());
        self.reg.pc = self.reg.pc.wrapping_add(8);
        Ok(())
    }
}

impl Cpu for MultiCycleCpu {
    type Registers = Registers;

    fn step(&mut self) -> Result<(), Fault> {
        self.step_inner()
    }

    fn exec(&mut self, limit: u64, ignore_breakpoints: bool) -> u64 {
        let start = self.stats.executed_insts;
        let mut steps = 0;
        loop {
            if limit != 0 && steps == limit {
                break;
            }
            if !ignore_breakpoints && self.breakpoints.contains(self.reg.pc) {
                break;
            }
            steps += 1;
            match self.step_inner() {
                Ok(()) => {}
                Err(Fault::Syscall) => {
                    tracing::info!("program issued a syscall at {:#x}", self.reg.pc);
                }
                Err(Fault::Halt) => break,
                Err(fault) => {
                    tracing::warn!("run terminated: {fault}");
                    break;
                }
            }
        }
        self.stats.executed_insts - start
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
