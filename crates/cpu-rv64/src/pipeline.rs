//! Five-stage in-order pipeline: Fetch, Decode, Execute, Memory,
//! Write-back.
//!
//! Each stage owns at most one instruction together with the register
//! snapshot latched when the instruction entered the pipe. One `tick`
//! is one clock cycle:
//!
//! 1. finished slots advance toward retirement, oldest first;
//! 2. decode re-latches the committed register file (so it observes the
//!    previous cycle's retirements) keeping only its instruction's pc;
//! 3. queued squash invalidations are applied;
//! 4. the stages run in reverse order, Write-back to Fetch, so each one
//!    sees the downstream state of the previous cycle.
//!
//! Conditional branches are speculated at fetch through the branch
//! predictor and resolved at execute; a wrong path squashes the
//! speculative slots. An older instruction that writes a register the
//! decode slot reads holds decode back (a read-after-write interlock)
//! until the value commits. Fetch and decode faults travel the pipe as
//! poison and halt the machine when they reach write-back, which keeps
//! fault delivery in program order.

use emu_core::{Breakpoints, Cpu, Fault, MemAccess, Memory};

use crate::execute::Effect;
use crate::inst::{Hazard, Inst};
use crate::predictor::BranchPredictor;
use crate::registers::Registers;
use crate::stats::Stats;

/// One pipeline stage: the instruction it owns, the snapshot latched at
/// entry, and its latency state.
#[derive(Debug, Default, Clone)]
struct Slot {
    inst: Option<Inst>,
    /// Register snapshot the instruction computes against; its `pc`
    /// field holds the instruction's own address.
    regs: Registers,
    /// Committed pc once this instruction retires.
    next_pc: u64,
    /// Cycles left before the slot's work is done.
    remaining: u64,
    /// Access produced by execute, pending for the memory stage.
    mem_req: Option<MemAccess>,
    /// Execute ran; a slot blocked by a busy downstream stage must not
    /// run again.
    executed: bool,
    /// Queued squash: clear this slot at the top of the next tick.
    invalidate: bool,
}

impl Slot {
    fn clear(&mut self) {
        *self = Self::default();
    }

    /// Work finished, ready to hand downstream.
    fn ready(&self) -> bool {
        self.inst.is_some() && self.remaining == 0
    }
}

/// Introspection row for one pipeline stage.
#[derive(Debug, Clone)]
pub struct StageStatus {
    /// Stage name.
    pub stage: &'static str,
    /// Disassembly of the occupying instruction, if any.
    pub inst: Option<String>,
    /// Remaining stall cycles.
    pub remaining: u64,
}

/// Five-stage pipelined engine.
pub struct PipelineCpu {
    mem: Memory,
    /// Committed architectural register file.
    reg: Registers,
    /// Speculative fetch address.
    fetch_pc: u64,
    predictor: Box<dyn BranchPredictor>,
    fe: Slot,
    de: Slot,
    ex: Slot,
    me: Slot,
    wb: Slot,
    stats: Stats,
    breakpoints: Breakpoints,
}

impl PipelineCpu {
    /// Create a pipeline over `mem`, entering at `reg.pc`, speculating
    /// through `predictor`.
    #[must_use]
    pub fn new(mem: Memory, reg: Registers, predictor: Box<dyn BranchPredictor>) -> Self {
        Self {
            mem,
            fetch_pc: reg.pc,
            reg,
            predictor,
            fe: Slot::default(),
            de: Slot::default(),
            ex: Slot::default(),
            me: Slot::default(),
            wb: Slot::default(),
            stats: Stats::default(),
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

    /// Counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Current occupancy of the five stages, fetch first.
    #[must_use]
    pub fn stage_status(&self) -> [StageStatus; 5] {
        let row = |stage, slot: &Slot| StageStatus {
            stage,
            inst: slot.inst.as_ref().map(ToString::to_string),
            remaining: slot.remaining,
        };
        [
            row("fetch", &self.fe),
            row("decode", &self.de),
            row("execute", &self.ex),
            row("memory", &self.me),
            row("write-back", &self.wb),
        ]
    }

    /// True when no stage holds an instruction.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.fe.inst.is_none()
            && self.de.inst.is_none()
            && self.ex.inst.is_none()
            && self.me.inst.is_none()
            && self.wb.inst.is_none()
    }

    /// Advance the machine by one clock cycle.
    ///
    /// Halt (poison reaching write-back) flushes every stage and
    /// surfaces as an error; a retiring `ecall` surfaces as
    /// [`Fault::Syscall`] with the pipeline intact.
    fn tick(&mut self, honor_breakpoints: bool) -> Result<(), Fault> {
        self.advance_slots();
        self.refresh_decode_latch();
        self.apply_invalidations();
        self.stats.executed_cycles += 1;

        let mut raw_this_tick = false;
        let wb_event = self.run_write_back(&mut raw_this_tick);
        if wb_event == Some(Fault::Halt) {
            self.flush();
            return Err(Fault::Halt);
        }
        self.run_memory(&mut raw_this_tick);
        self.run_execute(&mut raw_this_tick);
        self.run_decode();
        self.run_fetch(honor_breakpoints);
        if raw_this_tick {
            self.stats.raw_stall_cycles += 1;
        }
        match wb_event {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    /// Hand finished slots downstream, oldest first, so a slot freed
    /// this cycle can be refilled by its upstream neighbor in the same
    /// cycle.
    fn advance_slots(&mut self) {
        if self.wb.inst.is_none() && self.me.ready() && self.me.mem_req.is_none() {
            self.wb = std::mem::take(&mut self.me);
        }
        if self.me.inst.is_none() && self.ex.ready() && self.ex.executed {
            self.me = std::mem::take(&mut self.ex);
        }
        if self.ex.inst.is_none() && self.de.ready() {
            self.ex = std::mem::take(&mut self.de);
            if let Some(inst) = &self.ex.inst {
                // a 1-cycle instruction burns this down and executes in
                // its arrival cycle; a divide occupies execute for all 40
                self.ex.remaining = inst.exec_cycle();
            }
        }
        if self.de.inst.is_none() && self.fe.ready() {
            self.de = std::mem::take(&mut self.fe);
        }
    }

    /// Decode reads the architectural state of the previous cycle's
    /// retirements; only the latched pc is its own.
    fn refresh_decode_latch(&mut self) {
        let pc = self.de.regs.pc;
        self.de.regs = self.reg;
        self.de.regs.pc = pc;
    }

    fn apply_invalidations(&mut self) {
        if self.de.invalidate {
            self.de.clear();
        }
        if self.ex.invalidate {
            self.ex.clear();
        }
    }

    /// True when `slot`'s instruction will write a register the decode
    /// slot's instruction reads.
    fn raw_against_decode(&self, slot: &Slot) -> bool {
        match (&slot.inst, &self.de.inst) {
            (Some(older), Some(younger)) => older.data_hazard(younger) == Hazard::Raw,
            _ => false,
        }
    }

    /// Hold decode for two cycles and fetch for at least one.
    fn impose_interlock(&mut self) {
        self.de.remaining = 2;
        self.fe.remaining = self.fe.remaining.max(1);
    }

    fn run_write_back(&mut self, raw: &mut bool) -> Option<Fault> {
        if self.raw_against_decode(&self.wb) {
            *raw = true;
            self.impose_interlock();
        }
        let inst = self.wb.inst?;
        match inst.write_back(&self.wb.regs, &mut self.reg) {
            Ok(()) => {
                self.reg.pc = self.wb.next_pc;
                self.stats.count(inst.mnemonic());
                tracing::trace!("{:#x}: retired {}", self.wb.regs.pc, inst);
                let syscall = matches!(inst, Inst::I { opcode: 0x73, .. });
                self.wb.clear();
                syscall.then_some(Fault::Syscall)
            }
            // poison reached write-back
            Err(fault) => {
                self.wb.clear();
                Some(fault)
            }
        }
    }

    fn run_memory(&mut self, raw: &mut bool) {
        if self.raw_against_decode(&self.me) {
            *raw = true;
            self.impose_interlock();
        }
        let Some(inst) = self.me.inst else { return };
        if self.me.remaining > 0 {
            self.me.remaining -= 1;
            if self.me.remaining > 0 {
                self.impose_interlock();
            }
            return;
        }
        if let Some(req) = self.me.mem_req {
            match inst.memory_finish(&mut self.me.regs, &mut self.mem, &req) {
                Ok(()) => {
                    self.me.remaining = self.mem.latency().saturating_sub(1);
                    self.me.mem_req = None;
                }
                Err(_) => {
                    // the access faulted: poison the slot, halt follows
                    // at write-back
                    self.me.inst = Some(Inst::MemoryFault);
                    self.me.mem_req = None;
                }
            }
        }
    }

    fn run_execute(&mut self, raw: &mut bool) {
        if self.raw_against_decode(&self.ex) || self.raw_against_decode(&self.me) {
            *raw = true;
            self.impose_interlock();
        }
        let Some(inst) = self.ex.inst else { return };
        if self.ex.remaining > 0 {
            self.ex.remaining -= 1;
            if self.ex.remaining > 0 {
                self.impose_interlock();
                return;
            }
        }
        if self.ex.executed {
            return;
        }
        self.ex.executed = true;
        self.ex.next_pc = self.ex.regs.pc.wrapping_add(4);
        if inst.is_poison() {
            return; // flows on untouched and halts at write-back
        }

        let jump = match inst.execute(&mut self.ex.regs) {
            Ok(Effect::None | Effect::Syscall) => None,
            Ok(Effect::Mem(req)) => {
                self.ex.mem_req = Some(req);
                None
            }
            Ok(Effect::Jump(jump)) => Some(jump.target),
            Err(_) => {
                // unrecognized function combination
                self.ex.inst = Some(Inst::IllegalFault);
                return;
            }
        };

        if inst.is_branch() {
            self.resolve_branch(jump);
        } else if let Some(target) = jump {
            self.resolve_jump(target);
        }
    }

    /// Count the branch, train the predictor, and squash the speculated
    /// path on a mismatch.
    fn resolve_branch(&mut self, jump: Option<u64>) {
        self.stats.branch_insts += 1;
        let pc = self.ex.regs.pc;
        let actual = jump.unwrap_or_else(|| pc.wrapping_add(4));
        self.ex.next_pc = actual;
        self.predictor.update(pc, jump.is_some());
        let speculated = if self.de.inst.is_some() {
            self.de.regs.pc
        } else {
            self.fetch_pc
        };
        if speculated != actual {
            self.stats.branch_miss += 1;
            self.redirect(actual);
        }
    }

    /// Unconditional redirect (jal/jalr): the target becomes this
    /// instruction's committed next pc and the speculated fall-through
    /// is squashed. Not a predicted branch, so neither counted nor
    /// trained.
    fn resolve_jump(&mut self, target: u64) {
        self.ex.next_pc = target;
        self.redirect(target);
    }

    /// Steer fetch to `target` and squash the wrong path: the decode
    /// slot and the fetch in flight (the bubble). Callers own the
    /// resolved instruction's `next_pc`; this touches only the
    /// speculative front of the pipe.
    fn redirect(&mut self, target: u64) {
        tracing::debug!("squash, resteering fetch to {target:#x}");
        self.stats.squashed_insts += u64::from(self.de.inst.is_some()) + 1;
        self.de.invalidate = true;
        self.de.remaining = 2;
        self.fe.clear();
        self.fe.remaining = 1;
        self.fetch_pc = target;
    }

    fn run_decode(&mut self) {
        // the real decode work happened at fetch; decode holds the
        // latched pc and burns down its interlock
        if self.de.remaining > 0 {
            self.de.remaining -= 1;
        }
    }

    fn run_fetch(&mut self, honor_breakpoints: bool) {
        if self.fe.remaining > 0 {
            self.fe.remaining -= 1;
            return; // stalled: no fetch, no pc advance
        }
        if self.fe.inst.is_some() {
            return; // decode has not accepted the last fetch yet
        }
        if honor_breakpoints && self.breakpoints.contains(self.fetch_pc) {
            return; // suppressed; the pipe drains and exec stops here
        }
        let word = match self.mem.fetch(self.fetch_pc) {
            Ok(word) => word,
            Err(_) => {
                // fetch fault becomes poison and halts at write-back
                self.install_fetch(Inst::MemoryFault);
                self.fe.remaining = 1;
                return;
            }
        };
        let inst = Inst::decode(word);
        if inst == Inst::IllegalFault {
            self.install_fetch(inst);
            self.fe.remaining = 1;
            return;
        }
        self.install_fetch(inst);
        self.fe.remaining = self.fe.remaining.max(self.mem.latency().saturating_sub(1));
        self.fetch_pc = match inst.branch_target(self.fetch_pc) {
            Some(target) if self.predictor.predict(self.fetch_pc, target) => target,
            _ => self.fetch_pc.wrapping_add(4),
        };
    }

    fn install_fetch(&mut self, inst: Inst) {
        self.fe.inst = Some(inst);
        self.fe.regs = self.reg;
        self.fe.regs.pc = self.fetch_pc;
        self.fe.next_pc = self.fetch_pc.wrapping_add(4);
        self.fe.mem_req = None;
        self.fe.executed = false;
    }

    /// Empty every stage. Halt semantics: the committed register file
    /// keeps the state of everything retired before the fault.
    fn flush(&mut self) {
        self.fe.clear();
        self.de.clear();
        self.ex.clear();
        self.me.clear();
        self.wb.clear();
    }
}

impl Cpu for PipelineCpu {
    type Registers = Registers;

    /// One clock tick, ignoring breakpoints (single-stepping).
    fn step(&mut self) -> Result<(), Fault> {
        self.tick(false)
    }

    fn exec(&mut self, limit: u64, ignore_breakpoints: bool) -> u64 {
        let start = self.stats.executed_insts;
        let honor = !ignore_breakpoints;
        let mut ticks = 0;
        loop {
            if limit != 0 && ticks == limit {
                break;
            }
            if honor && self.breakpoints.contains(self.fetch_pc) && self.is_drained() {
                break;
            }
            ticks += 1;
            match self.tick(honor) {
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
        self.fetch_pc
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
