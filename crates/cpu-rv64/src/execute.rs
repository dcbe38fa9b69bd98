//! Execute, memory-finish and write-back phases of an instruction.

use emu_core::{Dir, Fault, Jump, MemAccess, Memory, Width};

use crate::alu;
use crate::inst::Inst;
use crate::registers::Registers;

/// Outcome of the execute phase.
///
/// Memory requests, redirects and syscalls are in-band signals for the
/// driving engine, not errors; faults come back through `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Any register result is already in the destination.
    None,
    /// The instruction needs a memory access finished by the driver.
    Mem(MemAccess),
    /// The instruction redirects control flow.
    Jump(Jump),
    /// The program requested host service.
    Syscall,
}

impl Inst {
    /// Execute against `reg`, writing any register result and signalling
    /// memory accesses, control-flow redirects and syscalls to the
    /// driver. `reg.pc` must hold this instruction's address.
    pub fn execute(&self, reg: &mut Registers) -> Result<Effect, Fault> {
        match *self {
            Self::R {
                opcode,
                funct3,
                funct7,
                rs1,
                rs2,
                rd,
            } => {
                let value = r_op(opcode, funct3, funct7, reg.get(rs1), reg.get(rs2))
                    .ok_or(Fault::IllegalInstruction { pc: reg.pc })?;
                reg.set(rd, value);
                Ok(Effect::None)
            }
            Self::I {
                opcode,
                funct3,
                funct7,
                imm,
                rs1,
                rd,
            } => execute_i(reg, opcode, funct3, funct7, imm, rs1, rd),
            Self::S {
                funct3, imm, rs1, ..
            } => {
                let width = store_width(funct3).ok_or(Fault::IllegalInstruction { pc: reg.pc })?;
                Ok(Effect::Mem(MemAccess {
                    addr: reg.get(rs1).wrapping_add(imm as u64),
                    width,
                    signed: false,
                    dir: Dir::Write,
                }))
            }
            Self::Sb {
                funct3,
                imm,
                rs1,
                rs2,
            } => {
                let s1 = reg.get(rs1);
                let s2 = reg.get(rs2);
                let taken = match funct3 {
                    0x00 => s1 == s2,
                    0x01 => s1 != s2,
                    0x04 => (s1 as i64) < (s2 as i64),
                    0x05 => (s1 as i64) >= (s2 as i64),
                    0x06 => s1 < s2,
                    0x07 => s1 >= s2,
                    _ => return Err(Fault::IllegalInstruction { pc: reg.pc }),
                };
                Ok(if taken {
                    Effect::Jump(Jump {
                        target: reg.pc.wrapping_add(imm as u64),
                    })
                } else {
                    Effect::None
                })
            }
            Self::U { opcode, imm, rd } => {
                match opcode {
                    0x17 => reg.set(rd, reg.pc.wrapping_add(imm as u64)),
                    0x37 => reg.set(rd, imm as u64),
                    _ => return Err(Fault::IllegalInstruction { pc: reg.pc }),
                }
                Ok(Effect::None)
            }
            Self::Uj { imm, rd } => {
                reg.set(rd, reg.pc.wrapping_add(4));
                Ok(Effect::Jump(Jump {
                    target: reg.pc.wrapping_add(imm as u64),
                }))
            }
            Self::IllegalFault | Self::MemoryFault => {
                Err(Fault::IllegalInstruction { pc: reg.pc })
            }
        }
    }

    /// Complete a memory access signalled by [`Inst::execute`]: loads
    /// land in rd with width and sign adjustment, stores write rs2.
    pub fn memory_finish(
        &self,
        reg: &mut Registers,
        mem: &mut Memory,
        req: &MemAccess,
    ) -> Result<(), Fault> {
        match (*self, req.dir) {
            (Self::I { rd, .. }, Dir::Read) => {
                let value = mem.load(req.addr, req.width, req.signed)?;
                reg.set(rd, value);
                Ok(())
            }
            (Self::S { rs2, .. }, Dir::Write) => mem.store(req.addr, req.width, reg.get(rs2)),
            _ => Err(Fault::IllegalInstruction { pc: reg.pc }),
        }
    }

    /// Commit the architectural side effect from the latched snapshot
    /// `src` into the committed register file `dest`.
    ///
    /// Poison halts the machine here: by write-back it is the oldest
    /// instruction in flight, so nothing younger has committed yet.
    pub fn write_back(&self, src: &Registers, dest: &mut Registers) -> Result<(), Fault> {
        match *self {
            Self::R { rd, .. } | Self::I { rd, .. } | Self::U { rd, .. } | Self::Uj { rd, .. } => {
                dest.set(rd, src.get(rd));
                Ok(())
            }
            Self::S { .. } | Self::Sb { .. } => Ok(()),
            Self::IllegalFault | Self::MemoryFault => Err(Fault::Halt),
        }
    }
}

/// Register-register dispatch on (opcode, funct3, funct7); `None` means
/// an unrecognized function combination.
fn r_op(opcode: u8, funct3: u8, funct7: u8, s1: u64, s2: u64) -> Option<u64> {
    Some(match (opcode, funct3, funct7) {
        (0x33, 0x00, 0x00) => s1.wrapping_add(s2),
        (0x33, 0x00, 0x01) => s1.wrapping_mul(s2),
        (0x33, 0x00, 0x20) => s1.wrapping_sub(s2),
        (0x33, 0x01, 0x00) => alu::sll(s1, s2),
        (0x33, 0x01, 0x01) => alu::mulh(s1, s2),
        (0x33, 0x02, 0x00) => u64::from((s1 as i64) < (s2 as i64)),
        (0x33, 0x02, 0x01) => alu::mulhsu(s1, s2),
        (0x33, 0x03, 0x00) => u64::from(s1 < s2),
        (0x33, 0x03, 0x01) => alu::mulhu(s1, s2),
        (0x33, 0x04, 0x00) => s1 ^ s2,
        (0x33, 0x04, 0x01) => alu::div(s1, s2),
        (0x33, 0x05, 0x00) => alu::srl(s1, s2),
        (0x33, 0x05, 0x01) => alu::divu(s1, s2),
        (0x33, 0x05, 0x20) => alu::sra(s1, s2),
        (0x33, 0x06, 0x00) => s1 | s2,
        (0x33, 0x06, 0x01) => alu::rem(s1, s2),
        (0x33, 0x07, 0x00) => s1 & s2,
        (0x33, 0x07, 0x01) => alu::remu(s1, s2),
        (0x3B, 0x00, 0x00) => alu::addw(s1, s2),
        (0x3B, 0x00, 0x01) => alu::mulw(s1, s2),
        (0x3B, 0x00, 0x20) => alu::subw(s1, s2),
        (0x3B, 0x01, 0x00) => alu::sllw(s1, s2),
        (0x3B, 0x04, 0x01) => alu::divw(s1, s2),
        (0x3B, 0x05, 0x00) => alu::srlw(s1, s2),
        (0x3B, 0x05, 0x01) => alu::divuw(s1, s2),
        (0x3B, 0x05, 0x20) => alu::sraw(s1, s2),
        (0x3B, 0x06, 0x01) => alu::remw(s1, s2),
        (0x3B, 0x07, 0x01) => alu::remuw(s1, s2),
        _ => return None,
    })
}

fn execute_i(
    reg: &mut Registers,
    opcode: u8,
    funct3: u8,
    funct7: Option<u8>,
    imm: i64,
    rs1: u8,
    rd: u8,
) -> Result<Effect, Fault> {
    // shift-immediate group, re-parsed at decode
    if let Some(f7) = funct7 {
        let s = reg.get(rs1);
        let sh = imm as u64;
        let value = match (opcode, funct3, f7) {
            (0x13, 0x01, 0x00) => alu::sll(s, sh),
            (0x13, 0x05, 0x00) => alu::srl(s, sh),
            (0x13, 0x05, 0x20) => alu::sra(s, sh),
            (0x1B, 0x01, 0x00) => alu::sllw(s, sh),
            (0x1B, 0x05, 0x00) => alu::srlw(s, sh),
            (0x1B, 0x05, 0x20) => alu::sraw(s, sh),
            _ => return Err(Fault::IllegalInstruction { pc: reg.pc }),
        };
        reg.set(rd, value);
        return Ok(Effect::None);
    }
    if opcode == 0x03 {
        let (width, signed) = match funct3 {
            0x00 => (Width::Byte, true),
            0x01 => (Width::Half, true),
            0x02 => (Width::Word, true),
            0x03 => (Width::Double, false),
            0x04 => (Width::Byte, false),
            0x05 => (Width::Half, false),
            0x06 => (Width::Word, false),
            _ => return Err(Fault::IllegalInstruction { pc: reg.pc }),
        };
        return Ok(Effect::Mem(MemAccess {
            addr: reg.get(rs1).wrapping_add(imm as u64),
            width,
            signed,
            dir: Dir::Read,
        }));
    }
    let s = reg.get_i(rs1);
    let value = match (opcode, funct3) {
        (0x13, 0x00) => s.wrapping_add(imm) as u64,
        (0x13, 0x02) => u64::from(s < imm),
        (0x13, 0x03) => u64::from((s as u64) < imm as u64),
        (0x13, 0x04) => (s ^ imm) as u64,
        (0x13, 0x06) => (s | imm) as u64,
        (0x13, 0x07) => (s & imm) as u64,
        (0x1B, 0x00) => alu::addw(s as u64, imm as u64),
        (0x67, 0x00) => {
            return Ok(Effect::Jump(Jump {
                target: (s as u64).wrapping_add(imm as u64),
            }));
        }
        (0x73, 0x00) => return Ok(Effect::Syscall),
        _ => return Err(Fault::IllegalInstruction { pc: reg.pc }),
    };
    reg.set(rd, value);
    Ok(Effect::None)
}

fn store_width(funct3: u8) -> Option<Width> {
    match funct3 {
        0x00 => Some(Width::Byte),
        0x01 => Some(Width::Half),
        0x02 => Some(Width::Word),
        0x03 => Some(Width::Double),
        _ => None,
    }
}
