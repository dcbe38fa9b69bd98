//! Shared helpers: instruction encoders and program setup.
#![allow(dead_code)]

use cpu_rv64::Registers;
use emu_core::{perm, Memory};

/// Program pages are mapped here, one executable page.
pub const CODE_BASE: u64 = 0x1000;
/// One read-write page for loads and stores.
pub const DATA_BASE: u64 = 0x4000;

/// Map `words` at [`CODE_BASE`] (read+execute) and a zeroed read-write
/// page at [`DATA_BASE`].
pub fn program_memory(words: &[u32]) -> Memory {
    let mut mem = Memory::new();
    let mut page = Memory::zeroed_page();
    for (i, word) in words.iter().enumerate() {
        page[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    assert!(mem.map_page(CODE_BASE, perm::READ | perm::EXEC, page));
    assert!(mem.new_page(DATA_BASE, perm::READ | perm::WRITE));
    mem
}

/// Registers with pc at [`CODE_BASE`].
pub fn entry() -> Registers {
    let mut reg = Registers::new();
    reg.pc = CODE_BASE;
    reg
}

/// Address just past the last instruction, where tests set the ending
/// breakpoint.
pub fn end_of(words: &[u32]) -> u64 {
    CODE_BASE + 4 * words.len() as u64
}

// --- encoders -----------------------------------------------------------

pub fn r_type(opcode: u32, funct3: u32, funct7: u32, rd: u32, rs1: u32, rs2: u32) -> u32 {
    (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

pub fn i_type(opcode: u32, funct3: u32, rd: u32, rs1: u32, imm: i32) -> u32 {
    ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

pub fn s_type(funct3: u32, rs1: u32, rs2: u32, imm: i32) -> u32 {
    let imm = imm as u32 & 0xFFF;
    ((imm >> 5) << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | ((imm & 0x1F) << 7) | 0x23
}

pub fn sb_type(funct3: u32, rs1: u32, rs2: u32, offset: i32) -> u32 {
    let imm = offset as u32 & 0x1FFF;
    ((imm >> 12) << 31)
        | (((imm >> 5) & 0x3F) << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (funct3 << 12)
        | (((imm >> 1) & 0xF) << 8)
        | (((imm >> 11) & 1) << 7)
        | 0x63
}

pub fn u_type(opcode: u32, rd: u32, imm20: u32) -> u32 {
    (imm20 << 12) | (rd << 7) | opcode
}

pub fn uj_type(rd: u32, offset: i32) -> u32 {
    let imm = offset as u32 & 0x1F_FFFF;
    ((imm >> 20) << 31)
        | (((imm >> 1) & 0x3FF) << 21)
        | (((imm >> 11) & 1) << 20)
        | (((imm >> 12) & 0xFF) << 12)
        | (rd << 7)
        | 0x6F
}

// --- named forms --------------------------------------------------------

pub fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x33, 0x00, 0x00, rd, rs1, rs2)
}

pub fn sub(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x33, 0x00, 0x20, rd, rs1, rs2)
}

pub fn and(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x33, 0x07, 0x00, rd, rs1, rs2)
}

pub fn or(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x33, 0x06, 0x00, rd, rs1, rs2)
}

pub fn xor(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x33, 0x04, 0x00, rd, rs1, rs2)
}

pub fn slt(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x33, 0x02, 0x00, rd, rs1, rs2)
}

pub fn sltu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x33, 0x03, 0x00, rd, rs1, rs2)
}

pub fn mul(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x33, 0x00, 0x01, rd, rs1, rs2)
}

pub fn mulh(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x33, 0x01, 0x01, rd, rs1, rs2)
}

pub fn div(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x33, 0x04, 0x01, rd, rs1, rs2)
}

pub fn divu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x33, 0x05, 0x01, rd, rs1, rs2)
}

pub fn rem(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x33, 0x06, 0x01, rd, rs1, rs2)
}

pub fn remu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x33, 0x07, 0x01, rd, rs1, rs2)
}

pub fn addw(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x3B, 0x00, 0x00, rd, rs1, rs2)
}

pub fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(0x13, 0x00, rd, rs1, imm)
}

pub fn sltiu(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(0x13, 0x03, rd, rs1, imm)
}

pub fn andi(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(0x13, 0x07, rd, rs1, imm)
}

pub fn slli(rd: u32, rs1: u32, shamt: u32) -> u32 {
    i_type(0x13, 0x01, rd, rs1, shamt as i32)
}

pub fn srai(rd: u32, rs1: u32, shamt: u32) -> u32 {
    i_type(0x13, 0x05, rd, rs1, (0x400 | shamt) as i32)
}

pub fn addiw(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(0x1B, 0x00, rd, rs1, imm)
}

pub fn lb(rd: u32, offset: i32, rs1: u32) -> u32 {
    i_type(0x03, 0x00, rd, rs1, offset)
}

pub fn lhu(rd: u32, offset: i32, rs1: u32) -> u32 {
    i_type(0x03, 0x05, rd, rs1, offset)
}

pub fn lw(rd: u32, offset: i32, rs1: u32) -> u32 {
    i_type(0x03, 0x02, rd, rs1, offset)
}

pub fn ld(rd: u32, offset: i32, rs1: u32) -> u32 {
    i_type(0x03, 0x03, rd, rs1, offset)
}

pub fn sb(rs2: u32, offset: i32, rs1: u32) -> u32 {
    s_type(0x00, rs1, rs2, offset)
}

pub fn sh(rs2: u32, offset: i32, rs1: u32) -> u32 {
    s_type(0x01, rs1, rs2, offset)
}

pub fn sw(rs2: u32, offset: i32, rs1: u32) -> u32 {
    s_type(0x02, rs1, rs2, offset)
}

pub fn sd(rs2: u32, offset: i32, rs1: u32) -> u32 {
    s_type(0x03, rs1, rs2, offset)
}

pub fn beq(rs1: u32, rs2: u32, offset: i32) -> u32 {
    sb_type(0x00, rs1, rs2, offset)
}

pub fn bne(rs1: u32, rs2: u32, offset: i32) -> u32 {
    sb_type(0x01, rs1, rs2, offset)
}

pub fn blt(rs1: u32, rs2: u32, offset: i32) -> u32 {
    sb_type(0x04, rs1, rs2, offset)
}

pub fn lui(rd: u32, imm20: u32) -> u32 {
    u_type(0x37, rd, imm20)
}

pub fn auipc(rd: u32, imm20: u32) -> u32 {
    u_type(0x17, rd, imm20)
}

pub fn jal(rd: u32, offset: i32) -> u32 {
    uj_type(rd, offset)
}

pub fn jalr(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(0x67, 0x00, rd, rs1, imm)
}

pub fn ecall() -> u32 {
    0x73
}
