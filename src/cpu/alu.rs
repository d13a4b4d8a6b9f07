//! Arithmetic and logic with V30MZ flag semantics.
//!
//! Every helper works on values already masked to the operand width and
//! writes the status flags straight into the register file.

use crate::{
    address_space::Width,
    registers::{Flag, RegisterFile},
};

fn sign_bit(width: Width) -> u32 {
    (width.mask() >> 1) + 1
}

fn parity(value: u32) -> bool {
    (value as u8).count_ones() % 2 == 0
}

/// Sets ZF, SF and PF from a result.
pub fn set_szp(regs: &mut RegisterFile, width: Width, result: u32) {
    let result = result & width.mask();
    regs.set_flag(Flag::Zero, result == 0);
    regs.set_flag(Flag::Sign, result & sign_bit(width) != 0);
    regs.set_flag(Flag::Parity, parity(result));
}

pub fn add(regs: &mut RegisterFile, width: Width, a: u32, b: u32, carry: bool) -> u32 {
    let raw = a + b + carry as u32;
    let result = raw & width.mask();
    regs.set_flag(Flag::Carry, raw > width.mask());
    regs.set_flag(Flag::Overflow, (a ^ result) & (b ^ result) & sign_bit(width) != 0);
    regs.set_flag(Flag::AuxCarry, (a ^ b ^ result) & 0x10 != 0);
    set_szp(regs, width, result);
    result
}

pub fn sub(regs: &mut RegisterFile, width: Width, a: u32, b: u32, borrow: bool) -> u32 {
    let result = a.wrapping_sub(b).wrapping_sub(borrow as u32) & width.mask();
    regs.set_flag(Flag::Carry, a < b + borrow as u32);
    regs.set_flag(Flag::Overflow, (a ^ b) & (a ^ result) & sign_bit(width) != 0);
    regs.set_flag(Flag::AuxCarry, (a ^ b ^ result) & 0x10 != 0);
    set_szp(regs, width, result);
    result
}

fn logic(regs: &mut RegisterFile, width: Width, result: u32) -> u32 {
    regs.set_flag(Flag::Carry, false);
    regs.set_flag(Flag::Overflow, false);
    regs.set_flag(Flag::AuxCarry, false);
    set_szp(regs, width, result);
    result & width.mask()
}

pub fn inc(regs: &mut RegisterFile, width: Width, value: u32) -> u32 {
    let carry = regs.flag(Flag::Carry);
    let result = add(regs, width, value, 1, false);
    regs.set_flag(Flag::Carry, carry);
    result
}

pub fn dec(regs: &mut RegisterFile, width: Width, value: u32) -> u32 {
    let carry = regs.flag(Flag::Carry);
    let result = sub(regs, width, value, 1, false);
    regs.set_flag(Flag::Carry, carry);
    result
}

pub fn neg(regs: &mut RegisterFile, width: Width, value: u32) -> u32 {
    sub(regs, width, 0, value, false)
}

/// The eight-way ALU selected by bits 3-5 of the classic opcodes and by the
/// reg field of the 80-83 group. Returns `None` for CMP, which only sets flags.
pub fn binary(regs: &mut RegisterFile, op: u8, width: Width, a: u32, b: u32) -> Option<u32> {
    let carry = regs.flag(Flag::Carry);
    match op & 7 {
        0 => Some(add(regs, width, a, b, false)),
        1 => Some(logic(regs, width, a | b)),
        2 => Some(add(regs, width, a, b, carry)),
        3 => Some(sub(regs, width, a, b, carry)),
        4 => Some(logic(regs, width, a & b)),
        5 => Some(sub(regs, width, a, b, false)),
        6 => Some(logic(regs, width, a ^ b)),
        _ => {
            sub(regs, width, a, b, false);
            None
        }
    }
}

pub fn test(regs: &mut RegisterFile, width: Width, a: u32, b: u32) {
    logic(regs, width, a & b);
}

/// Shift and rotate group (C0/C1/D0-D3). `op` is the ModRM reg field; /6 acts as SHL.
///
/// The count is masked to five bits. A zero count leaves operand and flags alone.
pub fn shift(regs: &mut RegisterFile, op: u8, width: Width, value: u32, count: u8) -> u32 {
    let count = count & 0x1F;
    if count == 0 {
        return value;
    }

    let mask = width.mask();
    let sign = sign_bit(width);
    let mut v = value & mask;
    let mut cf = regs.flag(Flag::Carry);

    match op & 7 {
        // ROL
        0 => {
            for _ in 0..count {
                cf = v & sign != 0;
                v = ((v << 1) | cf as u32) & mask;
            }
            regs.set_flag(Flag::Overflow, (v & sign != 0) != cf);
        }
        // ROR
        1 => {
            for _ in 0..count {
                cf = v & 1 != 0;
                v = (v >> 1) | if cf { sign } else { 0 };
            }
            regs.set_flag(Flag::Overflow, (v ^ (v << 1)) & sign != 0);
        }
        // RCL
        2 => {
            for _ in 0..count {
                let out = v & sign != 0;
                v = ((v << 1) | cf as u32) & mask;
                cf = out;
            }
            regs.set_flag(Flag::Overflow, (v & sign != 0) != cf);
        }
        // RCR
        3 => {
            for _ in 0..count {
                let out = v & 1 != 0;
                v = (v >> 1) | if cf { sign } else { 0 };
                cf = out;
            }
            regs.set_flag(Flag::Overflow, (v ^ (v << 1)) & sign != 0);
        }
        // SHL, SAL
        4 | 6 => {
            for _ in 0..count {
                cf = v & sign != 0;
                v = (v << 1) & mask;
            }
            regs.set_flag(Flag::Overflow, (v & sign != 0) != cf);
        }
        // SHR
        5 => {
            regs.set_flag(Flag::Overflow, v & sign != 0);
            for _ in 0..count {
                cf = v & 1 != 0;
                v >>= 1;
            }
        }
        // SAR
        _ => {
            for _ in 0..count {
                cf = v & 1 != 0;
                v = (v >> 1) | (v & sign);
            }
            regs.set_flag(Flag::Overflow, false);
        }
    }

    regs.set_flag(Flag::Carry, cf);
    if op & 7 >= 4 {
        regs.set_flag(Flag::AuxCarry, false);
        set_szp(regs, width, v);
    }
    v
}

pub fn daa(regs: &mut RegisterFile, al: u8) -> u8 {
    let old_cf = regs.flag(Flag::Carry);
    let mut result = al;
    let mut cf = false;
    if al & 0x0F > 9 || regs.flag(Flag::AuxCarry) {
        let (value, carry) = result.overflowing_add(6);
        result = value;
        cf = old_cf || carry;
        regs.set_flag(Flag::AuxCarry, true);
    } else {
        regs.set_flag(Flag::AuxCarry, false);
    }
    if al > 0x99 || old_cf {
        result = result.wrapping_add(0x60);
        cf = true;
    }
    regs.set_flag(Flag::Carry, cf);
    set_szp(regs, Width::Byte, result as u32);
    result
}

pub fn das(regs: &mut RegisterFile, al: u8) -> u8 {
    let old_cf = regs.flag(Flag::Carry);
    let mut result = al;
    let mut cf = false;
    if al & 0x0F > 9 || regs.flag(Flag::AuxCarry) {
        let (value, borrow) = result.overflowing_sub(6);
        result = value;
        cf = old_cf || borrow;
        regs.set_flag(Flag::AuxCarry, true);
    } else {
        regs.set_flag(Flag::AuxCarry, false);
    }
    if al > 0x99 || old_cf {
        result = result.wrapping_sub(0x60);
        cf = true;
    }
    regs.set_flag(Flag::Carry, cf);
    set_szp(regs, Width::Byte, result as u32);
    result
}

/// ASCII adjust after addition. Takes and returns AW.
pub fn aaa(regs: &mut RegisterFile, aw: u16) -> u16 {
    let (mut al, mut ah) = (aw as u8, (aw >> 8) as u8);
    let adjust = al & 0x0F > 9 || regs.flag(Flag::AuxCarry);
    if adjust {
        al = al.wrapping_add(6);
        ah = ah.wrapping_add(1);
    }
    regs.set_flag(Flag::AuxCarry, adjust);
    regs.set_flag(Flag::Carry, adjust);
    ((ah as u16) << 8) | (al & 0x0F) as u16
}

/// ASCII adjust after subtraction. Takes and returns AW.
pub fn aas(regs: &mut RegisterFile, aw: u16) -> u16 {
    let (mut al, mut ah) = (aw as u8, (aw >> 8) as u8);
    let adjust = al & 0x0F > 9 || regs.flag(Flag::AuxCarry);
    if adjust {
        al = al.wrapping_sub(6);
        ah = ah.wrapping_sub(1);
    }
    regs.set_flag(Flag::AuxCarry, adjust);
    regs.set_flag(Flag::Carry, adjust);
    ((ah as u16) << 8) | (al & 0x0F) as u16
}
