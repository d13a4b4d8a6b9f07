use super::{
    alu, ModRm, Operand, RepPrefix, V30mz, VECTOR_BOUND, VECTOR_BREAKPOINT, VECTOR_DIVIDE,
    VECTOR_OVERFLOW,
};
use crate::{
    address_space::Width,
    bus::CpuBus,
    registers::{Flag, Segment, AW, BP, BW, CW, DW, IX, IY, SP},
};

/// Byte register index of AH.
const AH: u8 = 4;

/// Register form cost versus memory form cost.
fn cost(m: &ModRm, reg: u32, mem: u32) -> u32 {
    if m.is_mem() {
        mem
    } else {
        reg
    }
}

impl<B: CpuBus> V30mz<B> {
    /// Executes an opcode whose prefixes have already been consumed and
    /// returns its cycle cost.
    pub(super) fn execute_opcode(&mut self, op: u8) -> u32 {
        match op {
            // ADD OR ADC SBB AND SUB XOR CMP
            0x00..=0x3F if op & 7 < 6 => self.alu_classic(op),

            // PUSH ES/CS/SS/DS
            0x06 | 0x0E | 0x16 | 0x1E => {
                let value = self.regs.segment(Segment::from_bits(op >> 3));
                self.push(value);
                2
            }
            // POP ES/SS/DS
            0x07 | 0x17 | 0x1F => {
                let seg = Segment::from_bits(op >> 3);
                let value = self.pop();
                self.regs.set_segment(seg, value);
                if seg == Segment::Ss {
                    self.set_shadow();
                }
                3
            }

            // DAA DAS AAA AAS
            0x27 => {
                let al = self.regs.byte(AW);
                let al = alu::daa(&mut self.regs, al);
                self.regs.set_byte(AW, al);
                10
            }
            0x2F => {
                let al = self.regs.byte(AW);
                let al = alu::das(&mut self.regs, al);
                self.regs.set_byte(AW, al);
                10
            }
            0x37 => {
                let aw = self.regs.word(AW);
                let aw = alu::aaa(&mut self.regs, aw);
                self.regs.set_word(AW, aw);
                9
            }
            0x3F => {
                let aw = self.regs.word(AW);
                let aw = alu::aas(&mut self.regs, aw);
                self.regs.set_word(AW, aw);
                9
            }

            // INC r16
            0x40..=0x47 => {
                let r = op & 7;
                let value = self.regs.word(r) as u32;
                let value = alu::inc(&mut self.regs, Width::Word, value);
                self.regs.set_word(r, value as u16);
                1
            }
            // DEC r16
            0x48..=0x4F => {
                let r = op & 7;
                let value = self.regs.word(r) as u32;
                let value = alu::dec(&mut self.regs, Width::Word, value);
                self.regs.set_word(r, value as u16);
                1
            }
            // PUSH r16; PUSH SP stores the decremented value
            0x50..=0x57 => {
                let r = op & 7;
                let value = if r == SP {
                    self.regs.word(SP).wrapping_sub(2)
                } else {
                    self.regs.word(r)
                };
                self.push(value);
                1
            }
            // POP r16
            0x58..=0x5F => {
                let value = self.pop();
                self.regs.set_word(op & 7, value);
                1
            }

            // PUSHA
            0x60 => {
                let sp = self.regs.word(SP);
                for r in [AW, CW, DW, BW] {
                    self.push(self.regs.word(r));
                }
                self.push(sp);
                for r in [BP, IX, IY] {
                    self.push(self.regs.word(r));
                }
                9
            }
            // POPA; the stored SP is discarded
            0x61 => {
                for r in [IY, IX, BP] {
                    let value = self.pop();
                    self.regs.set_word(r, value);
                }
                self.pop();
                for r in [BW, DW, CW, AW] {
                    let value = self.pop();
                    self.regs.set_word(r, value);
                }
                8
            }
            // BOUND r16, m16&16
            0x62 => {
                let m = self.fetch_modrm();
                let Operand::Mem { seg, offset } = m.rm else {
                    return self.illegal(op);
                };
                let index = self.regs.word(m.reg) as i16;
                let lower = self.read_mem16(seg, offset) as i16;
                let upper = self.read_mem16(seg, offset.wrapping_add(2)) as i16;
                if index < lower || index > upper {
                    self.enter_interrupt(VECTOR_BOUND);
                    return 20;
                }
                12
            }
            // PUSH imm16
            0x68 => {
                let value = self.fetch16();
                self.push(value);
                1
            }
            // IMUL r16, rm16, imm16
            0x69 => {
                let m = self.fetch_modrm();
                let a = self.read_rm16(m.rm);
                let b = self.fetch16();
                self.imul_immediate(m.reg, a, b);
                cost(&m, 3, 4)
            }
            // PUSH imm8 (sign-extended)
            0x6A => {
                let value = self.fetch8() as i8 as u16;
                self.push(value);
                1
            }
            // IMUL r16, rm16, imm8
            0x6B => {
                let m = self.fetch_modrm();
                let a = self.read_rm16(m.rm);
                let b = self.fetch8() as i8 as u16;
                self.imul_immediate(m.reg, a, b);
                cost(&m, 3, 4)
            }

            // Jcc rel8
            0x70..=0x7F => {
                let disp = self.fetch8() as i8 as u16;
                if self.condition(op & 0x0F) {
                    self.regs.ip = self.regs.ip.wrapping_add(disp);
                    4
                } else {
                    1
                }
            }

            // Group 1: ALU rm, imm
            0x80 | 0x82 => {
                let m = self.fetch_modrm();
                let a = self.read_rm8(m.rm) as u32;
                let b = self.fetch8() as u32;
                if let Some(result) = alu::binary(&mut self.regs, m.reg, Width::Byte, a, b) {
                    self.write_rm8(m.rm, result as u8);
                }
                cost(&m, 1, 3)
            }
            0x81 | 0x83 => {
                let m = self.fetch_modrm();
                let a = self.read_rm16(m.rm) as u32;
                let b = match op {
                    0x81 => self.fetch16() as u32,
                    _ => self.fetch8() as i8 as u16 as u32,
                };
                if let Some(result) = alu::binary(&mut self.regs, m.reg, Width::Word, a, b) {
                    self.write_rm16(m.rm, result as u16);
                }
                cost(&m, 1, 3)
            }

            // TEST rm, r
            0x84 => {
                let m = self.fetch_modrm();
                let a = self.read_rm8(m.rm) as u32;
                let b = self.regs.byte(m.reg) as u32;
                alu::test(&mut self.regs, Width::Byte, a, b);
                cost(&m, 1, 2)
            }
            0x85 => {
                let m = self.fetch_modrm();
                let a = self.read_rm16(m.rm) as u32;
                let b = self.regs.word(m.reg) as u32;
                alu::test(&mut self.regs, Width::Word, a, b);
                cost(&m, 1, 2)
            }
            // XCHG r, rm
            0x86 => {
                let m = self.fetch_modrm();
                let a = self.read_rm8(m.rm);
                self.write_rm8(m.rm, self.regs.byte(m.reg));
                self.regs.set_byte(m.reg, a);
                cost(&m, 3, 5)
            }
            0x87 => {
                let m = self.fetch_modrm();
                let a = self.read_rm16(m.rm);
                self.write_rm16(m.rm, self.regs.word(m.reg));
                self.regs.set_word(m.reg, a);
                cost(&m, 3, 5)
            }

            // MOV
            0x88 => {
                let m = self.fetch_modrm();
                self.write_rm8(m.rm, self.regs.byte(m.reg));
                1
            }
            0x89 => {
                let m = self.fetch_modrm();
                self.write_rm16(m.rm, self.regs.word(m.reg));
                1
            }
            0x8A => {
                let m = self.fetch_modrm();
                let value = self.read_rm8(m.rm);
                self.regs.set_byte(m.reg, value);
                1
            }
            0x8B => {
                let m = self.fetch_modrm();
                let value = self.read_rm16(m.rm);
                self.regs.set_word(m.reg, value);
                1
            }
            // MOV rm16, sreg
            0x8C => {
                let m = self.fetch_modrm();
                let value = self.regs.segment(Segment::from_bits(m.reg));
                self.write_rm16(m.rm, value);
                cost(&m, 1, 3)
            }
            // LEA
            0x8D => {
                let m = self.fetch_modrm();
                match m.rm {
                    Operand::Mem { offset, .. } => {
                        self.regs.set_word(m.reg, offset);
                        1
                    }
                    Operand::Reg(_) => self.illegal(op),
                }
            }
            // MOV sreg, rm16
            0x8E => {
                let m = self.fetch_modrm();
                let seg = Segment::from_bits(m.reg);
                let value = self.read_rm16(m.rm);
                self.regs.set_segment(seg, value);
                if seg == Segment::Ss {
                    self.set_shadow();
                }
                cost(&m, 2, 3)
            }
            // POP rm16
            0x8F => {
                let m = self.fetch_modrm();
                if m.reg != 0 {
                    return self.illegal(op);
                }
                let value = self.pop();
                self.write_rm16(m.rm, value);
                cost(&m, 1, 3)
            }

            // NOP
            0x90 => 1,
            // XCHG AW, r16
            0x91..=0x97 => {
                let r = op & 7;
                let aw = self.regs.word(AW);
                self.regs.set_word(AW, self.regs.word(r));
                self.regs.set_word(r, aw);
                3
            }
            // CBW
            0x98 => {
                let value = self.regs.byte(AW) as i8 as u16;
                self.regs.set_word(AW, value);
                1
            }
            // CWD
            0x99 => {
                let value = if self.regs.word(AW) & 0x8000 != 0 {
                    0xFFFF
                } else {
                    0
                };
                self.regs.set_word(DW, value);
                1
            }
            // CALL far
            0x9A => {
                let offset = self.fetch16();
                let seg = self.fetch16();
                self.push(self.regs.segment(Segment::Cs));
                self.push(self.regs.ip);
                self.regs.set_segment(Segment::Cs, seg);
                self.regs.ip = offset;
                10
            }
            // POLL (WAIT); no coprocessor
            0x9B => 1,
            // PUSHF
            0x9C => {
                self.push(self.regs.flags());
                2
            }
            // POPF
            0x9D => {
                let value = self.pop();
                self.regs.set_flags(value);
                3
            }
            // SAHF
            0x9E => {
                let value = (self.regs.flags() & 0xFF00) | self.regs.byte(AH) as u16;
                self.regs.set_flags(value);
                4
            }
            // LAHF
            0x9F => {
                self.regs.set_byte(AH, self.regs.flags() as u8);
                2
            }

            // MOV acc, [moffs] / MOV [moffs], acc
            0xA0 => {
                let offset = self.fetch16();
                let value = self.read_mem8(self.data_segment(), offset);
                self.regs.set_byte(AW, value);
                1
            }
            0xA1 => {
                let offset = self.fetch16();
                let value = self.read_mem16(self.data_segment(), offset);
                self.regs.set_word(AW, value);
                1
            }
            0xA2 => {
                let offset = self.fetch16();
                self.write_mem8(self.data_segment(), offset, self.regs.byte(AW));
                1
            }
            0xA3 => {
                let offset = self.fetch16();
                self.write_mem16(self.data_segment(), offset, self.regs.word(AW));
                1
            }

            // MOVS CMPS STOS LODS SCAS INS OUTS
            0xA4..=0xA7 | 0xAA..=0xAF | 0x6C..=0x6F => self.string_op(op),

            // TEST acc, imm
            0xA8 => {
                let imm = self.fetch8() as u32;
                let al = self.regs.byte(AW) as u32;
                alu::test(&mut self.regs, Width::Byte, al, imm);
                1
            }
            0xA9 => {
                let imm = self.fetch16() as u32;
                let aw = self.regs.word(AW) as u32;
                alu::test(&mut self.regs, Width::Word, aw, imm);
                1
            }

            // MOV r8, imm8
            0xB0..=0xB7 => {
                let value = self.fetch8();
                self.regs.set_byte(op & 7, value);
                1
            }
            // MOV r16, imm16
            0xB8..=0xBF => {
                let value = self.fetch16();
                self.regs.set_word(op & 7, value);
                1
            }

            // Group 2 by imm8
            0xC0 => {
                let m = self.fetch_modrm();
                let count = self.fetch8();
                self.shift8(m, count)
            }
            0xC1 => {
                let m = self.fetch_modrm();
                let count = self.fetch8();
                self.shift16(m, count)
            }
            // RET imm16
            0xC2 => {
                let release = self.fetch16();
                self.regs.ip = self.pop();
                let sp = self.regs.word(SP).wrapping_add(release);
                self.regs.set_word(SP, sp);
                6
            }
            // RET
            0xC3 => {
                self.regs.ip = self.pop();
                6
            }
            // LES / LDS
            0xC4 | 0xC5 => {
                let m = self.fetch_modrm();
                let Operand::Mem { seg, offset } = m.rm else {
                    return self.illegal(op);
                };
                let value = self.read_mem16(seg, offset);
                let segment = self.read_mem16(seg, offset.wrapping_add(2));
                self.regs.set_word(m.reg, value);
                let target = if op == 0xC4 { Segment::Es } else { Segment::Ds };
                self.regs.set_segment(target, segment);
                6
            }
            // MOV rm, imm
            0xC6 => {
                let m = self.fetch_modrm();
                if m.reg != 0 {
                    return self.illegal(op);
                }
                let value = self.fetch8();
                self.write_rm8(m.rm, value);
                1
            }
            0xC7 => {
                let m = self.fetch_modrm();
                if m.reg != 0 {
                    return self.illegal(op);
                }
                let value = self.fetch16();
                self.write_rm16(m.rm, value);
                1
            }
            // ENTER imm16, imm8
            0xC8 => {
                let size = self.fetch16();
                let level = self.fetch8() & 0x1F;
                self.push(self.regs.word(BP));
                let frame = self.regs.word(SP);
                if level > 0 {
                    for _ in 1..level {
                        let bp = self.regs.word(BP).wrapping_sub(2);
                        self.regs.set_word(BP, bp);
                        let value = self.read_mem16(Segment::Ss, bp);
                        self.push(value);
                    }
                    self.push(frame);
                }
                self.regs.set_word(BP, frame);
                let sp = self.regs.word(SP).wrapping_sub(size);
                self.regs.set_word(SP, sp);
                8 + 4 * level as u32
            }
            // LEAVE
            0xC9 => {
                self.regs.set_word(SP, self.regs.word(BP));
                let bp = self.pop();
                self.regs.set_word(BP, bp);
                2
            }
            // RETF imm16
            0xCA => {
                let release = self.fetch16();
                self.regs.ip = self.pop();
                let cs = self.pop();
                self.regs.set_segment(Segment::Cs, cs);
                let sp = self.regs.word(SP).wrapping_add(release);
                self.regs.set_word(SP, sp);
                9
            }
            // RETF
            0xCB => {
                self.regs.ip = self.pop();
                let cs = self.pop();
                self.regs.set_segment(Segment::Cs, cs);
                8
            }
            // INT3
            0xCC => {
                self.enter_interrupt(VECTOR_BREAKPOINT);
                9
            }
            // INT imm8
            0xCD => {
                let vector = self.fetch8();
                self.enter_interrupt(vector);
                10
            }
            // INTO
            0xCE => {
                if self.regs.flag(Flag::Overflow) {
                    self.enter_interrupt(VECTOR_OVERFLOW);
                    13
                } else {
                    6
                }
            }
            // IRET
            0xCF => {
                self.regs.ip = self.pop();
                let cs = self.pop();
                self.regs.set_segment(Segment::Cs, cs);
                let flags = self.pop();
                self.regs.set_flags(flags);
                10
            }

            // Group 2 by 1 and by CL
            0xD0 => {
                let m = self.fetch_modrm();
                self.shift8(m, 1)
            }
            0xD1 => {
                let m = self.fetch_modrm();
                self.shift16(m, 1)
            }
            0xD2 => {
                let m = self.fetch_modrm();
                self.shift8(m, self.regs.byte(CW))
            }
            0xD3 => {
                let m = self.fetch_modrm();
                self.shift16(m, self.regs.byte(CW))
            }
            // AAM imm8
            0xD4 => {
                let base = self.fetch8();
                if base == 0 {
                    self.enter_interrupt(VECTOR_DIVIDE);
                    return 17;
                }
                let al = self.regs.byte(AW);
                self.regs.set_byte(AH, al / base);
                self.regs.set_byte(AW, al % base);
                alu::set_szp(&mut self.regs, Width::Byte, (al % base) as u32);
                17
            }
            // AAD imm8
            0xD5 => {
                let base = self.fetch8();
                let al = self
                    .regs
                    .byte(AW)
                    .wrapping_add(self.regs.byte(AH).wrapping_mul(base));
                self.regs.set_word(AW, al as u16);
                alu::set_szp(&mut self.regs, Width::Byte, al as u32);
                6
            }
            // SALC
            0xD6 => {
                let value = if self.regs.flag(Flag::Carry) { 0xFF } else { 0x00 };
                self.regs.set_byte(AW, value);
                3
            }
            // XLAT
            0xD7 => {
                let offset = self.regs.word(BW).wrapping_add(self.regs.byte(AW) as u16);
                let value = self.read_mem8(self.data_segment(), offset);
                self.regs.set_byte(AW, value);
                5
            }
            // ESC: no coprocessor, the operand is decoded and ignored
            0xD8..=0xDF => {
                self.fetch_modrm();
                1
            }

            // LOOPNE LOOPE LOOP JCXZ
            0xE0..=0xE3 => {
                let disp = self.fetch8() as i8 as u16;
                let taken = if op == 0xE3 {
                    self.regs.word(CW) == 0
                } else {
                    let cw = self.regs.word(CW).wrapping_sub(1);
                    self.regs.set_word(CW, cw);
                    let zf = self.regs.flag(Flag::Zero);
                    cw != 0
                        && match op {
                            0xE0 => !zf,
                            0xE1 => zf,
                            _ => true,
                        }
                };
                if taken {
                    self.regs.ip = self.regs.ip.wrapping_add(disp);
                    6
                } else {
                    3
                }
            }
            // IN / OUT with an immediate port
            0xE4 => {
                let port = self.fetch8() as u16;
                let value = self.port_in8(port);
                self.regs.set_byte(AW, value);
                6
            }
            0xE5 => {
                let port = self.fetch8() as u16;
                let value = self.port_in16(port);
                self.regs.set_word(AW, value);
                6
            }
            0xE6 => {
                let port = self.fetch8() as u16;
                self.port_out8(port, self.regs.byte(AW));
                6
            }
            0xE7 => {
                let port = self.fetch8() as u16;
                self.port_out16(port, self.regs.word(AW));
                6
            }
            // CALL rel16
            0xE8 => {
                let disp = self.fetch16();
                self.push(self.regs.ip);
                self.regs.ip = self.regs.ip.wrapping_add(disp);
                5
            }
            // JMP rel16
            0xE9 => {
                let disp = self.fetch16();
                self.regs.ip = self.regs.ip.wrapping_add(disp);
                4
            }
            // JMP far
            0xEA => {
                let offset = self.fetch16();
                let seg = self.fetch16();
                self.regs.set_segment(Segment::Cs, seg);
                self.regs.ip = offset;
                7
            }
            // JMP rel8
            0xEB => {
                let disp = self.fetch8() as i8 as u16;
                self.regs.ip = self.regs.ip.wrapping_add(disp);
                4
            }
            // IN / OUT through DW
            0xEC => {
                let value = self.port_in8(self.regs.word(DW));
                self.regs.set_byte(AW, value);
                6
            }
            0xED => {
                let value = self.port_in16(self.regs.word(DW));
                self.regs.set_word(AW, value);
                6
            }
            0xEE => {
                self.port_out8(self.regs.word(DW), self.regs.byte(AW));
                6
            }
            0xEF => {
                self.port_out16(self.regs.word(DW), self.regs.word(AW));
                6
            }

            // HLT
            0xF4 => {
                self.halt();
                9
            }
            // CMC
            0xF5 => {
                let carry = self.regs.flag(Flag::Carry);
                self.regs.set_flag(Flag::Carry, !carry);
                4
            }
            // Group 3
            0xF6 => self.group3_byte(),
            0xF7 => self.group3_word(),
            // CLC STC CLI STI CLD STD
            0xF8 => self.set_flag_op(Flag::Carry, false),
            0xF9 => self.set_flag_op(Flag::Carry, true),
            0xFA => self.set_flag_op(Flag::Interrupt, false),
            0xFB => {
                self.set_shadow();
                self.set_flag_op(Flag::Interrupt, true)
            }
            0xFC => self.set_flag_op(Flag::Direction, false),
            0xFD => self.set_flag_op(Flag::Direction, true),
            // Group 4: INC/DEC rm8
            0xFE => {
                let m = self.fetch_modrm();
                let value = self.read_rm8(m.rm) as u32;
                let result = match m.reg {
                    0 => alu::inc(&mut self.regs, Width::Byte, value),
                    1 => alu::dec(&mut self.regs, Width::Byte, value),
                    _ => return self.illegal(op),
                };
                self.write_rm8(m.rm, result as u8);
                cost(&m, 1, 3)
            }
            // Group 5
            0xFF => self.group5(),

            // 0F, 63-67, F1 and the prefix bytes never reach here as prefixes
            _ => self.illegal(op),
        }
    }

    fn alu_classic(&mut self, op: u8) -> u32 {
        let alu_op = op >> 3;
        match op & 7 {
            // rm8, r8
            0 => {
                let m = self.fetch_modrm();
                let a = self.read_rm8(m.rm) as u32;
                let b = self.regs.byte(m.reg) as u32;
                if let Some(result) = alu::binary(&mut self.regs, alu_op, Width::Byte, a, b) {
                    self.write_rm8(m.rm, result as u8);
                }
                cost(&m, 1, 3)
            }
            // rm16, r16
            1 => {
                let m = self.fetch_modrm();
                let a = self.read_rm16(m.rm) as u32;
                let b = self.regs.word(m.reg) as u32;
                if let Some(result) = alu::binary(&mut self.regs, alu_op, Width::Word, a, b) {
                    self.write_rm16(m.rm, result as u16);
                }
                cost(&m, 1, 3)
            }
            // r8, rm8
            2 => {
                let m = self.fetch_modrm();
                let a = self.regs.byte(m.reg) as u32;
                let b = self.read_rm8(m.rm) as u32;
                if let Some(result) = alu::binary(&mut self.regs, alu_op, Width::Byte, a, b) {
                    self.regs.set_byte(m.reg, result as u8);
                }
                cost(&m, 1, 2)
            }
            // r16, rm16
            3 => {
                let m = self.fetch_modrm();
                let a = self.regs.word(m.reg) as u32;
                let b = self.read_rm16(m.rm) as u32;
                if let Some(result) = alu::binary(&mut self.regs, alu_op, Width::Word, a, b) {
                    self.regs.set_word(m.reg, result as u16);
                }
                cost(&m, 1, 2)
            }
            // AL, imm8
            4 => {
                let a = self.regs.byte(AW) as u32;
                let b = self.fetch8() as u32;
                if let Some(result) = alu::binary(&mut self.regs, alu_op, Width::Byte, a, b) {
                    self.regs.set_byte(AW, result as u8);
                }
                1
            }
            // AW, imm16
            _ => {
                let a = self.regs.word(AW) as u32;
                let b = self.fetch16() as u32;
                if let Some(result) = alu::binary(&mut self.regs, alu_op, Width::Word, a, b) {
                    self.regs.set_word(AW, result as u16);
                }
                1
            }
        }
    }

    fn condition(&self, cc: u8) -> bool {
        let r = &self.regs;
        let sign_ne_overflow = r.flag(Flag::Sign) != r.flag(Flag::Overflow);
        let result = match cc >> 1 {
            0 => r.flag(Flag::Overflow),
            1 => r.flag(Flag::Carry),
            2 => r.flag(Flag::Zero),
            3 => r.flag(Flag::Carry) || r.flag(Flag::Zero),
            4 => r.flag(Flag::Sign),
            5 => r.flag(Flag::Parity),
            6 => sign_ne_overflow,
            _ => r.flag(Flag::Zero) || sign_ne_overflow,
        };
        if cc & 1 != 0 {
            !result
        } else {
            result
        }
    }

    fn set_flag_op(&mut self, flag: Flag, on: bool) -> u32 {
        self.regs.set_flag(flag, on);
        4
    }

    fn shift8(&mut self, m: ModRm, count: u8) -> u32 {
        let value = self.read_rm8(m.rm) as u32;
        let result = alu::shift(&mut self.regs, m.reg, Width::Byte, value, count);
        self.write_rm8(m.rm, result as u8);
        cost(&m, 3, 5)
    }

    fn shift16(&mut self, m: ModRm, count: u8) -> u32 {
        let value = self.read_rm16(m.rm) as u32;
        let result = alu::shift(&mut self.regs, m.reg, Width::Word, value, count);
        self.write_rm16(m.rm, result as u16);
        cost(&m, 3, 5)
    }

    fn imul_immediate(&mut self, reg: u8, a: u16, b: u16) {
        let product = a as i16 as i32 * b as i16 as i32;
        let overflow = product != product as i16 as i32;
        self.regs.set_word(reg, product as u16);
        self.regs.set_flag(Flag::Carry, overflow);
        self.regs.set_flag(Flag::Overflow, overflow);
    }

    fn set_multiply_flags(&mut self, overflow: bool) {
        self.regs.set_flag(Flag::Carry, overflow);
        self.regs.set_flag(Flag::Overflow, overflow);
    }

    /// Divide error: the saved IP already points past the instruction.
    fn divide_error(&mut self) -> u32 {
        tracing::debug!("[CPU] Divide error");
        self.enter_interrupt(VECTOR_DIVIDE);
        16
    }

    fn group3_byte(&mut self) -> u32 {
        let m = self.fetch_modrm();
        let value = self.read_rm8(m.rm);
        match m.reg {
            // TEST rm8, imm8
            0 => {
                let imm = self.fetch8() as u32;
                alu::test(&mut self.regs, Width::Byte, value as u32, imm);
                cost(&m, 1, 2)
            }
            // NOT
            2 => {
                self.write_rm8(m.rm, !value);
                cost(&m, 1, 3)
            }
            // NEG
            3 => {
                let result = alu::neg(&mut self.regs, Width::Byte, value as u32);
                self.write_rm8(m.rm, result as u8);
                cost(&m, 1, 3)
            }
            // MUL
            4 => {
                let product = self.regs.byte(AW) as u16 * value as u16;
                self.regs.set_word(AW, product);
                self.set_multiply_flags(product & 0xFF00 != 0);
                cost(&m, 3, 4)
            }
            // IMUL
            5 => {
                let product = self.regs.byte(AW) as i8 as i16 * value as i8 as i16;
                self.regs.set_word(AW, product as u16);
                self.set_multiply_flags(product != product as i8 as i16);
                cost(&m, 3, 4)
            }
            // DIV
            6 => {
                if value == 0 {
                    return self.divide_error();
                }
                let dividend = self.regs.word(AW);
                let quotient = dividend / value as u16;
                if quotient > 0xFF {
                    return self.divide_error();
                }
                self.regs.set_byte(AW, quotient as u8);
                self.regs.set_byte(AH, (dividend % value as u16) as u8);
                cost(&m, 15, 16)
            }
            // IDIV
            7 => {
                let divisor = value as i8 as i32;
                if divisor == 0 {
                    return self.divide_error();
                }
                let dividend = self.regs.word(AW) as i16 as i32;
                let quotient = dividend / divisor;
                if !(-128..=127).contains(&quotient) {
                    return self.divide_error();
                }
                self.regs.set_byte(AW, quotient as u8);
                self.regs.set_byte(AH, (dividend % divisor) as u8);
                cost(&m, 17, 18)
            }
            _ => self.illegal(0xF6),
        }
    }

    fn group3_word(&mut self) -> u32 {
        let m = self.fetch_modrm();
        let value = self.read_rm16(m.rm);
        match m.reg {
            // TEST rm16, imm16
            0 => {
                let imm = self.fetch16() as u32;
                alu::test(&mut self.regs, Width::Word, value as u32, imm);
                cost(&m, 1, 2)
            }
            // NOT
            2 => {
                self.write_rm16(m.rm, !value);
                cost(&m, 1, 3)
            }
            // NEG
            3 => {
                let result = alu::neg(&mut self.regs, Width::Word, value as u32);
                self.write_rm16(m.rm, result as u16);
                cost(&m, 1, 3)
            }
            // MUL
            4 => {
                let product = self.regs.word(AW) as u32 * value as u32;
                self.regs.set_word(AW, product as u16);
                self.regs.set_word(DW, (product >> 16) as u16);
                self.set_multiply_flags(product >> 16 != 0);
                cost(&m, 3, 4)
            }
            // IMUL
            5 => {
                let product = self.regs.word(AW) as i16 as i32 * value as i16 as i32;
                self.regs.set_word(AW, product as u16);
                self.regs.set_word(DW, (product >> 16) as u16);
                self.set_multiply_flags(product != product as i16 as i32);
                cost(&m, 3, 4)
            }
            // DIV
            6 => {
                if value == 0 {
                    return self.divide_error();
                }
                let dividend = ((self.regs.word(DW) as u32) << 16) | self.regs.word(AW) as u32;
                let quotient = dividend / value as u32;
                if quotient > 0xFFFF {
                    return self.divide_error();
                }
                self.regs.set_word(AW, quotient as u16);
                self.regs.set_word(DW, (dividend % value as u32) as u16);
                cost(&m, 23, 24)
            }
            // IDIV
            7 => {
                let divisor = value as i16 as i64;
                if divisor == 0 {
                    return self.divide_error();
                }
                let dividend =
                    (((self.regs.word(DW) as u32) << 16) | self.regs.word(AW) as u32) as i32 as i64;
                let quotient = dividend / divisor;
                if !(-32768..=32767).contains(&quotient) {
                    return self.divide_error();
                }
                self.regs.set_word(AW, quotient as u16);
                self.regs.set_word(DW, (dividend % divisor) as u16);
                cost(&m, 24, 25)
            }
            _ => self.illegal(0xF7),
        }
    }

    fn group5(&mut self) -> u32 {
        let m = self.fetch_modrm();
        match m.reg {
            // INC rm16
            0 => {
                let value = self.read_rm16(m.rm) as u32;
                let result = alu::inc(&mut self.regs, Width::Word, value);
                self.write_rm16(m.rm, result as u16);
                cost(&m, 1, 3)
            }
            // DEC rm16
            1 => {
                let value = self.read_rm16(m.rm) as u32;
                let result = alu::dec(&mut self.regs, Width::Word, value);
                self.write_rm16(m.rm, result as u16);
                cost(&m, 1, 3)
            }
            // CALL near rm16
            2 => {
                let target = self.read_rm16(m.rm);
                self.push(self.regs.ip);
                self.regs.ip = target;
                cost(&m, 5, 6)
            }
            // CALL far m16:16
            3 => {
                let Operand::Mem { seg, offset } = m.rm else {
                    return self.illegal(0xFF);
                };
                let ip = self.read_mem16(seg, offset);
                let cs = self.read_mem16(seg, offset.wrapping_add(2));
                self.push(self.regs.segment(Segment::Cs));
                self.push(self.regs.ip);
                self.regs.set_segment(Segment::Cs, cs);
                self.regs.ip = ip;
                12
            }
            // JMP near rm16
            4 => {
                self.regs.ip = self.read_rm16(m.rm);
                cost(&m, 4, 5)
            }
            // JMP far m16:16
            5 => {
                let Operand::Mem { seg, offset } = m.rm else {
                    return self.illegal(0xFF);
                };
                let ip = self.read_mem16(seg, offset);
                let cs = self.read_mem16(seg, offset.wrapping_add(2));
                self.regs.set_segment(Segment::Cs, cs);
                self.regs.ip = ip;
                9
            }
            // PUSH rm16
            6 => {
                let value = self.read_rm16(m.rm);
                self.push(value);
                cost(&m, 1, 2)
            }
            _ => self.illegal(0xFF),
        }
    }

    fn read_sized(&mut self, seg: Segment, offset: u16, width: Width) -> u32 {
        match width {
            Width::Byte => self.read_mem8(seg, offset) as u32,
            _ => self.read_mem16(seg, offset) as u32,
        }
    }

    fn write_sized(&mut self, seg: Segment, offset: u16, width: Width, value: u32) {
        match width {
            Width::Byte => self.write_mem8(seg, offset, value as u8),
            _ => self.write_mem16(seg, offset, value as u16),
        }
    }

    fn accumulator(&self, width: Width) -> u32 {
        match width {
            Width::Byte => self.regs.byte(AW) as u32,
            _ => self.regs.word(AW) as u32,
        }
    }

    fn set_accumulator(&mut self, width: Width, value: u32) {
        match width {
            Width::Byte => self.regs.set_byte(AW, value as u8),
            _ => self.regs.set_word(AW, value as u16),
        }
    }

    fn advance(&mut self, reg: u8, delta: u16) {
        let value = self.regs.word(reg).wrapping_add(delta);
        self.regs.set_word(reg, value);
    }

    /// String instructions. With a REP prefix the whole repeat runs here,
    /// before the next interrupt check.
    fn string_op(&mut self, op: u8) -> u32 {
        let width = if op & 1 == 0 { Width::Byte } else { Width::Word };
        let step = width.bytes() as u16;
        let delta = if self.regs.flag(Flag::Direction) {
            step.wrapping_neg()
        } else {
            step
        };
        let per_iteration = match op {
            0xA4 | 0xA5 => 5,
            0xA6 | 0xA7 => 6,
            0xAA | 0xAB | 0xAC | 0xAD => 3,
            0xAE | 0xAF => 4,
            _ => 6,
        };
        let compares = matches!(op, 0xA6 | 0xA7 | 0xAE | 0xAF);

        let Some(rep) = self.rep_prefix() else {
            self.string_once(op, width, delta);
            return per_iteration;
        };

        let mut cycles = 5;
        while self.regs.word(CW) != 0 {
            self.string_once(op, width, delta);
            cycles += per_iteration;
            let cw = self.regs.word(CW).wrapping_sub(1);
            self.regs.set_word(CW, cw);
            if compares {
                let zf = self.regs.flag(Flag::Zero);
                if (rep == RepPrefix::Repe && !zf) || (rep == RepPrefix::Repne && zf) {
                    break;
                }
            }
        }
        cycles
    }

    fn string_once(&mut self, op: u8, width: Width, delta: u16) {
        let src = self.data_segment();
        let si = self.regs.word(IX);
        let di = self.regs.word(IY);
        match op {
            // MOVS
            0xA4 | 0xA5 => {
                let value = self.read_sized(src, si, width);
                self.write_sized(Segment::Es, di, width, value);
                self.advance(IX, delta);
                self.advance(IY, delta);
            }
            // CMPS
            0xA6 | 0xA7 => {
                let a = self.read_sized(src, si, width);
                let b = self.read_sized(Segment::Es, di, width);
                alu::sub(&mut self.regs, width, a, b, false);
                self.advance(IX, delta);
                self.advance(IY, delta);
            }
            // STOS
            0xAA | 0xAB => {
                let value = self.accumulator(width);
                self.write_sized(Segment::Es, di, width, value);
                self.advance(IY, delta);
            }
            // LODS
            0xAC | 0xAD => {
                let value = self.read_sized(src, si, width);
                self.set_accumulator(width, value);
                self.advance(IX, delta);
            }
            // SCAS
            0xAE | 0xAF => {
                let a = self.accumulator(width);
                let b = self.read_sized(Segment::Es, di, width);
                alu::sub(&mut self.regs, width, a, b, false);
                self.advance(IY, delta);
            }
            // INS
            0x6C | 0x6D => {
                let port = self.regs.word(DW);
                let value = match width {
                    Width::Byte => self.port_in8(port) as u32,
                    _ => self.port_in16(port) as u32,
                };
                self.write_sized(Segment::Es, di, width, value);
                self.advance(IY, delta);
            }
            // OUTS
            _ => {
                let port = self.regs.word(DW);
                let value = self.read_sized(src, si, width);
                match width {
                    Width::Byte => self.port_out8(port, value as u8),
                    _ => self.port_out16(port, value as u16),
                }
                self.advance(IX, delta);
            }
        }
    }
}
