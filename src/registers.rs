use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable register indices shared by the debugger, the wasm wrapper and
/// register snapshots. The discriminants never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Register {
    Pc = 0,
    Ip,
    Aw,
    Cw,
    Dw,
    Bw,
    Sp,
    Bp,
    Ix,
    Iy,
    Flags,
    Es,
    Cs,
    Ss,
    Ds,
    Vector,
    Pending,
}

impl Register {
    pub const ALL: [Register; 17] = [
        Register::Pc,
        Register::Ip,
        Register::Aw,
        Register::Cw,
        Register::Dw,
        Register::Bw,
        Register::Sp,
        Register::Bp,
        Register::Ix,
        Register::Iy,
        Register::Flags,
        Register::Es,
        Register::Cs,
        Register::Ss,
        Register::Ds,
        Register::Vector,
        Register::Pending,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::Pc => "PC",
            Register::Ip => "IP",
            Register::Aw => "AW",
            Register::Cw => "CW",
            Register::Dw => "DW",
            Register::Bw => "BW",
            Register::Sp => "SP",
            Register::Bp => "BP",
            Register::Ix => "IX",
            Register::Iy => "IY",
            Register::Flags => "PSW",
            Register::Es => "DS1",
            Register::Cs => "PS",
            Register::Ss => "SS",
            Register::Ds => "DS0",
            Register::Vector => "VECTOR",
            Register::Pending => "PENDING",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Word register numbering as encoded in the ModRM reg/rm fields.
pub const AW: u8 = 0;
pub const CW: u8 = 1;
pub const DW: u8 = 2;
pub const BW: u8 = 3;
pub const SP: u8 = 4;
pub const BP: u8 = 5;
pub const IX: u8 = 6;
pub const IY: u8 = 7;

/// Segment registers in ModRM sreg order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    Es = 0,
    Cs = 1,
    Ss = 2,
    Ds = 3,
}

impl Segment {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Segment::Es,
            1 => Segment::Cs,
            2 => Segment::Ss,
            _ => Segment::Ds,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Segment::Es => "ES",
            Segment::Cs => "CS",
            Segment::Ss => "SS",
            Segment::Ds => "DS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Flag {
    Carry = 0x0001,
    Parity = 0x0004,
    AuxCarry = 0x0010,
    Zero = 0x0040,
    Sign = 0x0080,
    Trap = 0x0100,
    Interrupt = 0x0200,
    Direction = 0x0400,
    Overflow = 0x0800,
}

/// Bits that always read as one on the V30MZ.
pub const FLAGS_FIXED: u16 = 0xF002;
/// Bits software can change through POPF/IRET/SAHF.
pub const FLAGS_WRITABLE: u16 = 0x0FD5;

pub const PENDING_IRQ: u8 = 0x01;
pub const PENDING_NMI: u8 = 0x02;

/// The programmer-visible state of the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFile {
    pub ip: u16,
    words: [u16; 8],
    segments: [u16; 4],
    flags: u16,
    /// Vector number of the last interrupt or exception taken.
    pub vector: u8,
    /// PENDING_IRQ / PENDING_NMI as sampled at the last instruction boundary.
    pub pending: u8,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    /// Register contents after RESET: PS=FFFF, IP=0, everything else clear.
    pub fn new() -> Self {
        let mut segments = [0; 4];
        segments[Segment::Cs as usize] = 0xFFFF;
        Self {
            ip: 0,
            words: [0; 8],
            segments,
            flags: FLAGS_FIXED,
            vector: 0,
            pending: 0,
        }
    }

    pub fn word(&self, reg: u8) -> u16 {
        self.words[(reg & 7) as usize]
    }

    pub fn set_word(&mut self, reg: u8, value: u16) {
        self.words[(reg & 7) as usize] = value;
    }

    /// Byte registers: 0-3 are AL CL DL BL, 4-7 are AH CH DH BH.
    pub fn byte(&self, reg: u8) -> u8 {
        let word = self.words[(reg & 3) as usize];
        if reg & 4 == 0 {
            word as u8
        } else {
            (word >> 8) as u8
        }
    }

    pub fn set_byte(&mut self, reg: u8, value: u8) {
        let slot = &mut self.words[(reg & 3) as usize];
        if reg & 4 == 0 {
            *slot = (*slot & 0xFF00) | value as u16;
        } else {
            *slot = (*slot & 0x00FF) | ((value as u16) << 8);
        }
    }

    pub fn segment(&self, seg: Segment) -> u16 {
        self.segments[seg as usize]
    }

    pub fn set_segment(&mut self, seg: Segment, value: u16) {
        self.segments[seg as usize] = value;
    }

    pub fn flags(&self) -> u16 {
        (self.flags & FLAGS_WRITABLE) | FLAGS_FIXED
    }

    pub fn set_flags(&mut self, value: u16) {
        self.flags = (value & FLAGS_WRITABLE) | FLAGS_FIXED;
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.flags & flag as u16 != 0
    }

    pub fn set_flag(&mut self, flag: Flag, on: bool) {
        if on {
            self.flags |= flag as u16;
        } else {
            self.flags &= !(flag as u16);
        }
    }

    /// Physical address of the next instruction.
    pub fn pc(&self) -> u32 {
        physical(self.segment(Segment::Cs), self.ip)
    }

    /// Reads a register by stable index. Values narrower than 32 bits are zero-extended.
    pub fn get(&self, reg: Register) -> u32 {
        match reg {
            Register::Pc => self.pc(),
            Register::Ip => self.ip as u32,
            Register::Aw => self.word(AW) as u32,
            Register::Cw => self.word(CW) as u32,
            Register::Dw => self.word(DW) as u32,
            Register::Bw => self.word(BW) as u32,
            Register::Sp => self.word(SP) as u32,
            Register::Bp => self.word(BP) as u32,
            Register::Ix => self.word(IX) as u32,
            Register::Iy => self.word(IY) as u32,
            Register::Flags => self.flags() as u32,
            Register::Es => self.segment(Segment::Es) as u32,
            Register::Cs => self.segment(Segment::Cs) as u32,
            Register::Ss => self.segment(Segment::Ss) as u32,
            Register::Ds => self.segment(Segment::Ds) as u32,
            Register::Vector => self.vector as u32,
            Register::Pending => self.pending as u32,
        }
    }

    /// Writes a register by stable index. Values are truncated to the register width.
    ///
    /// Writing PC keeps the current code segment when the target lies within
    /// its 64 KiB window, otherwise it reloads PS so that IP holds the low nibble.
    pub fn set(&mut self, reg: Register, value: u32) {
        match reg {
            Register::Pc => {
                let value = value & 0xF_FFFF;
                let base = (self.segment(Segment::Cs) as u32) << 4;
                if value >= base && value - base < 0x1_0000 {
                    self.ip = (value - base) as u16;
                } else {
                    self.set_segment(Segment::Cs, (value >> 4) as u16);
                    self.ip = (value & 0x0F) as u16;
                }
            }
            Register::Ip => self.ip = value as u16,
            Register::Aw => self.set_word(AW, value as u16),
            Register::Cw => self.set_word(CW, value as u16),
            Register::Dw => self.set_word(DW, value as u16),
            Register::Bw => self.set_word(BW, value as u16),
            Register::Sp => self.set_word(SP, value as u16),
            Register::Bp => self.set_word(BP, value as u16),
            Register::Ix => self.set_word(IX, value as u16),
            Register::Iy => self.set_word(IY, value as u16),
            Register::Flags => self.set_flags(value as u16),
            Register::Es => self.set_segment(Segment::Es, value as u16),
            Register::Cs => self.set_segment(Segment::Cs, value as u16),
            Register::Ss => self.set_segment(Segment::Ss, value as u16),
            Register::Ds => self.set_segment(Segment::Ds, value as u16),
            Register::Vector => self.vector = value as u8,
            Register::Pending => self.pending = value as u8 & (PENDING_IRQ | PENDING_NMI),
        }
    }
}

pub fn physical(segment: u16, offset: u16) -> u32 {
    (((segment as u32) << 4) + offset as u32) & 0xF_FFFF
}

impl fmt::Display for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fv = self.flags();
        let bit = |flag: Flag, c: char| if fv & flag as u16 != 0 { c } else { '-' };
        write!(
            f,
            "{:04X}:{:04X} AW={:04X} BW={:04X} CW={:04X} DW={:04X} SP={:04X} BP={:04X} IX={:04X} IY={:04X} DS0={:04X} DS1={:04X} SS={:04X} {}{}{}{}{}{}{}{}{}",
            self.segment(Segment::Cs),
            self.ip,
            self.word(AW),
            self.word(BW),
            self.word(CW),
            self.word(DW),
            self.word(SP),
            self.word(BP),
            self.word(IX),
            self.word(IY),
            self.segment(Segment::Ds),
            self.segment(Segment::Es),
            self.segment(Segment::Ss),
            bit(Flag::Overflow, 'O'),
            bit(Flag::Direction, 'D'),
            bit(Flag::Interrupt, 'I'),
            bit(Flag::Trap, 'T'),
            bit(Flag::Sign, 'S'),
            bit(Flag::Zero, 'Z'),
            bit(Flag::AuxCarry, 'A'),
            bit(Flag::Parity, 'P'),
            bit(Flag::Carry, 'C'),
        )
    }
}
