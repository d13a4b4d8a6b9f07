use std::fmt;

use crate::bus::CpuBus;

const REG8: [&str; 8] = ["AL", "CL", "DL", "BL", "AH", "CH", "DH", "BH"];
const REG16: [&str; 8] = ["AX", "CX", "DX", "BX", "SP", "BP", "SI", "DI"];
const SREG: [&str; 4] = ["ES", "CS", "SS", "DS"];
const EA: [&str; 8] = [
    "BX+SI", "BX+DI", "BP+SI", "BP+DI", "SI", "DI", "BP", "BX",
];
const ALU: [&str; 8] = ["ADD", "OR", "ADC", "SBB", "AND", "SUB", "XOR", "CMP"];
const SHIFT: [&str; 8] = ["ROL", "ROR", "RCL", "RCR", "SHL", "SHR", "SHL", "SAR"];
const GROUP3: [&str; 8] = ["TEST", "???", "NOT", "NEG", "MUL", "IMUL", "DIV", "IDIV"];
const JCC: [&str; 16] = [
    "JO", "JNO", "JB", "JNB", "JZ", "JNZ", "JBE", "JA", "JS", "JNS", "JPE", "JPO", "JL", "JGE",
    "JLE", "JG",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Size {
    Byte,
    Word,
}

/// Reads instruction bytes without side effects.
struct Cursor<'a, B: CpuBus> {
    bus: &'a B,
    start: u32,
    bytes: Vec<u8>,
}

impl<'a, B: CpuBus> Cursor<'a, B> {
    fn byte(&mut self) -> u8 {
        let address = (self.start + self.bytes.len() as u32) & 0xF_FFFF;
        let value = self.bus.peek_byte(address);
        self.bytes.push(value);
        value
    }

    fn word(&mut self) -> u16 {
        let lo = self.byte() as u16;
        let hi = self.byte() as u16;
        (hi << 8) | lo
    }

    fn next_address(&self) -> u32 {
        self.start + self.bytes.len() as u32
    }

    fn rel8(&mut self) -> String {
        let disp = self.byte() as i8 as i32;
        format!("{:05X}", (self.next_address() as i32 + disp) as u32 & 0xF_FFFF)
    }

    fn rel16(&mut self) -> String {
        let disp = self.word() as i16 as i32;
        format!("{:05X}", (self.next_address() as i32 + disp) as u32 & 0xF_FFFF)
    }
}

/// A decoded r/m field.
struct Rm {
    reg: u8,
    register: Option<u8>,
    memory: String,
}

impl Rm {
    fn operand(&self, size: Size) -> String {
        match (self.register, size) {
            (Some(r), Size::Byte) => REG8[r as usize].to_string(),
            (Some(r), Size::Word) => REG16[r as usize].to_string(),
            (None, Size::Byte) => format!("BYTE {}", self.memory),
            (None, Size::Word) => format!("WORD {}", self.memory),
        }
    }

    fn reg(&self, size: Size) -> &'static str {
        match size {
            Size::Byte => REG8[self.reg as usize],
            Size::Word => REG16[self.reg as usize],
        }
    }
}

/// One disassembled V30MZ instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: u32,
    pub bytes: Vec<u8>,
    pub mnemonic: String,
}

impl Instruction {
    pub fn parse_at<B: CpuBus>(bus: &B, address: u32) -> Self {
        let mut cursor = Cursor {
            bus,
            start: address & 0xF_FFFF,
            bytes: Vec::new(),
        };
        let mnemonic = decode(&mut cursor);
        Instruction {
            address: cursor.start,
            bytes: cursor.bytes,
            mnemonic,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_hex_vector(&self) -> Vec<String> {
        self.bytes.iter().map(|b| format!("{:02X}", b)).collect()
    }

    pub fn opcode_with_args(&self) -> String {
        self.as_hex_vector().join(" ")
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:05X} {:<18} {}",
            self.address,
            self.opcode_with_args(),
            self.mnemonic
        )
    }
}

fn modrm<B: CpuBus>(cursor: &mut Cursor<B>, seg: Option<&str>) -> Rm {
    let byte = cursor.byte();
    let mode = byte >> 6;
    let reg = (byte >> 3) & 7;
    let rm = byte & 7;

    if mode == 3 {
        return Rm {
            reg,
            register: Some(rm),
            memory: String::new(),
        };
    }

    let prefix = seg.map(|s| format!("{}:", s)).unwrap_or_default();
    let memory = match mode {
        0 if rm == 6 => format!("{}[{:04X}]", prefix, cursor.word()),
        0 => format!("{}[{}]", prefix, EA[rm as usize]),
        1 => {
            let disp = cursor.byte() as i8;
            if disp < 0 {
                format!("{}[{}-{:02X}]", prefix, EA[rm as usize], -(disp as i16))
            } else {
                format!("{}[{}+{:02X}]", prefix, EA[rm as usize], disp)
            }
        }
        _ => format!("{}[{}+{:04X}]", prefix, EA[rm as usize], cursor.word()),
    };

    Rm {
        reg,
        register: None,
        memory,
    }
}

fn size_of(op: u8) -> Size {
    if op & 1 == 0 {
        Size::Byte
    } else {
        Size::Word
    }
}

fn decode<B: CpuBus>(cursor: &mut Cursor<B>) -> String {
    let mut prefixes = String::new();
    let mut seg: Option<&str> = None;

    let op = loop {
        let byte = cursor.byte();
        match byte {
            0x26 | 0x2E | 0x36 | 0x3E => seg = Some(SREG[((byte >> 3) & 3) as usize]),
            0xF0 => prefixes.push_str("LOCK "),
            0xF2 => prefixes.push_str("REPNE "),
            0xF3 => prefixes.push_str("REP "),
            _ => break byte,
        }
        if cursor.bytes.len() > 8 {
            return "???".to_string();
        }
    };

    let body = match op {
        0x00..=0x3F if op & 7 < 6 => {
            let name = ALU[(op >> 3) as usize];
            let size = size_of(op);
            match op & 7 {
                0 | 1 => {
                    let m = modrm(cursor, seg);
                    format!("{} {}, {}", name, m.operand(size), m.reg(size))
                }
                2 | 3 => {
                    let m = modrm(cursor, seg);
                    format!("{} {}, {}", name, m.reg(size), m.operand(size))
                }
                4 => format!("{} AL, {:02X}", name, cursor.byte()),
                _ => format!("{} AX, {:04X}", name, cursor.word()),
            }
        }
        0x06 | 0x0E | 0x16 | 0x1E => format!("PUSH {}", SREG[(op >> 3) as usize & 3]),
        0x07 | 0x17 | 0x1F => format!("POP {}", SREG[(op >> 3) as usize & 3]),
        0x27 => "DAA".to_string(),
        0x2F => "DAS".to_string(),
        0x37 => "AAA".to_string(),
        0x3F => "AAS".to_string(),
        0x40..=0x47 => format!("INC {}", REG16[(op & 7) as usize]),
        0x48..=0x4F => format!("DEC {}", REG16[(op & 7) as usize]),
        0x50..=0x57 => format!("PUSH {}", REG16[(op & 7) as usize]),
        0x58..=0x5F => format!("POP {}", REG16[(op & 7) as usize]),
        0x60 => "PUSHA".to_string(),
        0x61 => "POPA".to_string(),
        0x62 => {
            let m = modrm(cursor, seg);
            format!("BOUND {}, {}", m.reg(Size::Word), m.operand(Size::Word))
        }
        0x68 => format!("PUSH {:04X}", cursor.word()),
        0x69 => {
            let m = modrm(cursor, seg);
            let imm = cursor.word();
            format!("IMUL {}, {}, {:04X}", m.reg(Size::Word), m.operand(Size::Word), imm)
        }
        0x6A => format!("PUSH {:02X}", cursor.byte()),
        0x6B => {
            let m = modrm(cursor, seg);
            let imm = cursor.byte();
            format!("IMUL {}, {}, {:02X}", m.reg(Size::Word), m.operand(Size::Word), imm)
        }
        0x6C => "INSB".to_string(),
        0x6D => "INSW".to_string(),
        0x6E => "OUTSB".to_string(),
        0x6F => "OUTSW".to_string(),
        0x70..=0x7F => format!("{} {}", JCC[(op & 0x0F) as usize], cursor.rel8()),
        0x80..=0x83 => {
            let m = modrm(cursor, seg);
            let size = size_of(op);
            let imm = match op {
                0x81 => format!("{:04X}", cursor.word()),
                _ => format!("{:02X}", cursor.byte()),
            };
            format!("{} {}, {}", ALU[m.reg as usize], m.operand(size), imm)
        }
        0x84 | 0x85 => {
            let m = modrm(cursor, seg);
            format!("TEST {}, {}", m.operand(size_of(op)), m.reg(size_of(op)))
        }
        0x86 | 0x87 => {
            let m = modrm(cursor, seg);
            format!("XCHG {}, {}", m.reg(size_of(op)), m.operand(size_of(op)))
        }
        0x88 | 0x89 => {
            let m = modrm(cursor, seg);
            format!("MOV {}, {}", m.operand(size_of(op)), m.reg(size_of(op)))
        }
        0x8A | 0x8B => {
            let m = modrm(cursor, seg);
            format!("MOV {}, {}", m.reg(size_of(op)), m.operand(size_of(op)))
        }
        0x8C => {
            let m = modrm(cursor, seg);
            format!("MOV {}, {}", m.operand(Size::Word), SREG[(m.reg & 3) as usize])
        }
        0x8D => {
            let m = modrm(cursor, None);
            format!("LEA {}, {}", m.reg(Size::Word), m.memory)
        }
        0x8E => {
            let m = modrm(cursor, seg);
            format!("MOV {}, {}", SREG[(m.reg & 3) as usize], m.operand(Size::Word))
        }
        0x8F => {
            let m = modrm(cursor, seg);
            format!("POP {}", m.operand(Size::Word))
        }
        0x90 => "NOP".to_string(),
        0x91..=0x97 => format!("XCHG AX, {}", REG16[(op & 7) as usize]),
        0x98 => "CBW".to_string(),
        0x99 => "CWD".to_string(),
        0x9A => {
            let offset = cursor.word();
            let segment = cursor.word();
            format!("CALL {:04X}:{:04X}", segment, offset)
        }
        0x9B => "WAIT".to_string(),
        0x9C => "PUSHF".to_string(),
        0x9D => "POPF".to_string(),
        0x9E => "SAHF".to_string(),
        0x9F => "LAHF".to_string(),
        0xA0..=0xA3 => {
            let acc = if op & 1 == 0 { "AL" } else { "AX" };
            let mem = format!("{}[{:04X}]", seg.map(|s| format!("{}:", s)).unwrap_or_default(), cursor.word());
            if op < 0xA2 {
                format!("MOV {}, {}", acc, mem)
            } else {
                format!("MOV {}, {}", mem, acc)
            }
        }
        0xA4 => "MOVSB".to_string(),
        0xA5 => "MOVSW".to_string(),
        0xA6 => "CMPSB".to_string(),
        0xA7 => "CMPSW".to_string(),
        0xA8 => format!("TEST AL, {:02X}", cursor.byte()),
        0xA9 => format!("TEST AX, {:04X}", cursor.word()),
        0xAA => "STOSB".to_string(),
        0xAB => "STOSW".to_string(),
        0xAC => "LODSB".to_string(),
        0xAD => "LODSW".to_string(),
        0xAE => "SCASB".to_string(),
        0xAF => "SCASW".to_string(),
        0xB0..=0xB7 => format!("MOV {}, {:02X}", REG8[(op & 7) as usize], cursor.byte()),
        0xB8..=0xBF => format!("MOV {}, {:04X}", REG16[(op & 7) as usize], cursor.word()),
        0xC0 | 0xC1 | 0xD0..=0xD3 => {
            let m = modrm(cursor, seg);
            let count = match op {
                0xC0 | 0xC1 => format!("{:02X}", cursor.byte()),
                0xD0 | 0xD1 => "1".to_string(),
                _ => "CL".to_string(),
            };
            format!("{} {}, {}", SHIFT[m.reg as usize], m.operand(size_of(op)), count)
        }
        0xC2 => format!("RET {:04X}", cursor.word()),
        0xC3 => "RET".to_string(),
        0xC4 | 0xC5 => {
            let m = modrm(cursor, seg);
            let name = if op == 0xC4 { "LES" } else { "LDS" };
            format!("{} {}, {}", name, m.reg(Size::Word), m.memory)
        }
        0xC6 => {
            let m = modrm(cursor, seg);
            format!("MOV {}, {:02X}", m.operand(Size::Byte), cursor.byte())
        }
        0xC7 => {
            let m = modrm(cursor, seg);
            format!("MOV {}, {:04X}", m.operand(Size::Word), cursor.word())
        }
        0xC8 => {
            let size = cursor.word();
            let level = cursor.byte();
            format!("ENTER {:04X}, {:02X}", size, level)
        }
        0xC9 => "LEAVE".to_string(),
        0xCA => format!("RETF {:04X}", cursor.word()),
        0xCB => "RETF".to_string(),
        0xCC => "INT3".to_string(),
        0xCD => format!("INT {:02X}", cursor.byte()),
        0xCE => "INTO".to_string(),
        0xCF => "IRET".to_string(),
        0xD4 => format!("AAM {:02X}", cursor.byte()),
        0xD5 => format!("AAD {:02X}", cursor.byte()),
        0xD6 => "SALC".to_string(),
        0xD7 => "XLAT".to_string(),
        0xD8..=0xDF => {
            let m = modrm(cursor, seg);
            format!("ESC {}", m.operand(Size::Word))
        }
        0xE0 => format!("LOOPNE {}", cursor.rel8()),
        0xE1 => format!("LOOPE {}", cursor.rel8()),
        0xE2 => format!("LOOP {}", cursor.rel8()),
        0xE3 => format!("JCXZ {}", cursor.rel8()),
        0xE4 => format!("IN AL, {:02X}", cursor.byte()),
        0xE5 => format!("IN AX, {:02X}", cursor.byte()),
        0xE6 => format!("OUT {:02X}, AL", cursor.byte()),
        0xE7 => format!("OUT {:02X}, AX", cursor.byte()),
        0xE8 => format!("CALL {}", cursor.rel16()),
        0xE9 => format!("JMP {}", cursor.rel16()),
        0xEA => {
            let offset = cursor.word();
            let segment = cursor.word();
            format!("JMP {:04X}:{:04X}", segment, offset)
        }
        0xEB => format!("JMP {}", cursor.rel8()),
        0xEC => "IN AL, DX".to_string(),
        0xED => "IN AX, DX".to_string(),
        0xEE => "OUT DX, AL".to_string(),
        0xEF => "OUT DX, AX".to_string(),
        0xF4 => "HLT".to_string(),
        0xF5 => "CMC".to_string(),
        0xF6 | 0xF7 => {
            let m = modrm(cursor, seg);
            let size = size_of(op);
            match m.reg {
                0 => {
                    let imm = match size {
                        Size::Byte => format!("{:02X}", cursor.byte()),
                        Size::Word => format!("{:04X}", cursor.word()),
                    };
                    format!("TEST {}, {}", m.operand(size), imm)
                }
                r => format!("{} {}", GROUP3[r as usize], m.operand(size)),
            }
        }
        0xF8 => "CLC".to_string(),
        0xF9 => "STC".to_string(),
        0xFA => "CLI".to_string(),
        0xFB => "STI".to_string(),
        0xFC => "CLD".to_string(),
        0xFD => "STD".to_string(),
        0xFE => {
            let m = modrm(cursor, seg);
            match m.reg {
                0 => format!("INC {}", m.operand(Size::Byte)),
                1 => format!("DEC {}", m.operand(Size::Byte)),
                _ => "???".to_string(),
            }
        }
        0xFF => {
            let m = modrm(cursor, seg);
            match m.reg {
                0 => format!("INC {}", m.operand(Size::Word)),
                1 => format!("DEC {}", m.operand(Size::Word)),
                2 => format!("CALL {}", m.operand(Size::Word)),
                3 => format!("CALL FAR {}", m.memory),
                4 => format!("JMP {}", m.operand(Size::Word)),
                5 => format!("JMP FAR {}", m.memory),
                6 => format!("PUSH {}", m.operand(Size::Word)),
                _ => "???".to_string(),
            }
        }
        _ => format!("DB {:02X}", op),
    };

    format!("{}{}", prefixes, body)
}
