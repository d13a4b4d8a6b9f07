use std::fmt;

use serde::{Deserialize, Serialize};

use crate::registers::{Flag, Register};

/// A serialisable snapshot of the core, indexed the same way as
/// [`Register`].
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct InternalState {
    pub registers: Vec<u32>,
    pub halted: bool,
    pub cycles: u64,

    // contents
    pub opcode: u8,
    pub instruction: String,
}

impl InternalState {
    pub fn get(&self, reg: Register) -> u32 {
        self.registers.get(reg.index()).copied().unwrap_or(0)
    }
}

impl fmt::Display for InternalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fv = self.get(Register::Flags) as u16;
        let bit = |flag: Flag| if fv & flag as u16 != 0 { "1" } else { "0" };
        let flags = format!(
            "O: {} D: {} I: {} S: {} Z: {} P: {} C: {}",
            bit(Flag::Overflow),
            bit(Flag::Direction),
            bit(Flag::Interrupt),
            bit(Flag::Sign),
            bit(Flag::Zero),
            bit(Flag::Parity),
            bit(Flag::Carry),
        );
        write!(
            f,
            "#{:05X} #{:02X} - AW: #{:04X} BW: #{:04X} CW: #{:04X} DW: #{:04X} SP: #{:04X} - {}{}",
            self.get(Register::Pc),
            self.opcode,
            self.get(Register::Aw),
            self.get(Register::Bw),
            self.get(Register::Cw),
            self.get(Register::Dw),
            self.get(Register::Sp),
            flags,
            if self.halted { " HALT" } else { "" }
        )
    }
}

pub trait ReportState {
    fn report_state(&mut self) -> anyhow::Result<InternalState>;
}
