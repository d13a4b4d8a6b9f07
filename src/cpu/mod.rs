//! NEC V30MZ interpreter.
//!
//! The core fetches, decodes and executes one instruction at a time against
//! a [`CpuBus`]. Interrupts are sampled only at instruction boundaries, so a
//! REP string instruction always runs to completion before a request is seen.

pub mod alu;
mod execute;

use std::{cell::RefCell, fmt, rc::Rc};

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{
    bus::CpuBus,
    instruction::Instruction,
    interrupt::InterruptController,
    registers::{
        physical, Flag, Register, RegisterFile, Segment, BP, BW, IX, IY, PENDING_IRQ, PENDING_NMI,
        SP,
    },
};

/// Cycles charged for accepting a hardware interrupt or NMI.
pub const INTERRUPT_CYCLES: u32 = 32;
/// Cycles charged for an illegal opcode under [`IllegalOpcodePolicy::Nop`].
pub const ILLEGAL_OPCODE_CYCLES: u32 = 10;
/// Longest run of prefix bytes decoded as part of one instruction.
pub const MAX_PREFIXES: u32 = 15;

pub const VECTOR_DIVIDE: u8 = 0;
pub const VECTOR_TRAP: u8 = 1;
pub const VECTOR_BREAKPOINT: u8 = 3;
pub const VECTOR_OVERFLOW: u8 = 4;
pub const VECTOR_BOUND: u8 = 5;

/// What the core does with an opcode it does not implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IllegalOpcodePolicy {
    /// Log it and carry on as a 10 cycle no-op.
    #[default]
    Nop,
    /// Raise the given vector with IP past the opcode.
    Trap(u8),
}

/// Returned by the instruction hook to keep running or stop before the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    Break,
}

pub type InstructionHook = Box<dyn FnMut(u32) -> HookAction>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RepPrefix {
    /// F3: REP, or REPE/REPZ in front of CMPS/SCAS.
    Repe,
    /// F2: REPNE/REPNZ.
    Repne,
}

/// A decoded r/m operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operand {
    Reg(u8),
    Mem { seg: Segment, offset: u16 },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ModRm {
    pub reg: u8,
    pub rm: Operand,
}

impl ModRm {
    pub fn is_mem(&self) -> bool {
        matches!(self.rm, Operand::Mem { .. })
    }
}

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct V30mz<B: CpuBus> {
    pub regs: RegisterFile,
    #[derivative(Debug = "ignore")]
    bus: B,
    #[derivative(Debug = "ignore")]
    interrupts: Rc<RefCell<InterruptController>>,
    halted: bool,
    /// Set by STI, POP SS and MOV SS so the next instruction runs before any
    /// maskable interrupt is taken.
    irq_shadow: bool,
    policy: IllegalOpcodePolicy,
    #[derivative(Debug = "ignore")]
    hook: Option<InstructionHook>,
    total_cycles: u64,
    seg_override: Option<Segment>,
    rep: Option<RepPrefix>,
}

impl<B: CpuBus> V30mz<B> {
    pub fn new(bus: B, interrupts: Rc<RefCell<InterruptController>>) -> Self {
        Self {
            regs: RegisterFile::new(),
            bus,
            interrupts,
            halted: false,
            irq_shadow: false,
            policy: IllegalOpcodePolicy::default(),
            hook: None,
            total_cycles: 0,
            seg_override: None,
            rep: None,
        }
    }

    pub fn with_policy(mut self, policy: IllegalOpcodePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_policy(&mut self, policy: IllegalOpcodePolicy) {
        self.policy = policy;
    }

    pub fn policy(&self) -> IllegalOpcodePolicy {
        self.policy
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn interrupts(&self) -> &Rc<RefCell<InterruptController>> {
        &self.interrupts
    }

    /// Back to the power-on state: PS:IP = FFFF:0000, flags F002, not halted.
    /// Also clears every interrupt latch.
    pub fn reset(&mut self) {
        tracing::debug!("[CPU] Reset");
        self.regs = RegisterFile::new();
        self.halted = false;
        self.irq_shadow = false;
        self.seg_override = None;
        self.rep = None;
        self.total_cycles = 0;
        self.interrupts.borrow_mut().reset();
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn register(&self, reg: Register) -> u32 {
        self.regs.get(reg)
    }

    pub fn set_register(&mut self, reg: Register, value: u32) {
        self.regs.set(reg, value);
    }

    pub fn pc(&self) -> u32 {
        self.regs.pc()
    }

    /// Installs a callback that sees the physical PC before every instruction
    /// run by [`V30mz::execute`].
    pub fn set_instruction_hook<F>(&mut self, hook: F)
    where
        F: FnMut(u32) -> HookAction + 'static,
    {
        self.hook = Some(Box::new(hook));
    }

    pub fn clear_instruction_hook(&mut self) {
        self.hook = None;
    }

    /// Runs one instruction, or accepts one interrupt, and returns the cycles spent.
    ///
    /// A halted core with nothing to wake it reports a single idle cycle.
    /// The instruction hook is not consulted, so a debugger can step off a breakpoint.
    pub fn step(&mut self) -> u32 {
        let cycles = match self.service_interrupts() {
            Some(cycles) => cycles,
            None if self.halted => 1,
            None => self.execute_instruction(),
        };
        self.total_cycles += cycles as u64;
        cycles
    }

    /// Runs until at least `budget` cycles have been consumed, the core halts,
    /// or the hook asks to break. Returns the cycles consumed, which may exceed
    /// the budget by part of the last instruction.
    ///
    /// While halted the remainder of the budget is consumed.
    pub fn execute(&mut self, budget: u32) -> u32 {
        let mut consumed = 0u32;
        while consumed < budget {
            if let Some(cycles) = self.service_interrupts() {
                consumed += cycles;
                continue;
            }
            if self.halted {
                consumed = budget;
                break;
            }
            if let Some(hook) = self.hook.as_mut() {
                if hook(self.regs.pc()) == HookAction::Break {
                    tracing::debug!("[CPU] Hook break at {:05X}", self.regs.pc());
                    break;
                }
            }
            consumed += self.execute_instruction();
        }
        self.total_cycles += consumed as u64;
        consumed
    }

    /// Samples the interrupt controller and, if a request is accepted, enters it.
    fn service_interrupts(&mut self) -> Option<u32> {
        let (nmi, irq) = {
            let pic = self.interrupts.borrow();
            (pic.nmi_pending(), pic.irq_pending())
        };
        let mut pending = 0;
        if nmi {
            pending |= PENDING_NMI;
        }
        if irq {
            pending |= PENDING_IRQ;
        }
        self.regs.pending = pending;

        if nmi {
            let vector = self.interrupts.borrow_mut().take_nmi()?;
            self.enter_interrupt(vector);
            return Some(INTERRUPT_CYCLES);
        }

        if irq && self.regs.flag(Flag::Interrupt) && !self.irq_shadow {
            let vector = self.interrupts.borrow_mut().acknowledge()?;
            self.enter_interrupt(vector);
            return Some(INTERRUPT_CYCLES);
        }

        None
    }

    /// Pushes PSW, PS and IP, clears IE and BRK, and jumps through the vector table.
    pub(crate) fn enter_interrupt(&mut self, vector: u8) {
        let flags = self.regs.flags();
        self.push(flags);
        self.push(self.regs.segment(Segment::Cs));
        self.push(self.regs.ip);
        self.regs.set_flag(Flag::Interrupt, false);
        self.regs.set_flag(Flag::Trap, false);

        let table = vector as u32 * 4;
        let ip = self.bus.read_word(table);
        let cs = self.bus.read_word(table + 2);
        tracing::trace!(
            "[CPU] Interrupt {:02X} -> {:04X}:{:04X}",
            vector,
            cs,
            ip
        );
        self.regs.ip = ip;
        self.regs.set_segment(Segment::Cs, cs);
        self.regs.vector = vector;
        self.halted = false;
    }

    fn execute_instruction(&mut self) -> u32 {
        if tracing::enabled!(tracing::Level::TRACE) {
            let instruction = Instruction::parse_at(&self.bus, self.regs.pc());
            tracing::trace!("[CPU] {} {}", instruction, self.regs);
        }

        let trap = self.regs.flag(Flag::Trap);
        self.irq_shadow = false;
        self.seg_override = None;
        self.rep = None;

        let mut cycles = 0;
        let opcode = loop {
            let byte = self.fetch8();
            match byte {
                0x26 => self.seg_override = Some(Segment::Es),
                0x2E => self.seg_override = Some(Segment::Cs),
                0x36 => self.seg_override = Some(Segment::Ss),
                0x3E => self.seg_override = Some(Segment::Ds),
                0xF2 => self.rep = Some(RepPrefix::Repne),
                0xF3 => self.rep = Some(RepPrefix::Repe),
                0xF0 => {}
                _ => break Some(byte),
            }
            cycles += 1;
            if cycles == MAX_PREFIXES {
                break None;
            }
        };

        match opcode {
            Some(opcode) => cycles += self.execute_opcode(opcode),
            None => tracing::warn!(
                "[CPU] {} prefixes without an opcode, ending at {:04X}:{:04X}",
                MAX_PREFIXES,
                self.regs.segment(Segment::Cs),
                self.regs.ip
            ),
        }

        if trap && !self.halted {
            self.enter_interrupt(VECTOR_TRAP);
            cycles += INTERRUPT_CYCLES;
        }
        cycles
    }

    pub(crate) fn halt(&mut self) {
        tracing::debug!("[CPU] HALT at {:05X}", self.regs.pc());
        self.halted = true;
    }

    pub(crate) fn set_shadow(&mut self) {
        self.irq_shadow = true;
    }

    pub(crate) fn illegal(&mut self, opcode: u8) -> u32 {
        match self.policy {
            IllegalOpcodePolicy::Nop => {
                tracing::warn!(
                    "[CPU] Illegal opcode {:02X} at {:04X}:{:04X}",
                    opcode,
                    self.regs.segment(Segment::Cs),
                    self.regs.ip.wrapping_sub(1)
                );
                ILLEGAL_OPCODE_CYCLES
            }
            IllegalOpcodePolicy::Trap(vector) => {
                tracing::debug!("[CPU] Illegal opcode {:02X}, trapping to {:02X}", opcode, vector);
                self.enter_interrupt(vector);
                ILLEGAL_OPCODE_CYCLES
            }
        }
    }

    // Fetch

    pub(crate) fn fetch8(&mut self) -> u8 {
        let value = self
            .bus
            .read_byte(physical(self.regs.segment(Segment::Cs), self.regs.ip));
        self.regs.ip = self.regs.ip.wrapping_add(1);
        value
    }

    pub(crate) fn fetch16(&mut self) -> u16 {
        let lo = self.fetch8() as u16;
        let hi = self.fetch8() as u16;
        (hi << 8) | lo
    }

    /// Decodes a ModRM byte and any displacement that follows it.
    pub(crate) fn fetch_modrm(&mut self) -> ModRm {
        let byte = self.fetch8();
        let mode = byte >> 6;
        let reg = (byte >> 3) & 7;
        let rm = byte & 7;

        if mode == 3 {
            return ModRm {
                reg,
                rm: Operand::Reg(rm),
            };
        }

        let r = &self.regs;
        let (base, default_seg) = match rm {
            0 => (r.word(BW).wrapping_add(r.word(IX)), Segment::Ds),
            1 => (r.word(BW).wrapping_add(r.word(IY)), Segment::Ds),
            2 => (r.word(BP).wrapping_add(r.word(IX)), Segment::Ss),
            3 => (r.word(BP).wrapping_add(r.word(IY)), Segment::Ss),
            4 => (r.word(IX), Segment::Ds),
            5 => (r.word(IY), Segment::Ds),
            6 if mode == 0 => (0, Segment::Ds),
            6 => (r.word(BP), Segment::Ss),
            _ => (r.word(BW), Segment::Ds),
        };

        let disp = match mode {
            0 if rm == 6 => self.fetch16(),
            0 => 0,
            1 => self.fetch8() as i8 as u16,
            _ => self.fetch16(),
        };

        ModRm {
            reg,
            rm: Operand::Mem {
                seg: self.seg_override.unwrap_or(default_seg),
                offset: base.wrapping_add(disp),
            },
        }
    }

    /// Segment for a default-DS data access, honouring any override prefix.
    pub(crate) fn data_segment(&self) -> Segment {
        self.seg_override.unwrap_or(Segment::Ds)
    }

    pub(crate) fn rep_prefix(&self) -> Option<RepPrefix> {
        self.rep
    }

    // Memory

    pub(crate) fn read_mem8(&mut self, seg: Segment, offset: u16) -> u8 {
        self.bus.read_byte(physical(self.regs.segment(seg), offset))
    }

    pub(crate) fn write_mem8(&mut self, seg: Segment, offset: u16, value: u8) {
        self.bus
            .write_byte(physical(self.regs.segment(seg), offset), value);
    }

    /// Word reads wrap within the segment at offset FFFF.
    pub(crate) fn read_mem16(&mut self, seg: Segment, offset: u16) -> u16 {
        if offset == 0xFFFF {
            let lo = self.read_mem8(seg, offset) as u16;
            let hi = self.read_mem8(seg, 0) as u16;
            (hi << 8) | lo
        } else {
            self.bus.read_word(physical(self.regs.segment(seg), offset))
        }
    }

    pub(crate) fn write_mem16(&mut self, seg: Segment, offset: u16, value: u16) {
        if offset == 0xFFFF {
            self.write_mem8(seg, offset, value as u8);
            self.write_mem8(seg, 0, (value >> 8) as u8);
        } else {
            self.bus
                .write_word(physical(self.regs.segment(seg), offset), value);
        }
    }

    pub(crate) fn read_rm8(&mut self, rm: Operand) -> u8 {
        match rm {
            Operand::Reg(r) => self.regs.byte(r),
            Operand::Mem { seg, offset } => self.read_mem8(seg, offset),
        }
    }

    pub(crate) fn write_rm8(&mut self, rm: Operand, value: u8) {
        match rm {
            Operand::Reg(r) => self.regs.set_byte(r, value),
            Operand::Mem { seg, offset } => self.write_mem8(seg, offset, value),
        }
    }

    pub(crate) fn read_rm16(&mut self, rm: Operand) -> u16 {
        match rm {
            Operand::Reg(r) => self.regs.word(r),
            Operand::Mem { seg, offset } => self.read_mem16(seg, offset),
        }
    }

    pub(crate) fn write_rm16(&mut self, rm: Operand, value: u16) {
        match rm {
            Operand::Reg(r) => self.regs.set_word(r, value),
            Operand::Mem { seg, offset } => self.write_mem16(seg, offset, value),
        }
    }

    // Stack

    pub(crate) fn push(&mut self, value: u16) {
        let sp = self.regs.word(SP).wrapping_sub(2);
        self.regs.set_word(SP, sp);
        self.write_mem16(Segment::Ss, sp, value);
    }

    pub(crate) fn pop(&mut self) -> u16 {
        let sp = self.regs.word(SP);
        let value = self.read_mem16(Segment::Ss, sp);
        self.regs.set_word(SP, sp.wrapping_add(2));
        value
    }

    // I/O

    pub(crate) fn port_in8(&mut self, port: u16) -> u8 {
        self.bus.port_in(port)
    }

    pub(crate) fn port_in16(&mut self, port: u16) -> u16 {
        self.bus.port_in_word(port)
    }

    pub(crate) fn port_out8(&mut self, port: u16, value: u8) {
        self.bus.port_out(port, value);
    }

    pub(crate) fn port_out16(&mut self, port: u16, value: u16) {
        self.bus.port_out_word(port, value);
    }
}

impl<B: CpuBus> fmt::Display for V30mz<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.regs)?;
        if self.halted {
            write!(f, " HALT")?;
        }
        Ok(())
    }
}
