use std::{cell::RefCell, fmt, path::Path, rc::Rc};

use crate::{
    address_space::{AddressSpace, DeviceRef, RegionDescriptor, RegionInfo, RegionKind},
    bus::Bus,
    clock::{Clock, ClockEvent, Tickable, Timing},
    config::{MachineConfig, RegisterOverride},
    cpu::{HookAction, IllegalOpcodePolicy, V30mz},
    error::{ConfigError, LoadError, MapError},
    instruction::Instruction,
    internal_state::{InternalState, ReportState},
    interrupt::{InterruptController, InterruptSource, IrqLine, LineId, Trigger},
    memory::BankedRom,
    quickload::{AtmHeader, Quickload},
    registers::Register,
    utils::hexdump,
};

pub type TickableRef = Rc<RefCell<dyn Tickable>>;

pub struct Machine {
    pub cpu: V30mz<Bus>,
    pub interrupts: Rc<RefCell<InterruptController>>,
    pub clock: Clock,
    tickables: Vec<TickableRef>,
    reset_overrides: Vec<RegisterOverride>,
    pub cycles: u64,
    pub frame_ready: bool,
}

impl Machine {
    fn new(
        cpu: V30mz<Bus>,
        interrupts: Rc<RefCell<InterruptController>>,
        clock: Clock,
        tickables: Vec<TickableRef>,
        reset_overrides: Vec<RegisterOverride>,
    ) -> Self {
        let mut machine = Self {
            cpu,
            interrupts,
            clock,
            tickables,
            reset_overrides,
            cycles: 0,
            frame_ready: false,
        };
        machine.reset();
        machine
    }

    pub fn cpu(&self) -> &V30mz<Bus> {
        &self.cpu
    }

    pub fn bus(&self) -> &Bus {
        self.cpu.bus()
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        self.cpu.bus_mut()
    }

    pub fn get_cycles(&self) -> u64 {
        self.cycles
    }

    pub fn pc(&self) -> u32 {
        self.cpu.pc()
    }

    pub fn halted(&self) -> bool {
        self.cpu.halted()
    }

    /// Power-on reset: devices, core, interrupt latches and clock, then the
    /// configured register overrides.
    pub fn reset(&mut self) {
        tracing::info!("[MACHINE] Reset");
        self.cpu.bus_mut().reset();
        self.cpu.reset();
        self.clock.reset();
        self.cycles = 0;
        self.frame_ready = false;
        for RegisterOverride { register, value } in &self.reset_overrides {
            self.cpu.set_register(*register, *value);
        }
    }

    /// Runs the core for `cycles` in clock slices, ticking devices after each
    /// slice. Returns the cycles actually consumed; less than asked only when
    /// the instruction hook breaks.
    pub fn execute(&mut self, cycles: u32) -> u32 {
        let mut consumed = 0u32;
        while consumed < cycles {
            let slice = self.clock.next_slice().min(cycles - consumed);
            let used = self.cpu.execute(slice);
            self.advance(used);
            consumed = consumed.saturating_add(used);
            if used < slice {
                break;
            }
        }
        consumed
    }

    /// Single instruction (or interrupt entry), bypassing the hook.
    pub fn step(&mut self) -> u32 {
        let cycles = self.cpu.step();
        self.advance(cycles);
        cycles
    }

    pub fn step_for(&mut self, cycles: usize) -> usize {
        let mut executed = 0usize;
        while executed < cycles {
            let budget = (cycles - executed).min(u32::MAX as usize) as u32;
            let used = self.execute(budget);
            executed += used as usize;
            if used < budget {
                break;
            }
        }
        executed
    }

    /// Runs to the end of the current frame.
    pub fn step_frame(&mut self) {
        self.frame_ready = false;
        while !self.frame_ready {
            let budget = self.clock.cycles_until_frame_end().min(u32::MAX as u64) as u32;
            if self.execute(budget) < budget {
                break;
            }
        }
    }

    pub fn is_frame_ready(&self) -> bool {
        self.frame_ready
    }

    pub fn get_frame_progress(&self) -> f64 {
        self.clock.frame_progress()
    }

    fn advance(&mut self, cycles: u32) {
        if cycles == 0 {
            return;
        }
        for device in &self.tickables {
            device.borrow_mut().tick(cycles);
        }
        self.cycles += cycles as u64;

        let events = self.clock.tick(cycles);
        if !events.is_empty() {
            self.handle_clock_events(events);
        }
    }

    fn handle_clock_events(&mut self, events: Vec<ClockEvent>) {
        for event in events {
            match event {
                ClockEvent::FrameEnd => {
                    self.frame_ready = true;
                    tracing::trace!(
                        "Frame {} completed, total cycles: {}",
                        self.clock.frame_count(),
                        self.clock.total_cycles()
                    );
                }
                ClockEvent::Scheduled(id) => {
                    tracing::trace!("[MACHINE] Scheduled event {} at {}", id, self.cycles);
                }
                ClockEvent::LineStart(_) => {}
            }
        }
    }

    pub fn schedule_in(&mut self, cycles: u32, id: u32) {
        self.clock.schedule_in(cycles, id);
    }

    pub fn set_irq_line(&mut self, line: LineId, state: bool) {
        self.interrupts.borrow_mut().assert_line(line, state);
    }

    pub fn acknowledge_interrupt(&mut self) -> Option<u8> {
        self.interrupts.borrow_mut().acknowledge()
    }

    pub fn register(&self, reg: Register) -> u32 {
        self.cpu.register(reg)
    }

    pub fn set_register(&mut self, reg: Register, value: u32) {
        self.cpu.set_register(reg, value);
    }

    pub fn register_by_index(&self, index: usize) -> Option<u32> {
        Register::from_index(index).map(|reg| self.cpu.register(reg))
    }

    pub fn set_register_by_index(&mut self, index: usize, value: u32) -> bool {
        match Register::from_index(index) {
            Some(reg) => {
                self.cpu.set_register(reg, value);
                true
            }
            None => false,
        }
    }

    pub fn set_instruction_hook<F>(&mut self, hook: F)
    where
        F: FnMut(u32) -> HookAction + 'static,
    {
        self.cpu.set_instruction_hook(hook);
    }

    pub fn clear_instruction_hook(&mut self) {
        self.cpu.clear_instruction_hook();
    }

    /// Copies a quickload image into memory and jumps to its entry point in
    /// segment 0. Nothing is written if the image is malformed or does not fit.
    pub fn load_quickload(&mut self, image: &[u8]) -> Result<AtmHeader, LoadError> {
        let quickload = Quickload::parse(image)?;
        let header = quickload.header;
        self.cpu
            .bus_mut()
            .program
            .load(header.start as u32, &quickload.data)?;

        self.cpu.set_register(Register::Cs, 0);
        self.cpu.set_register(Register::Ip, header.exec as u32);
        tracing::info!("[MACHINE] Quickloaded {}", header);
        Ok(header)
    }

    pub fn load(&mut self, address: u32, data: &[u8]) -> Result<(), LoadError> {
        self.cpu.bus_mut().program.load(address, data)
    }

    pub fn memory(&self, start: u32, len: usize) -> Vec<u8> {
        self.bus().program.peek_block(start, len)
    }

    pub fn memory_dump(&self, start: u32, end: u32) -> String {
        let len = end.saturating_sub(start) as usize + 1;
        hexdump(&self.memory(start, len), start)
    }

    pub fn region_data(&self, name: &str) -> Option<&[u8]> {
        self.bus().program.region_data(name)
    }

    pub fn region_data_mut(&mut self, name: &str) -> Option<&mut [u8]> {
        self.bus_mut().program.region_data_mut(name)
    }

    pub fn memory_map(&self) -> Vec<RegionInfo> {
        self.bus().memory_map()
    }

    pub fn io_map(&self) -> Vec<RegionInfo> {
        self.bus().io_map()
    }

    pub fn instruction_at(&self, address: u32) -> Instruction {
        Instruction::parse_at(self.bus(), address)
    }

    /// Disassembles `count` instructions starting at `start`.
    pub fn program(&self, start: u32, count: usize) -> Vec<ProgramEntry> {
        let pc = self.pc();
        let mut address = start & 0xF_FFFF;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let instruction = self.instruction_at(address);
            entries.push(ProgramEntry {
                address,
                instruction: instruction.mnemonic.clone(),
                data: instruction.opcode_with_args(),
                dump: (address == pc).then(|| "<- PC".to_string()),
            });
            address = (address + instruction.len().max(1) as u32) & 0xF_FFFF;
        }
        entries
    }
}

impl ReportState for Machine {
    fn report_state(&mut self) -> anyhow::Result<InternalState> {
        let instruction = self.instruction_at(self.pc());
        Ok(InternalState {
            registers: Register::ALL.iter().map(|r| self.register(*r)).collect(),
            halted: self.halted(),
            cycles: self.cycles,
            opcode: instruction.bytes.first().copied().unwrap_or(0xFF),
            instruction: instruction.mnemonic,
        })
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("cpu", &self.cpu)
            .field("cycles", &self.cycles)
            .field("frame_ready", &self.frame_ready)
            .finish()
    }
}

/// Assembles a machine: memory map, I/O map, interrupt sources and timed
/// devices.
pub struct MachineBuilder {
    interrupts: Rc<RefCell<InterruptController>>,
    program: Vec<RegionDescriptor>,
    io: Vec<RegionDescriptor>,
    tickables: Vec<TickableRef>,
    timing: Timing,
    slice_cycles: Option<u32>,
    policy: IllegalOpcodePolicy,
    fill: u8,
    reset_overrides: Vec<RegisterOverride>,
}

impl Default for MachineBuilder {
    fn default() -> Self {
        Self {
            interrupts: InterruptController::shared(),
            program: Vec::new(),
            io: Vec::new(),
            tickables: Vec::new(),
            timing: Timing::default(),
            slice_cycles: None,
            policy: IllegalOpcodePolicy::default(),
            fill: 0xFF,
            reset_overrides: Vec::new(),
        }
    }
}

impl MachineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MachineConfig) -> Result<Self, ConfigError> {
        let mut builder = Self::new();
        builder.apply_config(config, None)?;
        Ok(builder)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Self::from_config(&MachineConfig::from_json(json)?)
    }

    /// Reads a JSON description; ROM paths are resolved next to the file.
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = MachineConfig::from_json(&json)?;
        let mut builder = Self::new();
        builder.apply_config(&config, path.parent())?;
        Ok(builder)
    }

    pub fn apply_config(
        &mut self,
        config: &MachineConfig,
        base: Option<&Path>,
    ) -> Result<&mut Self, ConfigError> {
        tracing::info!("[MACHINE] Applying description '{}'", config.name);
        self.timing = config.timing;
        self.slice_cycles = config.slice_cycles;
        self.policy = config.illegal_opcode;
        self.fill = config.fill;
        for region in &config.program {
            self.program.push(region.descriptor(base)?);
        }
        for region in &config.io {
            self.io.push(region.descriptor(base)?);
        }
        self.reset_overrides.extend(config.reset.iter().copied());
        Ok(self)
    }

    pub fn ram(&mut self, name: &str, start: u32, end: u32) -> &mut Self {
        self.program.push(RegionDescriptor::ram(name, start, end));
        self
    }

    pub fn rom(&mut self, name: &str, start: u32, end: u32, image: &[u8]) -> &mut Self {
        self.program
            .push(RegionDescriptor::rom(name, start, end, image));
        self
    }

    pub fn nop(&mut self, name: &str, start: u32, end: u32) -> &mut Self {
        self.program
            .push(RegionDescriptor::new(name, start, end, RegionKind::Nop));
        self
    }

    pub fn banked(&mut self, name: &str, start: u32, rom: Rc<RefCell<BankedRom>>) -> &mut Self {
        let end = start + (rom.borrow().bank_size() as u32).saturating_sub(1);
        self.program
            .push(RegionDescriptor::new(name, start, end, RegionKind::Banked(rom)));
        self
    }

    pub fn device(&mut self, name: &str, start: u32, end: u32, device: DeviceRef) -> &mut Self {
        self.program
            .push(RegionDescriptor::device(name, start, end, device));
        self
    }

    pub fn region(&mut self, region: RegionDescriptor) -> &mut Self {
        self.program.push(region);
        self
    }

    pub fn io_device(&mut self, name: &str, start: u32, end: u32, device: DeviceRef) -> &mut Self {
        self.io.push(RegionDescriptor::device(name, start, end, device));
        self
    }

    pub fn io_region(&mut self, region: RegionDescriptor) -> &mut Self {
        self.io.push(region);
        self
    }

    /// Registers a maskable source and returns the handle its device drives.
    pub fn irq_line(&mut self, name: &str, vector: u8, trigger: Trigger) -> IrqLine {
        let line = self
            .interrupts
            .borrow_mut()
            .register(InterruptSource::maskable(name, vector, trigger));
        IrqLine::new(self.interrupts.clone(), line)
    }

    pub fn nmi_line(&mut self, name: &str, trigger: Trigger) -> IrqLine {
        let line = self
            .interrupts
            .borrow_mut()
            .register(InterruptSource::nmi(name, trigger));
        IrqLine::new(self.interrupts.clone(), line)
    }

    pub fn tickable(&mut self, device: TickableRef) -> &mut Self {
        self.tickables.push(device);
        self
    }

    pub fn fill(&mut self, value: u8) -> &mut Self {
        self.fill = value;
        self
    }

    pub fn illegal_opcode_policy(&mut self, policy: IllegalOpcodePolicy) -> &mut Self {
        self.policy = policy;
        self
    }

    pub fn timing(&mut self, timing: Timing) -> &mut Self {
        self.timing = timing;
        self
    }

    pub fn slice_cycles(&mut self, cycles: u32) -> &mut Self {
        self.slice_cycles = Some(cycles);
        self
    }

    pub fn reset_register(&mut self, register: Register, value: u32) -> &mut Self {
        self.reset_overrides.push(RegisterOverride { register, value });
        self
    }

    /// Maps every queued region and returns the machine in its reset state.
    /// The builder is left empty apart from its interrupt controller handle.
    pub fn build(&mut self) -> Result<Machine, MapError> {
        let mut program = AddressSpace::new("program", 20)?.with_fill(self.fill);
        for region in std::mem::take(&mut self.program) {
            program.map(region)?;
        }
        let mut io = AddressSpace::new("io", 16)?;
        for region in std::mem::take(&mut self.io) {
            io.map(region)?;
        }

        let mut clock = Clock::with_timing(self.timing);
        if let Some(cycles) = self.slice_cycles {
            clock.set_slice_cycles(cycles);
        }

        let cpu = V30mz::new(Bus::with_spaces(program, io), self.interrupts.clone())
            .with_policy(self.policy);

        Ok(Machine::new(
            cpu,
            self.interrupts.clone(),
            clock,
            std::mem::take(&mut self.tickables),
            std::mem::take(&mut self.reset_overrides),
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramEntry {
    pub address: u32,
    pub instruction: String,
    pub data: String,
    pub dump: Option<String>,
}

impl fmt::Display for ProgramEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:05X}  {:<18}  {:<28} {}",
            self.address,
            self.data,
            self.instruction,
            self.dump.as_deref().unwrap_or("")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(code: &[u8]) -> Machine {
        MachineBuilder::new()
            .ram("ram", 0x00000, 0x0FFFF)
            .rom("boot", 0xFFFF0, 0xFFFFF, code)
            .build()
            .unwrap()
    }

    #[test]
    fn test_reset_overrides_apply() {
        let mut machine = MachineBuilder::new()
            .ram("ram", 0x00000, 0x0FFFF)
            .reset_register(Register::Sp, 0x2000)
            .build()
            .unwrap();
        assert_eq!(machine.register(Register::Sp), 0x2000);

        machine.set_register(Register::Sp, 0x1234);
        machine.reset();
        assert_eq!(machine.register(Register::Sp), 0x2000);
        assert_eq!(machine.pc(), 0xFFFF0);
    }

    #[test]
    fn test_program_listing_marks_pc() {
        // MOV AX,1234 ; HLT
        let machine = machine(&[0xB8, 0x34, 0x12, 0xF4]);
        let listing = machine.program(0xFFFF0, 2);
        assert_eq!(listing[0].address, 0xFFFF0);
        assert_eq!(listing[0].data, "B8 34 12");
        assert_eq!(listing[0].dump.as_deref(), Some("<- PC"));
        assert_eq!(listing[1].address, 0xFFFF3);
        assert_eq!(listing[1].instruction, "HLT");
    }

    #[test]
    fn test_register_by_index() {
        let mut machine = machine(&[0xF4]);
        assert!(machine.set_register_by_index(Register::Aw.index(), 0xBEEF));
        assert_eq!(machine.register_by_index(2), Some(0xBEEF));
        assert_eq!(machine.register_by_index(17), None);
        assert!(!machine.set_register_by_index(99, 0));
    }

    #[test]
    fn test_report_state() {
        let mut machine = machine(&[0xB8, 0x34, 0x12, 0xF4]);
        machine.step();
        let state = machine.report_state().unwrap();
        assert_eq!(state.get(Register::Aw), 0x1234);
        assert_eq!(state.opcode, 0xF4);
        assert!(!state.halted);
    }
}
