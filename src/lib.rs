pub mod acia;
pub mod address_space;
pub mod bus;
pub mod clock;
pub mod config;
pub mod cpu;
pub mod error;
pub mod instruction;
pub mod internal_state;
pub mod interrupt;
pub mod keyboard;
pub mod machine;
pub mod memory;
pub mod ppi;
pub mod quickload;
pub mod registers;
pub mod timer;
pub mod utils;

pub use address_space::{AddressSpace, Device, DeviceRef, RegionDescriptor, Width};
pub use bus::{Bus, CpuBus};
pub use cpu::{HookAction, IllegalOpcodePolicy, V30mz};
pub use error::{ConfigError, LoadError, MapError};
pub use internal_state::{InternalState, ReportState};
pub use interrupt::{InterruptController, InterruptSource, IrqLine, LineId, Trigger};
pub use machine::{Machine, MachineBuilder, ProgramEntry};
pub use registers::Register;
pub use utils::hexdump;
use wasm_bindgen::prelude::*;

/// 64 KiB of RAM at the bottom and `rom_data` mapped so that it ends at the
/// reset vector.
pub fn get_machine(rom_data: &[u8]) -> Result<Machine, MapError> {
    let size = rom_data.len().clamp(0x10, 0x8_0000).next_power_of_two() as u32;
    let start = 0x10_0000 - size;
    MachineBuilder::new()
        .ram("ram", 0x00000, 0x0FFFF)
        .rom("rom", start, 0xFFFFF, rom_data)
        .build()
}

#[wasm_bindgen(js_name = Machine)]
pub struct JsMachine(Machine);

#[wasm_bindgen(js_class = Machine)]
impl JsMachine {
    #[wasm_bindgen(constructor)]
    pub fn new(rom_data: &[u8]) -> Result<JsMachine, JsValue> {
        console_error_panic_hook::set_once();
        tracing_wasm::set_as_global_default();

        get_machine(rom_data)
            .map(Self)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    #[wasm_bindgen(getter)]
    pub fn pc(&self) -> u32 {
        self.0.pc()
    }

    #[wasm_bindgen(getter)]
    pub fn halted(&self) -> bool {
        self.0.halted()
    }

    #[wasm_bindgen(getter)]
    pub fn cycles(&self) -> f64 {
        self.0.get_cycles() as f64
    }

    pub fn reset(&mut self) {
        self.0.reset();
    }

    pub fn step(&mut self) -> u32 {
        self.0.step()
    }

    pub fn step_for(&mut self, n: usize) -> usize {
        self.0.step_for(n)
    }

    pub fn step_frame(&mut self) {
        self.0.step_frame();
    }

    pub fn execute(&mut self, cycles: u32) -> u32 {
        self.0.execute(cycles)
    }

    pub fn register(&self, index: usize) -> Option<u32> {
        self.0.register_by_index(index)
    }

    #[wasm_bindgen(js_name = setRegister)]
    pub fn set_register(&mut self, index: usize, value: u32) -> bool {
        self.0.set_register_by_index(index, value)
    }

    pub fn memory(&self, start: u32, len: usize) -> Vec<u8> {
        self.0.memory(start, len)
    }

    #[wasm_bindgen(js_name = memoryDump)]
    pub fn memory_dump(&self, start: u32, end: u32) -> String {
        self.0.memory_dump(start, end)
    }

    #[wasm_bindgen(js_name = loadQuickload)]
    pub fn load_quickload(&mut self, image: &[u8]) -> Result<(), JsValue> {
        self.0
            .load_quickload(image)
            .map(|_| ())
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    pub fn disassemble(&self, start: u32, count: usize) -> String {
        self.0
            .program(start, count)
            .iter()
            .map(|entry| entry.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn state(&mut self) -> Result<String, JsValue> {
        let state = self
            .0
            .report_state()
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        serde_json::to_string(&state).map_err(|e| JsValue::from_str(&e.to_string()))
    }
}
