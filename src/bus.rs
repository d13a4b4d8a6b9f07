// +-----------+-------+---------------------------------------------------+
// | Space     | Width | Description                                       |
// +-----------+-------+---------------------------------------------------+
// | program   | 20    | Memory, reached through segment:offset pairs      |
// | io        | 16    | Ports, reached with IN/OUT/INS/OUTS               |
// +-----------+-------+---------------------------------------------------+
use std::fmt::Write as _;

use crate::{
    address_space::{AddressSpace, RegionInfo},
    error::MapError,
};

/// Everything the CPU core needs from the outside world.
pub trait CpuBus {
    fn read_byte(&mut self, address: u32) -> u8;

    fn write_byte(&mut self, address: u32, value: u8);

    fn read_word(&mut self, address: u32) -> u16 {
        let lo = self.read_byte(address) as u16;
        let hi = self.read_byte(address.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    fn write_word(&mut self, address: u32, value: u16) {
        self.write_byte(address, value as u8);
        self.write_byte(address.wrapping_add(1), (value >> 8) as u8);
    }

    fn port_in(&mut self, port: u16) -> u8;

    fn port_out(&mut self, port: u16, value: u8);

    fn port_in_word(&mut self, port: u16) -> u16 {
        let lo = self.port_in(port) as u16;
        let hi = self.port_in(port.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    fn port_out_word(&mut self, port: u16, value: u16) {
        self.port_out(port, value as u8);
        self.port_out(port.wrapping_add(1), (value >> 8) as u8);
    }

    /// Side-effect free memory read for disassembly and debugging.
    fn peek_byte(&self, address: u32) -> u8;
}

/// The system bus: a program space and an I/O space.
#[derive(Debug)]
pub struct Bus {
    pub program: AddressSpace,
    pub io: AddressSpace,
}

impl Bus {
    pub fn new() -> Result<Self, MapError> {
        Ok(Self {
            program: AddressSpace::new("program", 20)?,
            io: AddressSpace::new("io", 16)?,
        })
    }

    pub fn with_spaces(program: AddressSpace, io: AddressSpace) -> Self {
        Self { program, io }
    }

    pub fn reset(&mut self) {
        self.program.reset();
        self.io.reset();
    }

    pub fn write_block(&mut self, start_addr: u32, data: &[u8]) {
        let mut addr = start_addr;
        for &byte in data {
            self.program.write_byte(addr, byte);
            addr = addr.wrapping_add(1);
        }
    }

    pub fn read_block(&mut self, start_addr: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| self.program.read_byte(start_addr.wrapping_add(i)))
            .collect()
    }

    pub fn memory_map(&self) -> Vec<RegionInfo> {
        self.program.regions()
    }

    pub fn io_map(&self) -> Vec<RegionInfo> {
        self.io.regions()
    }

    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (space, regions) in [("program", self.memory_map()), ("io", self.io_map())] {
            let _ = writeln!(out, "[{}]", space);
            for region in regions {
                let _ = writeln!(out, "  {}", region);
            }
        }
        out
    }
}

impl CpuBus for Bus {
    fn read_byte(&mut self, address: u32) -> u8 {
        self.program.read_byte(address)
    }

    fn write_byte(&mut self, address: u32, value: u8) {
        self.program.write_byte(address, value);
    }

    fn read_word(&mut self, address: u32) -> u16 {
        self.program.read_word(address)
    }

    fn write_word(&mut self, address: u32, value: u16) {
        self.program.write_word(address, value);
    }

    fn port_in(&mut self, port: u16) -> u8 {
        let value = self.io.read_byte(port as u32);
        tracing::trace!("[BUS] IN {:04X} = {:02X}", port, value);
        value
    }

    fn port_out(&mut self, port: u16, value: u8) {
        tracing::trace!("[BUS] OUT {:04X} <- {:02X}", port, value);
        self.io.write_byte(port as u32, value);
    }

    fn port_in_word(&mut self, port: u16) -> u16 {
        self.io.read_word(port as u32)
    }

    fn port_out_word(&mut self, port: u16, value: u16) {
        self.io.write_word(port as u32, value);
    }

    fn peek_byte(&self, address: u32) -> u8 {
        self.program.peek_byte(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_and_io_are_separate() {
        let mut bus = Bus::new().unwrap();
        bus.program.map_ram("ram", 0x00000, 0x0FFFF).unwrap();
        bus.io.map_ram("ports", 0x0000, 0x00FF).unwrap();

        bus.write_byte(0x0010, 0x11);
        bus.port_out(0x0010, 0x22);
        assert_eq!(bus.read_byte(0x0010), 0x11);
        assert_eq!(bus.port_in(0x0010), 0x22);
        assert_eq!(bus.port_in(0x0100), 0xFF);
    }

    #[test]
    fn test_block_helpers() {
        let mut bus = Bus::new().unwrap();
        bus.program.map_ram("ram", 0x00000, 0x003FF).unwrap();
        bus.write_block(0x100, &[1, 2, 3, 4]);
        assert_eq!(bus.read_block(0x100, 4), vec![1, 2, 3, 4]);
        assert!(bus.describe().contains("ram"));
    }
}
