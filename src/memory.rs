use std::{cell::RefCell, fmt, fs, path::PathBuf, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::address_space::Device;

/// Read/write backing store for a RAM region. Power-on contents are `0xFF`.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Clone)]
pub struct Ram {
    pub data: Vec<u8>,
}

impl Ram {
    pub fn new(size: usize) -> Self {
        Ram {
            data: vec![0xFF; size],
        }
    }

    pub fn with_fill(size: usize, fill: u8) -> Self {
        Ram {
            data: vec![fill; size],
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn read(&self, offset: u32) -> u8 {
        match self.data.get(offset as usize) {
            Some(value) => *value,
            None => {
                tracing::warn!(
                    "Attempt to read from out of bounds RAM offset {:#06X}, returning 0xFF",
                    offset
                );
                0xFF
            }
        }
    }

    pub fn write(&mut self, offset: u32, value: u8) {
        if let Some(slot) = self.data.get_mut(offset as usize) {
            *slot = value;
        }
    }
}

/// Read-only backing store. Writes from the CPU are dropped.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Clone)]
pub struct Rom {
    pub rom_path: Option<PathBuf>,
    pub data: Vec<u8>,
}

impl Rom {
    /// Builds a ROM of `size` bytes; a shorter image is padded with `0xFF`,
    /// a longer one is truncated.
    pub fn new(image: &[u8], size: usize) -> Self {
        let mut data = vec![0xFF; size];
        let len = image.len().min(size);
        data[..len].copy_from_slice(&image[..len]);

        Rom {
            rom_path: None,
            data,
        }
    }

    pub fn load(rom_path: PathBuf, size: usize) -> anyhow::Result<Self> {
        let buffer = fs::read(&rom_path)?;
        if buffer.len() > size {
            tracing::warn!(
                "ROM image {:?} is {} bytes, truncating to {}",
                rom_path,
                buffer.len(),
                size
            );
        }

        let mut rom = Self::new(&buffer, size);
        rom.rom_path = Some(rom_path);
        Ok(rom)
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn read(&self, offset: u32) -> u8 {
        self.data.get(offset as usize).copied().unwrap_or(0xFF)
    }

    pub fn write(&mut self, offset: u32, _value: u8) {
        tracing::trace!("Attempt to write to ROM offset {:#06X}", offset);
    }
}

/// A fixed window onto one of several equally sized ROM banks, such as the
/// Acorn Atom 16-slot EPROM box.
#[derive(Debug, Clone, PartialEq)]
pub struct BankedRom {
    banks: Vec<Vec<u8>>,
    bank_size: usize,
    selected: usize,
}

impl BankedRom {
    pub fn new(bank_size: usize, bank_count: usize) -> Self {
        Self {
            banks: vec![vec![0xFF; bank_size]; bank_count.max(1)],
            bank_size,
            selected: 0,
        }
    }

    pub fn shared(bank_size: usize, bank_count: usize) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(bank_size, bank_count)))
    }

    pub fn bank_size(&self) -> usize {
        self.bank_size
    }

    pub fn bank_count(&self) -> usize {
        self.banks.len()
    }

    pub fn load_bank(&mut self, bank: usize, image: &[u8]) {
        if let Some(data) = self.banks.get_mut(bank) {
            let len = image.len().min(data.len());
            data[..len].copy_from_slice(&image[..len]);
        } else {
            tracing::warn!("[BANK] No bank {} to load into", bank);
        }
    }

    /// Stores into the currently selected bank.
    pub fn poke(&mut self, offset: u32, value: u8) {
        if let Some(slot) = self.banks[self.selected].get_mut(offset as usize) {
            *slot = value;
        }
    }

    /// Selects a bank; out of range values wrap like the unconnected upper latch bits.
    pub fn select(&mut self, bank: usize) {
        self.selected = bank % self.banks.len();
        tracing::debug!("[BANK] Selected bank {}", self.selected);
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn read(&self, offset: u32) -> u8 {
        self.banks[self.selected]
            .get(offset as usize)
            .copied()
            .unwrap_or(0xFF)
    }

    pub fn reset(&mut self) {
        self.selected = 0;
    }
}

impl fmt::Display for BankedRom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} banks x {:#06X} (bank {} selected)",
            self.banks.len(),
            self.bank_size,
            self.selected
        )
    }
}

/// The bank select latch that goes with a [`BankedRom`]. Writes pick the
/// bank from the low nibble; reads return the current selection.
#[derive(Debug, Clone)]
pub struct BankSelect {
    rom: Rc<RefCell<BankedRom>>,
    mask: u8,
}

impl BankSelect {
    pub fn new(rom: Rc<RefCell<BankedRom>>) -> Self {
        Self { rom, mask: 0x0F }
    }
}

impl Device for BankSelect {
    fn read(&mut self, _offset: u32) -> u8 {
        self.rom.borrow().selected() as u8
    }

    fn write(&mut self, _offset: u32, value: u8) {
        self.rom.borrow_mut().select((value & self.mask) as usize);
    }

    fn peek(&self, _offset: u32) -> Option<u8> {
        Some(self.rom.borrow().selected() as u8)
    }

    fn reset(&mut self) {
        self.rom.borrow_mut().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rom_pads_short_image() {
        let rom = Rom::new(&[1, 2, 3], 8);
        assert_eq!(rom.size(), 8);
        assert_eq!(rom.read(2), 3);
        assert_eq!(rom.read(3), 0xFF);
        assert_eq!(rom.read(100), 0xFF);
    }

    #[test]
    fn test_rom_load_truncates_large_image() {
        let path = std::env::temp_dir().join("v30mz-rom-load-test.bin");
        fs::write(&path, [0x11, 0x22, 0x33, 0x44]).unwrap();

        let rom = Rom::load(path.clone(), 2).unwrap();
        assert_eq!(rom.size(), 2);
        assert_eq!(rom.read(1), 0x22);
        assert_eq!(rom.rom_path, Some(path.clone()));

        fs::remove_file(path).unwrap();
        assert!(Rom::load(PathBuf::from("/nonexistent/v30mz.rom"), 2).is_err());
    }

    #[test]
    fn test_rom_ignores_writes() {
        let mut rom = Rom::new(&[0x42], 1);
        rom.write(0, 0x00);
        assert_eq!(rom.read(0), 0x42);
    }

    #[test]
    fn test_bank_select_switches_window() {
        let rom = BankedRom::shared(0x1000, 16);
        rom.borrow_mut().load_bank(0, &[0xAA]);
        rom.borrow_mut().load_bank(5, &[0x55]);

        let mut select = BankSelect::new(rom.clone());
        assert_eq!(rom.borrow().read(0), 0xAA);

        select.write(0, 0xF5);
        assert_eq!(select.read(0), 5);
        assert_eq!(rom.borrow().read(0), 0x55);
    }
}
