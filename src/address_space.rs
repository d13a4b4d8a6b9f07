// +-------------------+----------------------------------------------------+
// | Term              | Meaning                                            |
// +-------------------+----------------------------------------------------+
// | region            | start..=end bound to RAM, ROM, a bank or a device  |
// | mirror            | address bits ignored when matching a region        |
// | priority          | higher wins; ties go to the latest registration    |
// | fill              | byte returned for unmapped reads (open bus)        |
// +-------------------+----------------------------------------------------+
use std::{cell::RefCell, fmt, rc::Rc};

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{
    error::{LoadError, MapError},
    memory::{BankedRom, Ram, Rom},
};

/// A memory or port mapped peripheral.
///
/// Offsets are relative to the start of the region the device was mapped at,
/// after mirror folding. Reads take `&mut self` because reading a status or
/// data register commonly has side effects.
pub trait Device {
    fn read(&mut self, offset: u32) -> u8;

    fn write(&mut self, offset: u32, value: u8);

    /// Called once for a word access when the region declares word width.
    fn read_word(&mut self, offset: u32) -> u16 {
        let lo = self.read(offset) as u16;
        let hi = self.read(offset.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    fn write_word(&mut self, offset: u32, value: u16) {
        self.write(offset, value as u8);
        self.write(offset.wrapping_add(1), (value >> 8) as u8);
    }

    fn read_dword(&mut self, offset: u32) -> u32 {
        let lo = self.read_word(offset) as u32;
        let hi = self.read_word(offset.wrapping_add(2)) as u32;
        (hi << 16) | lo
    }

    fn write_dword(&mut self, offset: u32, value: u32) {
        self.write_word(offset, value as u16);
        self.write_word(offset.wrapping_add(2), (value >> 16) as u16);
    }

    /// Side-effect free view for debuggers. `None` reads as the fill value.
    fn peek(&self, _offset: u32) -> Option<u8> {
        None
    }

    fn reset(&mut self) {}
}

pub type DeviceRef = Rc<RefCell<dyn Device>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Width {
    Byte = 1,
    Word = 2,
    Dword = 4,
}

impl Width {
    pub fn bytes(self) -> u32 {
        self as u32
    }

    pub fn mask(self) -> u32 {
        match self {
            Width::Byte => 0xFF,
            Width::Word => 0xFFFF,
            Width::Dword => 0xFFFF_FFFF,
        }
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub enum RegionKind {
    Ram(Ram),
    Rom(Rom),
    Banked(#[derivative(Debug = "ignore")] Rc<RefCell<BankedRom>>),
    Device(#[derivative(Debug = "ignore")] DeviceRef),
    Nop,
}

impl RegionKind {
    pub fn label(&self) -> &'static str {
        match self {
            RegionKind::Ram(_) => "RAM",
            RegionKind::Rom(_) => "ROM",
            RegionKind::Banked(_) => "BANK",
            RegionKind::Device(_) => "DEVICE",
            RegionKind::Nop => "NOP",
        }
    }
}

/// A memory map entry as handed to [`AddressSpace::map`].
#[derive(Debug)]
pub struct RegionDescriptor {
    pub name: String,
    pub start: u32,
    pub end: u32,
    pub mirror: u32,
    pub priority: i32,
    pub width: Width,
    pub kind: RegionKind,
}

impl RegionDescriptor {
    pub fn new(name: &str, start: u32, end: u32, kind: RegionKind) -> Self {
        Self {
            name: name.to_string(),
            start,
            end,
            mirror: 0,
            priority: 0,
            width: Width::Byte,
            kind,
        }
    }

    pub fn ram(name: &str, start: u32, end: u32) -> Self {
        let size = end.saturating_sub(start) as usize + 1;
        Self::new(name, start, end, RegionKind::Ram(Ram::new(size)))
    }

    pub fn rom(name: &str, start: u32, end: u32, image: &[u8]) -> Self {
        let size = end.saturating_sub(start) as usize + 1;
        Self::new(name, start, end, RegionKind::Rom(Rom::new(image, size)))
    }

    pub fn device(name: &str, start: u32, end: u32, device: DeviceRef) -> Self {
        Self::new(name, start, end, RegionKind::Device(device))
    }

    pub fn with_mirror(mut self, mirror: u32) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_width(mut self, width: Width) -> Self {
        self.width = width;
        self
    }

    fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(pub usize);

#[derive(Debug)]
struct Region {
    desc: RegionDescriptor,
    seq: usize,
}

impl Region {
    fn matches(&self, address: u32) -> Option<u32> {
        let folded = address & !self.desc.mirror;
        if folded >= self.desc.start && folded <= self.desc.end {
            Some(folded - self.desc.start)
        } else {
            None
        }
    }
}

/// Summary of one mapped region for memory map listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub name: String,
    pub start: u32,
    pub end: u32,
    pub mirror: u32,
    pub priority: i32,
    pub kind: String,
}

impl fmt::Display for RegionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:05X} - 0x{:05X} mirror 0x{:05X} prio {:>3} {:<6} {}",
            self.start, self.end, self.mirror, self.priority, self.kind, self.name
        )
    }
}

/// Routes byte, word and dword accesses to the region that owns an address.
#[derive(Debug)]
pub struct AddressSpace {
    name: String,
    bits: u8,
    address_mask: u32,
    fill: u8,
    regions: Vec<Region>,
    // Region indices in lookup order.
    order: Vec<usize>,
}

impl AddressSpace {
    pub fn new(name: &str, bits: u8) -> Result<Self, MapError> {
        if bits == 0 || bits > 32 {
            return Err(MapError::UnsupportedWidth(bits));
        }
        let address_mask = if bits == 32 {
            u32::MAX
        } else {
            (1u32 << bits) - 1
        };

        Ok(Self {
            name: name.to_string(),
            bits,
            address_mask,
            fill: 0xFF,
            regions: Vec::new(),
            order: Vec::new(),
        })
    }

    pub fn with_fill(mut self, fill: u8) -> Self {
        self.fill = fill;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn address_mask(&self) -> u32 {
        self.address_mask
    }

    pub fn fill(&self) -> u8 {
        self.fill
    }

    pub fn map(&mut self, mut desc: RegionDescriptor) -> Result<RegionId, MapError> {
        if desc.start > desc.end {
            return Err(MapError::InvertedRange {
                name: desc.name,
                start: desc.start,
                end: desc.end,
            });
        }
        if desc.end > self.address_mask {
            return Err(MapError::OutOfSpace {
                name: desc.name,
                end: desc.end,
                bits: self.bits,
            });
        }

        // Mirror bits are don't-care address lines, so they are stripped from the range too.
        desc.mirror &= self.address_mask;
        if desc.mirror != 0 {
            let (start, end) = (desc.start & !desc.mirror, desc.end & !desc.mirror);
            if (start, end) != (desc.start, desc.end) {
                tracing::debug!(
                    "[{}] {} folded to 0x{:05X}-0x{:05X} by mirror 0x{:05X}",
                    self.name,
                    desc.name,
                    start,
                    end,
                    desc.mirror
                );
            }
            desc.start = start;
            desc.end = end;
        }

        let backing = match &desc.kind {
            RegionKind::Ram(ram) => Some(ram.size()),
            RegionKind::Rom(rom) => Some(rom.size()),
            _ => None,
        };
        if let Some(actual) = backing {
            let expected = desc.len();
            if actual != expected {
                return Err(MapError::SizeMismatch {
                    name: desc.name,
                    expected,
                    actual,
                });
            }
        }

        tracing::debug!(
            "[{}] Mapped {} {} at 0x{:05X}-0x{:05X}",
            self.name,
            desc.kind.label(),
            desc.name,
            desc.start,
            desc.end
        );

        let id = self.regions.len();
        self.regions.push(Region { desc, seq: id });
        self.order.push(id);
        let regions = &self.regions;
        self.order.sort_by(|a, b| {
            let (ra, rb) = (&regions[*a], &regions[*b]);
            rb.desc
                .priority
                .cmp(&ra.desc.priority)
                .then(rb.seq.cmp(&ra.seq))
        });

        Ok(RegionId(id))
    }

    pub fn map_ram(&mut self, name: &str, start: u32, end: u32) -> Result<RegionId, MapError> {
        self.map(RegionDescriptor::ram(name, start, end))
    }

    pub fn map_rom(
        &mut self,
        name: &str,
        start: u32,
        end: u32,
        image: &[u8],
    ) -> Result<RegionId, MapError> {
        self.map(RegionDescriptor::rom(name, start, end, image))
    }

    pub fn map_device(
        &mut self,
        name: &str,
        start: u32,
        end: u32,
        device: DeviceRef,
    ) -> Result<RegionId, MapError> {
        self.map(RegionDescriptor::device(name, start, end, device))
    }

    pub fn map_banked(
        &mut self,
        name: &str,
        start: u32,
        rom: Rc<RefCell<BankedRom>>,
    ) -> Result<RegionId, MapError> {
        let size = rom.borrow().bank_size() as u32;
        let end = start + size.saturating_sub(1);
        self.map(RegionDescriptor::new(name, start, end, RegionKind::Banked(rom)))
    }

    pub fn map_nop(&mut self, name: &str, start: u32, end: u32) -> Result<RegionId, MapError> {
        self.map(RegionDescriptor::new(name, start, end, RegionKind::Nop))
    }

    /// Finds the region serving `address` and the offset inside it.
    fn lookup(&self, address: u32) -> Option<(usize, u32)> {
        self.order.iter().find_map(|&index| {
            self.regions[index]
                .matches(address)
                .map(|offset| (index, offset))
        })
    }

    pub fn read_byte(&mut self, address: u32) -> u8 {
        let address = address & self.address_mask;
        let Some((index, offset)) = self.lookup(address) else {
            tracing::trace!("[{}] Unmapped read 0x{:05X}", self.name, address);
            return self.fill;
        };

        match &self.regions[index].desc.kind {
            RegionKind::Ram(ram) => ram.read(offset),
            RegionKind::Rom(rom) => rom.read(offset),
            RegionKind::Banked(rom) => rom.borrow().read(offset),
            RegionKind::Device(device) => {
                let device = device.clone();
                let value = device.borrow_mut().read(offset);
                value
            }
            RegionKind::Nop => self.fill,
        }
    }

    pub fn write_byte(&mut self, address: u32, value: u8) {
        let address = address & self.address_mask;
        let Some((index, offset)) = self.lookup(address) else {
            tracing::trace!(
                "[{}] Unmapped write 0x{:05X} = {:02X}",
                self.name,
                address,
                value
            );
            return;
        };

        match &mut self.regions[index].desc.kind {
            RegionKind::Ram(ram) => ram.write(offset, value),
            RegionKind::Rom(rom) => rom.write(offset, value),
            RegionKind::Banked(_) => {
                tracing::trace!("[{}] Write to banked ROM 0x{:05X} ignored", self.name, address);
            }
            RegionKind::Device(device) => {
                let device = device.clone();
                device.borrow_mut().write(offset, value);
            }
            RegionKind::Nop => {}
        }
    }

    /// Returns the device and offset when a multi-byte access can be handed
    /// to a single device handler in one call.
    fn wide_target(&self, address: u32, width: Width) -> Option<(DeviceRef, u32)> {
        let (index, offset) = self.lookup(address)?;
        let region = &self.regions[index];
        if region.desc.width < width {
            return None;
        }
        if offset as u64 + width.bytes() as u64 > region.desc.len() as u64 {
            return None;
        }
        // Every byte must still resolve to this region at consecutive offsets.
        for i in 1..width.bytes() {
            let next = address.wrapping_add(i) & self.address_mask;
            if self.lookup(next) != Some((index, offset + i)) {
                return None;
            }
        }
        match &region.desc.kind {
            RegionKind::Device(device) => Some((device.clone(), offset)),
            _ => None,
        }
    }

    pub fn read(&mut self, address: u32, width: Width) -> u32 {
        let address = address & self.address_mask;
        if width != Width::Byte {
            if let Some((device, offset)) = self.wide_target(address, width) {
                let mut device = device.borrow_mut();
                return match width {
                    Width::Word => device.read_word(offset) as u32,
                    _ => device.read_dword(offset),
                };
            }
        }

        (0..width.bytes()).fold(0u32, |value, i| {
            let byte = self.read_byte(address.wrapping_add(i)) as u32;
            value | (byte << (8 * i))
        })
    }

    pub fn write(&mut self, address: u32, width: Width, value: u32) {
        let address = address & self.address_mask;
        let value = value & width.mask();
        if width != Width::Byte {
            if let Some((device, offset)) = self.wide_target(address, width) {
                let mut device = device.borrow_mut();
                match width {
                    Width::Word => device.write_word(offset, value as u16),
                    _ => device.write_dword(offset, value),
                }
                return;
            }
        }

        for i in 0..width.bytes() {
            self.write_byte(address.wrapping_add(i), (value >> (8 * i)) as u8);
        }
    }

    pub fn read_word(&mut self, address: u32) -> u16 {
        self.read(address, Width::Word) as u16
    }

    pub fn write_word(&mut self, address: u32, value: u16) {
        self.write(address, Width::Word, value as u32);
    }

    pub fn read_dword(&mut self, address: u32) -> u32 {
        self.read(address, Width::Dword)
    }

    pub fn write_dword(&mut self, address: u32, value: u32) {
        self.write(address, Width::Dword, value);
    }

    /// Reads without triggering device side effects.
    pub fn peek_byte(&self, address: u32) -> u8 {
        let address = address & self.address_mask;
        let Some((index, offset)) = self.lookup(address) else {
            return self.fill;
        };

        match &self.regions[index].desc.kind {
            RegionKind::Ram(ram) => ram.data.get(offset as usize).copied().unwrap_or(self.fill),
            RegionKind::Rom(rom) => rom.read(offset),
            RegionKind::Banked(rom) => rom.borrow().read(offset),
            RegionKind::Device(device) => device.borrow().peek(offset).unwrap_or(self.fill),
            RegionKind::Nop => self.fill,
        }
    }

    pub fn peek_block(&self, start: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| self.peek_byte(start.wrapping_add(i)))
            .collect()
    }

    /// Host-side store into RAM or ROM backing memory, ignoring write
    /// protection. Device regions receive ordinary writes.
    pub fn load(&mut self, start: u32, data: &[u8]) -> Result<(), LoadError> {
        let end = start as u64 + data.len() as u64;
        if end > self.address_mask as u64 + 1 {
            return Err(LoadError::OutOfRange {
                address: start,
                len: data.len(),
            });
        }
        // Check the whole range first so a failed load leaves memory untouched.
        for i in 0..data.len() as u32 {
            let address = start + i;
            match self.lookup(address) {
                Some((index, _)) if !matches!(self.regions[index].desc.kind, RegionKind::Nop) => {}
                _ => {
                    return Err(LoadError::OutOfRange {
                        address,
                        len: data.len(),
                    })
                }
            }
        }

        for (i, &byte) in data.iter().enumerate() {
            let address = start + i as u32;
            let Some((index, offset)) = self.lookup(address) else {
                continue;
            };
            match &mut self.regions[index].desc.kind {
                RegionKind::Ram(ram) => ram.write(offset, byte),
                RegionKind::Rom(rom) => {
                    if let Some(slot) = rom.data.get_mut(offset as usize) {
                        *slot = byte;
                    }
                }
                RegionKind::Banked(rom) => rom.borrow_mut().poke(offset, byte),
                RegionKind::Device(device) => {
                    let device = device.clone();
                    device.borrow_mut().write(offset, byte);
                }
                RegionKind::Nop => {}
            }
        }

        Ok(())
    }

    /// Backing bytes of a RAM or ROM region, e.g. for battery-backed RAM images.
    pub fn region_data(&self, name: &str) -> Option<&[u8]> {
        self.regions
            .iter()
            .find(|region| region.desc.name == name)
            .and_then(|region| match &region.desc.kind {
                RegionKind::Ram(ram) => Some(ram.data.as_slice()),
                RegionKind::Rom(rom) => Some(rom.data.as_slice()),
                _ => None,
            })
    }

    pub fn region_data_mut(&mut self, name: &str) -> Option<&mut [u8]> {
        self.regions
            .iter_mut()
            .find(|region| region.desc.name == name)
            .and_then(|region| match &mut region.desc.kind {
                RegionKind::Ram(ram) => Some(ram.data.as_mut_slice()),
                RegionKind::Rom(rom) => Some(rom.data.as_mut_slice()),
                _ => None,
            })
    }

    pub fn regions(&self) -> Vec<RegionInfo> {
        self.order
            .iter()
            .map(|&index| {
                let desc = &self.regions[index].desc;
                RegionInfo {
                    name: desc.name.clone(),
                    start: desc.start,
                    end: desc.end,
                    mirror: desc.mirror,
                    priority: desc.priority,
                    kind: desc.kind.label().to_string(),
                }
            })
            .collect()
    }

    pub fn reset(&mut self) {
        for region in &self.regions {
            match &region.desc.kind {
                RegionKind::Device(device) => device.borrow_mut().reset(),
                RegionKind::Banked(rom) => rom.borrow_mut().reset(),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Latch {
        value: u8,
        reads: usize,
        word_reads: usize,
    }

    impl Latch {
        fn shared() -> Rc<RefCell<Latch>> {
            Rc::new(RefCell::new(Latch {
                value: 0,
                reads: 0,
                word_reads: 0,
            }))
        }
    }

    impl Device for Latch {
        fn read(&mut self, offset: u32) -> u8 {
            self.reads += 1;
            self.value.wrapping_add(offset as u8)
        }

        fn write(&mut self, _offset: u32, value: u8) {
            self.value = value;
        }

        fn read_word(&mut self, _offset: u32) -> u16 {
            self.word_reads += 1;
            0xBEEF
        }
    }

    fn space() -> AddressSpace {
        AddressSpace::new("program", 16).unwrap()
    }

    #[test]
    fn test_unmapped_reads_fill_value() {
        let mut space = space();
        assert_eq!(space.read_byte(0x1234), 0xFF);
        assert_eq!(space.read_word(0x1234), 0xFFFF);
        space.write_byte(0x1234, 0x00);
        assert_eq!(space.read_byte(0x1234), 0xFF);

        let mut zero = AddressSpace::new("io", 16).unwrap().with_fill(0x00);
        assert_eq!(zero.read_dword(0), 0);
    }

    #[test]
    fn test_ram_round_trip_all_widths() {
        let mut space = space();
        space.map_ram("ram", 0x0000, 0x0FFF).unwrap();

        space.write_byte(0x0010, 0x12);
        assert_eq!(space.read_byte(0x0010), 0x12);
        space.write_word(0x0020, 0xABCD);
        assert_eq!(space.read_word(0x0020), 0xABCD);
        assert_eq!(space.read_byte(0x0020), 0xCD);
        space.write_dword(0x0030, 0xDEADBEEF);
        assert_eq!(space.read_dword(0x0030), 0xDEADBEEF);
        space.write(0x0040, Width::Word, 0x12345);
        assert_eq!(space.read(0x0040, Width::Word), 0x2345);
    }

    #[test]
    fn test_rom_is_write_protected_but_loadable() {
        let mut space = space();
        space.map_rom("rom", 0xF800, 0xFFFF, &[0x11, 0x22]).unwrap();
        space.write_byte(0xF800, 0x99);
        assert_eq!(space.read_byte(0xF800), 0x11);

        space.load(0xF800, &[0x33]).unwrap();
        assert_eq!(space.read_byte(0xF800), 0x33);
    }

    #[test]
    fn test_mirror_folds_to_base() {
        let mut space = space();
        let latch = Latch::shared();
        space
            .map(RegionDescriptor::device("kbd", 0xDF00, 0xDF00, latch.clone()).with_mirror(0x03FF))
            .unwrap();

        for k in 0..0x400u32 {
            space.write_byte(0xDC00 + k, k as u8);
            assert_eq!(latch.borrow().value, k as u8);
        }
        assert_eq!(space.read_byte(0xDC00), space.read_byte(0xDFFF));
        assert_eq!(space.read_byte(0xE000), 0xFF);
    }

    #[test]
    fn test_priority_and_latest_registration_win() {
        let mut space = space();
        space.map_ram("low", 0x0000, 0x00FF).unwrap();
        space
            .map(RegionDescriptor::rom("high", 0x0080, 0x008F, &[0x42; 16]).with_priority(1))
            .unwrap();
        space.map_ram("later", 0x0000, 0x00FF).unwrap();

        assert_eq!(space.read_byte(0x0085), 0x42);
        space.write_byte(0x0010, 0x07);
        assert_eq!(space.region_data("later").unwrap()[0x10], 0x07);
        assert_eq!(space.region_data("low").unwrap()[0x10], 0xFF);
    }

    #[test]
    fn test_word_handler_only_with_declared_width() {
        let mut space = space();
        let narrow = Latch::shared();
        let wide = Latch::shared();
        space.map_device("narrow", 0x100, 0x10F, narrow.clone()).unwrap();
        space
            .map(RegionDescriptor::device("wide", 0x200, 0x20F, wide.clone()).with_width(Width::Word))
            .unwrap();

        space.read_word(0x100);
        assert_eq!(narrow.borrow().word_reads, 0);
        assert_eq!(narrow.borrow().reads, 2);

        assert_eq!(space.read_word(0x200), 0xBEEF);
        assert_eq!(wide.borrow().word_reads, 1);

        // Straddles the end of the region, so it splits.
        space.read_word(0x20F);
        assert_eq!(wide.borrow().word_reads, 1);
    }

    #[test]
    fn test_wide_access_splits_around_higher_priority_region() {
        let mut space = space();
        let wide = Latch::shared();
        space
            .map(RegionDescriptor::device("wide", 0x200, 0x20F, wide.clone()).with_width(Width::Word))
            .unwrap();
        space
            .map(RegionDescriptor::rom("patch", 0x201, 0x201, &[0x42]).with_priority(5))
            .unwrap();

        assert_eq!(space.read_byte(0x201), 0x42);
        assert_eq!(space.read_word(0x200), 0x4200);
        assert_eq!(wide.borrow().word_reads, 0);

        // Untouched part of the region still takes the word handler.
        assert_eq!(space.read_word(0x204), 0xBEEF);
        assert_eq!(wide.borrow().word_reads, 1);
    }

    #[test]
    fn test_map_rejects_bad_ranges() {
        let mut space = space();
        assert!(matches!(
            space.map_ram("bad", 0x200, 0x100),
            Err(MapError::InvertedRange { .. })
        ));
        assert!(matches!(
            space.map_ram("big", 0x0000, 0x1FFFF),
            Err(MapError::OutOfSpace { .. })
        ));
        assert!(matches!(
            space.map(RegionDescriptor::new(
                "short",
                0,
                0xFF,
                RegionKind::Ram(Ram::new(16))
            )),
            Err(MapError::SizeMismatch {
                expected: 0x100,
                actual: 16,
                ..
            })
        ));
        assert!(AddressSpace::new("none", 0).is_err());
    }

    #[test]
    fn test_addresses_wrap_to_space_width() {
        let mut space = AddressSpace::new("program", 20).unwrap();
        space.map_ram("ram", 0x00000, 0x00FFF).unwrap();
        space.write_byte(0x100010, 0x5A);
        assert_eq!(space.read_byte(0x00010), 0x5A);
    }

    #[test]
    fn test_load_rejects_unmapped_and_leaves_memory() {
        let mut space = space();
        space.map_ram("ram", 0x0000, 0x000F).unwrap();
        let result = space.load(0x000E, &[1, 2, 3]);
        assert!(matches!(result, Err(LoadError::OutOfRange { address: 0x10, .. })));
        assert_eq!(space.read_byte(0x000E), 0xFF);
    }

    #[test]
    fn test_peek_has_no_side_effects() {
        let mut space = space();
        let latch = Latch::shared();
        space.map_device("latch", 0x10, 0x10, latch.clone()).unwrap();
        assert_eq!(space.peek_byte(0x10), 0xFF);
        assert_eq!(latch.borrow().reads, 0);
    }
}
