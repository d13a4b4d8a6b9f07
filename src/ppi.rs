use crate::{
    address_space::Device,
    clock::{Tickable, DEFAULT_CLOCK_HZ},
    keyboard::KeyMatrix,
};

/// Frequency of the cassette/speaker tone on port C bit 4.
pub const TONE_HZ: u32 = 2400;

/// Acorn Atom 8255 PPI.
///
/// - Port A (output): bits 0-3 select the keyboard row, bits 4-7 the 6847 mode.
/// - Port B (input): keyboard columns of the selected row; bits 6-7 are SHIFT and CTRL.
/// - Port C: bits 0-3 are output latches (bit 2 drives the speaker), bit 4 the
///   2.4 kHz tone, bit 5 cassette input, bit 6 REPT and bit 7 field sync (active low).
#[derive(Clone, Debug)]
pub struct Ppi {
    pub keyboard: KeyMatrix,
    port_a: u8,
    port_b: u8,
    port_c: u8,
    control: u8,

    tone: bool,
    tone_cycles: u32,
    tone_half_period: u32,
    cassette: bool,
    field_sync: bool,
}

/// Keyboard row carrying SHIFT (bit 7) and CTRL (bit 6).
pub const MODIFIER_ROW: usize = 10;
/// Keyboard row carrying REPT (bit 6).
pub const REPT_ROW: usize = 11;

impl Ppi {
    pub fn new() -> Self {
        Ppi::default()
    }

    /// A PPI whose tone generator is timed against a `clock_hz` CPU clock.
    pub fn with_clock(clock_hz: u32) -> Self {
        Ppi {
            tone_half_period: (clock_hz / (2 * TONE_HZ)).max(1),
            ..Ppi::default()
        }
    }

    /// CPU cycles between two edges of the tone.
    pub fn tone_half_period(&self) -> u32 {
        self.tone_half_period
    }

    pub fn key_down(&mut self, row: usize, col: u8) {
        self.keyboard.press(row, col);
    }

    pub fn key_up(&mut self, row: usize, col: u8) {
        self.keyboard.release(row, col);
    }

    pub fn set_cassette_input(&mut self, level: bool) {
        self.cassette = level;
    }

    pub fn set_field_sync(&mut self, active: bool) {
        self.field_sync = active;
    }

    pub fn speaker_level(&self) -> bool {
        self.port_c & 0x04 != 0
    }

    pub fn graphics_mode(&self) -> u8 {
        self.port_a >> 4
    }

    pub fn port_b_latch(&self) -> u8 {
        self.port_b
    }

    fn read_keyboard(&self) -> u8 {
        let row = (self.port_a & 0x0F) as usize;
        (self.keyboard.row(row) & 0x3F) | (self.keyboard.row(MODIFIER_ROW) & 0xC0)
    }

    fn read_port_c(&self) -> u8 {
        let mut value = self.port_c & 0x0F;
        if self.tone {
            value |= 1 << 4;
        }
        if self.cassette {
            value |= 1 << 5;
        }
        value |= self.keyboard.row(REPT_ROW) & 0x40;
        if !self.field_sync {
            value |= 0x80;
        }
        value
    }

    fn register_name(offset: u32) -> &'static str {
        match offset & 3 {
            0 => "Port A",
            1 => "Port B",
            2 => "Port C",
            _ => "Control",
        }
    }
}

impl Device for Ppi {
    fn read(&mut self, offset: u32) -> u8 {
        let value = match offset & 3 {
            0 => self.port_a,
            1 => self.read_keyboard(),
            2 => self.read_port_c(),
            _ => 0xFF,
        };
        tracing::trace!(
            "[PPI] [RD] [{:<7}] [{:02X}] = {:02X}",
            Self::register_name(offset),
            offset,
            value
        );
        value
    }

    fn write(&mut self, offset: u32, value: u8) {
        tracing::trace!(
            "[PPI] [WR] [{:<7}] [{:02X}] = {:02X}",
            Self::register_name(offset),
            offset,
            value
        );
        match offset & 3 {
            0 => self.port_a = value,
            1 => self.port_b = value,
            2 => {
                let speaker = self.speaker_level();
                self.port_c = value;
                if speaker != self.speaker_level() {
                    tracing::trace!("[PPI] Speaker {}", self.speaker_level());
                }
            }
            _ => {
                if value & 0x80 != 0 {
                    // Mode set
                    self.control = value;
                } else {
                    // Port C bit set/reset
                    let bit = (value & 0x0E) >> 1;
                    if value & 0x01 == 0 {
                        self.port_c &= !(1 << bit);
                    } else {
                        self.port_c |= 1 << bit;
                    }
                }
            }
        }
    }

    fn peek(&self, offset: u32) -> Option<u8> {
        Some(match offset & 3 {
            0 => self.port_a,
            1 => self.read_keyboard(),
            2 => self.read_port_c(),
            _ => 0xFF,
        })
    }

    fn reset(&mut self) {
        self.port_a = 0;
        self.port_b = 0;
        self.port_c = 0;
        self.control = 0x9B;
        self.tone = false;
        self.tone_cycles = 0;
    }
}

impl Tickable for Ppi {
    /// Runs the 2.4 kHz tone generator that feeds port C bit 4.
    fn tick(&mut self, cycles: u32) {
        self.tone_cycles += cycles;
        while self.tone_cycles >= self.tone_half_period {
            self.tone_cycles -= self.tone_half_period;
            self.tone = !self.tone;
        }
    }
}

impl Default for Ppi {
    fn default() -> Self {
        Ppi {
            keyboard: KeyMatrix::new(12),
            port_a: 0,
            port_b: 0,
            port_c: 0,
            control: 0x9B, // All ports input after reset
            tone: false,
            tone_cycles: 0,
            tone_half_period: DEFAULT_CLOCK_HZ / (2 * TONE_HZ),
            cassette: false,
            field_sync: false,
        }
    }
}
