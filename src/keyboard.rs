use crate::address_space::Device;

/// An active-low key matrix: a cleared bit in a row means the key at that
/// column is held down.
#[derive(Debug, Clone)]
pub struct KeyMatrix {
    rows: Vec<u8>,
    mappings: Vec<Mapping>,
}

impl KeyMatrix {
    pub fn new(rows: usize) -> Self {
        KeyMatrix {
            rows: vec![0xFF; rows],
            mappings: Vec::new(),
        }
    }

    /// The Compukit UK101 layout, keyed by DOM `KeyboardEvent.code` names.
    pub fn uk101() -> Self {
        KeyMatrix {
            rows: vec![0xFF; 8],
            mappings: uk101_mapping().to_vec(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, row: usize) -> u8 {
        self.rows.get(row).copied().unwrap_or(0xFF)
    }

    pub fn press(&mut self, row: usize, col: u8) {
        if let Some(bits) = self.rows.get_mut(row) {
            *bits &= !(1 << (col & 7));
        }
    }

    pub fn release(&mut self, row: usize, col: u8) {
        if let Some(bits) = self.rows.get_mut(row) {
            *bits |= 1 << (col & 7);
        }
    }

    pub fn release_all(&mut self) {
        self.rows.iter_mut().for_each(|bits| *bits = 0xFF);
    }

    pub fn key_down(&mut self, key: &str) {
        if let Some((row, col)) = self.lookup(key) {
            self.press(row, col);
        } else {
            tracing::trace!("[KBD] Unmapped key {}", key);
        }
    }

    pub fn key_up(&mut self, key: &str) {
        if let Some((row, col)) = self.lookup(key) {
            self.release(row, col);
        }
    }

    fn lookup(&self, key: &str) -> Option<(usize, u8)> {
        self.mappings
            .iter()
            .find(|m| m.key == key)
            .map(|m| (m.row as usize, m.col))
    }
}

/// UK101 keyboard port: writing latches the row select lines (active low),
/// reading returns the AND of every selected row.
#[derive(Debug, Clone)]
pub struct RowLatchKeyboard {
    pub matrix: KeyMatrix,
    row_latch: u8,
}

impl RowLatchKeyboard {
    pub fn new(matrix: KeyMatrix) -> Self {
        Self {
            matrix,
            row_latch: 0xFF,
        }
    }

    pub fn row_latch(&self) -> u8 {
        self.row_latch
    }

    fn columns(&self) -> u8 {
        (0..8)
            .filter(|row| self.row_latch & (1 << row) == 0)
            .fold(0xFF, |acc, row| acc & self.matrix.row(row))
    }
}

impl Device for RowLatchKeyboard {
    fn read(&mut self, _offset: u32) -> u8 {
        let value = self.columns();
        tracing::trace!("[KBD] Rows {:02X} -> {:02X}", self.row_latch, value);
        value
    }

    fn write(&mut self, _offset: u32, value: u8) {
        self.row_latch = value;
    }

    fn peek(&self, _offset: u32) -> Option<u8> {
        Some(self.columns())
    }

    fn reset(&mut self) {
        self.row_latch = 0xFF;
    }
}

/// MC-10 style keyboard: offset 0 is the column strobe latch, offset 1 reports
/// one bit per row, set when no key is down in any strobed column.
#[derive(Debug, Clone)]
pub struct StrobeKeyboard {
    pub matrix: KeyMatrix,
    strobe: u8,
    control: u8,
}

impl StrobeKeyboard {
    pub fn new() -> Self {
        Self {
            matrix: KeyMatrix::new(6),
            strobe: 0x00,
            control: 0x00,
        }
    }

    /// Last value written to the row port, which drives video and sound on the MC-10.
    pub fn control(&self) -> u8 {
        self.control
    }

    fn status(&self) -> u8 {
        (0..6).fold(0x40, |acc, row| {
            if self.matrix.row(row) | self.strobe == 0xFF {
                acc | (1 << row)
            } else {
                acc
            }
        })
    }
}

impl Default for StrobeKeyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for StrobeKeyboard {
    fn read(&mut self, offset: u32) -> u8 {
        match offset {
            0 => self.strobe,
            _ => self.status(),
        }
    }

    fn write(&mut self, offset: u32, value: u8) {
        match offset {
            0 => self.strobe = value,
            _ => self.control = value,
        }
    }

    fn peek(&self, offset: u32) -> Option<u8> {
        Some(match offset {
            0 => self.strobe,
            _ => self.status(),
        })
    }

    fn reset(&mut self) {
        self.strobe = 0x00;
        self.control = 0x00;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Mapping {
    key: String,
    row: u8,
    col: u8,
}

impl Mapping {
    pub fn new(key: &str, row: u8, col: u8) -> Self {
        Mapping {
            key: key.to_string(),
            row,
            col,
        }
    }
}

fn uk101_mapping() -> [Mapping; 52] {
    [
        Mapping::new("CapsLock", 0, 0),
        Mapping::new("ShiftRight", 0, 1),
        Mapping::new("ShiftLeft", 0, 2),
        Mapping::new("Escape", 0, 5),
        Mapping::new("ControlLeft", 0, 6),
        Mapping::new("Backslash", 0, 7),
        Mapping::new("KeyP", 1, 1),
        Mapping::new("Semicolon", 1, 2),
        Mapping::new("Slash", 1, 3),
        Mapping::new("Space", 1, 4),
        Mapping::new("KeyZ", 1, 5),
        Mapping::new("KeyA", 1, 6),
        Mapping::new("KeyQ", 1, 7),
        Mapping::new("Comma", 2, 1),
        Mapping::new("KeyM", 2, 2),
        Mapping::new("KeyN", 2, 3),
        Mapping::new("KeyB", 2, 4),
        Mapping::new("KeyV", 2, 5),
        Mapping::new("KeyC", 2, 6),
        Mapping::new("KeyX", 2, 7),
        Mapping::new("KeyK", 3, 1),
        Mapping::new("KeyJ", 3, 2),
        Mapping::new("KeyH", 3, 3),
        Mapping::new("KeyG", 3, 4),
        Mapping::new("KeyF", 3, 5),
        Mapping::new("KeyD", 3, 6),
        Mapping::new("KeyS", 3, 7),
        Mapping::new("KeyI", 4, 1),
        Mapping::new("KeyU", 4, 2),
        Mapping::new("KeyY", 4, 3),
        Mapping::new("KeyT", 4, 4),
        Mapping::new("KeyR", 4, 5),
        Mapping::new("KeyE", 4, 6),
        Mapping::new("KeyW", 4, 7),
        Mapping::new("Enter", 5, 3),
        Mapping::new("BracketLeft", 5, 4),
        Mapping::new("KeyO", 5, 5),
        Mapping::new("KeyL", 5, 6),
        Mapping::new("Period", 5, 7),
        Mapping::new("Backspace", 6, 2),
        Mapping::new("Equal", 6, 3),
        Mapping::new("Minus", 6, 4),
        Mapping::new("Digit0", 6, 5),
        Mapping::new("Digit9", 6, 6),
        Mapping::new("Digit8", 6, 7),
        Mapping::new("Digit7", 7, 1),
        Mapping::new("Digit6", 7, 2),
        Mapping::new("Digit5", 7, 3),
        Mapping::new("Digit4", 7, 4),
        Mapping::new("Digit3", 7, 5),
        Mapping::new("Digit2", 7, 6),
        Mapping::new("Digit1", 7, 7),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_latch_selects_rows() {
        let mut kbd = RowLatchKeyboard::new(KeyMatrix::uk101());
        kbd.matrix.key_down("KeyA");
        kbd.matrix.key_down("Digit5");

        // Nothing selected
        assert_eq!(kbd.read(0), 0xFF);

        // Row 1 only
        kbd.write(0, !0x02);
        assert_eq!(kbd.read(0), !0x40);

        // Rows 1 and 7 are combined
        kbd.write(0, !0x82);
        assert_eq!(kbd.read(0), !0x48);

        kbd.matrix.key_up("KeyA");
        assert_eq!(kbd.read(0), !0x08);
    }

    #[test]
    fn test_strobe_keyboard_reports_rows() {
        let mut kbd = StrobeKeyboard::new();
        kbd.matrix.press(2, 3);

        // No column strobed
        kbd.write(0, 0xFF);
        assert_eq!(kbd.read(1), 0x7F);

        // Strobe column 3
        kbd.write(0, !0x08);
        assert_eq!(kbd.read(1), 0x7F & !0x04);
        assert_eq!(kbd.read(0), !0x08);
    }
}
