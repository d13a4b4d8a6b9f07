//! JSON machine descriptions.
//!
//! ```json
//! {
//!   "name": "uk101",
//!   "timing": { "clock_hz": 1000000, "cycles_per_line": 64, "lines_per_frame": 312 },
//!   "illegal_opcode": "Nop",
//!   "program": [
//!     { "name": "ram", "kind": "ram", "start": 0, "end": 65535 },
//!     { "name": "bios", "kind": "rom", "start": 1044480, "end": 1048575, "path": "bios.bin" }
//!   ]
//! }
//! ```
//!
//! Devices are not described here; they are attached with
//! [`crate::machine::MachineBuilder::device`] after the description is applied.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    address_space::{RegionDescriptor, RegionKind},
    clock::Timing,
    cpu::IllegalOpcodePolicy,
    error::ConfigError,
    memory::Rom,
    registers::Register,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub name: String,
    pub timing: Timing,
    /// Upper bound for one CPU slice; defaults to one line.
    pub slice_cycles: Option<u32>,
    pub illegal_opcode: IllegalOpcodePolicy,
    /// Open bus value of the program space.
    pub fill: u8,
    pub program: Vec<RegionConfig>,
    pub io: Vec<RegionConfig>,
    /// Register values applied after every reset.
    pub reset: Vec<RegisterOverride>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: "v30mz".to_string(),
            timing: Timing::default(),
            slice_cycles: None,
            illegal_opcode: IllegalOpcodePolicy::default(),
            fill: 0xFF,
            program: Vec::new(),
            io: Vec::new(),
            reset: Vec::new(),
        }
    }
}

impl MachineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOverride {
    pub register: Register,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,
    pub start: u32,
    pub end: u32,
    #[serde(default)]
    pub mirror: u32,
    #[serde(default)]
    pub priority: i32,
    #[serde(flatten)]
    pub kind: RegionKindConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RegionKindConfig {
    Ram,
    /// Either a file path or inline bytes; a missing tail reads as `0xFF`.
    Rom {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        data: Vec<u8>,
    },
    Nop,
}

impl RegionConfig {
    /// Builds the router descriptor, reading ROM images relative to `base`.
    pub fn descriptor(&self, base: Option<&Path>) -> Result<RegionDescriptor, ConfigError> {
        let size = self.end.saturating_sub(self.start) as usize + 1;
        let kind = match &self.kind {
            RegionKindConfig::Ram => {
                return Ok(RegionDescriptor::ram(&self.name, self.start, self.end)
                    .with_mirror(self.mirror)
                    .with_priority(self.priority))
            }
            RegionKindConfig::Rom {
                path: Some(path), ..
            } => {
                let full = match base {
                    Some(base) => base.join(path),
                    None => Path::new(path).to_path_buf(),
                };
                let image = fs::read(&full).map_err(|source| ConfigError::Rom {
                    path: full.display().to_string(),
                    source,
                })?;
                tracing::debug!("[CFG] {} loaded {} bytes from {}", self.name, image.len(), path);
                RegionKind::Rom(Rom::new(&image, size))
            }
            RegionKindConfig::Rom { path: None, data } => RegionKind::Rom(Rom::new(data, size)),
            RegionKindConfig::Nop => RegionKind::Nop,
        };

        Ok(RegionDescriptor::new(&self.name, self.start, self.end, kind)
            .with_mirror(self.mirror)
            .with_priority(self.priority))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_description() {
        let config = MachineConfig::from_json(
            r#"{
                "name": "test",
                "illegal_opcode": { "Trap": 6 },
                "program": [
                    { "name": "ram", "kind": "ram", "start": 0, "end": 1023 },
                    { "name": "boot", "kind": "rom", "start": 1048560, "end": 1048575,
                      "data": [234, 0, 0, 0, 0], "priority": 1 },
                    { "name": "hole", "kind": "nop", "start": 512, "end": 767, "mirror": 255 }
                ],
                "reset": [ { "register": "Sp", "value": 1024 } ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.illegal_opcode, IllegalOpcodePolicy::Trap(6));
        assert_eq!(config.fill, 0xFF);
        assert_eq!(config.program.len(), 3);
        assert_eq!(config.program[2].mirror, 0xFF);
        assert!(matches!(
            config.program[1].kind,
            RegionKindConfig::Rom { path: None, .. }
        ));
        assert_eq!(config.reset[0].register, Register::Sp);
    }

    #[test]
    fn test_missing_rom_file() {
        let region = RegionConfig {
            name: "bios".to_string(),
            start: 0xF0000,
            end: 0xFFFFF,
            mirror: 0,
            priority: 0,
            kind: RegionKindConfig::Rom {
                path: Some("does-not-exist.bin".to_string()),
                data: Vec::new(),
            },
        };
        assert!(matches!(
            region.descriptor(None),
            Err(ConfigError::Rom { .. })
        ));
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            MachineConfig::from_json("{ \"program\": 5 }"),
            Err(ConfigError::Json(_))
        ));
    }
}
