//! Atom-style `.atm` quickload images.
//!
//! ```text
//! 0x00  name       16 bytes, NUL padded
//! 0x10  start      big endian, load address
//! 0x12  exec       big endian, entry point
//! 0x14  size       big endian, number of data bytes
//! 0x16  data
//! ```

use std::fmt;

use crate::error::LoadError;

pub const HEADER_LEN: usize = 22;
const NAME_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtmHeader {
    pub name: String,
    pub start: u16,
    pub exec: u16,
    pub size: u16,
}

impl AtmHeader {
    pub fn parse(image: &[u8]) -> Result<Self, LoadError> {
        if image.len() < HEADER_LEN {
            return Err(LoadError::TruncatedHeader {
                expected: HEADER_LEN,
                actual: image.len(),
            });
        }

        let name = image[..NAME_LEN]
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect::<String>();
        let be = |at: usize| u16::from_be_bytes([image[at], image[at + 1]]);

        Ok(Self {
            name,
            start: be(NAME_LEN),
            exec: be(NAME_LEN + 2),
            size: be(NAME_LEN + 4),
        })
    }
}

impl fmt::Display for AtmHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<16} start {:04X} exec {:04X} size {:04X}",
            self.name, self.start, self.exec, self.size
        )
    }
}

/// A parsed quickload image: header plus exactly `size` bytes of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quickload {
    pub header: AtmHeader,
    pub data: Vec<u8>,
}

impl Quickload {
    pub fn parse(image: &[u8]) -> Result<Self, LoadError> {
        let header = AtmHeader::parse(image)?;
        let body = &image[HEADER_LEN..];
        let declared = header.size as usize;
        if body.len() < declared {
            return Err(LoadError::TruncatedData {
                declared,
                actual: body.len(),
            });
        }
        if body.len() > declared {
            tracing::warn!(
                "[QLD] {} carries {} trailing bytes, ignored",
                header.name,
                body.len() - declared
            );
        }

        Ok(Self {
            data: body[..declared].to_vec(),
            header,
        })
    }

    pub fn from_file(path: &str) -> Result<Self, LoadError> {
        let image = std::fs::read(path)?;
        Self::parse(&image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str, start: u16, exec: u16, data: &[u8], declared: u16) -> Vec<u8> {
        let mut out = vec![0u8; NAME_LEN];
        out[..name.len()].copy_from_slice(name.as_bytes());
        out.extend_from_slice(&start.to_be_bytes());
        out.extend_from_slice(&exec.to_be_bytes());
        out.extend_from_slice(&declared.to_be_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn test_parse_header_and_data() {
        let raw = image("GAME", 0x2900, 0x2910, &[1, 2, 3], 3);
        let quickload = Quickload::parse(&raw).unwrap();
        assert_eq!(quickload.header.name, "GAME");
        assert_eq!(quickload.header.start, 0x2900);
        assert_eq!(quickload.header.exec, 0x2910);
        assert_eq!(quickload.data, vec![1, 2, 3]);
    }

    #[test]
    fn test_rejects_short_images() {
        assert!(matches!(
            Quickload::parse(&[0; 10]),
            Err(LoadError::TruncatedHeader {
                expected: 22,
                actual: 10
            })
        ));

        let raw = image("X", 0x2900, 0x2900, &[1, 2], 4);
        assert!(matches!(
            Quickload::parse(&raw),
            Err(LoadError::TruncatedData {
                declared: 4,
                actual: 2
            })
        ));
    }
}
