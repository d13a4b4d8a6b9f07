use thiserror::Error;

/// Errors raised while building a memory map. Accesses themselves never fail.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("region {name}: start {start:#X} is past end {end:#X}")]
    InvertedRange { name: String, start: u32, end: u32 },

    #[error("region {name}: end {end:#X} does not fit a {bits}-bit address space")]
    OutOfSpace { name: String, end: u32, bits: u8 },

    #[error("region {name}: backing store holds {actual} bytes, range needs {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported address width of {0} bits")]
    UnsupportedWidth(u8),
}

/// Errors raised when a host-supplied program image cannot be used.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("image is {actual} bytes, shorter than the {expected} byte header")]
    TruncatedHeader { expected: usize, actual: usize },

    #[error("image declares {declared} data bytes but only {actual} follow the header")]
    TruncatedData { declared: usize, actual: usize },

    #[error("image does not fit at {address:#X} ({len} bytes)")]
    OutOfRange { address: u32, len: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while turning a [`crate::config::MachineConfig`] into a machine.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid machine description: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not read ROM image {path}: {source}")]
    Rom {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Map(#[from] MapError),
}
