use thiserror::Error;

/// Cartridge variants that are recognised from the header but not emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedMapper {
    Mmm01,
    Mbc6,
    Mbc7,
    Tama5,
    EmsMulticart,
    BungMulticart,
}

impl std::fmt::Display for UnsupportedMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UnsupportedMapper::Mmm01 => "MMM01",
            UnsupportedMapper::Mbc6 => "MBC6",
            UnsupportedMapper::Mbc7 => "MBC7",
            UnsupportedMapper::Tama5 => "TAMA5",
            UnsupportedMapper::EmsMulticart => "EMS multicart",
            UnsupportedMapper::BungMulticart => "Bung multicart",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read cartridge image: {0}")]
    Io(#[from] std::io::Error),

    #[error("cartridge image is shorter than its header")]
    TruncatedHeader,

    #[error("unknown cartridge type {0:#04x}")]
    UnknownMapper(u8),

    #[error("unsupported cartridge type: {0}")]
    Unsupported(UnsupportedMapper),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImportError {
    #[error("data has no BESS trailer")]
    NotBess,

    #[error("BESS data ends inside a block")]
    Truncated,

    #[error("unsupported BESS major revision {0}")]
    BadRevision(u16),

    #[error("BESS model {found:?} does not match the running model {expected:?}")]
    WrongModel { expected: char, found: char },

    #[error("undefined BESS execution state {0}")]
    BadExecutionState(u8),

    #[error("malformed BESS MBC block")]
    BadMbcBlock,

    #[error("BESS data has no END block")]
    MissingEnd,

    #[error("BESS data has no CORE block")]
    MissingCore,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("state image has a bad magic number")]
    BadMagic,

    #[error("state image version {0} is newer than supported")]
    Version(u16),

    #[error("state field mismatch: expected {expected}, found {found}")]
    FieldMismatch { expected: String, found: String },

    #[error("state image is truncated in field {0}")]
    Truncated(String),

    #[error("state image has {0} bytes after its last field")]
    TrailingData(usize),

    #[error("no cartridge is loaded")]
    NotLoaded,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}
