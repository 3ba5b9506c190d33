//! Error types for the Keyless SSL protocol engine.
//!
//! Each concern gets its own error enum so call sites can match narrowly;
//! the handful of variants that are ever allowed to reach the peer as an
//! `ERROR` item map onto [`ErrorKind`] through a `to_wire` method.

use thiserror::Error;

/// Wire error codes, carried as the single byte of an `ERROR` item.
///
/// `None` is an internal success sentinel and is never encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorKind {
    None = 0x00,
    CryptoFailed = 0x01,
    KeyNotFound = 0x02,
    Read = 0x03,
    VersionMismatch = 0x04,
    BadOpcode = 0x05,
    UnexpectedOpcode = 0x06,
    Format = 0x07,
    Internal = 0x08,
}

impl ErrorKind {
    pub fn from_wire(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => ErrorKind::None,
            0x01 => ErrorKind::CryptoFailed,
            0x02 => ErrorKind::KeyNotFound,
            0x03 => ErrorKind::Read,
            0x04 => ErrorKind::VersionMismatch,
            0x05 => ErrorKind::BadOpcode,
            0x06 => ErrorKind::UnexpectedOpcode,
            0x07 => ErrorKind::Format,
            0x08 => ErrorKind::Internal,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Framing/TLV errors raised by the codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("short header: need {need} bytes, got {got}")]
    ShortHeader { need: usize, got: usize },

    #[error("truncated item in payload")]
    TruncatedItem,

    #[error("duplicate tag {tag:#04x} in payload")]
    DuplicateTag { tag: u8 },

    #[error("{residual} residual byte(s) after parsing declared payload length")]
    ResidualBytes { residual: usize },

    #[error("declared payload length {len} exceeds hard cap {cap}")]
    PayloadTooLarge { len: usize, cap: usize },
}

impl CodecError {
    pub fn to_wire(&self) -> ErrorKind {
        ErrorKind::Format
    }
}

/// Errors raised while registering or looking up keys in the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate key digest during registration")]
    DuplicateDigest,

    #[error("no key registered for the given digest")]
    NotFound,
}

/// Errors raised by the RSA primitives themselves.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("signing operation failed: {reason}")]
    SigningFailed { reason: String },

    #[error("decryption operation failed: {reason}")]
    DecryptionFailed { reason: String },

    #[error("unsupported or malformed key material: {reason}")]
    InvalidKey { reason: String },
}

/// Errors surfaced by the op dispatcher; each maps to exactly one wire code.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("missing or unrecognized opcode")]
    BadOpcode,

    #[error("missing required item: {0}")]
    MissingItem(&'static str),

    #[error(transparent)]
    KeyNotFound(#[from] RegistryError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl DispatchError {
    pub fn to_wire(&self) -> ErrorKind {
        match self {
            DispatchError::BadOpcode => ErrorKind::BadOpcode,
            DispatchError::MissingItem(_) => ErrorKind::Format,
            DispatchError::KeyNotFound(_) => ErrorKind::KeyNotFound,
            DispatchError::Crypto(_) => ErrorKind::CryptoFailed,
        }
    }
}

/// Errors that tear a connection down without ever producing a wire `ERROR` item.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("peer closed the connection")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
