//! Error types, one enum per concern, so call sites match narrowly instead
//! of against one undifferentiated error type. Every variant that may
//! reach the peer maps to exactly one [`types::ErrorKind`] wire code.

pub mod types;

pub use types::{
    CodecError, ConnectionError, CryptoError, DispatchError, ErrorKind, RegistryError,
};