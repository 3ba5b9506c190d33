//! Opcode identity and the stateless op dispatcher built on top of the
//! codec and key registry.

pub mod dispatch;
pub mod opcode;

pub use dispatch::dispatch;
pub use opcode::Opcode;

/// The protocol major version this build speaks. Any request whose header
/// names a different `version_major` is rejected with `VERSION_MISMATCH`
/// (§4.4) rather than processed.
pub const VERSION_MAJOR: u8 = 1;

/// The protocol minor version echoed on outgoing response headers.
pub const VERSION_MINOR: u8 = 0;
