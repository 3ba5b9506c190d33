//! RSA private-key operations and the digest-keyed registry that holds them.

pub mod ops;
pub mod registry;

pub use ops::DigestAlgorithm;
pub use registry::{KeyRegistry, KeyRegistryBuilder};
