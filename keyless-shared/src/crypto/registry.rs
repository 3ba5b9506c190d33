//! The process-wide key registry: built once at startup from the
//! configured private-key directory, then shared read-only across workers
//! for the remainder of the process lifetime (invariant I5).

use std::collections::HashMap;
use std::sync::Arc;

use rsa::RsaPrivateKey;

use crate::crypto::ops::sha256_of_modulus_der;
use crate::error::RegistryError;

/// Read-only once built. Cheaply `Clone`-able (an `Arc` around the map) so
/// every worker thread can hold its own handle without contention.
#[derive(Clone, Default)]
pub struct KeyRegistry {
    entries: Arc<HashMap<[u8; 32], Arc<RsaPrivateKey>>>,
}

impl KeyRegistry {
    /// Looks up the private key registered for `digest`.
    pub fn find(&self, digest: &[u8; 32]) -> Result<Arc<RsaPrivateKey>, RegistryError> {
        self.entries
            .get(digest)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accumulates keys at startup; duplicate digests are rejected immediately
/// rather than silently overwriting an earlier registration.
#[derive(Default)]
pub struct KeyRegistryBuilder {
    entries: HashMap<[u8; 32], Arc<RsaPrivateKey>>,
}

impl KeyRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `private_key`, computing its digest from the matching
    /// public key. Fails if a key with the same digest is already
    /// registered.
    pub fn register(&mut self, private_key: RsaPrivateKey) -> Result<[u8; 32], RegistryError> {
        let digest = sha256_of_modulus_der(&private_key.to_public_key());
        if self.entries.contains_key(&digest) {
            return Err(RegistryError::DuplicateDigest);
        }
        self.entries.insert(digest, Arc::new(private_key));
        Ok(digest)
    }

    pub fn build(self) -> KeyRegistry {
        KeyRegistry {
            entries: Arc::new(self.entries),
        }
    }
}
