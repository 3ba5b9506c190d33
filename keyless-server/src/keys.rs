//! Private-key directory loading (§6, §10.4): scans a directory for
//! `*.key` files, parses each as an RSA private key, and registers it in
//! the digest-keyed [`KeyRegistry`]. A duplicate digest, an unparseable
//! file, or an empty directory is a startup error — matching the
//! `fatal_error` calls the reference source makes for the equivalent
//! conditions.

use std::fs;
use std::path::{Path, PathBuf};

use keyless_shared::crypto::{KeyRegistry, KeyRegistryBuilder};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyLoadError {
    #[error("failed to glob key directory {dir}: {source}")]
    Glob {
        dir: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to read key file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a valid PKCS#8 or PKCS#1 RSA private key")]
    Unparseable { path: String },

    #[error("key directory {dir} contains no *.key files")]
    EmptyDirectory { dir: String },

    #[error("duplicate key digest registering {path} (same modulus as an already-loaded key)")]
    DuplicateDigest { path: String },
}

/// Loads every `*.key` file directly under `dir` and builds a registry
/// from them. The leaf basename of each file is advisory only (§6) — it is
/// logged but plays no role in key selection, which is always by digest.
pub fn load_key_registry(dir: &Path) -> Result<KeyRegistry, KeyLoadError> {
    let pattern = dir.join("*.key");
    let pattern_str = pattern.to_string_lossy().into_owned();

    let paths: Vec<PathBuf> = glob::glob(&pattern_str)
        .map_err(|source| KeyLoadError::Glob {
            dir: dir.display().to_string(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .collect();

    if paths.is_empty() {
        return Err(KeyLoadError::EmptyDirectory {
            dir: dir.display().to_string(),
        });
    }

    let mut builder = KeyRegistryBuilder::new();
    for path in &paths {
        let key = parse_rsa_private_key(path)?;
        let digest = builder
            .register(key)
            .map_err(|_| KeyLoadError::DuplicateDigest {
                path: path.display().to_string(),
            })?;
        log::info!(
            "loaded key {} (digest {})",
            path.display(),
            hex_digest(&digest)
        );
    }

    Ok(builder.build())
}

/// Tries PKCS#8 PEM first, then falls back to traditional PKCS#1 RSA PEM —
/// the same order [`crate::tls::load_private_key`] uses for the server's
/// own key.
fn parse_rsa_private_key(path: &Path) -> Result<RsaPrivateKey, KeyLoadError> {
    let pem = fs::read_to_string(path).map_err(|source| KeyLoadError::Read {
        path: path.display().to_string(),
        source,
    })?;

    if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(&pem) {
        return Ok(key);
    }
    if let Ok(key) = RsaPrivateKey::from_pkcs1_pem(&pem) {
        return Ok(key);
    }

    Err(KeyLoadError::Unparseable {
        path: path.display().to_string(),
    })
}

fn hex_digest(digest: &[u8; 32]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
