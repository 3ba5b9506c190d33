//! TLS bootstrap (§6, §10.3): builds the `rustls` server configuration
//! this process terminates connections with — server certificate, client
//! certificate verification (mandatory, matching
//! `SSL_VERIFY_PEER | SSL_VERIFY_FAIL_IF_NO_PEER_CERT` at verify depth 1),
//! TLS 1.2 only, and the configured cipher suite set.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig as RustlsServerConfig, SupportedCipherSuite};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

use crate::config::ServerConfig;

#[derive(Error, Debug)]
pub enum TlsBootstrapError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable certificate found in {path}")]
    NoCertificates { path: String },

    #[error("no usable RSA private key (PKCS#8 or PKCS#1) found in {path}")]
    NoPrivateKey { path: String },

    #[error("unrecognized TLS cipher suite name: {0}")]
    UnknownCipherSuite(String),

    #[error("failed to build client certificate verifier: {0}")]
    ClientVerifier(String),

    #[error(transparent)]
    ServerConfig(#[from] rustls::Error),
}

/// Builds the server-side TLS acceptor from `config`. Every connection
/// this acceptor hands back has already been verified against the
/// configured client CA — there is no path to an unauthenticated stream.
pub fn build_acceptor(config: &ServerConfig) -> Result<TlsAcceptor, TlsBootstrapError> {
    let cert_chain = load_certs(&config.server_cert)?;
    let private_key = load_private_key(&config.server_key)?;
    let client_ca_store = load_root_store(&config.client_ca)?;
    let cipher_suites = resolve_cipher_suites(&config.ciphers)?;

    let client_verifier = WebPkiClientVerifier::builder(Arc::new(client_ca_store))
        .build()
        .map_err(|e| TlsBootstrapError::ClientVerifier(e.to_string()))?;

    let provider = Arc::new(CryptoProvider {
        cipher_suites,
        ..rustls::crypto::ring::default_provider()
    });

    let server_config = RustlsServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12])?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(cert_chain, private_key)?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsBootstrapError> {
    let file = File::open(path).map_err(|source| TlsBootstrapError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut BufReader::new(file)).collect();
    let certs = certs.map_err(|source| TlsBootstrapError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if certs.is_empty() {
        return Err(TlsBootstrapError::NoCertificates {
            path: path.display().to_string(),
        });
    }
    Ok(certs)
}

/// Tries PKCS#8 first, falls back to traditional PKCS#1 RSA PEM — the same
/// fallback order the private-key-directory loader uses (§10.4).
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsBootstrapError> {
    let open = || {
        File::open(path).map_err(|source| TlsBootstrapError::Io {
            path: path.display().to_string(),
            source,
        })
    };

    let pkcs8: Result<Vec<_>, _> =
        rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(open()?)).collect();
    if let Ok(keys) = pkcs8 {
        if let Some(key) = keys.into_iter().next() {
            return Ok(PrivateKeyDer::Pkcs8(key));
        }
    }

    let pkcs1: Result<Vec<_>, _> =
        rustls_pemfile::rsa_private_keys(&mut BufReader::new(open()?)).collect();
    if let Ok(keys) = pkcs1 {
        if let Some(key) = keys.into_iter().next() {
            return Ok(PrivateKeyDer::Pkcs1(key));
        }
    }

    Err(TlsBootstrapError::NoPrivateKey {
        path: path.display().to_string(),
    })
}

fn load_root_store(path: &Path) -> Result<RootCertStore, TlsBootstrapError> {
    let certs = load_certs(path)?;
    let mut store = RootCertStore::empty();
    for cert in certs {
        store.add(cert).map_err(TlsBootstrapError::ServerConfig)?;
    }
    Ok(store)
}

/// Maps the configured cipher suite names onto the suites the `ring`
/// crypto provider actually supports. Applied as-is: a name that does not
/// match a supported suite is a startup error, not a silent skip.
fn resolve_cipher_suites(names: &[String]) -> Result<Vec<SupportedCipherSuite>, TlsBootstrapError> {
    let available = rustls::crypto::ring::default_provider().cipher_suites;
    names
        .iter()
        .map(|name| {
            available
                .iter()
                .find(|suite| cipher_suite_name(suite) == *name)
                .copied()
                .ok_or_else(|| TlsBootstrapError::UnknownCipherSuite(name.clone()))
        })
        .collect()
}

fn cipher_suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use rcgen::{CertificateParams, KeyPair};
    use tempfile::TempDir;

    /// Generates a CA and a server leaf cert signed by it, writing both as
    /// PEM to temp files so [`build_acceptor`] can load them the same way
    /// it would load operator-supplied material.
    struct TestPki {
        dir: TempDir,
        ca_path: std::path::PathBuf,
        server_cert_path: std::path::PathBuf,
        server_key_path: std::path::PathBuf,
    }

    fn write_pem(dir: &Path, name: &str, pem: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(pem.as_bytes()).unwrap();
        path
    }

    fn build_test_pki() -> TestPki {
        let dir = TempDir::new().unwrap();

        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let server_key = KeyPair::generate().unwrap();
        let server_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let server_cert = server_params
            .signed_by(&server_key, &ca_cert, &ca_key)
            .unwrap();

        let ca_path = write_pem(dir.path(), "ca.pem", &ca_cert.pem());
        let server_cert_path = write_pem(dir.path(), "server.pem", &server_cert.pem());
        let server_key_path =
            write_pem(dir.path(), "server-key.pem", &server_key.serialize_pem());

        TestPki {
            dir,
            ca_path,
            server_cert_path,
            server_key_path,
        }
    }

    fn base_config(pki: &TestPki) -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            server_cert: pki.server_cert_path.clone(),
            server_key: pki.server_key_path.clone(),
            client_ca: pki.ca_path.clone(),
            key_directory: pki.dir.path().to_path_buf(),
            ciphers: vec!["TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384".to_string()],
            workers: 1,
            pid_file: None,
            silent: false,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn builds_acceptor_from_valid_material() {
        let pki = build_test_pki();
        let config = base_config(&pki);
        build_acceptor(&config).expect("acceptor should build from valid PKI material");
    }

    #[test]
    fn unknown_cipher_suite_name_is_rejected() {
        let pki = build_test_pki();
        let mut config = base_config(&pki);
        config.ciphers = vec!["NOT_A_REAL_SUITE".to_string()];
        let err = build_acceptor(&config).unwrap_err();
        assert!(matches!(err, TlsBootstrapError::UnknownCipherSuite(_)));
    }

    #[test]
    fn missing_certificate_file_is_rejected() {
        let pki = build_test_pki();
        let mut config = base_config(&pki);
        config.server_cert = pki.dir.path().join("does-not-exist.pem");
        let err = build_acceptor(&config).unwrap_err();
        assert!(matches!(err, TlsBootstrapError::Io { .. }));
    }
}
