//! RSA signing and decryption primitives, plus the modulus-digest helper
//! the registry indexes keys by.

use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest as _, Sha224, Sha256, Sha384, Sha512};

use crate::error::CryptoError;

/// The hash algorithm a signing opcode names. `Md5Sha1` is the unprefixed,
/// concatenated MD5+SHA1 digest used by the TLS 1.0/1.1 handshake; the rest
/// are ordinary named-hash RSASSA-PKCS1-v1.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5Sha1,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

/// Signs `digest` under `key` using the scheme named by `algorithm`.
///
/// `digest` must already be the raw hash output (or, for `Md5Sha1`, the
/// 36-byte MD5||SHA1 concatenation) — this function never hashes the
/// message itself, matching the wire protocol's "payload is already a
/// digest" contract.
pub fn sign(
    key: &RsaPrivateKey,
    algorithm: DigestAlgorithm,
    digest: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let scheme = match algorithm {
        DigestAlgorithm::Md5Sha1 => Pkcs1v15Sign::new_unprefixed(),
        DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
        DigestAlgorithm::Sha224 => Pkcs1v15Sign::new::<Sha224>(),
        DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
        DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
    };
    key.sign(scheme, digest)
        .map_err(|e| CryptoError::SigningFailed {
            reason: e.to_string(),
        })
}

/// Decrypts `ciphertext` under `key` using RSAES-PKCS1-v1.5.
///
/// The `rsa` crate's PKCS1v15 decryption path is constant-time with
/// respect to padding validity, so padding failures and other crypto
/// failures are indistinguishable to a timing observer here.
pub fn decrypt(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    key.decrypt(Pkcs1v15Encrypt, ciphertext)
        .map_err(|e| CryptoError::DecryptionFailed {
            reason: e.to_string(),
        })
}

/// SHA-256 of the DER encoding of the public modulus, i.e. the digest this
/// protocol uses to identify a key (see the GLOSSARY).
///
/// The modulus is encoded as a single ASN.1 `INTEGER`: big-endian bytes,
/// prefixed with a `0x00` if the high bit of the first byte is set (so it
/// is never mistaken for a negative number).
pub fn sha256_of_modulus_der(public_key: &RsaPublicKey) -> [u8; 32] {
    let modulus_be = public_key.n().to_bytes_be();
    let der = encode_der_integer(&modulus_be);
    let mut hasher = Sha256::new();
    hasher.update(&der);
    hasher.finalize().into()
}

fn encode_der_integer(magnitude_be: &[u8]) -> Vec<u8> {
    let needs_pad = magnitude_be.first().copied().unwrap_or(0) & 0x80 != 0;
    let content_len = magnitude_be.len() + if needs_pad { 1 } else { 0 };

    let mut out = vec![0x02u8];
    out.extend(encode_der_length(content_len));
    if needs_pad {
        out.push(0x00);
    }
    out.extend_from_slice(magnitude_be);
    out
}

fn encode_der_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else {
        let len_bytes = len.to_be_bytes();
        let first_significant = len_bytes.iter().position(|&b| b != 0).unwrap_or(len_bytes.len() - 1);
        let trimmed = &len_bytes[first_significant..];
        let mut out = Vec::with_capacity(trimmed.len() + 1);
        out.push(0x80 | trimmed.len() as u8);
        out.extend_from_slice(trimmed);
        out
    }
}
