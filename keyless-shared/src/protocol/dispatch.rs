//! The op dispatcher: turns a validated header's item map into a response
//! payload, per the five-step contract in §4.3. Stateless — every input it
//! needs arrives as an argument, and its only side effect is the
//! underlying RSA operation.

use crate::codec::{ItemMap, TAG_DIGEST, TAG_OPCODE, TAG_PAYLOAD};
use crate::crypto::KeyRegistry;
use crate::error::DispatchError;
use crate::protocol::opcode::Opcode;

/// Runs one request through the dispatch contract and returns the response
/// payload bytes on success (signature, plaintext, or echoed ping body).
///
/// Callers turn `Err` into a wire `ERROR` item via [`DispatchError::to_wire`]
/// rather than tearing the connection down — every `DispatchError` variant
/// is a protocol-level error the peer is meant to see and recover from.
pub fn dispatch(registry: &KeyRegistry, items: &ItemMap) -> Result<Vec<u8>, DispatchError> {
    let opcode_byte = items
        .get(&TAG_OPCODE)
        .and_then(|v| v.first().copied())
        .ok_or(DispatchError::BadOpcode)?;
    let opcode = Opcode::from_byte(opcode_byte).ok_or(DispatchError::BadOpcode)?;

    let payload = items
        .get(&TAG_PAYLOAD)
        .ok_or(DispatchError::MissingItem("PAYLOAD"))?;

    if opcode == Opcode::Ping {
        return Ok(payload.clone());
    }

    let digest_bytes = items
        .get(&TAG_DIGEST)
        .ok_or(DispatchError::MissingItem("DIGEST"))?;
    let digest: [u8; 32] = digest_bytes
        .as_slice()
        .try_into()
        .map_err(|_| DispatchError::MissingItem("DIGEST"))?;

    let key = registry.find(&digest)?;

    let result = match opcode {
        Opcode::RsaDecrypt => crate::crypto::ops::decrypt(&key, payload),
        _ => {
            let algorithm = opcode
                .digest_algorithm()
                .expect("every non-ping, non-decrypt opcode names a digest algorithm");
            crate::crypto::ops::sign(&key, algorithm, payload)
        }
    };

    Ok(result?)
}
