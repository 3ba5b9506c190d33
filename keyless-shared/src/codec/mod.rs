//! Wire framing for the keyless protocol: an 8-byte header followed by a
//! TLV-encoded item stream.
//!
//! `parse_header`/`parse_items` turn bytes into structured values;
//! `encode_header`/`encode_items`/`encode_response` do the reverse. Both
//! directions agree on byte order (big-endian) and on the tag constants
//! below, so `parse_items(encode_items(m)) == m` for any map this module
//! produced itself (see the round-trip tests).

use std::collections::BTreeMap;

use crate::error::CodecError;

/// Length of the fixed header, in bytes.
pub const HEADER_LEN: usize = 8;

/// Declared payload lengths above this are rejected as `FORMAT` before any
/// buffer is allocated for them.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

pub const TAG_DIGEST: u8 = 0x01;
pub const TAG_SNI: u8 = 0x02;
pub const TAG_CLIENT_IP: u8 = 0x03;
pub const TAG_OPCODE: u8 = 0x11;
pub const TAG_PAYLOAD: u8 = 0x12;
pub const TAG_RESPONSE: u8 = 0xF0;
pub const TAG_ERROR: u8 = 0xFF;

/// The 8-byte message header, already validated for length but not for
/// protocol version (that is a dispatch concern, not a framing one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version_major: u8,
    pub version_minor: u8,
    pub length: u16,
    pub id: u32,
}

/// An ordered set of TLV items, keyed by tag. Tags are plain `u8`s rather
/// than a closed enum: unrecognized tags parse successfully and are simply
/// ignored by the dispatcher, matching §3's framing/dispatch split.
pub type ItemMap = BTreeMap<u8, Vec<u8>>;

/// Parses the fixed 8-byte header. Any short read is `ShortHeader`.
pub fn parse_header(bytes: &[u8]) -> Result<Header, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::ShortHeader {
            need: HEADER_LEN,
            got: bytes.len(),
        });
    }
    let length = u16::from_be_bytes([bytes[2], bytes[3]]);
    let id = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    Ok(Header {
        version_major: bytes[0],
        version_minor: bytes[1],
        length,
        id,
    })
}

/// Encodes a header back to its 8-byte wire form.
pub fn encode_header(header: &Header) -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    out[0] = header.version_major;
    out[1] = header.version_minor;
    out[2..4].copy_from_slice(&header.length.to_be_bytes());
    out[4..8].copy_from_slice(&header.id.to_be_bytes());
    out
}

/// Consumes `bytes` as a sequence of TLV items until it is exhausted.
///
/// Fails on a truncated item, a duplicate tag, or residual bytes once an
/// item's declared length would overrun the buffer.
pub fn parse_items(bytes: &[u8]) -> Result<ItemMap, CodecError> {
    let mut items = ItemMap::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        if pos + 3 > bytes.len() {
            return Err(CodecError::TruncatedItem);
        }
        let tag = bytes[pos];
        let len = u16::from_be_bytes([bytes[pos + 1], bytes[pos + 2]]) as usize;
        let value_start = pos + 3;
        let value_end = value_start + len;
        if value_end > bytes.len() {
            return Err(CodecError::TruncatedItem);
        }
        if items
            .insert(tag, bytes[value_start..value_end].to_vec())
            .is_some()
        {
            return Err(CodecError::DuplicateTag { tag });
        }
        pos = value_end;
    }
    if pos != bytes.len() {
        return Err(CodecError::ResidualBytes {
            residual: bytes.len() - pos,
        });
    }
    Ok(items)
}

/// Encodes an item map back into its TLV byte stream, in tag order.
pub fn encode_items(items: &ItemMap) -> Vec<u8> {
    let mut out = Vec::new();
    for (tag, value) in items {
        out.push(*tag);
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value);
    }
    out
}

/// Checks a declared payload length against the hard cap from §4.1.
pub fn check_payload_len(len: usize) -> Result<(), CodecError> {
    if len > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge {
            len,
            cap: MAX_PAYLOAD_LEN,
        });
    }
    Ok(())
}

/// The outcome of a dispatched operation, as seen by the codec: either a
/// `RESPONSE` payload or a 1-byte `ERROR` code. Never both (invariant I4).
pub enum Outcome {
    Response(Vec<u8>),
    Error(u8),
}

/// Builds the full wire bytes for a response: header plus a single
/// `RESPONSE` or `ERROR` item, under the given `id`.
///
/// Pure and infallible for any `outcome` whose payload fits in a `u16`
/// length field, which callers are expected to uphold (responses are never
/// built from attacker-controlled sizes larger than [`MAX_PAYLOAD_LEN`]).
pub fn encode_response(version_major: u8, version_minor: u8, id: u32, outcome: Outcome) -> Vec<u8> {
    let mut items = ItemMap::new();
    match outcome {
        Outcome::Response(bytes) => {
            items.insert(TAG_RESPONSE, bytes);
        }
        Outcome::Error(code) => {
            items.insert(TAG_ERROR, vec![code]);
        }
    }
    let body = encode_items(&items);
    let header = Header {
        version_major,
        version_minor,
        length: body.len() as u16,
        id,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&encode_header(&header));
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests;
