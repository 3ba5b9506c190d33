use super::*;

fn sample_header() -> Header {
    Header {
        version_major: 1,
        version_minor: 0,
        length: 42,
        id: 0xDEADBEEF,
    }
}

#[test]
fn header_round_trip() {
    let header = sample_header();
    let bytes = encode_header(&header);
    assert_eq!(parse_header(&bytes).unwrap(), header);
}

#[test]
fn header_short_read_is_format_error() {
    let err = parse_header(&[1, 0, 0]).unwrap_err();
    assert_eq!(
        err,
        CodecError::ShortHeader {
            need: HEADER_LEN,
            got: 3
        }
    );
}

#[test]
fn items_round_trip() {
    let mut items = ItemMap::new();
    items.insert(TAG_OPCODE, vec![0x05]);
    items.insert(TAG_DIGEST, vec![0xAB; 32]);
    items.insert(TAG_PAYLOAD, b"hello".to_vec());

    let encoded = encode_items(&items);
    assert_eq!(parse_items(&encoded).unwrap(), items);
}

#[test]
fn empty_payload_parses_to_empty_map() {
    assert_eq!(parse_items(&[]).unwrap(), ItemMap::new());
}

#[test]
fn truncated_item_header_is_an_error() {
    assert_eq!(parse_items(&[0x01, 0x00]).unwrap_err(), CodecError::TruncatedItem);
}

#[test]
fn truncated_item_value_is_an_error() {
    // declares a 10-byte value but only supplies 2
    assert_eq!(
        parse_items(&[0x01, 0x00, 0x0A, 0xAA, 0xBB]).unwrap_err(),
        CodecError::TruncatedItem
    );
}

#[test]
fn duplicate_tag_is_an_error() {
    let mut bytes = vec![0x11, 0x00, 0x01, 0x05];
    bytes.extend_from_slice(&[0x11, 0x00, 0x01, 0x06]);
    assert_eq!(
        parse_items(&bytes).unwrap_err(),
        CodecError::DuplicateTag { tag: TAG_OPCODE }
    );
}

#[test]
fn residual_bytes_after_last_item_is_an_error() {
    // one valid zero-length item followed by a single stray byte
    let bytes = vec![0x11, 0x00, 0x00, 0xFF];
    match parse_items(&bytes).unwrap_err() {
        CodecError::TruncatedItem => {}
        other => panic!("expected truncated item, got {other:?}"),
    }
}

#[test]
fn payload_len_cap_is_enforced() {
    assert!(check_payload_len(MAX_PAYLOAD_LEN).is_ok());
    assert_eq!(
        check_payload_len(MAX_PAYLOAD_LEN + 1).unwrap_err(),
        CodecError::PayloadTooLarge {
            len: MAX_PAYLOAD_LEN + 1,
            cap: MAX_PAYLOAD_LEN
        }
    );
}

#[test]
fn encode_response_success_carries_response_item_only() {
    let bytes = encode_response(1, 0, 7, Outcome::Response(b"pong".to_vec()));
    let header = parse_header(&bytes[..HEADER_LEN]).unwrap();
    assert_eq!(header.id, 7);
    let items = parse_items(&bytes[HEADER_LEN..]).unwrap();
    assert_eq!(items.get(&TAG_RESPONSE), Some(&b"pong".to_vec()));
    assert!(!items.contains_key(&TAG_ERROR));
}

#[test]
fn encode_response_error_carries_error_item_only() {
    let bytes = encode_response(1, 0, 7, Outcome::Error(0x02));
    let items = parse_items(&bytes[HEADER_LEN..]).unwrap();
    assert_eq!(items.get(&TAG_ERROR), Some(&vec![0x02]));
    assert!(!items.contains_key(&TAG_RESPONSE));
}
