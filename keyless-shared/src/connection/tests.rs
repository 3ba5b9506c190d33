use rsa::RsaPrivateKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::codec::{
    encode_header, encode_items, parse_header, parse_items, Header, ItemMap, TAG_DIGEST,
    TAG_ERROR, TAG_OPCODE, TAG_PAYLOAD, TAG_RESPONSE, HEADER_LEN,
};
use crate::crypto::registry::KeyRegistryBuilder;
use crate::protocol::Opcode;

use super::{Connection, OUTBOUND_QUEUE_CAP};

const VERSION_MAJOR: u8 = 1;
const VERSION_MINOR: u8 = 0;

fn registry_with_key() -> (crate::crypto::KeyRegistry, [u8; 32]) {
    let mut rng = rand_core::OsRng;
    let key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
    let mut builder = KeyRegistryBuilder::new();
    let digest = builder.register(key).unwrap();
    (builder.build(), digest)
}

fn request_bytes(id: u32, items: &ItemMap) -> Vec<u8> {
    let body = encode_items(items);
    let header = Header {
        version_major: VERSION_MAJOR,
        version_minor: VERSION_MINOR,
        length: body.len() as u16,
        id,
    };
    let mut out = encode_header(&header).to_vec();
    out.extend_from_slice(&body);
    out
}

async fn read_one_response(client: &mut tokio::io::DuplexStream) -> (Header, ItemMap) {
    let mut header_bytes = [0u8; HEADER_LEN];
    client.read_exact(&mut header_bytes).await.unwrap();
    let header = parse_header(&header_bytes).unwrap();
    let mut payload = vec![0u8; header.length as usize];
    if header.length > 0 {
        client.read_exact(&mut payload).await.unwrap();
    }
    (header, parse_items(&payload).unwrap())
}

#[tokio::test]
async fn ping_round_trip_over_duplex_stream() {
    let (registry, _digest) = registry_with_key();
    let (server_stream, mut client) = tokio::io::duplex(4096);
    let connection = Connection::new(server_stream, registry, VERSION_MAJOR, VERSION_MINOR);
    let handle = tokio::spawn(connection.run());

    let mut items = ItemMap::new();
    items.insert(TAG_OPCODE, vec![Opcode::Ping.to_byte()]);
    items.insert(TAG_PAYLOAD, b"hello".to_vec());
    client.write_all(&request_bytes(0xDEADBEEF, &items)).await.unwrap();

    let (header, response_items) = read_one_response(&mut client).await;
    assert_eq!(header.id, 0xDEADBEEF);
    assert_eq!(response_items.get(&TAG_RESPONSE), Some(&b"hello".to_vec()));
    assert!(!response_items.contains_key(&TAG_ERROR));

    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_digest_yields_key_not_found_error_and_connection_stays_open() {
    let (registry, _digest) = registry_with_key();
    let (server_stream, mut client) = tokio::io::duplex(4096);
    let connection = Connection::new(server_stream, registry, VERSION_MAJOR, VERSION_MINOR);
    let handle = tokio::spawn(connection.run());

    let mut items = ItemMap::new();
    items.insert(TAG_OPCODE, vec![Opcode::RsaSignSha256.to_byte()]);
    items.insert(TAG_DIGEST, vec![0u8; 32]);
    items.insert(TAG_PAYLOAD, vec![0u8; 32]);
    client.write_all(&request_bytes(1, &items)).await.unwrap();

    let (header, response_items) = read_one_response(&mut client).await;
    assert_eq!(header.id, 1);
    assert_eq!(response_items.get(&TAG_ERROR), Some(&vec![0x02])); // KEY_NOT_FOUND

    // the connection must still be usable after a protocol-level error (P3, S4)
    let mut ping_items = ItemMap::new();
    ping_items.insert(TAG_OPCODE, vec![Opcode::Ping.to_byte()]);
    ping_items.insert(TAG_PAYLOAD, b"still alive".to_vec());
    client.write_all(&request_bytes(2, &ping_items)).await.unwrap();

    let (header, response_items) = read_one_response(&mut client).await;
    assert_eq!(header.id, 2);
    assert_eq!(response_items.get(&TAG_RESPONSE), Some(&b"still alive".to_vec()));

    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn version_mismatch_reports_error_then_connection_keeps_working() {
    let (registry, _digest) = registry_with_key();
    let (server_stream, mut client) = tokio::io::duplex(4096);
    let connection = Connection::new(server_stream, registry, VERSION_MAJOR, VERSION_MINOR);
    let handle = tokio::spawn(connection.run());

    let header = Header {
        version_major: VERSION_MAJOR + 1,
        version_minor: 0,
        length: 0,
        id: 99,
    };
    client.write_all(&encode_header(&header)).await.unwrap();

    let (resp_header, response_items) = read_one_response(&mut client).await;
    assert_eq!(resp_header.id, 99);
    assert_eq!(response_items.get(&TAG_ERROR), Some(&vec![0x04])); // VERSION_MISMATCH

    let mut ping_items = ItemMap::new();
    ping_items.insert(TAG_OPCODE, vec![Opcode::Ping.to_byte()]);
    ping_items.insert(TAG_PAYLOAD, b"pong".to_vec());
    client.write_all(&request_bytes(100, &ping_items)).await.unwrap();
    let (resp_header, response_items) = read_one_response(&mut client).await;
    assert_eq!(resp_header.id, 100);
    assert_eq!(response_items.get(&TAG_RESPONSE), Some(&b"pong".to_vec()));

    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_tlv_yields_format_error_and_connection_stays_open() {
    let (registry, _digest) = registry_with_key();
    let (server_stream, mut client) = tokio::io::duplex(4096);
    let connection = Connection::new(server_stream, registry, VERSION_MAJOR, VERSION_MINOR);
    let handle = tokio::spawn(connection.run());

    // declares length=10 but the 10 bytes don't parse as complete items
    let header = Header {
        version_major: VERSION_MAJOR,
        version_minor: 0,
        length: 10,
        id: 7,
    };
    let mut bytes = encode_header(&header).to_vec();
    bytes.extend_from_slice(&[0x01, 0x00, 0xFF, 0, 0, 0, 0, 0, 0, 0]);
    client.write_all(&bytes).await.unwrap();

    let (resp_header, response_items) = read_one_response(&mut client).await;
    assert_eq!(resp_header.id, 7);
    assert_eq!(response_items.get(&TAG_ERROR), Some(&vec![0x07])); // FORMAT

    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn connection_closes_when_peer_disconnects() {
    let (registry, _digest) = registry_with_key();
    let (server_stream, client) = tokio::io::duplex(4096);
    let connection = Connection::new(server_stream, registry, VERSION_MAJOR, VERSION_MINOR);
    let handle = tokio::spawn(connection.run());

    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn outbound_queue_overflow_closes_the_connection() {
    let (registry, _digest) = registry_with_key();
    // A tiny response-direction buffer means the server's writes back-pressure
    // almost immediately once the client stops reading, so the outbound
    // queue fills up behind it rather than draining as fast as it grows.
    let (server_stream, mut client) = tokio::io::duplex(32);
    let connection = Connection::new(server_stream, registry, VERSION_MAJOR, VERSION_MINOR);
    let handle = tokio::spawn(connection.run());

    let mut items = ItemMap::new();
    items.insert(TAG_OPCODE, vec![Opcode::Ping.to_byte()]);
    items.insert(TAG_PAYLOAD, vec![0u8; 8]);
    let request = request_bytes(1, &items);

    let writer = tokio::spawn(async move {
        for _ in 0..(OUTBOUND_QUEUE_CAP * 4) {
            if client.write_all(&request).await.is_err() {
                break;
            }
        }
        // never reads responses back; the connection must still terminate
        drop(client);
    });

    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("connection must close once the outbound queue overflows")
        .unwrap()
        .unwrap();
    let _ = writer.await;
}
