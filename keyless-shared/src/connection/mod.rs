//! The per-connection state machine: reads framed requests off an
//! authenticated stream, dispatches them, and writes framed responses
//! back, all under a bounded outbound queue.
//!
//! Generic over any `AsyncRead + AsyncWrite` stream so it can be driven in
//! tests over an in-memory `tokio::io::duplex` pair without a live TLS
//! handshake; production wires it to a `tokio_rustls` server stream.

use std::collections::VecDeque;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::codec::{
    check_payload_len, encode_response, parse_header, parse_items, Header, Outcome, HEADER_LEN,
};
use crate::crypto::KeyRegistry;
use crate::error::{ConnectionError, ErrorKind};
use crate::protocol::dispatch;

/// Outbound queue bound from §3's connection state (`Q=16`). An admission
/// policy, not a data-structure requirement: overflow is fatal to the
/// connection (invariant I3) but never to the process.
pub const OUTBOUND_QUEUE_CAP: usize = 16;

/// Read buffer size for a single `read()` call; unrelated to any protocol
/// limit, just an I/O chunking choice.
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    AwaitHeader,
    AwaitPayload(Header),
    Closing,
}

/// One live connection: owns its half of the stream, its read accumulator,
/// and its bounded outbound queue. Dropped once `run` returns.
pub struct Connection<S> {
    read_half: ReadHalf<S>,
    write_half: WriteHalf<S>,
    registry: KeyRegistry,
    version_major: u8,
    version_minor: u8,
    phase: Phase,
    inbound: Vec<u8>,
    outbound: VecDeque<Vec<u8>>,
    outbound_pos: usize,
}

impl<S> Connection<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an already-handshaken stream. `version_major`/`version_minor`
    /// are the server's compiled protocol version, echoed on every
    /// response header.
    pub fn new(stream: S, registry: KeyRegistry, version_major: u8, version_minor: u8) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            read_half,
            write_half,
            registry,
            version_major,
            version_minor,
            phase: Phase::AwaitHeader,
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            outbound_pos: 0,
        }
    }

    /// Number of responses currently queued but not yet fully written.
    /// Exposed for tests exercising the `Q`-bound (invariant I3).
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Drives the connection until it closes, either because the peer
    /// disconnected, a transport error occurred, or the outbound queue
    /// overflowed. Never returns an error for protocol-level failures —
    /// those are reported to the peer as `ERROR` items and the connection
    /// continues, per §7's propagation policy.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if self.phase == Phase::Closing {
                self.do_shutdown().await;
                return Ok(());
            }

            let has_outbound = !self.outbound.is_empty();
            tokio::select! {
                biased;

                write_result = self.write_half.write(&self.outbound[0][self.outbound_pos..]), if has_outbound => {
                    match write_result {
                        Ok(n) => {
                            self.outbound_pos += n;
                            if self.outbound_pos >= self.outbound[0].len() {
                                self.outbound.pop_front();
                                self.outbound_pos = 0;
                            }
                        }
                        Err(e) => {
                            log::debug!("connection write error: {e}");
                            self.phase = Phase::Closing;
                        }
                    }
                }

                read_result = self.read_half.read(&mut buf) => {
                    match read_result {
                        Ok(0) => {
                            log::debug!("peer closed connection");
                            self.phase = Phase::Closing;
                        }
                        Ok(n) => {
                            self.inbound.extend_from_slice(&buf[..n]);
                            self.try_consume();
                        }
                        Err(e) => {
                            log::debug!("connection read error: {e}");
                            self.phase = Phase::Closing;
                        }
                    }
                }
            }
        }
    }

    /// Attempts TLS-style close: one shutdown exchange, with a single
    /// retry if the first attempt doesn't finish cleanly.
    async fn do_shutdown(&mut self) {
        for attempt in 0..2 {
            match self.write_half.shutdown().await {
                Ok(()) => return,
                Err(e) => log::debug!("shutdown attempt {attempt} failed: {e}"),
            }
        }
    }

    /// Consumes as many complete header/payload pairs as `inbound`
    /// currently holds, dispatching each and enqueueing its response.
    /// Mirrors §4.4's two transitions (`AwaitHeader` -> `AwaitPayload` ->
    /// dispatch -> `AwaitHeader`) without needing a readiness event per
    /// byte: a single `read()` may already contain several full messages.
    fn try_consume(&mut self) {
        loop {
            match self.phase.clone() {
                Phase::AwaitHeader => {
                    if self.inbound.len() < HEADER_LEN {
                        return;
                    }
                    let header_bytes: Vec<u8> = self.inbound.drain(..HEADER_LEN).collect();
                    let header = parse_header(&header_bytes)
                        .expect("drained exactly HEADER_LEN bytes, parse_header cannot fail");

                    if header.version_major != self.version_major {
                        self.respond_error(header.id, ErrorKind::VersionMismatch);
                        // best-effort drain of buffered bytes is advisory only (§9 open
                        // question); we simply return to AwaitHeader for the next message.
                        continue;
                    }

                    if check_payload_len(header.length as usize).is_err() {
                        self.respond_error(header.id, ErrorKind::Format);
                        continue;
                    }

                    if header.length == 0 {
                        self.dispatch_and_respond(header.id, &[]);
                        continue;
                    }

                    self.phase = Phase::AwaitPayload(header);
                }
                Phase::AwaitPayload(header) => {
                    let need = header.length as usize;
                    if self.inbound.len() < need {
                        return;
                    }
                    let payload: Vec<u8> = self.inbound.drain(..need).collect();
                    self.phase = Phase::AwaitHeader;
                    self.dispatch_and_respond(header.id, &payload);
                }
                Phase::Closing => return,
            }
        }
    }

    fn dispatch_and_respond(&mut self, id: u32, payload: &[u8]) {
        let outcome = match parse_items(payload) {
            Ok(items) => match dispatch(&self.registry, &items) {
                Ok(bytes) => Outcome::Response(bytes),
                Err(e) => Outcome::Error(e.to_wire().to_wire()),
            },
            Err(e) => Outcome::Error(e.to_wire().to_wire()),
        };
        self.enqueue(encode_response(self.version_major, self.version_minor, id, outcome));
    }

    fn respond_error(&mut self, id: u32, kind: ErrorKind) {
        self.enqueue(encode_response(
            self.version_major,
            self.version_minor,
            id,
            Outcome::Error(kind.to_wire()),
        ));
    }

    /// Enqueues a fully-built response, subject to the `Q=16` bound.
    /// Overflow is a fatal connection-local error: the buffer is dropped
    /// and the connection moves to `Closing` (invariant I3).
    fn enqueue(&mut self, bytes: Vec<u8>) {
        if self.outbound.len() >= OUTBOUND_QUEUE_CAP {
            log::warn!("outbound queue overflow ({OUTBOUND_QUEUE_CAP} entries), closing connection");
            self.phase = Phase::Closing;
            return;
        }
        self.outbound.push_back(bytes);
    }
}

#[cfg(test)]
mod tests;
