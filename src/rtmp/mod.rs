// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTMP chunk-stream decoder (component D).
//!
//! Parses the compressed 1/4/8/12-byte chunk header scheme, reassembles
//! full RTMP messages keyed by chunk-stream id (csid), and tracks the
//! mutable global chunk size. [`Decoder::next_message`] pulls from a
//! [`Cursor`] and returns one completed [`Message`] at a time, or `None`
//! once the cursor runs dry (cleanly or mid-chunk — both are a quiet,
//! non-fatal end of input).

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use log::{debug, trace, warn};

use crate::error::Position;
use crate::reassembly::Cursor;
use crate::{bail, Error, ErrorKind};

pub const DEFAULT_CHUNK_SIZE: usize = 128;
pub const DEFAULT_MAX_ROUTING_ID: u32 = 16;

const HANDSHAKE_MARKER: u8 = 0x03;
const HANDSHAKE_BODY_LEN: usize = 3072;
const SET_CHUNK_SIZE_TYPE: u8 = 0x01;

/// Message types the decoder passes through unchanged; anything else is a
/// non-fatal `warn!`.
const RECOGNIZED_TYPES: &[u8] = &[
    0x03, 0x04, 0x05, 0x06, 0x08, 0x09, 0x0F, 0x10, 0x11, 0x12, 0x13, 0x14, 0x16,
];

/// Configuration the CLI collaborator derives from `--default-chunk-size`,
/// `--max-routing-id`, and `--insert-zeros`.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub default_chunk_size: usize,
    pub max_routing_id: u32,
    /// Enables the NUL-skip salvage branch; mirrors the reassembler's
    /// `insert_zeros`, since the salvage path only makes sense when the
    /// reassembler actually zero-fills gaps.
    pub insert_zeros: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            max_routing_id: DEFAULT_MAX_ROUTING_ID,
            insert_zeros: false,
        }
    }
}

/// A fully reassembled RTMP message.
#[derive(Debug, Clone)]
pub struct Message {
    pub csid: u8,
    pub message_type: u8,
    pub timestamp: u32,
    pub stream_id: u32,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, Default)]
struct FullHeaderFields {
    message_length: usize,
    message_type: u8,
    stream_id: u32,
}

#[derive(Debug, Default)]
struct ChunkStreamState {
    timestamp: u32,
    message_length: usize,
    message_type: u8,
    stream_id: u32,
    has_header: bool,
    /// True from the moment a header opens a message until its payload is
    /// fully buffered. Distinct from comparing `buffered_payload.len()` to
    /// `message_length`, since those two fields linger with their last
    /// message's values after completion and would otherwise look
    /// "incomplete" again (0 < stale length) for a brand new header.
    in_progress: bool,
    buffered_payload: BytesMut,
}

enum ChunkOutcome {
    Completed(Message),
    Continue,
    Eof,
}

/// Parses a byte stream as interleaved RTMP chunks.
pub struct Decoder {
    handshake_checked: bool,
    chunk_size: usize,
    config: Config,
    per_csid: HashMap<u8, ChunkStreamState>,
    /// Fields from the most recently parsed ≥8-byte header on *any*
    /// stream; used only as a logged fallback when a csid has no header
    /// of its own yet.
    last_full_header: Option<FullHeaderFields>,
    last_header_byte: Option<u8>,
    last_chunk_csid: Option<u8>,
}

impl Decoder {
    pub fn new(config: Config) -> Self {
        Self {
            handshake_checked: false,
            chunk_size: config.default_chunk_size,
            config,
            per_csid: HashMap::new(),
            last_full_header: None,
            last_header_byte: None,
            last_chunk_csid: None,
        }
    }

    /// Returns the next completed RTMP message, or `None` once the cursor
    /// is exhausted (whether cleanly between chunks or mid-chunk).
    pub fn next_message(&mut self, cursor: &mut Cursor) -> Result<Option<Message>, Error> {
        self.skip_handshake_if_needed(cursor);
        loop {
            match self.process_one_chunk(cursor)? {
                ChunkOutcome::Completed(msg) => return Ok(Some(msg)),
                ChunkOutcome::Continue => continue,
                ChunkOutcome::Eof => return Ok(None),
            }
        }
    }

    fn skip_handshake_if_needed(&mut self, cursor: &mut Cursor) {
        if self.handshake_checked {
            return;
        }
        self.handshake_checked = true;
        match cursor.read_exact(1) {
            Some(b) if b[0] == HANDSHAKE_MARKER => {
                if cursor.read_exact(HANDSHAKE_BODY_LEN).is_none() {
                    debug!("handshake marker seen but body was truncated");
                }
            }
            Some(_) => cursor.rewind(),
            None => {}
        }
    }

    fn mid_message_active(&self) -> bool {
        match self.last_chunk_csid {
            Some(csid) => self.per_csid.get(&csid).is_some_and(|s| s.in_progress),
            None => false,
        }
    }

    fn process_one_chunk(&mut self, cursor: &mut Cursor) -> Result<ChunkOutcome, Error> {
        let mut b0 = match cursor.read_exact(1) {
            Some(b) => b[0],
            None => return Ok(ChunkOutcome::Eof),
        };
        let mut synthesized = false;

        if b0 == 0x00 {
            if self.config.insert_zeros && self.mid_message_active() {
                let prev = self
                    .last_header_byte
                    .expect("mid_message_active implies a prior real header byte");
                b0 = prev | 0xC0;
                synthesized = true;
                trace!("NUL-skip salvage: reinterpreting as 1-byte continuation for csid {}", b0 & 0x3F);
            } else {
                loop {
                    b0 = match cursor.read_exact(1) {
                        Some(b) => b[0],
                        None => return Ok(ChunkOutcome::Eof),
                    };
                    if b0 != 0x00 {
                        break;
                    }
                }
            }
        }

        if !synthesized {
            self.last_header_byte = Some(b0);
        }

        let csid = b0 & 0x3F;
        let hdr_size: u8 = match b0 >> 6 {
            0b00 => 12,
            0b01 => 8,
            0b10 => 4,
            0b11 => 1,
            _ => unreachable!(),
        };

        let rest = if hdr_size > 1 {
            match cursor.read_exact(hdr_size as usize - 1) {
                Some(b) => b,
                None => return Ok(ChunkOutcome::Eof),
            }
        } else {
            Bytes::new()
        };

        let prior_has_header = self.per_csid.get(&csid).is_some_and(|s| s.has_header);
        let prior_incomplete = self.per_csid.get(&csid).is_some_and(|s| s.in_progress);

        let (timestamp, message_length, message_type, stream_id) = match hdr_size {
            12 => {
                let timestamp = be24(&rest[0..3]);
                let message_length = be24(&rest[3..6]) as usize;
                let message_type = rest[6];
                let stream_id = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]);
                if stream_id > self.config.max_routing_id {
                    bail!(
                        ErrorKind::BadRoutingId,
                        Position::at_data_byte(cursor.absolute_byte_count()),
                        "message stream id {stream_id} exceeds configured max {}",
                        self.config.max_routing_id
                    );
                }
                (timestamp, message_length, message_type, stream_id)
            }
            8 => {
                let timestamp = be24(&rest[0..3]);
                let message_length = be24(&rest[3..6]) as usize;
                let message_type = rest[6];
                let stream_id = self.inherited_stream_id(csid, prior_has_header);
                (timestamp, message_length, message_type, stream_id)
            }
            4 => {
                let timestamp = be24(&rest[0..3]);
                let (message_length, message_type, stream_id) =
                    self.inherited_length_type_stream(csid, prior_has_header);
                (timestamp, message_length, message_type, stream_id)
            }
            1 => {
                if !prior_has_header {
                    bail!(
                        ErrorKind::ContinuationWithoutContext,
                        Position::at_data_byte(cursor.absolute_byte_count()),
                        "1-byte header on csid {csid} with no prior header for that stream"
                    );
                }
                let s = &self.per_csid[&csid];
                (s.timestamp, s.message_length, s.message_type, s.stream_id)
            }
            _ => unreachable!(),
        };

        if hdr_size >= 4 && prior_has_header && prior_incomplete {
            let s = &self.per_csid[&csid];
            let mismatch = match hdr_size {
                12 => {
                    s.timestamp != timestamp
                        || s.message_length != message_length
                        || s.message_type != message_type
                        || s.stream_id != stream_id
                }
                8 => {
                    s.timestamp != timestamp
                        || s.message_length != message_length
                        || s.message_type != message_type
                }
                4 => s.timestamp != timestamp,
                _ => false,
            };
            if mismatch {
                bail!(
                    ErrorKind::PartialMismatch,
                    Position::at_data_byte(cursor.absolute_byte_count()),
                    "re-declared {hdr_size}-byte header on csid {csid} disagrees with the buffered message"
                );
            }
        }

        if hdr_size == 8 || hdr_size == 12 {
            self.last_full_header = Some(FullHeaderFields {
                message_length,
                message_type,
                stream_id,
            });
        }

        let state = self.per_csid.entry(csid).or_default();
        if !prior_incomplete {
            state.buffered_payload.clear();
        }
        state.timestamp = timestamp;
        state.message_length = message_length;
        state.message_type = message_type;
        state.stream_id = stream_id;
        state.has_header = true;
        state.in_progress = true;

        let remaining = state.message_length.saturating_sub(state.buffered_payload.len());
        let to_read = remaining.min(self.chunk_size);
        let chunk_data = match cursor.read_exact(to_read) {
            Some(b) => b,
            None => return Ok(ChunkOutcome::Eof),
        };
        state.buffered_payload.extend_from_slice(&chunk_data);
        self.last_chunk_csid = Some(csid);

        if state.buffered_payload.len() < state.message_length {
            return Ok(ChunkOutcome::Continue);
        }

        let message_type = state.message_type;
        let timestamp = state.timestamp;
        let stream_id = state.stream_id;
        let payload = state.buffered_payload.split_to(state.message_length).freeze();
        state.buffered_payload.clear();
        state.in_progress = false;

        if message_type == SET_CHUNK_SIZE_TYPE {
            self.apply_set_chunk_size(&payload, csid, cursor)?;
            return Ok(ChunkOutcome::Continue);
        }

        if !RECOGNIZED_TYPES.contains(&message_type) {
            warn!("unrecognized RTMP message type {message_type:#04x} on csid {csid}");
        }

        Ok(ChunkOutcome::Completed(Message {
            csid,
            message_type,
            timestamp,
            stream_id,
            payload,
        }))
    }

    fn inherited_stream_id(&mut self, csid: u8, prior_has_header: bool) -> u32 {
        if prior_has_header {
            return self.per_csid[&csid].stream_id;
        }
        match self.last_full_header {
            Some(last) => {
                warn!(
                    "csid {csid} has no prior header; inheriting stream id {} from the most recently seen header on another stream",
                    last.stream_id
                );
                last.stream_id
            }
            None => 0,
        }
    }

    fn inherited_length_type_stream(&mut self, csid: u8, prior_has_header: bool) -> (usize, u8, u32) {
        if prior_has_header {
            let s = &self.per_csid[&csid];
            return (s.message_length, s.message_type, s.stream_id);
        }
        match self.last_full_header {
            Some(last) => {
                warn!(
                    "csid {csid} has no prior header; inheriting length/type/stream id from the most recently seen header on another stream"
                );
                (last.message_length, last.message_type, last.stream_id)
            }
            None => (0, 0, 0),
        }
    }

    fn apply_set_chunk_size(
        &mut self,
        payload: &Bytes,
        csid: u8,
        cursor: &Cursor,
    ) -> Result<(), Error> {
        if payload.is_empty() || payload[0] != 0x00 {
            bail!(
                ErrorKind::UnknownChunkSizeMessage,
                Position::at_data_byte(cursor.absolute_byte_count()),
                "SetChunkSize payload on csid {csid} does not start with 0x00"
            );
        }
        let end = payload.len().min(5);
        let mut value: u32 = 0;
        for &b in &payload[1..end] {
            value = (value << 8) | b as u32;
        }
        debug!("chunk size changed from {} to {value}", self.chunk_size);
        self.chunk_size = value as usize;
        Ok(())
    }
}

fn be24(b: &[u8]) -> u32 {
    (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_basic_header(fmt: u8, csid: u8) -> u8 {
        (fmt << 6) | csid
    }

    fn push_be24(out: &mut Vec<u8>, v: u32) {
        out.push((v >> 16) as u8);
        out.push((v >> 8) as u8);
        out.push(v as u8);
    }

    fn full_header_chunk(csid: u8, timestamp: u32, message_type: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![chunk_basic_header(0, csid)];
        push_be24(&mut out, timestamp);
        push_be24(&mut out, payload.len() as u32);
        out.push(message_type);
        out.extend_from_slice(&stream_id.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn continuation_chunk(csid: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![chunk_basic_header(3, csid)];
        out.extend_from_slice(payload);
        out
    }

    fn cursor_of(bytes: Vec<u8>) -> Cursor {
        Cursor::new(vec![Bytes::from(bytes)])
    }

    #[test]
    fn decodes_a_single_full_header_message() {
        let data = full_header_chunk(4, 100, 0x09, 1, b"AABB");
        let mut cursor = cursor_of(data);
        let mut dec = Decoder::new(Config::default());
        let msg = dec.next_message(&mut cursor).unwrap().unwrap();
        assert_eq!(msg.csid, 4);
        assert_eq!(msg.timestamp, 100);
        assert_eq!(msg.message_type, 0x09);
        assert_eq!(msg.stream_id, 1);
        assert_eq!(&msg.payload[..], b"AABB");
    }

    #[test]
    fn header_compression_reuses_prior_fields() {
        let mut data = full_header_chunk(4, 100, 0x09, 1, b"AAAA");
        data.extend(continuation_chunk(4, b"BBBB"));
        let mut cursor = cursor_of(data);
        let mut dec = Decoder::new(Config::default());
        let m1 = dec.next_message(&mut cursor).unwrap().unwrap();
        let m2 = dec.next_message(&mut cursor).unwrap().unwrap();
        assert_eq!(&m1.payload[..], b"AAAA");
        assert_eq!(&m2.payload[..], b"BBBB");
        assert_eq!(m2.timestamp, 100);
        assert_eq!(m2.stream_id, 1);
    }

    #[test]
    fn continuation_without_context_is_fatal() {
        let data = continuation_chunk(4, b"x");
        let mut cursor = cursor_of(data);
        let mut dec = Decoder::new(Config::default());
        let err = dec.next_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContinuationWithoutContext);
    }

    #[test]
    fn bad_routing_id_is_fatal() {
        let data = full_header_chunk(4, 0, 0x09, 999, b"x");
        let mut cursor = cursor_of(data);
        let mut dec = Decoder::new(Config::default());
        let err = dec.next_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRoutingId);
    }

    #[test]
    fn chunk_size_change_splits_large_message_across_chunks() {
        // SetChunkSize to 1024 first, then a 1500-byte message on a fresh
        // csid that must arrive as a 1024-byte chunk followed by a 476-byte
        // continuation once the new size is in effect.
        let mut data = full_header_chunk(4, 0, 0x01, 0, &[0x00, 0x00, 0x04, 0x00]);
        let big: Vec<u8> = (0..1500u32).map(|i| (i % 256) as u8).collect();

        let mut full = vec![chunk_basic_header(0, 5)];
        push_be24(&mut full, 0);
        push_be24(&mut full, big.len() as u32);
        full.push(0x09);
        full.extend_from_slice(&1u32.to_le_bytes());
        full.extend_from_slice(&big[..1024]);
        data.extend_from_slice(&full);
        data.extend(continuation_chunk(5, &big[1024..]));

        let mut cursor = cursor_of(data);
        let mut dec = Decoder::new(Config::default());
        let msg = dec.next_message(&mut cursor).unwrap().unwrap();
        assert_eq!(msg.payload.len(), 1500);
        assert_eq!(&msg.payload[..], &big[..]);
    }

    #[test]
    fn partial_mismatch_on_redeclared_header_is_fatal() {
        // chunk size of 4 forces the 10-byte message to split, so a second
        // header must appear before the message completes.
        let mut cfg = Config::default();
        cfg.default_chunk_size = 4;

        let mut data = vec![chunk_basic_header(0, 4)];
        push_be24(&mut data, 0);
        push_be24(&mut data, 10); // message_length 10
        data.push(0x09);
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(b"AAAA"); // first 4-byte chunk, 6 bytes still owed

        // second chunk re-declares a full header with a different length while
        // the first message (10 bytes) is still incomplete (4/10 buffered).
        let mut redeclare = vec![chunk_basic_header(0, 4)];
        push_be24(&mut redeclare, 0);
        push_be24(&mut redeclare, 4);
        redeclare.push(0x09);
        redeclare.extend_from_slice(&1u32.to_le_bytes());
        data.extend(redeclare);

        let mut cursor = cursor_of(data);
        let mut dec = Decoder::new(cfg);
        let err = dec.next_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialMismatch);
    }

    #[test]
    fn unknown_chunk_size_message_is_fatal() {
        let data = full_header_chunk(4, 0, 0x01, 0, &[0xFF, 0x00, 0x00, 0x01]);
        let mut cursor = cursor_of(data);
        let mut dec = Decoder::new(Config::default());
        let err = dec.next_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownChunkSizeMessage);
    }

    #[test]
    fn handshake_marker_is_skipped() {
        let mut data = vec![0x03];
        data.extend(vec![0u8; HANDSHAKE_BODY_LEN]);
        data.extend(full_header_chunk(4, 0, 0x09, 1, b"hi"));
        let mut cursor = cursor_of(data);
        let mut dec = Decoder::new(Config::default());
        let msg = dec.next_message(&mut cursor).unwrap().unwrap();
        assert_eq!(&msg.payload[..], b"hi");
    }

    #[test]
    fn no_handshake_marker_rewinds_and_parses_directly() {
        let data = full_header_chunk(4, 0, 0x09, 1, b"hi");
        let mut cursor = cursor_of(data);
        let mut dec = Decoder::new(Config::default());
        let msg = dec.next_message(&mut cursor).unwrap().unwrap();
        assert_eq!(&msg.payload[..], b"hi");
    }

    #[test]
    fn nul_skip_salvage_reinterprets_as_continuation() {
        // chunk size 4 keeps the 8-byte message split across two chunks, so
        // it's still in progress when the corrupted byte arrives.
        let mut cfg = Config::default();
        cfg.insert_zeros = true;
        cfg.default_chunk_size = 4;

        let mut data = full_header_chunk(4, 0, 0x09, 1, b"AAAA");
        push_be24_fixup(&mut data); // message_length field needs to read 8, not 4
        // Simulate a gap-zeroed leading header byte: a lone 0x00 where a
        // format-3 continuation header for csid 4 should have been.
        data.push(0x00);
        data.extend_from_slice(b"BBBB");
        let mut cursor = cursor_of(data);
        let mut dec = Decoder::new(cfg);
        let msg = dec.next_message(&mut cursor).unwrap().unwrap();
        assert_eq!(&msg.payload[..], b"AAAABBBB");
    }

    /// `full_header_chunk` derives `message_length` from the payload it's
    /// given, which doesn't fit this test (message_length must claim 8
    /// bytes while the first chunk only carries 4). Patches the
    /// already-built header bytes in place instead of hand-rolling a
    /// second header constructor.
    fn push_be24_fixup(data: &mut [u8]) {
        data[4] = 0;
        data[5] = 0;
        data[6] = 8;
    }
}
