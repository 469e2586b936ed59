// SPDX-License-Identifier: MIT OR Apache-2.0

//! FLV muxer / session state machine (component E).
//!
//! Drives a [`crate::rtmp::Decoder`] and dispatches completed messages
//! through a small ordered state machine gated on AMF0 byte signatures,
//! writing FLV tags via [`writer::FlvWriter`] as it advances.

pub mod writer;

use std::io::Write;

use log::{debug, info, warn};

use crate::error::Position;
use crate::reassembly::Cursor;
use crate::rtmp::{Decoder as RtmpDecoder, Message};
use crate::{bail, Error, ErrorKind};
use writer::FlvWriter;

const TYPE_AUDIO: u8 = 0x08;
const TYPE_VIDEO: u8 = 0x09;
const TYPE_PING: u8 = 0x04;
const TYPE_PREFRAMED: u8 = 0x16;
const TYPE_COMMAND: u8 = 0x14;
const TYPE_NOTIFY: u8 = 0x12;

const SKIPPABLE_SYNC_LEN: usize = 2;
const SKIPPABLE_SYNC_MARKER: u8 = 0x52;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitPlayStart,
    AwaitDataStart,
    AwaitMetaData,
    AwaitSkippableSync,
    StreamingMedia,
    PlayComplete,
}

/// Consumes RTMP messages and emits an FLV file, enforcing the ordered
/// session marker sequence a live player would also rely on.
pub struct Muxer<W: Write> {
    state: State,
    stream_name: Option<String>,
    writer: FlvWriter<W>,
}

impl<W: Write> Muxer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            state: State::AwaitPlayStart,
            stream_name: None,
            writer: FlvWriter::new(inner),
        }
    }

    /// Runs to completion: pulls messages from `decoder` until
    /// `PlayComplete` is reached, or fails if the input runs out first.
    pub fn run(&mut self, decoder: &mut RtmpDecoder, cursor: &mut Cursor) -> Result<(), Error> {
        loop {
            let msg = match decoder.next_message(cursor)? {
                Some(m) => m,
                None => {
                    let kind = if self.state == State::StreamingMedia {
                        ErrorKind::MissingTerminator
                    } else {
                        ErrorKind::UnexpectedEnd
                    };
                    bail!(
                        kind,
                        Position::at_data_byte(cursor.absolute_byte_count()),
                        "input ended in state {:?} without reaching PlayComplete",
                        self.state
                    );
                }
            };
            if self.handle_message(msg)? {
                return Ok(());
            }
        }
    }

    pub fn stream_name(&self) -> Option<&str> {
        self.stream_name.as_deref()
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    /// Returns `true` once `PlayComplete` is reached.
    fn handle_message(&mut self, msg: Message) -> Result<bool, Error> {
        match self.state {
            State::AwaitPlayStart => {
                if msg.message_type == TYPE_COMMAND
                    && is_on_status(&msg.payload)
                    && contains_code(&msg.payload, "NetStream.Play.Start")
                {
                    if let Some(name) = extract_stream_name(&msg.payload) {
                        info!("play started for stream {name:?}");
                        self.stream_name = Some(name);
                        self.state = State::AwaitDataStart;
                    }
                }
            }
            State::AwaitDataStart => {
                if msg.message_type == TYPE_NOTIFY
                    && is_on_status(&msg.payload)
                    && contains_code(&msg.payload, "NetStream.Data.Start")
                {
                    self.writer.write_header()?;
                    debug!("wrote FLV file header");
                    self.state = State::AwaitMetaData;
                }
            }
            State::AwaitMetaData => {
                if msg.message_type == TYPE_NOTIFY && starts_with_command(&msg.payload, "onMetaData") {
                    self.writer.write_tag(TYPE_NOTIFY, msg.timestamp, &msg.payload)?;
                    self.state = State::AwaitSkippableSync;
                }
            }
            State::AwaitSkippableSync => {
                if msg.message_type == TYPE_VIDEO
                    && msg.payload.len() == SKIPPABLE_SYNC_LEN
                    && msg.payload[0] == SKIPPABLE_SYNC_MARKER
                {
                    debug!("skipped sync frame");
                } else {
                    self.state = State::StreamingMedia;
                    return self.handle_message(msg);
                }
            }
            State::StreamingMedia => match msg.message_type {
                TYPE_AUDIO | TYPE_VIDEO => {
                    self.writer.write_tag(msg.message_type, msg.timestamp, &msg.payload)?;
                }
                TYPE_PREFRAMED => {
                    self.writer.write_raw(&msg.payload)?;
                }
                TYPE_PING => {}
                TYPE_NOTIFY
                    if is_on_play_status(&msg.payload) && contains_code(&msg.payload, "NetStream.Play.Complete") =>
                {
                    info!("play complete");
                    self.state = State::PlayComplete;
                }
                other => {
                    warn!("unexpected message type {other:#04x} while streaming; ending playback");
                    self.state = State::PlayComplete;
                }
            },
            State::PlayComplete => {}
        }
        Ok(self.state == State::PlayComplete)
    }
}

fn amf_string_prefix(s: &str) -> Vec<u8> {
    let len = s.len() as u16;
    let mut out = vec![0x02, (len >> 8) as u8, len as u8];
    out.extend_from_slice(s.as_bytes());
    out
}

fn starts_with_command(payload: &[u8], name: &str) -> bool {
    payload.starts_with(&amf_string_prefix(name))
}

fn is_on_status(payload: &[u8]) -> bool {
    starts_with_command(payload, "onStatus")
}

fn is_on_play_status(payload: &[u8]) -> bool {
    starts_with_command(payload, "onPlayStatus")
}

fn contains_subsequence(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.len() >= needle.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn contains_code(payload: &[u8], code: &str) -> bool {
    let mut needle = vec![0x00, 0x04];
    needle.extend_from_slice(b"code");
    needle.extend_from_slice(&amf_string_prefix(code));
    contains_subsequence(payload, &needle)
}

/// Finds the AMF0 `description` property and, if its value starts with
/// `"Started playing "`, returns the stream name that follows (trailing
/// `.` stripped).
fn extract_stream_name(payload: &[u8]) -> Option<String> {
    let mut key_needle = vec![0x00, 0x0B];
    key_needle.extend_from_slice(b"description");
    key_needle.push(0x02);
    let pos = payload.windows(key_needle.len()).position(|w| w == key_needle)?;
    let value_start = pos + key_needle.len();
    let len_bytes = payload.get(value_start..value_start + 2)?;
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let content_start = value_start + 2;
    let content = payload.get(content_start..content_start.checked_add(len)?)?;
    let text = std::str::from_utf8(content).ok()?;
    let name = text.strip_prefix("Started playing ")?;
    Some(name.trim_end_matches('.').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Segment;
    use crate::reassembly::{Config as ReassemblyConfig, Reassembler};
    use crate::rtmp::Config as RtmpConfig;
    use bytes::Bytes;

    fn push_be24(out: &mut Vec<u8>, v: u32) {
        out.push((v >> 16) as u8);
        out.push((v >> 8) as u8);
        out.push(v as u8);
    }

    fn chunk_full_header(csid: u8, timestamp: u32, message_type: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![csid & 0x3F];
        push_be24(&mut out, timestamp);
        push_be24(&mut out, payload.len() as u32);
        out.push(message_type);
        out.extend_from_slice(&stream_id.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn amf_object_entry(key: &str, value: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.push((key.len() >> 8) as u8);
        out.push(key.len() as u8);
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(&amf_string_prefix(value));
        out
    }

    fn on_status_payload(code: &str, description: Option<&str>) -> Vec<u8> {
        let mut out = amf_string_prefix("onStatus");
        out.extend_from_slice(&[0x00; 9]); // transaction id: Number marker + 8-byte double, all zero
        out.push(0x03); // object marker
        out.extend_from_slice(&amf_object_entry("code", code));
        if let Some(desc) = description {
            out.extend_from_slice(&amf_object_entry("description", desc));
        }
        out.extend_from_slice(&[0x00, 0x00, 0x09]); // object end marker
        out
    }

    fn on_play_status_payload(code: &str) -> Vec<u8> {
        let mut out = amf_string_prefix("onPlayStatus");
        out.extend_from_slice(&[0x00; 9]);
        out.push(0x03);
        out.extend_from_slice(&amf_object_entry("code", code));
        out.extend_from_slice(&[0x00, 0x00, 0x09]);
        out
    }

    fn feed(chunks: &[Vec<u8>]) -> Cursor {
        let mut bytes = Vec::new();
        for c in chunks {
            bytes.extend_from_slice(c);
        }
        Cursor::new(vec![Bytes::from(bytes)])
    }

    fn segment_from_bytes(raw_seq: u32, payload: Vec<u8>) -> Segment {
        // No segment here carries SYN: these represent pure post-handshake
        // data chunks starting at relative sequence 0, not the bare SYN
        // packet a real capture would have as a separate, empty segment.
        Segment {
            raw_seq,
            syn: false,
            payload: Bytes::from(payload),
        }
    }

    #[test]
    fn full_session_produces_expected_flv_bytes() {
        let play_start = chunk_full_header(
            4,
            0,
            TYPE_COMMAND,
            1,
            &on_status_payload("NetStream.Play.Start", Some("Started playing demo.flv")),
        );
        let data_start = chunk_full_header(4, 0, TYPE_NOTIFY, 1, &on_status_payload("NetStream.Data.Start", None));
        let meta_payload = {
            let mut out = amf_string_prefix("onMetaData");
            out.extend_from_slice(b"rest-of-metadata");
            out
        };
        let on_meta = chunk_full_header(4, 0, TYPE_NOTIFY, 1, &meta_payload);
        let sync = chunk_full_header(4, 0, TYPE_VIDEO, 1, &[0x52, 0x00]);
        let video = chunk_full_header(4, 100, TYPE_VIDEO, 1, &[0xAA, 0xBB, 0xCC, 0xDD]);
        let play_complete = chunk_full_header(4, 100, TYPE_NOTIFY, 1, &on_play_status_payload("NetStream.Play.Complete"));

        let mut reassembler = Reassembler::new(ReassemblyConfig::default());
        let mut seq = 0u32;
        for chunk in [play_start, data_start, on_meta, sync, video, play_complete] {
            let len = chunk.len() as u32;
            reassembler.accept(segment_from_bytes(seq, chunk)).unwrap();
            seq += len;
        }
        let segments = reassembler.finalize().unwrap();
        let mut cursor = Cursor::new(segments);

        let mut decoder = RtmpDecoder::new(RtmpConfig::default());
        let mut out = Vec::new();
        let mut muxer = Muxer::new(&mut out);
        muxer.run(&mut decoder, &mut cursor).unwrap();

        assert_eq!(muxer.stream_name(), Some("demo.flv"));
        assert_eq!(&out[0..13], &[0x46, 0x4C, 0x56, 0x01, 0x05, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00]);

        let meta_tag_len = meta_payload.len() as u32;
        let meta_tag_total = 11 + meta_tag_len + 4;
        let video_tag_offset = 13 + meta_tag_total as usize;
        assert_eq!(out[video_tag_offset], TYPE_VIDEO);
        let video_data_size = u32::from_be_bytes([0, out[video_tag_offset + 1], out[video_tag_offset + 2], out[video_tag_offset + 3]]);
        assert_eq!(video_data_size, 4);
        let video_timestamp = u32::from_be_bytes([0, out[video_tag_offset + 4], out[video_tag_offset + 5], out[video_tag_offset + 6]]);
        assert_eq!(video_timestamp, 100);
        let payload_start = video_tag_offset + 11;
        assert_eq!(&out[payload_start..payload_start + 4], &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn missing_terminator_is_fatal() {
        let play_start = chunk_full_header(
            4,
            0,
            TYPE_COMMAND,
            1,
            &on_status_payload("NetStream.Play.Start", Some("Started playing demo.flv")),
        );
        let data_start = chunk_full_header(4, 0, TYPE_NOTIFY, 1, &on_status_payload("NetStream.Data.Start", None));
        let on_meta = {
            let mut payload = amf_string_prefix("onMetaData");
            payload.extend_from_slice(b"x");
            chunk_full_header(4, 0, TYPE_NOTIFY, 1, &payload)
        };
        let video = chunk_full_header(4, 0, TYPE_VIDEO, 1, b"AAAA");

        let mut reassembler = Reassembler::new(ReassemblyConfig::default());
        let mut seq = 0u32;
        for chunk in [play_start, data_start, on_meta, video] {
            let len = chunk.len() as u32;
            reassembler.accept(segment_from_bytes(seq, chunk)).unwrap();
            seq += len;
        }
        let segments = reassembler.finalize().unwrap();
        let mut cursor = Cursor::new(segments);
        let mut decoder = RtmpDecoder::new(RtmpConfig::default());
        let mut out = Vec::new();
        let mut muxer = Muxer::new(&mut out);
        let err = muxer.run(&mut decoder, &mut cursor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingTerminator);
    }

    #[test]
    fn unexpected_end_before_play_start_is_fatal() {
        let mut cursor = Cursor::new(vec![Bytes::new()]);
        let mut decoder = RtmpDecoder::new(RtmpConfig::default());
        let mut out = Vec::new();
        let mut muxer = Muxer::new(&mut out);
        let err = muxer.run(&mut decoder, &mut cursor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEnd);
    }

    #[test]
    fn stream_name_extraction_strips_trailing_period() {
        let payload = on_status_payload("NetStream.Play.Start", Some("Started playing demo.flv."));
        assert_eq!(extract_stream_name(&payload).as_deref(), Some("demo.flv"));
    }
}
