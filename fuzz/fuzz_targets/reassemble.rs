#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use rtmpcap::capture::Segment;
use rtmpcap::reassembly::{Config, Reassembler};

/// Carves `data` into a sequence of segments: each one consumes a 5-byte
/// header (4-byte LE raw_seq, 1 flags byte where bit 0 is SYN and the rest
/// is a payload length capped at the bytes remaining) followed by that many
/// payload bytes.
fn segments_from(mut data: &[u8]) -> Vec<Segment> {
    let mut segments = Vec::new();
    while data.len() >= 5 {
        let raw_seq = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let flags = data[4];
        let syn = flags & 0x01 != 0;
        let len = (flags >> 1) as usize;
        data = &data[5..];
        let len = len.min(data.len());
        let payload = Bytes::copy_from_slice(&data[..len]);
        data = &data[len..];
        segments.push(Segment { raw_seq, syn, payload });
    }
    segments
}

fuzz_target!(|data: &[u8]| {
    let config = Config {
        ignore_missing: true,
        insert_zeros: true,
    };
    let mut reassembler = Reassembler::new(config);
    for segment in segments_from(data) {
        if reassembler.accept(segment).is_err() {
            return;
        }
    }
    let _ = reassembler.finalize();
});
