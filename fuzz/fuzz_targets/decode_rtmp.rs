#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use rtmpcap::reassembly::Cursor;
use rtmpcap::rtmp::{Config, Decoder};

fuzz_target!(|data: &[u8]| {
    let mut cursor = Cursor::new(vec![Bytes::copy_from_slice(data)]);
    let mut decoder = Decoder::new(Config::default());
    while let Ok(Some(_)) = decoder.next_message(&mut cursor) {}
});
