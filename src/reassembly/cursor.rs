// SPDX-License-Identifier: MIT OR Apache-2.0

//! Byte-stream cursor (component C): sequential, forward-only reads over
//! the ordered chunk list a [`super::Reassembler`] produces, with
//! snapshot/rewind for diagnostics and chunk-decoder backtracking (the
//! handshake-skip probe in [`crate::rtmp`] rewinds once).

use bytes::{Bytes, BytesMut};

/// A saved cursor position. Opaque; only meaningful as an argument to
/// nothing but equality/debug — the decoder instead uses [`Cursor::rewind`]
/// for its one documented use (undoing the handshake probe read).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bookmark {
    segment_index: usize,
    offset_within_segment: usize,
    absolute_byte_count: u64,
}

/// Sequential reader over the reassembled byte stream.
pub struct Cursor {
    segments: Vec<Bytes>,
    segment_index: usize,
    offset_within_segment: usize,
    absolute_byte_count: u64,
    eof: bool,
}

impl Cursor {
    pub fn new(segments: Vec<Bytes>) -> Self {
        Self {
            segments,
            segment_index: 0,
            offset_within_segment: 0,
            absolute_byte_count: 0,
            eof: false,
        }
    }

    /// Total number of bytes available across the whole stream, regardless
    /// of the current position.
    pub fn total_len(&self) -> u64 {
        self.segments.iter().map(|s| s.len() as u64).sum()
    }

    pub fn eof(&self) -> bool {
        self.eof
    }

    pub fn absolute_byte_count(&self) -> u64 {
        self.absolute_byte_count
    }

    pub fn snapshot(&self) -> Bookmark {
        Bookmark {
            segment_index: self.segment_index,
            offset_within_segment: self.offset_within_segment,
            absolute_byte_count: self.absolute_byte_count,
        }
    }

    /// Restarts the cursor at byte 0 and clears `eof`. The only rewind the
    /// core needs is to the very start (undoing the RTMP handshake probe),
    /// so this doesn't take a [`Bookmark`] argument.
    pub fn rewind(&mut self) {
        self.segment_index = 0;
        self.offset_within_segment = 0;
        self.absolute_byte_count = 0;
        self.eof = false;
    }

    fn current_segment(&self) -> Option<&[u8]> {
        self.segments
            .get(self.segment_index)
            .map(|s| &s[self.offset_within_segment..])
    }

    fn advance(&mut self, n: usize) {
        self.offset_within_segment += n;
        self.absolute_byte_count += n as u64;
        while self
            .segments
            .get(self.segment_index)
            .is_some_and(|s| self.offset_within_segment >= s.len())
        {
            self.offset_within_segment -= self.segments[self.segment_index].len();
            self.segment_index += 1;
        }
        if self.segment_index >= self.segments.len() {
            self.eof = true;
        }
    }

    /// Reads up to `n` bytes, crossing chunk boundaries transparently.
    /// Returns fewer than `n` bytes only once the stream is exhausted, at
    /// which point `eof()` becomes true.
    pub fn read(&mut self, n: usize) -> Bytes {
        if n == 0 {
            return Bytes::new();
        }

        // Settles the position onto the next segment that actually has
        // bytes left, skipping any exhausted or empty ones (including a
        // never-read leading empty segment) and setting `eof` if none
        // remain, before the fast path below trusts `current_segment`.
        self.advance(0);
        if self.eof {
            return Bytes::new();
        }

        // Fast path: the whole read fits in the current chunk.
        if let Some(cur) = self.current_segment() {
            if cur.len() >= n {
                let out = self.segments[self.segment_index]
                    .slice(self.offset_within_segment..self.offset_within_segment + n);
                self.advance(n);
                return out;
            }
        }

        let mut out = BytesMut::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            let cur = match self.current_segment() {
                Some(cur) if !cur.is_empty() => cur,
                _ => break,
            };
            let take = remaining.min(cur.len());
            out.extend_from_slice(&cur[..take]);
            self.advance(take);
            remaining -= take;
        }
        out.freeze()
    }

    /// Reads exactly `n` bytes, or `None` if the stream doesn't have that
    /// many bytes left (the decoder's "not enough data" signal).
    pub fn read_exact(&mut self, n: usize) -> Option<Bytes> {
        let before = self.snapshot();
        let data = self.read(n);
        if data.len() == n {
            Some(data)
        } else {
            self.restore(before);
            None
        }
    }

    fn restore(&mut self, bookmark: Bookmark) {
        self.segment_index = bookmark.segment_index;
        self.offset_within_segment = bookmark.offset_within_segment;
        self.absolute_byte_count = bookmark.absolute_byte_count;
        self.eof = false;
    }
}
