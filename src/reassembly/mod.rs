// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP reassembler (component B) and byte-stream cursor (component C).
//!
//! [`Reassembler`] orders, deduplicates, and gap-fills the payloads of one
//! TCP half-flow; [`Reassembler::finalize`] hands the result to a
//! [`Cursor`] for sequential, forward-only reads.

pub mod cursor;

pub use cursor::Cursor;

use bytes::Bytes;

use crate::capture::Segment;
use crate::error::Position;
use crate::{bail, Error, ErrorKind};

/// Reassembly policy, set by the CLI collaborator from `--ignore-missing`
/// and `--insert-zeros`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    /// `false` (the default) is the spec's `strict` mode: any sequence gap
    /// is fatal. `true` is `lenient`.
    pub ignore_missing: bool,
    /// Only consulted in lenient mode: fill gaps with zero bytes instead of
    /// letting the cursor jump over them.
    pub insert_zeros: bool,
}

struct Record {
    relative_seq: u32,
    payload: Bytes,
}

/// Orders and gap-fills segments from one TCP half-flow.
///
/// Records are kept sorted by `relative_seq`; [`Reassembler::accept`] does
/// a tail-backward search rather than a binary search, since the common
/// case (segments mostly arrive in order) makes the tail the likely
/// insertion point.
pub struct Reassembler {
    initial_seq: Option<u32>,
    records: Vec<Record>,
    config: Config,
}

impl Reassembler {
    pub fn new(config: Config) -> Self {
        Self {
            initial_seq: None,
            records: Vec::new(),
            config,
        }
    }

    /// Places `segment` into the buffer at its relative sequence number.
    pub fn accept(&mut self, segment: Segment) -> Result<(), Error> {
        let initial = *self.initial_seq.get_or_insert_with(|| {
            if segment.syn {
                segment.raw_seq.wrapping_add(1)
            } else {
                segment.raw_seq
            }
        });
        let relative_seq = segment.raw_seq.wrapping_sub(initial);
        let len = segment.payload.len();

        // A segment with no payload (e.g. a bare SYN) carries no bytes to
        // place; it only ever matters for establishing `initial_seq` above.
        if len == 0 {
            return Ok(());
        }

        match self.records.iter().rposition(|r| r.relative_seq <= relative_seq) {
            Some(pos) if self.records[pos].relative_seq == relative_seq => {
                if self.records[pos].payload.len() == len {
                    self.records[pos].payload = segment.payload;
                } else {
                    bail!(
                        ErrorKind::RetransmitLengthMismatch,
                        Position::at_data_byte(relative_seq as u64),
                        "retransmission at seq {relative_seq} has length {} but buffered copy has length {}",
                        len,
                        self.records[pos].payload.len()
                    );
                }
            }
            Some(pos) => {
                self.records.insert(
                    pos + 1,
                    Record {
                        relative_seq,
                        payload: segment.payload,
                    },
                );
            }
            None if self.records.is_empty() => {
                self.records.push(Record {
                    relative_seq,
                    payload: segment.payload,
                });
            }
            None => {
                bail!(
                    ErrorKind::OutOfOrderUnplaceable,
                    Position::at_data_byte(relative_seq as u64),
                    "segment at relative seq {relative_seq} precedes every buffered record"
                );
            }
        }
        Ok(())
    }

    /// Walks the ordered buffer once, resolving gaps per [`Config`], and
    /// returns the ordered list of byte chunks a [`Cursor`] reads from.
    pub fn finalize(self) -> Result<Vec<Bytes>, Error> {
        let mut chunks = Vec::with_capacity(self.records.len());
        let mut expected: u64 = 0;

        for record in self.records {
            let seq = record.relative_seq as u64;

            if seq < expected {
                // Partial overlap with an already-emitted byte range (not a
                // byte-identical retransmission, which `accept` already
                // resolved). Keep only the non-overlapping tail.
                let overlap = expected - seq;
                if overlap as usize >= record.payload.len() {
                    continue;
                }
                chunks.push(record.payload.slice(overlap as usize..));
                expected += record.payload.len() as u64 - overlap;
                continue;
            }

            if seq > expected {
                let gap = seq - expected;
                if !self.config.ignore_missing {
                    bail!(
                        ErrorKind::MissingData,
                        Position::at_data_byte(expected),
                        "missing {gap} bytes of sequence data starting at relative seq {expected}"
                    );
                }
                if self.config.insert_zeros {
                    chunks.push(Bytes::from(vec![0u8; gap as usize]));
                    expected += gap;
                }
                // else: lenient without zero-fill — the cursor simply jumps.
            }

            expected += record.payload.len() as u64;
            if expected > u32::MAX as u64 {
                bail!(
                    ErrorKind::SeqOverflow,
                    Position::at_data_byte(seq),
                    "expected next sequence number {expected} exceeds 2^32"
                );
            }
            chunks.push(record.payload);
        }

        Ok(chunks)
    }
}
