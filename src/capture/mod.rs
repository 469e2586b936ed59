// SPDX-License-Identifier: MIT OR Apache-2.0

//! Packet ingest adapter (component A).
//!
//! Normalizes capture-reader records into the core's [`Segment`] type,
//! enforcing the two fatal conditions the core cares about: segments must
//! all belong to one TCP 4-tuple, and only plain, unfragmented, ACKed,
//! non-URG/non-RST segments are supported. Everything upstream of this
//! module (actually reading a capture file) is a collaborator; see
//! [`pcap`] for the one this crate ships.

pub mod pcap;

use bytes::Bytes;
use std::net::Ipv4Addr;

use crate::error::{ErrorKind, Position};
use crate::{bail, Error};

/// The 4-tuple identifying one TCP half-flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTuple {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

/// A segment as handed to the ingest adapter by a capture reader, still
/// carrying the flags [`Ingest::accept`] inspects.
#[derive(Debug, Clone)]
pub struct CapturedSegment {
    pub tuple: FlowTuple,
    pub raw_seq: u32,
    pub syn: bool,
    pub ack: bool,
    pub urg: bool,
    pub rst: bool,
    /// True if this IP packet carried fragmentation (MF set or nonzero
    /// fragment offset).
    pub is_fragment: bool,
    pub payload: Bytes,
}

/// A segment accepted by the ingest adapter; the type the reassembler
/// (component B) consumes. Spec data model §3.
#[derive(Debug, Clone)]
pub struct Segment {
    pub raw_seq: u32,
    pub syn: bool,
    pub payload: Bytes,
}

/// Accepts a stream of [`CapturedSegment`]s, rejecting anything that
/// doesn't belong to a single, plain TCP half-flow.
#[derive(Debug, Default)]
pub struct Ingest {
    tuple: Option<FlowTuple>,
    packet_index: u64,
}

impl Ingest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and normalizes one captured segment.
    ///
    /// Fails with [`ErrorKind::MixedFlow`] if `captured`'s 4-tuple differs
    /// from the first accepted segment's, or [`ErrorKind::Unsupported`] if
    /// it's an IP fragment, has URG or RST set, or lacks ACK.
    pub fn accept(&mut self, captured: CapturedSegment) -> Result<Segment, Error> {
        let pos = Position::at_ip_packet(self.packet_index);
        self.packet_index += 1;

        match self.tuple {
            None => self.tuple = Some(captured.tuple),
            Some(first) if first == captured.tuple => {}
            Some(first) => bail!(
                ErrorKind::MixedFlow,
                pos,
                "segment 4-tuple {:?} does not match first-seen {:?}",
                captured.tuple,
                first
            ),
        }

        if captured.is_fragment {
            bail!(ErrorKind::Unsupported, pos, "segment is an IP fragment");
        }
        if captured.urg {
            bail!(ErrorKind::Unsupported, pos, "segment has URG set");
        }
        if captured.rst {
            bail!(ErrorKind::Unsupported, pos, "segment has RST set");
        }
        if !captured.ack {
            bail!(ErrorKind::Unsupported, pos, "segment is missing ACK");
        }

        Ok(Segment {
            raw_seq: captured.raw_seq,
            syn: captured.syn,
            payload: captured.payload,
        })
    }
}
