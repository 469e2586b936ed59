// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconstructs a standalone FLV file from an offline packet capture of a
//! one-directional RTMP stream (server to client).
//!
//! The crate is a three-layer pull pipeline:
//!
//! 1. [`reassembly`] turns an unordered, possibly-retransmitted list of TCP
//!    segments into one contiguous byte stream.
//! 2. [`rtmp`] parses that stream as interleaved RTMP chunks and
//!    reassembles complete RTMP messages.
//! 3. [`flv`] drives the chunk decoder, recognizes the session's control
//!    messages, and writes a well-formed FLV file.
//!
//! [`capture`] is the one non-core layer: it turns an external capture
//! format (here, libpcap files) into the [`Segment`](capture::Segment)
//! records the reassembler consumes. Everything downstream of that adapter
//! is pure parsing with no I/O, no threads, and no network access.

mod error;

pub mod capture;
pub mod flv;
pub mod reassembly;
pub mod rtmp;

pub use error::{Error, ErrorKind, Position};

pub(crate) use error::{bail, wrap};
