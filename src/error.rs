// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crate-wide error type.
//!
//! Every fatal condition named in the component contracts (reassembly,
//! chunk decoding, muxing) is one [`ErrorKind`] variant. [`Error`] wraps a
//! kind with a human-readable message and, where the component has one, a
//! [`Position`] so the CLI can print "data byte 40213" style diagnostics.
//!
//! Mirrors the split the RTSP depacketizer this crate is modeled on uses:
//! a small `Arc`-wrapped inner struct so `Error` stays cheaply `Clone`.

use std::fmt;
use std::sync::Arc;

/// Abstract error kinds from the component contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("segments from more than one TCP 4-tuple")]
    MixedFlow,
    #[error("unsupported segment (URG/RST set, ACK missing, or an IP fragment)")]
    Unsupported,
    #[error("out-of-order segment has no valid insertion point")]
    OutOfOrderUnplaceable,
    #[error("retransmission has the same sequence number but a different length")]
    RetransmitLengthMismatch,
    #[error("sequence gap in strict reassembly mode")]
    MissingData,
    #[error("computed expected sequence number overflowed past 2^32")]
    SeqOverflow,
    #[error("message stream (routing) id is out of range")]
    BadRoutingId,
    #[error("1-byte chunk header with no prior header for its chunk stream")]
    ContinuationWithoutContext,
    #[error("re-declared chunk header disagrees with the buffered message")]
    PartialMismatch,
    #[error("SetChunkSize payload does not start with 0x00")]
    UnknownChunkSizeMessage,
    #[error("input ended before the session reached the expected state")]
    UnexpectedEnd,
    #[error("stream ended without a NetStream.Play.Complete terminator")]
    MissingTerminator,
    #[error("I/O error")]
    Io,
    #[error("malformed capture file")]
    CaptureParse,
}

/// Position within the pipeline at which an error was detected, for
/// diagnostics only (spec: "stream position (data byte, IP packet, offset)").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub data_byte: Option<u64>,
    pub ip_packet: Option<u64>,
    pub offset: Option<u64>,
}

impl Position {
    pub fn at_data_byte(byte: u64) -> Self {
        Self {
            data_byte: Some(byte),
            ..Default::default()
        }
    }

    pub fn at_ip_packet(index: u64) -> Self {
        Self {
            ip_packet: Some(index),
            ..Default::default()
        }
    }

    pub fn at_offset(offset: u64) -> Self {
        Self {
            offset: Some(offset),
            ..Default::default()
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if let Some(b) = self.data_byte {
            write!(f, "data byte {b}")?;
            wrote = true;
        }
        if let Some(p) = self.ip_packet {
            if wrote {
                write!(f, ", ")?;
            }
            write!(f, "IP packet {p}")?;
            wrote = true;
        }
        if let Some(o) = self.offset {
            if wrote {
                write!(f, ", ")?;
            }
            write!(f, "offset {o}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct ErrorInt {
    pub(crate) kind: ErrorKind,
    pub(crate) msg: String,
    pub(crate) position: Option<Position>,
}

/// The crate's error type: an [`ErrorKind`] plus context.
///
/// Cheap to `Clone` (an `Arc` underneath) so it can be stashed in state
/// machines without fighting the borrow checker on the way out.
#[derive(Debug, Clone)]
pub struct Error(pub(crate) Arc<ErrorInt>);

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }

    pub fn position(&self) -> Option<Position> {
        self.0.position
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.msg)?;
        if let Some(pos) = self.0.position {
            write!(f, " ({pos})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        crate::wrap!(ErrorKind::Io, "{e}")
    }
}

/// Builds an [`Error`] from a kind and a `format!`-style message, optionally
/// preceded by a [`Position`]. The format string must be a string literal so
/// the two arms can be told apart: `$fmt:literal` is what lets a 3-token
/// position call (`kind, pos, "fmt", ...`) avoid being swallowed by the
/// no-position arm, which `$($arg:tt)*` alone cannot distinguish from.
macro_rules! wrap {
    ($kind:expr, $pos:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::Error(::std::sync::Arc::new($crate::error::ErrorInt {
            kind: $kind,
            msg: ::std::format!($fmt $(, $arg)*),
            position: ::std::option::Option::Some($pos),
        }))
    };
    ($kind:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::Error(::std::sync::Arc::new($crate::error::ErrorInt {
            kind: $kind,
            msg: ::std::format!($fmt $(, $arg)*),
            position: None,
        }))
    };
}

/// `return Err(wrap!(...))`.
macro_rules! bail {
    ($($arg:tt)*) => {
        return ::std::result::Result::Err($crate::wrap!($($arg)*))
    };
}

pub(crate) use bail;
pub(crate) use wrap;
