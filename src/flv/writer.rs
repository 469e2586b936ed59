// SPDX-License-Identifier: MIT OR Apache-2.0

//! FLV writer (component F): byte-exact emission of the file header, tags,
//! and trailing tag-size fields. Takes any [`std::io::Write`] so the CLI
//! collaborator can point it at a file while tests point it at a `Vec<u8>`.

use std::io::Write;

use crate::Error;

const SIGNATURE: &[u8; 3] = b"FLV";
const VERSION: u8 = 0x01;
const AUDIO_AND_VIDEO_FLAGS: u8 = 0x05;
const HEADER_SIZE: u32 = 9;
const TAG_HEADER_LEN: u32 = 11;

pub struct FlvWriter<W> {
    inner: W,
}

impl<W: Write> FlvWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes the 9-byte FLV signature/version/flags/header-size followed
    /// by the 4-byte `PreviousTagSize0` placeholder.
    pub fn write_header(&mut self) -> Result<(), Error> {
        self.inner.write_all(SIGNATURE)?;
        self.inner.write_all(&[VERSION, AUDIO_AND_VIDEO_FLAGS])?;
        self.inner.write_all(&HEADER_SIZE.to_be_bytes())?;
        self.inner.write_all(&0u32.to_be_bytes())?;
        Ok(())
    }

    /// Writes one FLV tag: 11-byte header, payload, 4-byte trailer.
    pub fn write_tag(&mut self, tag_type: u8, timestamp: u32, payload: &[u8]) -> Result<(), Error> {
        let data_size = payload.len() as u32;
        self.inner.write_all(&[tag_type])?;
        self.inner.write_all(&data_size.to_be_bytes()[1..])?;
        let ts = timestamp & 0x00FF_FFFF;
        self.inner.write_all(&ts.to_be_bytes()[1..])?;
        self.inner.write_all(&[0x00])?; // TimestampExtended, always 0 here
        self.inner.write_all(&[0x00, 0x00, 0x00])?; // StreamID, always 0
        self.inner.write_all(payload)?;
        let trailer = TAG_HEADER_LEN + data_size;
        self.inner.write_all(&trailer.to_be_bytes())?;
        Ok(())
    }

    /// Writes already-framed FLV bytes verbatim (type `0x16` passthrough).
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
