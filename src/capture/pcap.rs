// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minimal libpcap (classic `.pcap`) file reader — a capture collaborator
//! kept outside the core decode/reassembly path. Decodes just enough of
//! Ethernet II + IPv4 + TCP to build [`CapturedSegment`] records for
//! [`super::Ingest`]; does not validate checksums (the core already
//! assumes the reader has done that) and does not handle IPv6, VLAN tags,
//! or non-Ethernet link types.

use bytes::{Buf, Bytes};
use std::net::Ipv4Addr;

use super::{CapturedSegment, FlowTuple};
use crate::error::Position;
use crate::{bail, Error, ErrorKind};

const MAGIC_LE: u32 = 0xa1b2_c3d4;
const MAGIC_SWAPPED: u32 = 0xd4c3_b2a1;
const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;
const ETHERNET_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const IPPROTO_TCP: u8 = 6;
const LINKTYPE_ETHERNET: u32 = 1;

/// Parses a complete in-memory `.pcap` file into the [`CapturedSegment`]s
/// it contains, in file order. Non-Ethernet, non-IPv4, or non-TCP packets
/// are silently skipped — this collaborator's job is to feed the core, not
/// to account for every packet in the trace.
pub fn read_segments(data: &[u8]) -> Result<Vec<CapturedSegment>, Error> {
    if data.len() < GLOBAL_HEADER_LEN {
        bail!(
            ErrorKind::CaptureParse,
            Position::at_offset(0),
            "capture file is shorter than the pcap global header"
        );
    }

    let magic = u32::from_ne_bytes([data[0], data[1], data[2], data[3]]);
    let big_endian = match u32::from_be_bytes([data[0], data[1], data[2], data[3]]) {
        MAGIC_LE => false,
        MAGIC_SWAPPED => true,
        _ if magic == MAGIC_LE => false,
        _ => bail!(
            ErrorKind::CaptureParse,
            Position::at_offset(0),
            "bad pcap magic number {magic:#x}"
        ),
    };

    let network = read_u32(&data[20..24], big_endian);
    if network != LINKTYPE_ETHERNET {
        bail!(
            ErrorKind::CaptureParse,
            Position::at_offset(20),
            "unsupported pcap link type {network} (only Ethernet is supported)"
        );
    }

    let mut segments = Vec::new();
    let mut offset = GLOBAL_HEADER_LEN;
    while offset < data.len() {
        if offset + RECORD_HEADER_LEN > data.len() {
            bail!(
                ErrorKind::CaptureParse,
                Position::at_offset(offset as u64),
                "truncated pcap record header"
            );
        }
        let incl_len = read_u32(&data[offset + 8..offset + 12], big_endian) as usize;
        let record_start = offset + RECORD_HEADER_LEN;
        let record_end = record_start
            .checked_add(incl_len)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                crate::wrap!(
                    ErrorKind::CaptureParse,
                    Position::at_offset(offset as u64),
                    "pcap record claims {incl_len} bytes past end of file"
                )
            })?;

        if let Some(seg) = parse_ethernet_frame(&data[record_start..record_end]) {
            segments.push(seg);
        }

        offset = record_end;
    }

    Ok(segments)
}

fn read_u32(bytes: &[u8], big_endian: bool) -> u32 {
    let arr = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if big_endian {
        u32::from_be_bytes(arr)
    } else {
        u32::from_le_bytes(arr)
    }
}

/// Returns `None` for anything that isn't an Ethernet+IPv4+TCP packet with
/// a payload; that's not an error, just out of scope for this collaborator.
fn parse_ethernet_frame(frame: &[u8]) -> Option<CapturedSegment> {
    if frame.len() < ETHERNET_HEADER_LEN {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    parse_ipv4_packet(&frame[ETHERNET_HEADER_LEN..])
}

fn parse_ipv4_packet(packet: &[u8]) -> Option<CapturedSegment> {
    if packet.len() < 20 {
        return None;
    }
    let version = packet[0] >> 4;
    if version != 4 {
        return None;
    }
    let ihl = (packet[0] & 0x0f) as usize * 4;
    if ihl < 20 || packet.len() < ihl {
        return None;
    }
    let total_length = u16::from_be_bytes([packet[2], packet[3]]) as usize;
    let flags_and_frag = u16::from_be_bytes([packet[6], packet[7]]);
    let more_fragments = flags_and_frag & 0x2000 != 0;
    let frag_offset = flags_and_frag & 0x1fff;
    let is_fragment = more_fragments || frag_offset != 0;
    let protocol = packet[9];
    if protocol != IPPROTO_TCP {
        return None;
    }
    let src_ip = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dst_ip = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);

    let end = total_length.min(packet.len()).max(ihl);
    let tcp_segment = &packet[ihl..end];
    parse_tcp_segment(tcp_segment, src_ip, dst_ip, is_fragment)
}

fn parse_tcp_segment(
    segment: &[u8],
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    is_fragment: bool,
) -> Option<CapturedSegment> {
    if segment.len() < 20 {
        return None;
    }
    let mut buf = segment;
    let src_port = buf.get_u16();
    let dst_port = buf.get_u16();
    let raw_seq = buf.get_u32();
    let _ack_number = buf.get_u32();
    let data_offset_byte = buf[0];
    let data_offset = (data_offset_byte >> 4) as usize * 4;
    if data_offset < 20 || data_offset > segment.len() {
        return None;
    }
    let flags = segment[13];
    let fin = flags & 0x01 != 0;
    let syn = flags & 0x02 != 0;
    let rst = flags & 0x04 != 0;
    let ack = flags & 0x10 != 0;
    let urg = flags & 0x20 != 0;
    let _ = fin;

    let payload = Bytes::copy_from_slice(&segment[data_offset..]);

    Some(CapturedSegment {
        tuple: FlowTuple {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
        },
        raw_seq,
        syn,
        ack,
        urg,
        rst,
        is_fragment,
        payload,
    })
}
