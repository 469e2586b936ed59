// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI collaborator: wires the capture reader, ingest adapter, reassembler,
//! cursor, RTMP decoder, and FLV muxer into a single offline conversion from
//! a `.pcap` capture to a `.flv` file.

use std::fs;
use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::error;

use rtmpcap::capture::{pcap, Ingest};
use rtmpcap::flv::Muxer;
use rtmpcap::reassembly::{Config as ReassemblyConfig, Cursor, Reassembler};
use rtmpcap::rtmp::{Config as RtmpConfig, Decoder, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ROUTING_ID};

/// Reconstructs an FLV file from an offline packet capture of a
/// one-directional RTMP stream.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Input `.pcap` capture file.
    input: PathBuf,
    /// Output `.flv` file.
    output: PathBuf,

    /// Tolerate sequence gaps in the captured TCP stream instead of
    /// treating them as fatal.
    #[arg(long)]
    ignore_missing: bool,

    /// Only meaningful with `--ignore-missing`: fill gaps with zero bytes
    /// instead of skipping over them.
    #[arg(long)]
    insert_zeros: bool,

    /// Initial RTMP chunk size assumed before any `Set Chunk Size` message.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    default_chunk_size: usize,

    /// Largest stream ID accepted in a 12-byte chunk header.
    #[arg(long, default_value_t = DEFAULT_MAX_ROUTING_ID)]
    max_routing_id: u32,
}

fn main() {
    env_logger::init();
    if let Err(e) = main_inner() {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn main_inner() -> Result<()> {
    let args = Args::parse();

    let capture = fs::read(&args.input)
        .with_context(|| format!("reading capture file {}", args.input.display()))?;
    let captured_segments =
        pcap::read_segments(&capture).context("parsing pcap capture")?;

    let mut ingest = Ingest::new();
    let mut reassembler = Reassembler::new(ReassemblyConfig {
        ignore_missing: args.ignore_missing,
        insert_zeros: args.insert_zeros,
    });
    for captured in captured_segments {
        let segment = ingest.accept(captured).context("ingesting captured segment")?;
        reassembler.accept(segment).context("reassembling TCP stream")?;
    }
    let chunks = reassembler.finalize().context("finalizing reassembled stream")?;
    let mut cursor = Cursor::new(chunks);

    let mut decoder = Decoder::new(RtmpConfig {
        default_chunk_size: args.default_chunk_size,
        max_routing_id: args.max_routing_id,
        insert_zeros: args.insert_zeros,
    });

    let output_file = File::create(&args.output)
        .with_context(|| format!("creating output file {}", args.output.display()))?;
    let mut muxer = Muxer::new(output_file);

    match muxer.run(&mut decoder, &mut cursor) {
        Ok(()) => Ok(()),
        Err(e) => {
            // No partial files are left on failure.
            drop(muxer);
            let _ = fs::remove_file(&args.output);
            Err(e).with_context(|| format!("converting {} to FLV", args.input.display()))
        }
    }
}
