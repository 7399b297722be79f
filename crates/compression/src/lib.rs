//! Gzip streaming for index snapshots (`spec.md` §4.5 `snapshot`:
//! `storage.db.<ns_ts>.gz`). This is ambient I/O plumbing, not a feature the
//! spec's non-goals touch, so it still goes through a real compression
//! crate rather than a hand-rolled codec — `flate2` is the crate several
//! storage projects in the retrieval pack (`proxmox-backup`) use for the
//! same "gzip a stream of bytes to a sink" job.

mod error;

pub use error::CompressionError;

use std::io::{Read, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

/// Copies every byte `source` yields into `sink`, gzip-compressed. Used to
/// stream the index store's consistent snapshot straight into the
/// `storage.db.<ts>.gz` artifact without buffering the whole snapshot in
/// memory.
pub fn gzip_stream<R: Read, W: Write>(mut source: R, sink: W) -> Result<u64, CompressionError> {
    let mut encoder = GzEncoder::new(sink, Compression::default());
    let copied = std::io::copy(&mut source, &mut encoder)?;
    encoder.finish()?;
    Ok(copied)
}
