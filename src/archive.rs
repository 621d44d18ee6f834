//! Compressed storage for compacted journal segments.
//!
//! Each compaction appends one zstd frame; readers decode the concatenated
//! frames as a single stream of journal lines.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

const COMPRESSION_LEVEL: i32 = 3;

/// Compress `lines` and append them as a new frame, syncing before return.
pub fn append_frame(archive_path: &Path, lines: &[u8]) -> io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(archive_path)?;
    let mut encoder = zstd::Encoder::new(file, COMPRESSION_LEVEL)?;
    encoder.write_all(lines)?;
    let file = encoder.finish()?;
    file.sync_all()?;
    Ok(())
}

/// Streaming reader over every archived line, or `None` if nothing has been
/// archived yet.
pub fn open_reader(archive_path: &Path) -> io::Result<Option<Box<dyn BufRead>>> {
    let file = match File::open(archive_path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let decoder = zstd::Decoder::new(file)?;
    Ok(Some(Box::new(BufReader::new(decoder))))
}
