//! Temporal index — coarse-to-fine seek support (§4.4).
//!
//! On-disk the index is a label record followed by a sequence of
//! fixed-size entries: 20 bytes for v2 (`ts_sec, ts_usec, vol, off_meta,
//! off_data`, all u32/i32), 32 bytes for v3 (`ts_sec:u64, ts_nsec:u32,
//! vol:i32, off_meta:u64, off_data:u64`). In memory both collapse to one
//! 64-bit `TemporalIndexEntry` shape, grounded on `__pmLogLoadIndex` in
//! `e_index.c`.

use crate::byte_codec::{
    read_i32, read_u32, read_u64, write_i32, write_u32, write_u64, Timestamp,
};
use crate::label::LabelVersion;
use std::io::{self, Read, Write};
use thiserror::Error;

pub const V2_ENTRY_LEN: usize = 4 + 4 + 4 + 4 + 4;
pub const V3_ENTRY_LEN: usize = 8 + 4 + 4 + 8 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalIndexEntry {
    pub timestamp: Timestamp,
    pub vol: i32,
    pub off_meta: u64,
    pub off_data: u64,
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("truncated index entry: {0}")]
    BadIndex(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn entry_len(version: LabelVersion) -> usize {
    match version {
        LabelVersion::V2 => V2_ENTRY_LEN,
        LabelVersion::V3 => V3_ENTRY_LEN,
    }
}

/// Read every entry from the current position to EOF.
///
/// A read that returns zero bytes at an entry boundary ends the load
/// cleanly (the common case: the logger flushed a whole number of
/// entries). A read that returns between 1 and `entry_len - 1` bytes is a
/// truncated final entry and is fatal, per §4.4.
pub fn load_index<R: Read>(
    r: &mut R,
    version: LabelVersion,
) -> Result<Vec<TemporalIndexEntry>, IndexError> {
    let len = entry_len(version);
    let mut entries = Vec::new();
    let mut buf = vec![0u8; len];
    loop {
        let mut filled = 0;
        while filled < len {
            let n = r.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        if filled != len {
            return Err(IndexError::BadIndex(format!(
                "expected {len}-byte entry, got {filled} bytes at EOF"
            )));
        }
        entries.push(decode_entry(&buf, version)?);
    }
    Ok(entries)
}

fn decode_entry(buf: &[u8], version: LabelVersion) -> Result<TemporalIndexEntry, IndexError> {
    let mut cur = io::Cursor::new(buf);
    Ok(match version {
        LabelVersion::V2 => {
            let ts_sec = read_u32(&mut cur)?;
            let ts_usec = read_u32(&mut cur)?;
            let vol = read_i32(&mut cur)?;
            let off_meta = read_u32(&mut cur)?;
            let off_data = read_u32(&mut cur)?;
            TemporalIndexEntry {
                timestamp: Timestamp::new(ts_sec as i64, (ts_usec as i32) * 1000),
                vol,
                off_meta: off_meta as u64,
                off_data: off_data as u64,
            }
        }
        LabelVersion::V3 => {
            let ts_sec = read_u64(&mut cur)? as i64;
            let ts_nsec = read_u32(&mut cur)? as i32;
            let vol = read_i32(&mut cur)?;
            let off_meta = read_u64(&mut cur)?;
            let off_data = read_u64(&mut cur)?;
            TemporalIndexEntry {
                timestamp: Timestamp::new(ts_sec, ts_nsec),
                vol,
                off_meta,
                off_data,
            }
        }
    })
}

/// Append one entry to the index file. Each offset is written into its
/// own on-disk field — the corrected counterpart of `__pmLogPutIndex_v3`'s
/// `off_meta`-into-`off_data` transcription bug (DESIGN.md Open Question
/// 1). Emits a diagnostic, not an error, when either offset is zero: this
/// has been observed when the logger aborts during an early flush.
pub fn put_index<W: Write>(
    w: &mut W,
    version: LabelVersion,
    entry: &TemporalIndexEntry,
) -> io::Result<()> {
    if entry.off_meta == 0 || entry.off_data == 0 {
        log::warn!(
            "zero offset in temporal index entry at {}: off_meta={} off_data={}",
            entry.timestamp,
            entry.off_meta,
            entry.off_data
        );
    }
    match version {
        LabelVersion::V2 => {
            write_u32(w, entry.timestamp.sec as u32)?;
            write_u32(w, (entry.timestamp.nsec / 1000) as u32)?;
            write_i32(w, entry.vol)?;
            write_u32(w, entry.off_meta as u32)?;
            write_u32(w, entry.off_data as u32)?;
        }
        LabelVersion::V3 => {
            write_u64(w, entry.timestamp.sec as u64)?;
            write_u32(w, entry.timestamp.nsec as u32)?;
            write_i32(w, entry.vol)?;
            write_u64(w, entry.off_meta)?;
            write_u64(w, entry.off_data)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekPosition {
    /// Target precedes every index entry.
    BeforeFirst,
    /// Target follows every index entry.
    AfterLast,
    /// Seek to the end of the record described by `index[.0]`.
    At(usize),
}

/// Find the nearest index entry to `target`, per §4.4's tie-break rule:
/// the smallest `j` with `index[j].timestamp >= target`; an exact match
/// wins outright, otherwise whichever of `j-1`/`j` is closer by absolute
/// delta.
pub fn nearest(index: &[TemporalIndexEntry], target: Timestamp) -> SeekPosition {
    let j = index.partition_point(|e| e.timestamp < target);
    if j == 0 {
        return SeekPosition::BeforeFirst;
    }
    if j == index.len() {
        return SeekPosition::AfterLast;
    }
    if index[j].timestamp == target {
        return SeekPosition::At(j);
    }
    let d_prev = index[j - 1].timestamp.abs_delta_nanos(target);
    let d_j = index[j].timestamp.abs_delta_nanos(target);
    // An exact tie favors `j`: `j`'s record already satisfies `ts >= T`, so
    // landing on it (then stepping back one record for a FORWARD read, per
    // §4.7 step 3) reproduces it exactly rather than its predecessor.
    SeekPosition::At(if d_prev < d_j { j - 1 } else { j })
}

/// As [`nearest`], but when the chosen entry falls in the archive's last
/// (possibly still-growing, possibly truncated) volume and its data
/// offset exceeds that volume's current size, falls back to the lower
/// neighbour instead — the entry would point past the end of a file that
/// was truncated or never fully written.
pub fn nearest_with_truncation_fallback(
    index: &[TemporalIndexEntry],
    target: Timestamp,
    last_volume_id: i32,
    last_volume_size: u64,
) -> SeekPosition {
    match nearest(index, target) {
        SeekPosition::At(j) => {
            let e = &index[j];
            if e.vol == last_volume_id && e.off_data > last_volume_size && j > 0 {
                SeekPosition::At(j - 1)
            } else {
                SeekPosition::At(j)
            }
        }
        other => other,
    }
}
