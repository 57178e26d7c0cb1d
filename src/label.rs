//! Archive label record — two wire versions (§4.2, §6).
//!
//! v2 is a fixed 132-byte frame with 64-byte hostname / 40-byte timezone
//! fields, null-padded and truncated to those maxima. v3 widens the
//! timestamp to nanoseconds, the volume offsets elsewhere to 64 bits, and
//! makes hostname/timezone/zoneinfo length-prefixed and variable, padded
//! so the whole record is a multiple of 8 bytes.
//!
//! Both versions share one on-disk shape: `[len][magic][...body...][len]`,
//! where `magic`'s low byte selects the version and the upper 24 bits must
//! match [`MAGIC_BASE`]. Grounded on `__pmLogChkLabel2`/`__pmLogChkLabel3`
//! in the original archive-log implementation for the exact truncation and
//! length-accounting rules.

use crate::byte_codec::{
    read_i32, read_u16, read_u32, read_u64, write_i32, write_u16, write_u32, write_u64, Timestamp,
};
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;

/// Upper 24 bits of every label's magic word. Frozen.
pub const MAGIC_BASE: u32 = 0x4D_4554;

pub const MAX_HOSTLEN: usize = 64;
pub const TZ_MAXLEN: usize = 40;

/// Fixed on-disk size of a v2 label, including both length fields.
pub const V2_TOTAL_LEN: u32 = 4 + 4 + 4 + 4 + 4 + 4 + MAX_HOSTLEN as u32 + TZ_MAXLEN as u32 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelVersion {
    V2,
    V3,
}

impl LabelVersion {
    fn byte(self) -> u8 {
        match self {
            LabelVersion::V2 => 2,
            LabelVersion::V3 => 3,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            2 => Some(LabelVersion::V2),
            3 => Some(LabelVersion::V3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLabel {
    pub version: LabelVersion,
    pub magic: u32,
    pub pid: u32,
    pub start: Timestamp,
    pub vol: i32,
    /// v3 only; zero for v2.
    pub feature_bits: u16,
    pub hostname: String,
    pub timezone: String,
    /// v3 only; empty for v2.
    pub zoneinfo: String,
    /// Exact on-disk size of this label record, framing included. Always
    /// a multiple of 8 for v3 (invariant, §3).
    pub total_len: u32,
}

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("empty file: no label at offset 0")]
    EmptyFile,
    #[error("bad magic: not an archive label")]
    BadMagic,
    #[error("unsupported label version {0}")]
    UnsupportedVersion(u8),
    #[error("label volume {found} does not match expected volume {expected}")]
    VolumeMismatch { expected: i32, found: i32 },
    #[error("bad label: {0}")]
    BadLabel(String),
    /// File size equals the label's on-disk size — a distinct, non-error
    /// outcome per spec.md §4.2.
    #[error("empty archive: file contains only a label")]
    EmptyArchive,
    /// A volume's label disagrees with the archive's metadata label on
    /// pid or hostname. Preserved rather than silently accepted, per the
    /// corresponding Open Question decision in DESIGN.md.
    #[error("label mismatch: {0}")]
    Mismatch(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ArchiveLabel {
    /// Truthy when `other`'s pid and hostname match this label's. Used at
    /// archive-open time to cross-check a volume's label against the
    /// metadata label, and to cross-check the first archive's hostname
    /// against later archives composed into one context (§4.5, §9).
    pub fn same_origin(&self, other: &ArchiveLabel) -> bool {
        self.pid == other.pid && self.hostname == other.hostname
    }
}

fn bytes_to_string_truncate(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn write_fixed_truncated<W: Write>(w: &mut W, s: &str, width: usize) -> io::Result<()> {
    let mut buf = vec![0u8; width];
    let bytes = s.as_bytes();
    let n = bytes.len().min(width.saturating_sub(1));
    buf[..n].copy_from_slice(&bytes[..n]);
    w.write_all(&buf)
}

/// Read and fully validate a label record at offset 0 of `r`.
///
/// `expected_volume_id` is checked against the embedded volume id
/// (`VolumeMismatch` on disagreement). `file_len` is the total byte size
/// of the stream; when it equals the label's on-disk size the archive has
/// no data records and `EmptyArchive` is returned instead of `Ok`.
pub fn read_label<R: Read + Seek>(
    r: &mut R,
    expected_volume_id: i32,
    file_len: u64,
) -> Result<ArchiveLabel, LabelError> {
    r.seek(SeekFrom::Start(0))?;

    let header_len = match read_u32(r) {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(LabelError::EmptyFile),
        Err(e) => return Err(e.into()),
    };
    let magic = read_u32(r)?;
    let base = magic >> 8;
    if base != MAGIC_BASE {
        return Err(LabelError::BadMagic);
    }
    let version_byte = (magic & 0xFF) as u8;
    let version =
        LabelVersion::from_byte(version_byte).ok_or(LabelError::UnsupportedVersion(version_byte))?;

    let mut label = match version {
        LabelVersion::V2 => read_v2_body(r, header_len)?,
        LabelVersion::V3 => read_v3_body(r)?,
    };
    label.magic = magic;

    if label.vol != expected_volume_id {
        return Err(LabelError::VolumeMismatch {
            expected: expected_volume_id,
            found: label.vol,
        });
    }

    if header_len < 4 {
        return Err(LabelError::BadLabel("header length too small".into()));
    }
    r.seek(SeekFrom::Start((header_len - 4) as u64))?;
    let trailer = read_u32(r)?;
    if trailer != header_len {
        return Err(LabelError::BadLabel(format!(
            "header length {header_len} != trailer length {trailer}"
        )));
    }
    label.total_len = header_len;

    if file_len == header_len as u64 {
        return Err(LabelError::EmptyArchive);
    }

    Ok(label)
}

fn read_v2_body<R: Read>(r: &mut R, header_len: u32) -> Result<ArchiveLabel, LabelError> {
    if header_len != V2_TOTAL_LEN {
        return Err(LabelError::BadLabel(format!(
            "v2 label length {header_len} != expected {V2_TOTAL_LEN}"
        )));
    }
    let pid = read_u32(r)?;
    let start_sec = read_u32(r)?;
    let start_usec = read_u32(r)?;
    let vol = read_i32(r)?;
    let mut host_buf = [0u8; MAX_HOSTLEN];
    r.read_exact(&mut host_buf)?;
    let mut tz_buf = [0u8; TZ_MAXLEN];
    r.read_exact(&mut tz_buf)?;

    Ok(ArchiveLabel {
        version: LabelVersion::V2,
        magic: 0,
        pid,
        start: Timestamp::new(start_sec as i64, (start_usec as i32) * 1000),
        vol,
        feature_bits: 0,
        hostname: bytes_to_string_truncate(&host_buf),
        timezone: bytes_to_string_truncate(&tz_buf),
        zoneinfo: String::new(),
        total_len: header_len,
    })
}

fn read_v3_body<R: Read>(r: &mut R) -> Result<ArchiveLabel, LabelError> {
    let pid = read_u32(r)?;
    let start_sec = read_u64(r)? as i64;
    let start_nsec = read_u32(r)? as i32;
    let vol = read_i32(r)?;
    let feature_bits = read_u16(r)?;
    let hostname_len = read_u16(r)? as usize;
    let timezone_len = read_u16(r)? as usize;
    let zoneinfo_len = read_u16(r)? as usize;

    let mut hostname = vec![0u8; hostname_len];
    r.read_exact(&mut hostname)?;
    let mut timezone = vec![0u8; timezone_len];
    r.read_exact(&mut timezone)?;
    let mut zoneinfo = vec![0u8; zoneinfo_len];
    r.read_exact(&mut zoneinfo)?;

    Ok(ArchiveLabel {
        version: LabelVersion::V3,
        magic: 0,
        pid,
        start: Timestamp::new(start_sec, start_nsec),
        vol,
        feature_bits,
        hostname: String::from_utf8_lossy(&hostname).into_owned(),
        timezone: String::from_utf8_lossy(&timezone).into_owned(),
        zoneinfo: String::from_utf8_lossy(&zoneinfo).into_owned(),
        total_len: 0, // filled in by read_label
    })
}

/// Write `label` at the current stream position (must be offset 0).
/// Returns the exact number of bytes written (the label's `total_len`).
pub fn write_label<W: Write + Seek>(w: &mut W, label: &ArchiveLabel) -> io::Result<u32> {
    match label.version {
        LabelVersion::V2 => write_v2(w, label),
        LabelVersion::V3 => write_v3(w, label),
    }
}

fn write_v2<W: Write>(w: &mut W, label: &ArchiveLabel) -> io::Result<u32> {
    write_u32(w, V2_TOTAL_LEN)?;
    write_u32(w, (MAGIC_BASE << 8) | LabelVersion::V2.byte() as u32)?;
    write_u32(w, label.pid)?;
    write_u32(w, label.start.sec as u32)?;
    write_u32(w, (label.start.nsec / 1000) as u32)?;
    write_i32(w, label.vol)?;
    write_fixed_truncated(w, &label.hostname, MAX_HOSTLEN)?;
    write_fixed_truncated(w, &label.timezone, TZ_MAXLEN)?;
    write_u32(w, V2_TOTAL_LEN)?;
    Ok(V2_TOTAL_LEN)
}

fn write_v3<W: Write>(w: &mut W, label: &ArchiveLabel) -> io::Result<u32> {
    let host = label.hostname.as_bytes();
    let tz = label.timezone.as_bytes();
    let zi = label.zoneinfo.as_bytes();

    // Fixed part after the outer length field: magic(4)+pid(4)+sec(8)+
    // nsec(4)+vol(4)+feature_bits(2)+3×len(2) = 32, plus the outer len(4)
    // and trailing len(4) = 40, plus the variable strings.
    let unpadded = 40 + host.len() + tz.len() + zi.len();
    let pad = (8 - (unpadded % 8)) % 8;
    let total_len = (unpadded + pad) as u32;

    write_u32(w, total_len)?;
    write_u32(w, (MAGIC_BASE << 8) | LabelVersion::V3.byte() as u32)?;
    write_u32(w, label.pid)?;
    write_u64(w, label.start.sec as u64)?;
    write_u32(w, label.start.nsec as u32)?;
    write_i32(w, label.vol)?;
    write_u16(w, label.feature_bits)?;
    write_u16(w, host.len() as u16)?;
    write_u16(w, tz.len() as u16)?;
    write_u16(w, zi.len() as u16)?;
    w.write_all(host)?;
    w.write_all(tz)?;
    w.write_all(zi)?;
    w.write_all(&vec![0u8; pad])?;
    write_u32(w, total_len)?;
    Ok(total_len)
}
