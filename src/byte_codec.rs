//! Network-order integer codec and the length-addressable record frame.
//!
//! Wire endianness is big-endian for every integer in this format (see
//! spec.md §4.1) — unlike the teacher's `.6cy` container, which is frozen
//! little-endian. Frames are symmetric: `[len][payload][len]`, letting a
//! reader walk a volume forward or backward without a separate index.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;

/// Bytes occupied by the two length fields that bracket every record.
pub const FRAME_OVERHEAD: u64 = 8;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("frame header/trailer length mismatch: header={header} trailer={trailer}")]
    FrameLengthMismatch { header: u32, trailer: u32 },
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("frame length {0} is smaller than the {FRAME_OVERHEAD}-byte overhead")]
    FrameTooShort(u32),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A PCP-style timestamp: signed seconds plus nanoseconds in `[0, 1e9)`.
///
/// Comparisons are lexicographic (seconds first, then nanoseconds), per
/// spec.md §3. The in-memory form is always this 64/32-bit pair regardless
/// of which on-disk label version produced it — v2's microsecond field is
/// widened to nanoseconds at the decode boundary (DESIGN NOTES §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: i32,
}

impl Timestamp {
    pub const fn new(sec: i64, nsec: i32) -> Self {
        Self { sec, nsec }
    }

    /// Shift by a signed nanosecond delta, normalizing `nsec` back into
    /// `[0, 1e9)` with carry/borrow into `sec`. Used for mark-record
    /// synthesis (±1ms across an archive boundary, §4.8) and for the v2
    /// µs→ns rounding paths.
    pub fn plus_nanos(self, delta_nanos: i64) -> Self {
        let total = self.sec as i128 * 1_000_000_000 + self.nsec as i128 + delta_nanos as i128;
        let sec = total.div_euclid(1_000_000_000) as i64;
        let nsec = total.rem_euclid(1_000_000_000) as i32;
        Self { sec, nsec }
    }

    pub fn plus_millis(self, delta_millis: i64) -> Self {
        self.plus_nanos(delta_millis * 1_000_000)
    }

    /// Absolute distance in nanoseconds, saturating at `i64::MAX`. Used by
    /// the temporal index's nearest-neighbour tie-break (§4.4).
    pub fn abs_delta_nanos(self, other: Self) -> i128 {
        let a = self.sec as i128 * 1_000_000_000 + self.nsec as i128;
        let b = other.sec as i128 * 1_000_000_000 + other.nsec as i128;
        (a - b).abs()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

// ── Big-endian primitive helpers ─────────────────────────────────────────

pub fn read_u16<R: Read>(r: &mut R) -> io::Result<u16> {
    r.read_u16::<BigEndian>()
}
pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    r.read_u32::<BigEndian>()
}
pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    r.read_u64::<BigEndian>()
}
pub fn read_i32<R: Read>(r: &mut R) -> io::Result<i32> {
    r.read_i32::<BigEndian>()
}
pub fn read_i64<R: Read>(r: &mut R) -> io::Result<i64> {
    r.read_i64::<BigEndian>()
}

pub fn write_u16<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_u16::<BigEndian>(v)
}
pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_u32::<BigEndian>(v)
}
pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_u64::<BigEndian>(v)
}
pub fn write_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_i32::<BigEndian>(v)
}
pub fn write_i64<W: Write>(w: &mut W, v: i64) -> io::Result<()> {
    w.write_i64::<BigEndian>(v)
}

/// Read a length-prefixed (u16 BE) byte string.
pub fn read_str16<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u16(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write a length-prefixed (u16 BE) byte string.
pub fn write_str16<W: Write>(w: &mut W, s: &[u8]) -> io::Result<()> {
    write_u16(w, s.len() as u16)?;
    w.write_all(s)
}

// ── Record framing ───────────────────────────────────────────────────────

/// Read one `[len][payload][len]` frame starting at the current position.
///
/// Leaves the cursor positioned immediately after the trailing length.
/// Returns the total framed length (header value) and the payload bytes
/// (the `len - FRAME_OVERHEAD` bytes between the two length fields).
pub fn read_frame<R: Read>(r: &mut R) -> Result<(u32, Vec<u8>), CodecError> {
    let header_len = read_u32(r)?;
    if (header_len as u64) < FRAME_OVERHEAD {
        return Err(CodecError::FrameTooShort(header_len));
    }
    let payload_len = (header_len as u64 - FRAME_OVERHEAD) as usize;
    let mut payload = vec![0u8; payload_len];
    let got = r.read(&mut payload)?;
    if got != payload_len {
        // Need the rest; retry with read_exact to get a precise error, but
        // first check for short EOF explicitly so callers can fall back to
        // "try the next volume" per spec.md §4.6.
        let mut rest = vec![0u8; payload_len - got];
        match r.read_exact(&mut rest) {
            Ok(()) => payload[got..].copy_from_slice(&rest),
            Err(_) => {
                return Err(CodecError::ShortRead {
                    expected: payload_len,
                    got,
                })
            }
        }
    }
    let trailer_len = read_u32(r)?;
    if trailer_len != header_len {
        return Err(CodecError::FrameLengthMismatch {
            header: header_len,
            trailer: trailer_len,
        });
    }
    Ok((header_len, payload))
}

/// Write `payload` as a complete `[len][payload][len]` frame. Returns the
/// total framed length written (`FRAME_OVERHEAD + payload.len()`).
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<u32> {
    let total = FRAME_OVERHEAD + payload.len() as u64;
    let total = u32::try_from(total).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "record too large to frame")
    })?;
    write_u32(w, total)?;
    w.write_all(payload)?;
    write_u32(w, total)?;
    Ok(total)
}

/// Read the trailing length field of the record ending at `pos` (i.e. the
/// record whose trailer's last byte is at `pos - 1`), without disturbing
/// the stream position on error. Used to step backward over a record: the
/// caller then seeks to `pos - trailer_len` to find the record's header.
pub fn peek_trailing_len<R: Read + Seek>(r: &mut R, pos: u64) -> Result<u32, CodecError> {
    if pos < 4 {
        return Err(CodecError::FrameTooShort(0));
    }
    r.seek(SeekFrom::Start(pos - 4))?;
    let len = read_u32(r)?;
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_round_trip() {
        let payload = b"hello, archive record";
        let mut buf = Vec::new();
        let total = write_frame(&mut buf, payload).unwrap();
        assert_eq!(total as usize, buf.len());

        let mut cur = Cursor::new(buf);
        let (len, out) = read_frame(&mut cur).unwrap();
        assert_eq!(len, total);
        assert_eq!(out, payload);
    }

    #[test]
    fn frame_empty_payload_round_trips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[]).unwrap();
        let mut cur = Cursor::new(buf);
        let (_len, out) = read_frame(&mut cur).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn frame_trailer_mismatch_is_rejected() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"abc").unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF; // corrupt trailer
        let mut cur = Cursor::new(buf);
        assert!(matches!(
            read_frame(&mut cur),
            Err(CodecError::FrameLengthMismatch { .. })
        ));
    }

    #[test]
    fn peek_trailing_len_reads_without_consuming_payload() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"record-one").unwrap();
        let first_total = buf.len() as u64;
        write_frame(&mut buf, b"record-two").unwrap();

        let mut cur = Cursor::new(buf);
        let len = peek_trailing_len(&mut cur, first_total).unwrap();
        assert_eq!(len as u64, first_total);
    }

    #[test]
    fn timestamp_ordering_is_lexicographic() {
        let a = Timestamp::new(10, 500);
        let b = Timestamp::new(10, 600);
        let c = Timestamp::new(11, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn plus_millis_carries_into_seconds() {
        let t = Timestamp::new(10, 999_500_000);
        let next = t.plus_millis(1);
        assert_eq!(next, Timestamp::new(11, 500_000));
    }

    #[test]
    fn plus_millis_borrows_from_seconds() {
        let t = Timestamp::new(10, 200_000);
        let prev = t.plus_millis(-1);
        assert_eq!(prev, Timestamp::new(9, 999_200_000));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    proptest! {
        #[test]
        fn frame_round_trips_for_any_payload(payload in prop::collection::vec(any::<u8>(), 0..512)) {
            let mut buf = Vec::new();
            let total = write_frame(&mut buf, &payload).unwrap();
            let mut cur = Cursor::new(buf);
            let (len, out) = read_frame(&mut cur).unwrap();
            prop_assert_eq!(len, total);
            prop_assert_eq!(out, payload);
        }

        /// `plus_nanos` always renormalizes `nsec` into `[0, 1e9)`, whatever
        /// delta (positive, negative, or spanning many seconds) is applied.
        #[test]
        fn plus_nanos_always_normalizes(
            sec in -1_000_000_i64..1_000_000,
            nsec in 0_i32..1_000_000_000,
            delta in -5_000_000_000_i64..5_000_000_000,
        ) {
            let t = Timestamp::new(sec, nsec).plus_nanos(delta);
            prop_assert!(t.nsec >= 0 && t.nsec < 1_000_000_000);
        }
    }
}
