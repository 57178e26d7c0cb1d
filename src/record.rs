//! Data record payload shape (§3 `DataRecord`, §4.6 paranoid-mode checks).
//!
//! The wire protocol decoder that turns a payload into metric values is
//! named in spec.md §1 as an external collaborator — this module only
//! implements the narrow slice of that structure the reader engine itself
//! must see: enough to find a record's timestamp, tell a mark record
//! (zero pmids) from a data record, and run the "paranoid" structural
//! sanity pass used while scanning for an archive's true end.
//!
//! Layout after the record's own `[len]` header: an 8- or 12-byte
//! timestamp (v2 sec+µs, v3 sec+ns), then `numpmid: i32`, then that many
//! `PmidValueSet`s. A mark record is any record with `numpmid == 0`.

use crate::byte_codec::{read_i32, read_u32, write_i32, write_u32, Timestamp};
use crate::label::LabelVersion;
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

/// Bytes occupied by one indirect value-block entry's length field, the
/// smallest unit an indirect value block is ever reported in.
pub const PDU_UNIT: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    Inline,
    DirectPointer,
    SharedPointer,
}

impl ValueFormat {
    fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(ValueFormat::Inline),
            1 => Some(ValueFormat::DirectPointer),
            2 => Some(ValueFormat::SharedPointer),
            _ => None,
        }
    }

    fn to_i32(self) -> i32 {
        match self {
            ValueFormat::Inline => 0,
            ValueFormat::DirectPointer => 1,
            ValueFormat::SharedPointer => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Insitu(i32),
    /// Offset and length of the value's bytes within the record's
    /// indirect-value trailer.
    Indirect { offset: u32, len: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmidValueSet {
    pub pmid: u32,
    pub valfmt: ValueFormat,
    /// (instance id, value) pairs. Instance -1 means "no instance domain".
    pub instances: Vec<(i32, Value)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord {
    pub timestamp: Timestamp,
    pub value_sets: Vec<PmidValueSet>,
    /// Indirect value bytes trailing the pmid value-set headers, addressed
    /// by `Value::Indirect` offsets.
    pub indirect_bytes: Vec<u8>,
}

impl DataRecord {
    pub fn is_mark(&self) -> bool {
        self.value_sets.is_empty()
    }

    pub fn mark(timestamp: Timestamp) -> Self {
        DataRecord {
            timestamp,
            value_sets: Vec::new(),
            indirect_bytes: Vec::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("negative pmid count {0}")]
    NegativePmidCount(i32),
    #[error("bad value format tag {0}")]
    BadValueFormat(i32),
    #[error("negative instance count {0} for pmid {1}")]
    NegativeInstanceCount(i32, u32),
    #[error("indirect value for pmid {pmid} offset {offset} len {len} out of bounds (buffer is {buf_len} bytes)")]
    IndirectOffsetOutOfBounds {
        pmid: u32,
        offset: u32,
        len: u32,
        buf_len: usize,
    },
    #[error("value block for pmid {pmid} is {len} bytes, shorter than one PDU unit ({PDU_UNIT})")]
    ValueBlockTooShort { pmid: u32, len: u32 },
    #[error("truncated payload: {0}")]
    Truncated(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn timestamp_wire_len(version: LabelVersion) -> usize {
    match version {
        LabelVersion::V2 => 8,
        LabelVersion::V3 => 12,
    }
}

fn read_timestamp<R: Read>(r: &mut R, version: LabelVersion) -> io::Result<Timestamp> {
    match version {
        LabelVersion::V2 => {
            let sec = read_u32(r)?;
            let usec = read_u32(r)?;
            Ok(Timestamp::new(sec as i64, (usec as i32) * 1000))
        }
        LabelVersion::V3 => {
            let sec = crate::byte_codec::read_u64(r)? as i64;
            let nsec = read_u32(r)? as i32;
            Ok(Timestamp::new(sec, nsec))
        }
    }
}

fn write_timestamp<W: Write>(w: &mut W, version: LabelVersion, ts: Timestamp) -> io::Result<()> {
    match version {
        LabelVersion::V2 => {
            write_u32(w, ts.sec as u32)?;
            write_u32(w, (ts.nsec / 1000) as u32)?;
        }
        LabelVersion::V3 => {
            crate::byte_codec::write_u64(w, ts.sec as u64)?;
            write_u32(w, ts.nsec as u32)?;
        }
    }
    Ok(())
}

/// Decode a record payload (the bytes strictly between a frame's two
/// length fields). Used by both the ordinary read path and, with the
/// stricter checks in [`validate_paranoid`], the archive-end scan.
pub fn decode_record(payload: &[u8], version: LabelVersion) -> Result<DataRecord, RecordError> {
    let ts_len = timestamp_wire_len(version);
    if payload.len() < ts_len + 4 {
        return Err(RecordError::Truncated(
            "payload shorter than timestamp + pmid count".into(),
        ));
    }
    let mut cur = Cursor::new(payload);
    let timestamp = read_timestamp(&mut cur, version)?;
    let numpmid = read_i32(&mut cur)?;
    if numpmid < 0 {
        return Err(RecordError::NegativePmidCount(numpmid));
    }

    let mut value_sets = Vec::with_capacity(numpmid as usize);
    for _ in 0..numpmid {
        let pmid = read_u32(&mut cur)?;
        let valfmt_raw = read_i32(&mut cur)?;
        let valfmt = ValueFormat::from_i32(valfmt_raw)
            .ok_or(RecordError::BadValueFormat(valfmt_raw))?;
        let numval = read_i32(&mut cur)?;
        if numval < 0 {
            return Err(RecordError::NegativeInstanceCount(numval, pmid));
        }
        let mut instances = Vec::with_capacity(numval as usize);
        for _ in 0..numval {
            let inst = read_i32(&mut cur)?;
            let value = match valfmt {
                ValueFormat::Inline => Value::Insitu(read_i32(&mut cur)?),
                ValueFormat::DirectPointer | ValueFormat::SharedPointer => {
                    let offset = read_u32(&mut cur)?;
                    let len = read_u32(&mut cur)?;
                    Value::Indirect { offset, len }
                }
            };
            instances.push((inst, value));
        }
        value_sets.push(PmidValueSet {
            pmid,
            valfmt,
            instances,
        });
    }

    let body_end = cur.position() as usize;
    let indirect_bytes = payload[body_end..].to_vec();

    Ok(DataRecord {
        timestamp,
        value_sets,
        indirect_bytes,
    })
}

/// As [`decode_record`], but additionally enforces the structural sanity
/// rules used only while scanning to locate an archive's true end
/// (§4.6): indirect value offsets must lie within the buffer and every
/// indirect value block must be at least one PDU unit long. A violation
/// here means "the previous record was the last good one", not a
/// recoverable condition.
pub fn validate_paranoid(payload: &[u8], version: LabelVersion) -> Result<DataRecord, RecordError> {
    let record = decode_record(payload, version)?;
    for vs in &record.value_sets {
        if matches!(vs.valfmt, ValueFormat::DirectPointer | ValueFormat::SharedPointer) {
            for (_, value) in &vs.instances {
                if let Value::Indirect { offset, len } = value {
                    let end = *offset as usize + *len as usize;
                    if end > record.indirect_bytes.len() {
                        return Err(RecordError::IndirectOffsetOutOfBounds {
                            pmid: vs.pmid,
                            offset: *offset,
                            len: *len,
                            buf_len: record.indirect_bytes.len(),
                        });
                    }
                    if *len < PDU_UNIT {
                        return Err(RecordError::ValueBlockTooShort {
                            pmid: vs.pmid,
                            len: *len,
                        });
                    }
                }
            }
        }
    }
    Ok(record)
}

/// Encode a record into a payload buffer (without the enclosing frame
/// length fields — the caller frames it via `byte_codec::write_frame`).
pub fn encode_record(record: &DataRecord, version: LabelVersion) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_timestamp(&mut buf, version, record.timestamp)?;
    write_i32(&mut buf, record.value_sets.len() as i32)?;
    for vs in &record.value_sets {
        write_u32(&mut buf, vs.pmid)?;
        write_i32(&mut buf, vs.valfmt.to_i32())?;
        write_i32(&mut buf, vs.instances.len() as i32)?;
        for (inst, value) in &vs.instances {
            write_i32(&mut buf, *inst)?;
            match value {
                Value::Insitu(v) => write_i32(&mut buf, *v)?,
                Value::Indirect { offset, len } => {
                    write_u32(&mut buf, *offset)?;
                    write_u32(&mut buf, *len)?;
                }
            }
        }
    }
    buf.extend_from_slice(&record.indirect_bytes);
    Ok(buf)
}
