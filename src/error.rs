//! Top-level error type exposed to callers.
//!
//! Mirrors the status codes of spec.md §6: one variant per caller-visible
//! status plus an `Io` passthrough for OS errno failures.  Format-layer
//! errors (`label`, `byte_codec`) carry a reason string rather than a
//! nested error type, matching the teacher's `.map_err(...)` composition
//! style rather than a deep `#[from]` chain.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("end of log")]
    EndOfLog,
    #[error("no context")]
    NoContext,
    #[error("not an archive context")]
    NotArchive,
    #[error("bad label: {0}")]
    BadLabel(String),
    #[error("bad record: {0}")]
    BadRecord(String),
    #[error("log file missing: {0}")]
    LogFileMissing(String),
    #[error("no data")]
    NoData,
    #[error("log overlap: archive {next} starts at {next_start:?} before archive {prev} ends at {prev_end:?}")]
    LogOverlap {
        prev: usize,
        next: usize,
        prev_end: crate::byte_codec::Timestamp,
        next_start: crate::byte_codec::Timestamp,
    },
    #[error("hostname mismatch: expected {expected}, found {found}")]
    HostnameMismatch { expected: String, found: String },
    #[error("value too big for a v2 32-bit field")]
    TooBig,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReaderError>;

impl From<crate::label::LabelError> for ReaderError {
    fn from(e: crate::label::LabelError) -> Self {
        match e {
            crate::label::LabelError::EmptyArchive => ReaderError::NoData,
            crate::label::LabelError::Io(io) => ReaderError::Io(io),
            other => ReaderError::BadLabel(other.to_string()),
        }
    }
}

impl From<crate::byte_codec::CodecError> for ReaderError {
    fn from(e: crate::byte_codec::CodecError) -> Self {
        match e {
            crate::byte_codec::CodecError::Io(io) => ReaderError::Io(io),
            other => ReaderError::BadRecord(other.to_string()),
        }
    }
}

impl From<crate::record::RecordError> for ReaderError {
    fn from(e: crate::record::RecordError) -> Self {
        match e {
            crate::record::RecordError::Io(io) => ReaderError::Io(io),
            other => ReaderError::BadRecord(other.to_string()),
        }
    }
}

impl From<crate::tindex::IndexError> for ReaderError {
    fn from(e: crate::tindex::IndexError) -> Self {
        match e {
            crate::tindex::IndexError::Io(io) => ReaderError::Io(io),
            other => ReaderError::BadRecord(other.to_string()),
        }
    }
}

impl From<crate::archive::ArchiveError> for ReaderError {
    fn from(e: crate::archive::ArchiveError) -> Self {
        match e {
            crate::archive::ArchiveError::Io(io) => ReaderError::Io(io),
            crate::archive::ArchiveError::Label(l) => l.into(),
            crate::archive::ArchiveError::Index(i) => i.into(),
            crate::archive::ArchiveError::NoVolumes(s) => ReaderError::LogFileMissing(s),
        }
    }
}

impl From<crate::context::ContextError> for ReaderError {
    fn from(e: crate::context::ContextError) -> Self {
        match e {
            crate::context::ContextError::NoContext => ReaderError::NoContext,
            crate::context::ContextError::EndOfLog => ReaderError::EndOfLog,
            crate::context::ContextError::HostnameMismatch { expected, found } => {
                ReaderError::HostnameMismatch { expected, found }
            }
            crate::context::ContextError::LogOverlap {
                prev,
                next,
                prev_end,
                next_start,
            } => ReaderError::LogOverlap {
                prev,
                next,
                prev_end,
                next_start,
            },
            crate::context::ContextError::Archive(a) => a.into(),
        }
    }
}
