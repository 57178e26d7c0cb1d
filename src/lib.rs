//! # parchive — archive log access engine
//!
//! Opens a time-ordered, multi-volume on-disk record of sampled metric
//! values and lets callers iterate it forward or backward in time,
//! position themselves by timestamp, and traverse a chronologically
//! ordered set of archives as if they were one continuous stream.
//!
//! Format guarantees:
//! - All integers on the wire are big-endian; never negotiated.
//! - Every data record and label is framed `[len][payload][len]`; header
//!   and trailer must agree or the record is rejected.
//! - Two label wire versions are supported: v2 (fixed-size host/timezone)
//!   and v3 (length-prefixed host/timezone/zoneinfo, nanosecond
//!   timestamps, 64-bit offsets). The in-memory representation is always
//!   version-independent; only the codec boundary knows about v2 vs v3.
//! - A reader crossing an archive boundary observes exactly one synthetic
//!   mark record per crossing before the neighbouring archive's records
//!   begin.

pub mod archive;
pub mod byte_codec;
pub mod config;
pub mod context;
pub mod diag;
pub mod error;
pub mod label;
pub mod record;
pub mod reader;
pub mod tindex;
pub mod volume;
pub mod writer;

pub use archive::{Archive, ArchiveError, ArchiveState};
pub use byte_codec::{CodecError, Timestamp};
pub use config::{ReaderConfig, WriterOptions};
pub use context::{ContextError, Cursor, Direction, Mode, MultiArchiveContext};
pub use error::{ReaderError, Result};
pub use label::{ArchiveLabel, LabelError, LabelVersion};
pub use reader::Reader;
pub use record::{DataRecord, PmidValueSet, RecordError, Value, ValueFormat};
pub use tindex::{IndexError, SeekPosition, TemporalIndexEntry};
pub use volume::Volume;
pub use writer::{Writer, WriterError};
