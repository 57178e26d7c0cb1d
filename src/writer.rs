//! Writer-side operations (§4.9): `put_result`, `put_index`.
//!
//! Grounded on the teacher's `SixCyWriter` (owns its file handle, writes
//! are unbuffered/one-write-per-unit in intent) and `__pmLogPutResult`,
//! `__pmLogPutResult2`, `__pmLogPutIndex` in `logutil.c`.

use crate::archive::{ArchiveState, META_VOLUME_ID};
use crate::byte_codec::{write_frame, FRAME_OVERHEAD};
use crate::config::WriterOptions;
use crate::label::{write_label, ArchiveLabel};
use crate::record::{encode_record, DataRecord};
use crate::tindex::{put_index as put_index_entry, TemporalIndexEntry};
use crate::volume::Volume;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("label error: {0}")]
    Label(#[from] crate::label::LabelError),
}

/// A single-archive writer. One archive per writer, per spec.md's
/// Non-goal ("providing a concurrent writer") — there is no notion of
/// multiple writers sharing one archive's volumes.
pub struct Writer {
    base: PathBuf,
    label: ArchiveLabel,
    options: WriterOptions,
    state: ArchiveState,
    meta: File,
    index: File,
    data: Volume,
}

impl Writer {
    /// Create a brand-new archive at `base` with the given label template
    /// (its `vol` field is overwritten per file as appropriate). Only the
    /// index/meta files and volume 0 are created up front; the label
    /// record itself is deferred to the first `put_result` call per
    /// §4.9's NEW -> INIT transition.
    pub fn create(
        base: PathBuf,
        mut label: ArchiveLabel,
        options: WriterOptions,
    ) -> Result<Writer, WriterError> {
        label.vol = 0;
        let index_path = format!("{}.index", base.display());
        let meta_path = format!("{}.meta", base.display());

        let index = OpenOptions::new()
            .write(true)
            .read(true)
            .create_new(true)
            .open(&index_path)?;
        let meta = OpenOptions::new()
            .write(true)
            .read(true)
            .create_new(true)
            .open(&meta_path)?;
        let data = Volume::create(&base, 0, label.clone())?;

        Ok(Writer {
            base,
            label,
            options,
            state: ArchiveState::New,
            meta,
            index,
            data,
        })
    }

    fn ensure_labels_written(&mut self) -> Result<(), WriterError> {
        if self.state == ArchiveState::New {
            let mut index_label = self.label.clone();
            index_label.vol = crate::archive::INDEX_VOLUME_ID;
            write_label(&mut self.index, &index_label)?;

            let mut meta_label = self.label.clone();
            meta_label.vol = META_VOLUME_ID;
            write_label(&mut self.meta, &meta_label)?;

            // Volume 0's label was already written by `Volume::create`.
            self.state = ArchiveState::Init;
        }
        Ok(())
    }

    /// `put_result(record)`: on the first call, write label records to
    /// index/meta/volume-0 (NEW -> INIT), then frame `record` onto the
    /// current data volume. v1 writers (`buffer_includes_trailer: false`)
    /// issue a separate header write then payload+trailer; v2 writers
    /// assemble one buffer with trailer space and issue a single write.
    pub fn put_result(&mut self, record: &DataRecord) -> Result<u64, WriterError> {
        self.ensure_labels_written()?;
        let version = self.label.version;
        let payload = encode_record(record, version)?;

        self.data.file.seek(SeekFrom::End(0))?;
        let offset = self.data.file.stream_position()?;

        if self.options.buffer_includes_trailer {
            let total = FRAME_OVERHEAD + payload.len() as u64;
            let total = u32::try_from(total)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record too large"))?;
            let mut buf = Vec::with_capacity(total as usize);
            buf.extend_from_slice(&total.to_be_bytes());
            buf.extend_from_slice(&payload);
            buf.extend_from_slice(&total.to_be_bytes());
            self.data.file.write_all(&buf)?;
        } else {
            write_frame(&mut self.data.file, &payload)?;
        }
        Ok(offset)
    }

    /// `put_index(timestamp)` (§4.4): flush metadata and data handles,
    /// capture their current offsets, append one index entry, flush the
    /// index handle. Each offset lands in its own on-disk field — the
    /// corrected counterpart of the `off_meta`-into-`off_data`
    /// transcription bug in `__pmLogPutIndex_v3` (DESIGN.md Open Question
    /// 1).
    pub fn put_index(&mut self, timestamp: crate::byte_codec::Timestamp) -> Result<(), WriterError> {
        self.meta.flush()?;
        self.data.file.flush()?;
        let off_meta = self.meta.stream_position()?;
        let off_data = self.data.file.stream_position()?;

        let entry = TemporalIndexEntry {
            timestamp,
            vol: self.data.id,
            off_meta,
            off_data,
        };
        put_index_entry(&mut self.index, self.label.version, &entry)?;
        self.index.flush()?;
        Ok(())
    }

    /// Roll over to a new data volume (`<base>.<id+1>`), writing its
    /// label with the same pid/hostname/version as volume 0.
    pub fn new_volume(&mut self) -> Result<(), WriterError> {
        let next_id = self.data.id + 1;
        let mut vol_label = self.label.clone();
        vol_label.vol = next_id;
        self.data = Volume::create(&self.base, next_id, vol_label)?;
        Ok(())
    }

    pub fn current_volume_id(&self) -> i32 {
        self.data.id
    }
}
