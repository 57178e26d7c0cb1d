//! Multi-archive context: ordered archive list + cursor, archive-boundary
//! transitions, synthetic mark records (§4.6 step on exhaustion, §4.8).
//!
//! Grounded on `__pmLogCheckForNextArchive`, `__pmLogChangeToNextArchive`,
//! `__pmLogChangeToPreviousArchive`, and `__pmLogGenerateMark_ctx` in
//! `logutil.c`. Ownership follows DESIGN NOTES §9 ("Cyclic ownership"):
//! the context owns its archives outright, with no back-pointer from an
//! archive to its context — callers hold one `MultiArchiveContext` and
//! borrow archives through it.

use crate::archive::Archive;
use crate::byte_codec::Timestamp;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn flip(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Forward,
    Backward,
    Interpolate,
}

/// Cursor carried by a `MultiArchiveContext`, per §3.
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    pub archive_index: usize,
    pub volume_id: i32,
    pub offset: u64,
    pub mode: Mode,
    pub origin: Timestamp,
    pub delta: i64,
    pub serial: bool,
    /// `None` until a mark has been synthesized for the boundary the
    /// cursor currently sits at; `Some(direction)` records which
    /// direction it was synthesized for, cleared on any direction change.
    pub mark_done_direction: Option<Direction>,
}

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("no archives in context")]
    NoContext,
    #[error("end of log")]
    EndOfLog,
    #[error(
        "log overlap: archive {next} starts at {next_start} before archive {prev} ends at {prev_end}"
    )]
    LogOverlap {
        prev: usize,
        next: usize,
        prev_end: Timestamp,
        next_start: Timestamp,
    },
    #[error("hostname mismatch: expected {expected}, found {found}")]
    HostnameMismatch { expected: String, found: String },
    #[error(transparent)]
    Archive(#[from] crate::archive::ArchiveError),
}

pub struct MultiArchiveContext {
    pub archives: Vec<Archive>,
    pub cursor: Cursor,
}

impl MultiArchiveContext {
    /// Open and compose, in chronological order, every archive named in
    /// `paths`. Per §4.5 step 5, every archive after the first must agree
    /// with the first archive's hostname.
    pub fn open(paths: &[&Path]) -> Result<MultiArchiveContext, ContextError> {
        let mut archives = Vec::with_capacity(paths.len());
        for p in paths {
            archives.push(Archive::open(p)?);
        }
        if archives.is_empty() {
            return Err(ContextError::NoContext);
        }
        let first_host = archives[0].label.hostname.clone();
        for a in &archives[1..] {
            if a.label.hostname != first_host {
                return Err(ContextError::HostnameMismatch {
                    expected: first_host,
                    found: a.label.hostname.clone(),
                });
            }
        }
        archives.sort_by_key(|a| a.start_timestamp());

        let origin = archives[0].start_timestamp();
        let volume_id = archives[0].min_vol;
        let offset = archives[0].current.start_offset();
        Ok(MultiArchiveContext {
            archives,
            cursor: Cursor {
                archive_index: 0,
                volume_id,
                offset,
                mode: Mode::Forward,
                origin,
                delta: 0,
                serial: false,
                mark_done_direction: None,
            },
        })
    }

    pub fn current_archive(&self) -> &Archive {
        &self.archives[self.cursor.archive_index]
    }

    pub fn current_archive_mut(&mut self) -> &mut Archive {
        &mut self.archives[self.cursor.archive_index]
    }

    /// Change direction, clearing the mark-done flag so a reader
    /// oscillating across a boundary sees one mark per crossing (§4.8).
    pub fn set_direction(&mut self, direction: Direction) {
        if self.cursor.mark_done_direction != Some(direction) {
            self.cursor.mark_done_direction = None;
        }
    }

    /// Attempt to cross an archive boundary in `direction`. Returns a
    /// synthetic mark record the first time this boundary is crossed in
    /// this direction; on the following call, moves to the neighbouring
    /// archive and returns `None` (the caller resumes normal reading
    /// there).
    pub fn transition(
        &mut self,
        direction: Direction,
    ) -> Result<Option<crate::record::DataRecord>, ContextError> {
        let neighbour_exists = match direction {
            Direction::Forward => self.cursor.archive_index + 1 < self.archives.len(),
            Direction::Backward => self.cursor.archive_index > 0,
        };
        if !neighbour_exists {
            return Err(ContextError::EndOfLog);
        }

        if self.cursor.mark_done_direction != Some(direction) {
            let boundary_ts = match direction {
                Direction::Forward => self.current_archive().end_ts_or_start().plus_millis(1),
                Direction::Backward => self.current_archive().start_timestamp().plus_millis(-1),
            };
            self.cursor.mark_done_direction = Some(direction);
            return Ok(Some(crate::record::DataRecord::mark(boundary_ts)));
        }

        let (prev_idx, next_idx) = match direction {
            Direction::Forward => (self.cursor.archive_index, self.cursor.archive_index + 1),
            Direction::Backward => (self.cursor.archive_index - 1, self.cursor.archive_index),
        };
        let prev_end = self.archives[prev_idx].end_ts_or_start();
        let next_start = self.archives[next_idx].start_timestamp();
        if next_start < prev_end {
            return Err(ContextError::LogOverlap {
                prev: prev_idx,
                next: next_idx,
                prev_end,
                next_start,
            });
        }

        let new_index = match direction {
            Direction::Forward => self.cursor.archive_index + 1,
            Direction::Backward => self.cursor.archive_index - 1,
        };
        self.cursor.archive_index = new_index;
        self.cursor.mark_done_direction = None;

        let archive = &mut self.archives[new_index];
        match direction {
            Direction::Forward => {
                archive.switch_volume(archive.min_vol)?;
                self.cursor.volume_id = archive.min_vol;
                self.cursor.offset = archive.current.start_offset();
            }
            Direction::Backward => {
                let max_vol = archive.max_vol;
                archive.switch_volume(max_vol)?;
                let end = archive
                    .current
                    .end_offset()
                    .map_err(crate::archive::ArchiveError::from)?;
                self.cursor.volume_id = max_vol;
                self.cursor.offset = end;
            }
        }
        Ok(None)
    }
}

impl Archive {
    /// Best-known end timestamp: the last index entry's, if it covers the
    /// current last volume, else the label's start time as a conservative
    /// fallback (a true forward scan is performed lazily by the reader's
    /// `get_end`, per §10's `end_timestamp()` supplemented feature).
    pub fn end_ts_or_start(&self) -> Timestamp {
        self.end_timestamp
            .or_else(|| {
                self.index
                    .last()
                    .filter(|e| e.vol == self.max_vol)
                    .map(|e| e.timestamp)
            })
            .unwrap_or_else(|| self.start_timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::{ArchiveLabel, LabelVersion};
    use crate::tindex::TemporalIndexEntry;
    use crate::volume::Volume;
    use std::fs::File;

    fn dummy_archive(start_sec: i64, vol: i32) -> Archive {
        let label = ArchiveLabel {
            version: LabelVersion::V3,
            magic: 0,
            pid: 1,
            start: Timestamp::new(start_sec, 0),
            vol,
            feature_bits: 0,
            hostname: "h".into(),
            timezone: "UTC".into(),
            zoneinfo: String::new(),
            total_len: 0,
        };
        let meta = tempfile::tempfile().unwrap();
        let current = Volume {
            id: vol,
            path: "/dev/null".into(),
            file: File::open("/dev/null").unwrap(),
            label: label.clone(),
            verified: true,
        };
        Archive {
            base: "dummy".into(),
            label,
            min_vol: vol,
            max_vol: vol,
            current,
            meta,
            index: vec![TemporalIndexEntry {
                timestamp: Timestamp::new(start_sec + 100, 0),
                vol,
                off_meta: 1,
                off_data: 1,
            }],
            seen: std::iter::once(vol).collect(),
            end_timestamp: Some(Timestamp::new(start_sec + 100, 0)),
            end_offset: 0,
            refcount: 1,
            state: crate::archive::ArchiveState::Init,
        }
    }

    #[test]
    fn mark_then_transition_sequence_forward() {
        let a0 = dummy_archive(0, 0);
        let a1 = dummy_archive(200, 0);
        let mut ctx = MultiArchiveContext {
            cursor: Cursor {
                archive_index: 0,
                volume_id: 0,
                offset: 0,
                mode: Mode::Forward,
                origin: Timestamp::new(0, 0),
                delta: 0,
                serial: true,
                mark_done_direction: None,
            },
            archives: vec![a0, a1],
        };

        let mark = ctx.transition(Direction::Forward).unwrap();
        assert!(mark.unwrap().is_mark());
        assert_eq!(ctx.cursor.archive_index, 0);

        let advanced = ctx.transition(Direction::Forward).unwrap();
        assert!(advanced.is_none());
        assert_eq!(ctx.cursor.archive_index, 1);
    }

    #[test]
    fn overlap_is_detected() {
        let a0 = dummy_archive(0, 0); // ends at t=100
        let a1 = dummy_archive(50, 0); // starts at t=50, before a0 ends
        let mut ctx = MultiArchiveContext {
            cursor: Cursor {
                archive_index: 0,
                volume_id: 0,
                offset: 0,
                mode: Mode::Forward,
                origin: Timestamp::new(0, 0),
                delta: 0,
                serial: true,
                mark_done_direction: Some(Direction::Forward),
            },
            archives: vec![a0, a1],
        };
        let err = ctx.transition(Direction::Forward).unwrap_err();
        assert!(matches!(err, ContextError::LogOverlap { .. }));
    }

    #[test]
    fn end_of_log_at_last_archive() {
        let a0 = dummy_archive(0, 0);
        let mut ctx = MultiArchiveContext {
            cursor: Cursor {
                archive_index: 0,
                volume_id: 0,
                offset: 0,
                mode: Mode::Forward,
                origin: Timestamp::new(0, 0),
                delta: 0,
                serial: true,
                mark_done_direction: Some(Direction::Forward),
            },
            archives: vec![a0],
        };
        assert!(matches!(
            ctx.transition(Direction::Forward),
            Err(ContextError::EndOfLog)
        ));
    }
}
