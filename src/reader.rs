//! Reader engine (§4.6, §4.7): `open`, `close`, `read_next(direction)`,
//! `fetch`, `set_time`, `get_start`, `get_end`, `get_label`.
//!
//! Grounded on `__pmLogRead_ctx`, `__pmLogFetch`, `__pmLogSetTime` in
//! `logutil.c`. The paranoid-mode payload scan used only to locate an
//! archive's true end is grounded on the teacher's `recovery/scanner.rs`
//! forward-validation shape, folded in here as a reading mode rather than
//! a standalone scanner entry point (§4.6 calls it "paranoid mode" of the
//! normal reader).

use crate::archive::Archive;
use crate::byte_codec::{peek_trailing_len, read_frame, write_frame, CodecError, Timestamp};
use crate::config::ReaderConfig;
use crate::context::{ContextError, Cursor, Direction, Mode, MultiArchiveContext};
use crate::diag;
use crate::error::{ReaderError, Result};
use crate::label::ArchiveLabel;
use crate::record::{decode_record, validate_paranoid, DataRecord, PmidValueSet, ValueFormat};
use crate::tindex::{nearest_with_truncation_fallback, SeekPosition};
use std::collections::{HashMap, HashSet};
use std::io::{self, Seek, SeekFrom};
use std::path::Path;

pub struct Reader {
    pub ctx: MultiArchiveContext,
    pub config: ReaderConfig,
    /// pmids the external metadata subsystem reports as derived constants
    /// (§4.7: a record missing every requested pmid is only skipped if at
    /// least one requested pmid is NOT a derived constant).
    pub derived_constants: HashSet<u32>,
    /// Per-pmid retained instance ids, applied after projection. Absent
    /// entries mean "no filtering for this pmid".
    pub instance_profile: HashMap<u32, HashSet<i32>>,
}

impl Reader {
    pub fn open(paths: &[&Path], config: ReaderConfig) -> Result<Reader> {
        let ctx = MultiArchiveContext::open(paths)?;
        Ok(Reader {
            ctx,
            config,
            derived_constants: HashSet::new(),
            instance_profile: HashMap::new(),
        })
    }

    /// Consume and release every owned file handle. A plain `drop` already
    /// does this; the explicit method exists to mirror the "close" verb in
    /// spec.md §2 and to give callers an obvious place to check for a
    /// final flush error on the write side (none applies to pure readers).
    pub fn close(self) {
        drop(self);
    }

    pub fn get_label(&self) -> ArchiveLabel {
        self.ctx.current_archive().label.clone()
    }

    pub fn get_start(&self) -> Timestamp {
        self.ctx.archives[0].start_timestamp()
    }

    /// The last archive's end timestamp. Prefers the temporal index; when
    /// that doesn't resolve cleanly, forward-scans from the last known
    /// good record in the last volume (`__pmGetArchiveEnd_ctx` analogue,
    /// SPEC_FULL.md §10).
    pub fn get_end(&mut self) -> Result<Timestamp> {
        let last = self.ctx.archives.len() - 1;
        if let Some(ts) = self.ctx.archives[last].end_timestamp {
            return Ok(ts);
        }
        let ts = self.scan_archive_end(last)?;
        self.ctx.archives[last].end_timestamp = Some(ts);
        Ok(ts)
    }

    /// Forward-scan volume `archive.max_vol` from its start, validating
    /// each record with [`validate_paranoid`] when `config.paranoid` is
    /// set, keeping the timestamp of the last record that parses cleanly.
    fn scan_archive_end(&mut self, archive_idx: usize) -> Result<Timestamp> {
        let paranoid = self.config.paranoid;
        scan_archive_end(&mut self.ctx.archives[archive_idx], paranoid)
    }

    /// Read the next record in `direction`, handling volume and archive
    /// exhaustion per §4.6.
    pub fn read_next(&mut self, direction: Direction) -> Result<DataRecord> {
        self.ctx.set_direction(direction);
        loop {
            match direction {
                Direction::Backward => match self.read_backward_in_volume()? {
                    Some(rec) => {
                        diag::record_read();
                        return Ok(rec);
                    }
                    None => {
                        if self.step_to_previous_volume()? {
                            continue;
                        }
                        return self.cross_archive_boundary(direction);
                    }
                },
                Direction::Forward => match self.read_forward_in_volume()? {
                    Some(rec) => {
                        diag::record_read();
                        return Ok(rec);
                    }
                    None => {
                        if self.step_to_next_volume()? {
                            continue;
                        }
                        return self.cross_archive_boundary(direction);
                    }
                },
            }
        }
    }

    fn version(&self) -> crate::label::LabelVersion {
        self.ctx.current_archive().version()
    }

    fn read_forward_in_volume(&mut self) -> Result<Option<DataRecord>> {
        let version = self.version();
        let archive = self.ctx.current_archive_mut();
        archive.current.file.seek(SeekFrom::Start(self.ctx.cursor.offset))?;
        match read_frame(&mut archive.current.file) {
            Ok((total, payload)) => {
                let rec = decode_record(&payload, version)?;
                self.ctx.cursor.offset += total as u64;
                Ok(Some(rec))
            }
            // Only a short read at EOF means "volume exhausted, try the
            // next one" (§4.6). A length mismatch between header and
            // trailer is mid-file corruption (§4.1 CorruptRecord) and must
            // surface as an error, not be mistaken for exhaustion — else
            // the reader silently skips the rest of the volume (§7).
            Err(CodecError::Io(ref io_err)) if io_err.kind() == io::ErrorKind::UnexpectedEof => {
                Ok(None)
            }
            Err(CodecError::ShortRead { .. }) => Ok(None),
            Err(e) => Err(ReaderError::from(e)),
        }
    }

    fn read_backward_in_volume(&mut self) -> Result<Option<DataRecord>> {
        let version = self.version();
        let archive = self.ctx.current_archive_mut();
        let label_end = archive.current.start_offset();
        if self.ctx.cursor.offset <= label_end {
            return Ok(None);
        }
        let pos = self.ctx.cursor.offset;
        let trailer_len = peek_trailing_len(&mut archive.current.file, pos)
            .map_err(ReaderError::from)?;
        let record_start = pos.checked_sub(trailer_len as u64).ok_or_else(|| {
            ReaderError::BadRecord("backward step underflowed volume start".into())
        })?;
        archive.current.file.seek(SeekFrom::Start(record_start))?;
        let (_total, payload) = read_frame(&mut archive.current.file)?;
        let rec = decode_record(&payload, version)?;
        self.ctx.cursor.offset = record_start;
        Ok(Some(rec))
    }

    fn step_to_previous_volume(&mut self) -> Result<bool> {
        let archive = self.ctx.current_archive_mut();
        let mut candidate = archive.current.id - 1;
        while candidate >= archive.min_vol {
            if archive.switch_volume(candidate).is_ok() {
                let end = archive.current.end_offset()?;
                self.ctx.cursor.volume_id = candidate;
                self.ctx.cursor.offset = end;
                return Ok(true);
            }
            candidate -= 1;
        }
        Ok(false)
    }

    fn step_to_next_volume(&mut self) -> Result<bool> {
        let archive = self.ctx.current_archive_mut();
        let mut candidate = archive.current.id + 1;
        while candidate <= archive.max_vol {
            if archive.switch_volume(candidate).is_ok() {
                self.ctx.cursor.volume_id = candidate;
                self.ctx.cursor.offset = archive.current.start_offset();
                return Ok(true);
            }
            candidate += 1;
        }
        Ok(false)
    }

    fn cross_archive_boundary(&mut self, direction: Direction) -> Result<DataRecord> {
        match self.ctx.transition(direction) {
            Ok(Some(mark)) => {
                diag::record_mark_synthesized();
                Ok(mark)
            }
            Ok(None) => self.read_next(direction),
            Err(ContextError::EndOfLog) => Err(ReaderError::EndOfLog),
            Err(e) => Err(e.into()),
        }
    }

    /// Coarse-to-fine seek (§4.7).
    pub fn set_time(&mut self, target: Timestamp) -> Result<()> {
        let forward_mode = matches!(self.ctx.cursor.mode, Mode::Forward | Mode::Interpolate);

        let mut chosen = self
            .ctx
            .archives
            .iter()
            .position(|a| a.start_timestamp() >= target);
        if forward_mode {
            if let Some(i) = chosen {
                if i > 0 {
                    chosen = Some(i - 1);
                }
            } else {
                chosen = Some(self.ctx.archives.len() - 1);
            }
        } else if chosen.is_none() {
            chosen = Some(self.ctx.archives.len() - 1);
        }
        let archive_idx = chosen.unwrap_or(0);
        self.ctx.cursor.archive_index = archive_idx;

        self.ctx.cursor.origin = target;
        self.ctx.cursor.serial = false;

        let archive = &mut self.ctx.archives[archive_idx];
        if archive.index.is_empty() {
            if forward_mode {
                archive.switch_volume(archive.min_vol)?;
                self.ctx.cursor.volume_id = archive.min_vol;
                self.ctx.cursor.offset = archive.current.start_offset();
            } else {
                let max_vol = archive.max_vol;
                archive.switch_volume(max_vol)?;
                let end = archive.current.end_offset()?;
                self.ctx.cursor.volume_id = max_vol;
                self.ctx.cursor.offset = end;
            }
            return Ok(());
        }

        // The truncation check in `nearest_with_truncation_fallback` needs
        // the *last* volume's on-disk size, not whatever volume happens to
        // be `current` right now (typically `min_vol`, just after open).
        let last_vol_path = crate::volume::Volume::path_for(&archive.base, archive.max_vol);
        let last_vol_size = std::fs::metadata(&last_vol_path).map(|m| m.len()).unwrap_or(0);
        let pos = nearest_with_truncation_fallback(
            &archive.index,
            target,
            archive.max_vol,
            last_vol_size,
        );
        let (vol, offset) = match pos {
            SeekPosition::BeforeFirst => {
                let min_vol = archive.min_vol;
                archive.switch_volume(min_vol)?;
                (min_vol, archive.current.start_offset())
            }
            SeekPosition::AfterLast => {
                let max_vol = archive.max_vol;
                archive.switch_volume(max_vol)?;
                let end = archive.current.end_offset()?;
                (max_vol, end)
            }
            SeekPosition::At(j) => {
                let entry = archive.index[j];
                archive.switch_volume(entry.vol)?;
                (entry.vol, entry.off_data)
            }
        };
        self.ctx.cursor.volume_id = vol;
        self.ctx.cursor.offset = offset;

        if forward_mode && offset as i64 > 0 {
            // Index entries mark record ends (§4.7 step 3): step back over
            // the landed record only when it is itself >= the requested
            // time T, so the next forward read can't return something
            // earlier than T (§8 "index correctness").
            let landed_after = matches!(pos, SeekPosition::At(j) if archive.index[j].timestamp >= target);
            if landed_after {
                self.read_backward_in_volume()?;
            }
        }
        Ok(())
    }

    /// `fetch(pmids)` (§4.7): read forward/backward from the cursor,
    /// discarding wrong-side-of-origin records from a coarse seek,
    /// projecting onto `pmids`, and applying instance-profile filtering.
    pub fn fetch(&mut self, pmids: &[u32]) -> Result<DataRecord> {
        let direction = match self.ctx.cursor.mode {
            Mode::Forward | Mode::Interpolate => Direction::Forward,
            Mode::Backward => Direction::Backward,
        };
        loop {
            let origin = self.ctx.cursor.origin;
            let serial = self.ctx.cursor.serial;
            let rec = self.read_next(direction)?;

            if !serial {
                let wrong_side = match direction {
                    Direction::Forward => rec.timestamp < origin,
                    Direction::Backward => rec.timestamp > origin,
                };
                if wrong_side {
                    continue;
                }
            }
            self.ctx.cursor.serial = true;

            let projected = if pmids.is_empty() {
                Some(rec.clone())
            } else {
                self.project(&rec, pmids)
            };

            if let Some(mut out) = projected {
                self.apply_instance_profile(&mut out);
                self.ctx.cursor.origin = out.timestamp;
                return Ok(out);
            }
        }
    }

    pub fn fetch_at(&mut self, timestamp: Timestamp, pmids: &[u32]) -> Result<DataRecord> {
        self.set_time(timestamp)?;
        self.fetch(pmids)
    }

    fn project(&self, rec: &DataRecord, pmids: &[u32]) -> Option<DataRecord> {
        if rec.is_mark() {
            // Boundary markers are surfaced to every caller regardless of
            // the requested pmid set; they carry no values to project.
            return Some(rec.clone());
        }
        let mut found_any = false;
        let mut value_sets = Vec::with_capacity(pmids.len());
        for &pmid in pmids {
            match rec.value_sets.iter().find(|vs| vs.pmid == pmid) {
                Some(vs) => {
                    found_any = true;
                    value_sets.push(vs.clone());
                }
                None => {
                    let stub = diag::no_values_stub(pmid);
                    value_sets.push(PmidValueSet {
                        pmid: stub.pmid,
                        valfmt: ValueFormat::Inline,
                        instances: Vec::new(),
                    });
                }
            }
        }
        if !found_any && pmids.iter().any(|p| !self.derived_constants.contains(p)) {
            return None;
        }
        Some(DataRecord {
            timestamp: rec.timestamp,
            value_sets,
            indirect_bytes: rec.indirect_bytes.clone(),
        })
    }

    fn apply_instance_profile(&self, rec: &mut DataRecord) {
        for vs in &mut rec.value_sets {
            if let Some(retained) = self.instance_profile.get(&vs.pmid) {
                vs.instances.retain(|(inst, _)| retained.contains(inst));
            }
        }
    }
}

/// Stand-alone entry point for archive-end discovery outside a full
/// `Reader` (diagnostic CLI use), mirroring the teacher's
/// `recovery::scan()` as a read-only forward pass over one archive.
pub fn scan_archive_end(archive: &mut Archive, paranoid: bool) -> Result<Timestamp> {
    let version = archive.version();
    if archive.current.id != archive.max_vol {
        archive.switch_volume(archive.max_vol)?;
    }
    let start = archive.current.start_offset();
    archive.current.file.seek(SeekFrom::Start(start))?;
    let mut last_ts = archive.start_timestamp();
    loop {
        let before = archive.current.file.stream_position()?;
        match read_frame(&mut archive.current.file) {
            Ok((_total, payload)) => {
                let decoded = if paranoid {
                    validate_paranoid(&payload, version)
                } else {
                    decode_record(&payload, version)
                };
                match decoded {
                    Ok(rec) => last_ts = rec.timestamp,
                    Err(_) => {
                        archive.current.file.seek(SeekFrom::Start(before))?;
                        break;
                    }
                }
            }
            Err(_) => break,
        }
    }
    Ok(last_ts)
}

/// Write a record onto the current volume at the current append
/// position, used by tests to build fixture archives without going
/// through the full writer-side `put_result` state machine.
#[cfg(test)]
pub(crate) fn append_raw(archive: &mut Archive, payload: &[u8]) -> std::io::Result<u32> {
    archive.current.file.seek(SeekFrom::End(0))?;
    write_frame(&mut archive.current.file, payload)
}
