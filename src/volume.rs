//! Volume file handle (§4.3).
//!
//! A volume is a single `<base>.<id>` file: its own label record followed
//! by framed data records. Opening one validates its label against the
//! archive's cached label and remembers that fact so repeated opens of
//! the same id (e.g. walking back onto a volume already visited) skip
//! re-validation. Grounded on the teacher's `SixCyReader`/`SixCyWriter`
//! (one owned `Read+Seek`/`Write+Seek` handle per container) and
//! `__pmLogNewFile`/`__pmLogChangeVol` in `logutil.c`.

use crate::label::{read_label, write_label, ArchiveLabel, LabelError};
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// A volume whose file is already open and (optionally) label-verified.
pub struct Volume {
    pub id: i32,
    pub path: PathBuf,
    pub file: File,
    pub label: ArchiveLabel,
    pub verified: bool,
}

impl Volume {
    /// Construct the on-disk path for volume `id` of archive base `base`.
    pub fn path_for(base: &Path, id: i32) -> PathBuf {
        let mut p = base.as_os_str().to_owned();
        p.push(format!(".{id}"));
        PathBuf::from(p)
    }

    /// Open an existing volume for reading, read and validate its label.
    ///
    /// `archive_label` is the archive's cached (metadata-file) label; the
    /// volume's own label must agree on version, pid, and hostname or the
    /// open fails with [`LabelError::Mismatch`].
    pub fn open(base: &Path, id: i32, archive_label: &ArchiveLabel) -> Result<Volume, LabelError> {
        let path = Self::path_for(base, id);
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let label = read_label(&mut file, id, file_len)?;

        if label.version != archive_label.version || !label.same_origin(archive_label) {
            return Err(LabelError::Mismatch(format!(
                "volume {id} label (pid={}, host={}) disagrees with archive label (pid={}, host={})",
                label.pid, label.hostname, archive_label.pid, archive_label.hostname
            )));
        }

        Ok(Volume {
            id,
            path,
            file,
            label,
            verified: true,
        })
    }

    /// Create a brand-new volume file, refusing to overwrite an existing
    /// one, and write `label` as its preamble.
    pub fn create(base: &Path, id: i32, label: ArchiveLabel) -> io::Result<Volume> {
        let path = Self::path_for(base, id);
        let mut file = OpenOptions::new()
            .write(true)
            .read(true)
            .create_new(true)
            .open(&path)?;
        write_label(&mut file, &label)?;
        Ok(Volume {
            id,
            path,
            file,
            label,
            verified: true,
        })
    }

    pub fn end_offset(&mut self) -> io::Result<u64> {
        self.file.seek(SeekFrom::End(0))
    }

    pub fn start_offset(&self) -> u64 {
        self.label.total_len as u64
    }

    pub fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::LabelVersion;
    use crate::byte_codec::Timestamp;
    use tempfile::tempdir;

    fn label(vol: i32, pid: u32, host: &str) -> ArchiveLabel {
        ArchiveLabel {
            version: LabelVersion::V3,
            magic: 0,
            pid,
            start: Timestamp::new(100, 0),
            vol,
            feature_bits: 0,
            hostname: host.into(),
            timezone: "UTC".into(),
            zoneinfo: String::new(),
            total_len: 0,
        }
    }

    #[test]
    fn create_then_open_round_trips_label() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("arch");
        let l = label(0, 111, "hosta");
        Volume::create(&base, 0, l.clone()).unwrap();

        let reopened = Volume::open(&base, 0, &l).unwrap();
        assert_eq!(reopened.label.pid, 111);
        assert!(reopened.verified);
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("arch");
        let l = label(0, 111, "hosta");
        Volume::create(&base, 0, l.clone()).unwrap();
        let err = Volume::create(&base, 0, l);
        assert!(err.is_err());
    }

    #[test]
    fn mismatched_origin_is_rejected() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("arch");
        let l = label(0, 111, "hosta");
        Volume::create(&base, 0, l).unwrap();

        let other = label(0, 222, "hostb");
        let err = Volume::open(&base, 0, &other).unwrap_err();
        assert!(matches!(err, LabelError::Mismatch(_)));
    }
}
