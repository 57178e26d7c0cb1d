use parchive::context::Direction;
use parchive::record::{DataRecord, PmidValueSet, Value, ValueFormat};
use parchive::{Archive, ArchiveLabel, LabelVersion, Reader, ReaderConfig, ReaderError, Timestamp};
use parchive::{Writer, WriterOptions};
use std::path::Path;
use tempfile::tempdir;

fn template_label(start: Timestamp, host: &str) -> ArchiveLabel {
    ArchiveLabel {
        version: LabelVersion::V3,
        magic: 0,
        pid: 9999,
        start,
        vol: 0,
        feature_bits: 0,
        hostname: host.into(),
        timezone: "UTC".into(),
        zoneinfo: String::new(),
        total_len: 0,
    }
}

fn mark(sec: i64) -> DataRecord {
    DataRecord::mark(Timestamp::new(sec, 0))
}

fn value_record(sec: i64, pmid: u32, v: i32) -> DataRecord {
    DataRecord {
        timestamp: Timestamp::new(sec, 0),
        value_sets: vec![PmidValueSet {
            pmid,
            valfmt: ValueFormat::Inline,
            instances: vec![(-1, Value::Insitu(v))],
        }],
        indirect_bytes: Vec::new(),
    }
}

/// Write `records` into a brand-new archive at `base`, appending an index
/// entry after each one (so the temporal index covers every record).
fn write_archive(base: &Path, label: ArchiveLabel, records: &[DataRecord]) {
    let mut w = Writer::create(base.to_path_buf(), label, WriterOptions::default()).unwrap();
    for rec in records {
        w.put_result(rec).unwrap();
        w.put_index(rec.timestamp).unwrap();
    }
}

#[test]
fn set_time_seeks_between_index_entries() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");
    let records: Vec<DataRecord> = [10, 20, 30].iter().map(|&s| mark(s)).collect();
    write_archive(&base, template_label(Timestamp::new(0, 0), "h1"), &records);

    let mut forward = Reader::open(&[&base], ReaderConfig::default()).unwrap();
    forward.set_time(Timestamp::new(25, 0)).unwrap();
    let r = forward.read_next(Direction::Forward).unwrap();
    assert_eq!(r.timestamp, Timestamp::new(30, 0));

    let mut backward = Reader::open(&[&base], ReaderConfig::default()).unwrap();
    backward.set_time(Timestamp::new(25, 0)).unwrap();
    let r = backward.read_next(Direction::Backward).unwrap();
    assert_eq!(r.timestamp, Timestamp::new(20, 0));
}

#[test]
fn set_time_never_steps_back_past_the_requested_time() {
    // Index entries at {10s, 20s}; set_time(13s) lands on the closer
    // neighbour (10s, delta 3 < 20s's delta 7), but 10s is itself < 13s,
    // so the cursor must NOT step back over it — the next forward read
    // has to return the 20s record, not 10s (§8 index correctness: the
    // returned record's timestamp must be >= T).
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");
    let records: Vec<DataRecord> = [10, 20].iter().map(|&s| mark(s)).collect();
    write_archive(&base, template_label(Timestamp::new(0, 0), "h1"), &records);

    let mut reader = Reader::open(&[&base], ReaderConfig::default()).unwrap();
    reader.set_time(Timestamp::new(13, 0)).unwrap();
    let r = reader.read_next(Direction::Forward).unwrap();
    assert_eq!(r.timestamp, Timestamp::new(20, 0));
}

#[test]
fn set_time_before_first_entry_switches_back_to_the_lowest_volume() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");
    let label = template_label(Timestamp::new(0, 0), "h1");
    let mut w = Writer::create(base.clone(), label, WriterOptions::default()).unwrap();
    w.put_result(&mark(10)).unwrap();
    w.put_index(Timestamp::new(10, 0)).unwrap();
    w.put_result(&mark(20)).unwrap();
    w.put_index(Timestamp::new(20, 0)).unwrap();
    w.new_volume().unwrap();
    w.put_result(&mark(30)).unwrap();
    w.put_index(Timestamp::new(30, 0)).unwrap();
    w.put_result(&mark(40)).unwrap();
    w.put_index(Timestamp::new(40, 0)).unwrap();
    drop(w);

    let mut reader = Reader::open(&[&base], ReaderConfig::default()).unwrap();
    // Drive the cursor onto volume 1 by reading past volume 0's records.
    assert_eq!(reader.read_next(Direction::Forward).unwrap().timestamp.sec, 10);
    assert_eq!(reader.read_next(Direction::Forward).unwrap().timestamp.sec, 20);
    assert_eq!(reader.read_next(Direction::Forward).unwrap().timestamp.sec, 30);

    // Seeking to a time before every index entry must reposition onto
    // volume 0, not just recompute an offset against whichever volume
    // happens to be open already (here, volume 1).
    reader.set_time(Timestamp::new(5, 0)).unwrap();
    let r = reader.read_next(Direction::Forward).unwrap();
    assert_eq!(r.timestamp, Timestamp::new(10, 0));
}

#[test]
fn open_strips_volume_suffix_and_discovers_companions() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");
    write_archive(&base, template_label(Timestamp::new(0, 0), "h1"), &[mark(5)]);

    let vol_path = dir.path().join("arch.0");
    let archive = Archive::open(&vol_path).unwrap();
    assert_eq!(archive.min_vol, 0);
    assert_eq!(archive.max_vol, 0);
    assert_eq!(archive.base, base);
}

#[test]
fn forward_read_crosses_volume_boundary_without_a_mark() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");
    let label = template_label(Timestamp::new(0, 0), "h1");
    let mut w = Writer::create(base.clone(), label, WriterOptions::default()).unwrap();
    w.put_result(&mark(10)).unwrap();
    w.put_result(&mark(20)).unwrap();
    w.new_volume().unwrap();
    w.put_result(&mark(30)).unwrap();
    w.put_result(&mark(40)).unwrap();
    drop(w);

    let mut reader = Reader::open(&[&base], ReaderConfig::default()).unwrap();
    let mut seen = Vec::new();
    loop {
        match reader.read_next(Direction::Forward) {
            Ok(r) => seen.push(r.timestamp.sec),
            Err(ReaderError::EndOfLog) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(seen, vec![10, 20, 30, 40]);
}

#[test]
fn forward_traversal_across_archives_emits_exactly_one_mark() {
    let dir = tempdir().unwrap();
    let base_a = dir.path().join("archA");
    let base_b = dir.path().join("archB");
    write_archive(
        &base_a,
        template_label(Timestamp::new(0, 0), "shared-host"),
        &[mark(10), mark(100)],
    );
    write_archive(
        &base_b,
        template_label(Timestamp::new(100, 500_000_000), "shared-host"),
        &[mark(100), mark(200)],
    );

    let mut reader = Reader::open(&[&base_a, &base_b], ReaderConfig::default()).unwrap();
    let mut marks = 0;
    let mut timestamps = Vec::new();
    loop {
        match reader.read_next(Direction::Forward) {
            Ok(r) => {
                if r.is_mark() {
                    marks += 1;
                    assert_eq!(r.timestamp, Timestamp::new(100, 1_000_000));
                } else {
                    timestamps.push(r.timestamp.sec);
                }
            }
            Err(ReaderError::EndOfLog) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(marks, 1, "exactly one mark per archive boundary crossing");
    assert_eq!(timestamps, vec![10, 100, 100, 200]);
}

#[test]
fn overlapping_archives_are_rejected_at_the_crossing() {
    let dir = tempdir().unwrap();
    let base_a = dir.path().join("archA");
    let base_b = dir.path().join("archB");
    write_archive(
        &base_a,
        template_label(Timestamp::new(0, 0), "shared-host"),
        &[mark(10), mark(100)],
    );
    // archB starts before archA's last known record: overlap.
    write_archive(
        &base_b,
        template_label(Timestamp::new(50, 0), "shared-host"),
        &[mark(50), mark(150)],
    );

    let mut reader = Reader::open(&[&base_a, &base_b], ReaderConfig::default()).unwrap();
    let mut saw_overlap = false;
    loop {
        match reader.read_next(Direction::Forward) {
            Ok(_) => continue,
            Err(ReaderError::LogOverlap { .. }) => {
                saw_overlap = true;
                break;
            }
            Err(ReaderError::EndOfLog) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(saw_overlap, "expected a LogOverlap error at the crossing");
}

#[test]
fn fetch_projects_onto_requested_pmids_and_skips_unmatched_records() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");
    let records = vec![value_record(10, 7, 1), value_record(20, 9, 2), value_record(30, 7, 3)];
    write_archive(&base, template_label(Timestamp::new(0, 0), "h1"), &records);

    let mut reader = Reader::open(&[&base], ReaderConfig::default()).unwrap();
    let r = reader.fetch(&[7]).unwrap();
    assert_eq!(r.timestamp, Timestamp::new(10, 0));
    assert_eq!(r.value_sets[0].pmid, 7);

    // Next fetch for pmid 7 skips the t=20 record (which only has pmid 9).
    let r2 = reader.fetch(&[7]).unwrap();
    assert_eq!(r2.timestamp, Timestamp::new(30, 0));
}

#[test]
fn fetch_for_missing_pmid_eventually_hits_end_of_log() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");
    let records = vec![value_record(10, 7, 1)];
    write_archive(&base, template_label(Timestamp::new(0, 0), "h1"), &records);

    let mut reader = Reader::open(&[&base], ReaderConfig::default()).unwrap();
    let err = reader.fetch(&[404]).unwrap_err();
    assert!(matches!(err, ReaderError::EndOfLog));
}

#[test]
fn truncated_last_record_is_tolerated_and_get_end_reports_penultimate() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");
    write_archive(
        &base,
        template_label(Timestamp::new(0, 0), "h1"),
        &[mark(10), mark(20)],
    );

    let vol_path = base.with_extension("0");
    let len = std::fs::metadata(&vol_path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&vol_path).unwrap();
    file.set_len(len - 4).unwrap();

    let mut reader = Reader::open(&[&base], ReaderConfig::default()).unwrap();
    let first = reader.read_next(Direction::Forward).unwrap();
    assert_eq!(first.timestamp, Timestamp::new(10, 0));
    assert!(matches!(
        reader.read_next(Direction::Forward),
        Err(ReaderError::EndOfLog)
    ));

    let mut end_reader = Reader::open(&[&base], ReaderConfig::default()).unwrap();
    let end = end_reader.get_end().unwrap();
    assert_eq!(end, Timestamp::new(10, 0));
}

#[test]
fn corrupt_trailer_mid_volume_surfaces_as_bad_record_not_silent_skip() {
    // A header/trailer length mismatch partway through a volume is real
    // corruption (§4.1 CorruptRecord), not end-of-volume. The reader must
    // report it instead of silently jumping to the next volume/archive
    // and skipping the rest of this one (§7).
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");
    let label = template_label(Timestamp::new(0, 0), "h1");
    let mut w = Writer::create(base.clone(), label, WriterOptions::default()).unwrap();
    w.put_result(&mark(10)).unwrap();
    let second_offset = w.put_result(&mark(20)).unwrap();
    w.new_volume().unwrap();
    w.put_result(&mark(30)).unwrap();
    drop(w);

    // Corrupt the second record's trailing length field so it disagrees
    // with its header, without shrinking the file (not a short read).
    let vol_path = base.with_extension("0");
    let data = std::fs::read(&vol_path).unwrap();
    let header_len = u32::from_be_bytes(data[second_offset as usize..second_offset as usize + 4].try_into().unwrap());
    let trailer_at = second_offset as usize + header_len as usize - 4;
    let mut data = data;
    data[trailer_at] ^= 0xFF;
    std::fs::write(&vol_path, data).unwrap();

    let mut reader = Reader::open(&[&base], ReaderConfig::default()).unwrap();
    let first = reader.read_next(Direction::Forward).unwrap();
    assert_eq!(first.timestamp, Timestamp::new(10, 0));
    let err = reader.read_next(Direction::Forward).unwrap_err();
    assert!(
        matches!(err, ReaderError::BadRecord(_)),
        "expected BadRecord, got {err:?}"
    );
}

#[test]
fn instance_profile_filters_retained_instances() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("arch");
    let rec = DataRecord {
        timestamp: Timestamp::new(5, 0),
        value_sets: vec![PmidValueSet {
            pmid: 3,
            valfmt: ValueFormat::Inline,
            instances: vec![(1, Value::Insitu(10)), (2, Value::Insitu(20)), (3, Value::Insitu(30))],
        }],
        indirect_bytes: Vec::new(),
    };
    write_archive(&base, template_label(Timestamp::new(0, 0), "h1"), &[rec]);

    let mut reader = Reader::open(&[&base], ReaderConfig::default()).unwrap();
    reader.instance_profile.insert(3, [1, 3].into_iter().collect());
    let out = reader.fetch(&[3]).unwrap();
    let instances: Vec<i32> = out.value_sets[0].instances.iter().map(|(i, _)| *i).collect();
    assert_eq!(instances, vec![1, 3]);
}
