//! End-to-end scenarios for the circular datalog: appends, range edges, gap
//! interpolation, corruption recovery and restart behavior.

use metermon::datalog::{DataLog, Lookup, Record, RECORD_SIZE};
use metermon::error::MeterError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_millis(100);

fn open_log(dir: &TempDir) -> DataLog {
    let log = DataLog::new(
        dir.path().join("datalog.bin"),
        5,
        1,
        Arc::new(Mutex::new(())),
    );
    log.begin().unwrap();
    log
}

fn rec_at(ts: u32, seed: f64) -> Record {
    let mut rec = Record::default();
    rec.ts = ts;
    rec.log_hours = seed;
    rec.volt_hrs[0] = seed * 1000.0;
    rec
}

#[test]
fn single_append_then_read() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let mut rec = rec_at(1000, 0.0);
    log.write(&mut rec).unwrap();

    assert_eq!(log.entries(), 1);
    let lookup = log.read(1000, TIMEOUT).unwrap();
    assert!(lookup.is_found());
    assert_eq!(lookup.record().ts, 1000);
    assert_eq!(lookup.record().rev, 1);
}

#[test]
fn read_before_range_returns_the_oldest_payload() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);
    log.write(&mut rec_at(1000, 0.0)).unwrap();

    let lookup = log.read(500, TIMEOUT).unwrap();
    match lookup {
        Lookup::BeforeRange(rec) => {
            assert_eq!(rec.ts, 500);
            assert_eq!(rec.rev, 1);
        }
        other => panic!("expected BeforeRange, got {other:?}"),
    }
}

#[test]
fn read_after_range_returns_the_newest_payload() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);
    log.write(&mut rec_at(1000, 0.0)).unwrap();
    log.write(&mut rec_at(1005, 0.1)).unwrap();

    let lookup = log.read(2000, TIMEOUT).unwrap();
    match lookup {
        Lookup::AfterRange(rec) => {
            assert_eq!(rec.ts, 2000);
            assert_eq!(rec.rev, 2);
        }
        other => panic!("expected AfterRange, got {other:?}"),
    }
}

#[test]
fn gap_interpolation_lands_on_the_older_neighbor() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);
    for (i, ts) in [1000, 1005, 1010, 1020, 1030, 1035, 1050, 1100]
        .into_iter()
        .enumerate()
    {
        log.write(&mut rec_at(ts, i as f64 * 0.1)).unwrap();
    }

    // 1015 has no record; the search resolves the 1010 record and the
    // requested stamp is carried on the way out.
    let lookup = log.read(1015, TIMEOUT).unwrap();
    assert!(lookup.is_found());
    let rec = lookup.record();
    assert_eq!(rec.rev, 3);
    assert!((rec.log_hours - 0.2).abs() < 1e-12);
    assert_eq!(rec.ts, 1015);
}

#[test]
fn empty_log_reports_no_entries() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);
    assert!(matches!(
        log.read(1000, TIMEOUT),
        Err(MeterError::NoEntries)
    ));
}

#[test]
fn unopened_log_rejects_reads_and_writes() {
    let dir = TempDir::new().unwrap();
    let log = DataLog::new(
        dir.path().join("datalog.bin"),
        5,
        1,
        Arc::new(Mutex::new(())),
    );
    assert!(matches!(log.read(1000, TIMEOUT), Err(MeterError::NotOpen)));
    assert!(matches!(
        log.write(&mut rec_at(1000, 0.0)),
        Err(MeterError::NotOpen)
    ));
}

#[test]
fn corrupt_file_is_removed_at_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datalog.bin");

    // Two records whose revisions are not contiguous.
    let mut bytes = Vec::with_capacity(2 * RECORD_SIZE);
    let mut a = rec_at(1000, 0.0);
    a.rev = 1;
    let mut b = rec_at(1005, 0.1);
    b.rev = 10;
    bytes.extend_from_slice(&a.encode());
    bytes.extend_from_slice(&b.encode());
    std::fs::write(&path, &bytes).unwrap();

    let log = DataLog::new(&path, 5, 1, Arc::new(Mutex::new(())));
    assert!(matches!(log.begin(), Err(MeterError::Corruption(_))));
    assert!(!path.exists());

    // The next open starts from a clean, empty log.
    log.begin().unwrap();
    assert_eq!(log.entries(), 0);
}

#[test]
fn non_increasing_write_is_rejected() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);
    log.write(&mut rec_at(1000, 0.0)).unwrap();

    let err = log.write(&mut rec_at(995, 0.1)).unwrap_err();
    assert!(matches!(
        err,
        MeterError::NonIncreasingTimestamp { ts: 995, last: 1000 }
    ));
    assert_eq!(log.entries(), 1);
    assert_eq!(log.last_rev(), 1);
}

#[test]
fn restart_recovers_state_from_the_file_alone() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datalog.bin");
    {
        let log = open_log(&dir);
        for i in 0..5u32 {
            log.write(&mut rec_at(1000 + 5 * i, f64::from(i) * 0.1))
                .unwrap();
        }
    }

    let log = DataLog::new(&path, 5, 1, Arc::new(Mutex::new(())));
    log.begin().unwrap();
    assert_eq!(log.entries(), 5);
    assert_eq!(log.first_ts(), 1000);
    assert_eq!(log.last_ts(), 1020);
    assert_eq!(log.last_rev(), 5);

    let lookup = log.read(1010, TIMEOUT).unwrap();
    assert!(lookup.is_found());
    assert_eq!(lookup.record().rev, 3);
}

#[test]
fn wrapped_restart_keeps_serving_the_oldest_retained_stamp() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datalog.bin");
    let cap = 5 * RECORD_SIZE as u64;
    {
        let log = DataLog::with_max_file_size(&path, 5, cap, Arc::new(Mutex::new(())));
        log.begin().unwrap();
        for i in 0..10u32 {
            log.write(&mut rec_at(1000 + 5 * i, f64::from(i) * 0.1))
                .unwrap();
        }
        assert_eq!(log.entries(), 5);
        assert_eq!(log.first_ts(), 1025);
        assert_eq!(log.last_ts(), 1045);
    }

    let log = DataLog::with_max_file_size(&path, 5, cap, Arc::new(Mutex::new(())));
    log.begin().unwrap();
    assert_eq!(log.entries(), 5);
    assert_eq!(log.first_ts(), 1025);
    assert_eq!(log.last_ts(), 1045);

    let lookup = log.read(1025, TIMEOUT).unwrap();
    assert!(lookup.is_found());
    assert_eq!(lookup.record().rev, 6);
    assert!(log.read(1045, TIMEOUT).unwrap().is_found());
}

#[test]
fn alignment_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);
    for i in 0..6u32 {
        log.write(&mut rec_at(1000 + 5 * i, f64::from(i) * 0.1))
            .unwrap();
    }

    let raw = log.read(1013, TIMEOUT).unwrap().into_record();
    let aligned = log.read(1010, TIMEOUT).unwrap().into_record();
    assert_eq!(raw, aligned);
}

#[test]
fn caches_never_change_an_answer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datalog.bin");
    let stamps = [1000, 1005, 1015, 1030, 1035, 1050, 1060, 1090];
    {
        let log = open_log(&dir);
        for (i, ts) in stamps.into_iter().enumerate() {
            log.write(&mut rec_at(ts, i as f64 * 0.1)).unwrap();
        }
    }

    // Warm one log's caches with a scan, then compare every answer against
    // a freshly opened log whose caches are empty.
    let warm = DataLog::new(&path, 5, 1, Arc::new(Mutex::new(())));
    warm.begin().unwrap();
    for ts in (995..=1100).step_by(5) {
        let _ = warm.read(ts, TIMEOUT).unwrap();
    }

    for ts in (995..=1100).step_by(5) {
        let cold = DataLog::new(&path, 5, 1, Arc::new(Mutex::new(())));
        cold.begin().unwrap();
        let a = warm.read(ts, TIMEOUT).unwrap().into_record();
        let b = cold.read(ts, TIMEOUT).unwrap().into_record();
        assert_eq!(a, b, "cached and cold answers differ at ts={ts}");
    }
}
