//! Time-indexed circular datalog.
//!
//! The log is a single file of fixed-stride records, append-only until it
//! reaches its size cap and circular afterwards: each further append
//! overwrites the slot holding the oldest record and the wrap position
//! advances by one stride. There is no header or footer; on open the log
//! recovers its state from the file alone by decoding the first and last
//! keys and, when the file has wrapped, bisecting for the unique slot
//! boundary where timestamps decrease.
//!
//! Lookups are keyed by timestamp and served by an interpolating search:
//! on a gapless stretch the revision for a timestamp is computed directly
//! from the bracket, and gaps only cost extra bracket-narrowing probes
//! before the classic bisection fallback.
//!
//! # Locking
//!
//! Two mutexes are involved: the log mutex guards all in-memory state
//! (keys, sizes, caches) and the disk mutex guards the storage device,
//! which other subsystems share. The log mutex is always taken first.
//! [`DataLog::read`] bounds its wait on the log mutex with the caller's
//! timeout; [`DataLog::write`] waits unconditionally.

mod cache;
mod record;

pub use record::{Key, Record, KEY_SIZE, MAX_DEVICES, RECORD_SIZE};

use crate::error::{MeterError, MeterResult};
use crate::metrics::DATALOG_IO;
use cache::{ReadCache, TailCache, READ_CACHE_CAPACITY};
use metrics::counter;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read as _, Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

const STRIDE: u64 = RECORD_SIZE as u64;
const SECONDS_PER_DAY: u64 = 86_400;

/// Outcome of a timestamp lookup.
///
/// Out-of-range requests are informational, not faults: the record is still
/// populated from the nearest retained end of the log, with its timestamp
/// replaced by the request.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// A record covering the requested timestamp.
    Found(Record),
    /// The request precedes retained history; the oldest record's payload is
    /// returned carrying the requested timestamp.
    BeforeRange(Record),
    /// The request is past the newest record; the newest record's payload is
    /// returned carrying the requested timestamp.
    AfterRange(Record),
}

impl Lookup {
    /// The populated record, whatever the outcome.
    pub fn record(&self) -> &Record {
        match self {
            Lookup::Found(rec) | Lookup::BeforeRange(rec) | Lookup::AfterRange(rec) => rec,
        }
    }

    /// Consume the outcome, keeping the record.
    pub fn into_record(self) -> Record {
        match self {
            Lookup::Found(rec) | Lookup::BeforeRange(rec) | Lookup::AfterRange(rec) => rec,
        }
    }

    /// Whether the request was inside the retained range.
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// Search bracket over `(ts, rev)` key pairs.
///
/// The search is naturally recursive but is iterated with this explicit
/// bracket so its depth stays bounded on pathological inputs.
struct Bracket {
    low_ts: u32,
    low_rev: u32,
    high_ts: u32,
    high_rev: u32,
}

struct LogState {
    file: Option<File>,
    file_size: u64,
    max_file_size: u64,
    entries: u32,
    first: Key,
    last: Key,
    wrap_pos: u64,
    tail_cache: TailCache,
    read_cache: ReadCache,
}

/// Append-only circular record log with a wrap-aware timestamp search.
pub struct DataLog {
    path: PathBuf,
    interval: u32,
    state: Mutex<LogState>,
    disk: Arc<Mutex<()>>,
}

impl DataLog {
    /// Create a closed log capped at `retention_days` of history.
    pub fn new(
        path: impl Into<PathBuf>,
        interval: u32,
        retention_days: u32,
        disk: Arc<Mutex<()>>,
    ) -> Self {
        let interval = interval.max(1);
        let max_file_size =
            STRIDE * (SECONDS_PER_DAY / u64::from(interval)) * u64::from(retention_days);
        Self::with_max_file_size(path, interval, max_file_size, disk)
    }

    /// Create a closed log with an explicit byte cap on the circular file.
    pub fn with_max_file_size(
        path: impl Into<PathBuf>,
        interval: u32,
        max_file_size: u64,
        disk: Arc<Mutex<()>>,
    ) -> Self {
        let interval = interval.max(1);
        DataLog {
            path: path.into(),
            interval,
            state: Mutex::new(LogState {
                file: None,
                file_size: 0,
                max_file_size,
                entries: 0,
                first: Key::default(),
                last: Key::default(),
                wrap_pos: 0,
                tail_cache: TailCache::new((60 / interval).max(1) as usize),
                read_cache: ReadCache::new(READ_CACHE_CAPACITY),
            }),
            disk,
        }
    }

    /// Open or create the backing file and recover the log state from it.
    ///
    /// A damaged file (non-contiguous revisions) is removed and reported as
    /// [`MeterError::Corruption`]; the caller is expected to treat that as
    /// fatal so the writer re-seeds on the next boot.
    pub fn begin(&self) -> MeterResult<()> {
        let mut state = self.state.lock();
        if state.file.is_some() {
            return Ok(());
        }
        let _disk = self.disk.lock();

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let mut file_size = file.metadata()?.len();
        if file_size % STRIDE != 0 {
            // A crash can leave a partial record at the end; drop it.
            warn!(
                path = %self.path.display(),
                trailing = file_size % STRIDE,
                "dropping partial trailing record"
            );
            file_size -= file_size % STRIDE;
            file.set_len(file_size)?;
        }

        let mut first = Key::default();
        let mut last = Key::default();
        let mut entries = 0u32;
        let mut wrap_pos = 0u64;

        if file_size > 0 {
            first = read_key_at(&mut file, 0)?;
            last = read_key_at(&mut file, file_size - STRIDE)?;
            entries = (file_size / STRIDE) as u32;
            debug!(entries, "found entries in log file");

            if first.ts > last.ts {
                // The file has wrapped around. Find the wrap point and
                // recover the real first and last keys.
                wrap_pos = find_wrap_pos(&mut file, 0, first.ts, file_size - STRIDE, last.ts)?;
                first = read_key_at(&mut file, wrap_pos)?;
                last = read_key_at(&mut file, wrap_pos - STRIDE)?;
            }

            if u64::from(last.rev.wrapping_sub(first.rev)) + 1 != u64::from(entries) {
                error!(path = %self.path.display(), "log file damaged, removing it");
                drop(file);
                fs::remove_file(&self.path)?;
                return Err(MeterError::Corruption(format!(
                    "revisions {}..={} do not cover {} entries",
                    first.rev, last.rev, entries
                )));
            }
        }

        state.file = Some(file);
        state.file_size = file_size;
        state.max_file_size = state.max_file_size.max(file_size);
        state.entries = entries;
        state.first = first;
        state.last = last;
        state.wrap_pos = wrap_pos;
        Ok(())
    }

    /// Number of records currently stored.
    pub fn entries(&self) -> u32 {
        self.state.lock().entries
    }

    /// Seconds between consecutive records.
    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Revision of the oldest retained record (0 when empty).
    pub fn first_rev(&self) -> u32 {
        self.state.lock().first.rev
    }

    /// Timestamp of the oldest retained record (0 when empty).
    pub fn first_ts(&self) -> u32 {
        self.state.lock().first.ts
    }

    /// Revision of the newest record (0 when empty).
    pub fn last_rev(&self) -> u32 {
        self.state.lock().last.rev
    }

    /// Timestamp of the newest record (0 when empty).
    pub fn last_ts(&self) -> u32 {
        self.state.lock().last.ts
    }

    /// Whether `begin` has opened the backing file.
    pub fn is_open(&self) -> bool {
        self.state.lock().file.is_some()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the record whose logical timestamp is closest below `ts`.
    ///
    /// `ts` is aligned down to the log interval first. The wait on the log
    /// mutex is bounded by `timeout`; [`MeterError::MutexTimeout`] is
    /// returned if it expires.
    pub fn read(&self, ts: u32, timeout: Duration) -> MeterResult<Lookup> {
        let ts = ts - ts % self.interval;

        let mut guard = self
            .state
            .try_lock_for(timeout)
            .ok_or(MeterError::MutexTimeout)?;
        let state = &mut *guard;

        if state.file.is_none() {
            return Err(MeterError::NotOpen);
        }
        if state.entries == 0 {
            return Err(MeterError::NoEntries);
        }

        if ts < state.first.ts {
            // Before the beginning of the file.
            let first_rev = state.first.rev;
            let mut rec = self.read_rev(state, first_rev)?;
            rec.ts = ts;
            return Ok(Lookup::BeforeRange(rec));
        }
        if ts >= state.last.ts {
            // At or past the end of the file.
            let last_rev = state.last.rev;
            let found = ts == state.last.ts;
            let mut rec = self.read_rev(state, last_rev)?;
            rec.ts = ts;
            return Ok(if found {
                Lookup::Found(rec)
            } else {
                Lookup::AfterRange(rec)
            });
        }

        // Near-tail requests are usually served straight from memory.
        let tail_window = state.tail_cache.capacity() as u32 * self.interval;
        let near_tail = ts >= state.last.ts.saturating_sub(tail_window);
        if near_tail {
            if let Some(rec) = state.tail_cache.find(ts) {
                return Ok(Lookup::Found(rec));
            }
        }

        // Prime the bracket from the file ends and let recently read keys
        // tighten it; an exact key hit skips the search entirely.
        let mut bracket = Bracket {
            low_ts: state.first.ts,
            low_rev: state.first.rev,
            high_ts: state.last.ts,
            high_rev: state.last.rev,
        };
        let mut exact: Option<(usize, u32)> = None;
        for (idx, key) in state.read_cache.iter() {
            if key.ts == ts {
                exact = Some((idx, key.rev));
                break;
            }
            if key.ts > bracket.low_ts && key.ts < ts {
                bracket.low_ts = key.ts;
                bracket.low_rev = key.rev;
            } else if key.ts < bracket.high_ts && key.ts > ts {
                bracket.high_ts = key.ts;
                bracket.high_rev = key.rev;
            }
        }
        if let Some((idx, rev)) = exact {
            state.read_cache.note_hit(idx);
            let rec = self.read_rev(state, rev)?;
            return Ok(Lookup::Found(rec));
        }

        let mut rec = self.search(state, ts, bracket)?;
        rec.ts = ts;
        if near_tail {
            state.tail_cache.push(&rec);
        }
        Ok(Lookup::Found(rec))
    }

    /// Append one record, assigning it the next revision.
    ///
    /// The record's timestamp must advance past the log tail; everything
    /// else about it is the writer's business.
    pub fn write(&self, rec: &mut Record) -> MeterResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(file) = state.file.as_mut() else {
            return Err(MeterError::NotOpen);
        };
        if rec.ts <= state.last.ts {
            return Err(MeterError::NonIncreasingTimestamp {
                ts: rec.ts,
                last: state.last.ts,
            });
        }
        rec.rev = state.last.rev + 1;
        state.last = Key {
            rev: rec.rev,
            ts: rec.ts,
        };
        state.tail_cache.push(rec);

        if state.wrap_pos != 0 || state.file_size >= state.max_file_size {
            // The file has wrapped (or must now): overwrite the oldest slot,
            // advance the wrap point and pick up the new first key.
            let _disk = self.disk.lock();
            write_record_at(file, state.wrap_pos, rec)?;
            state.wrap_pos = (state.wrap_pos + STRIDE) % state.file_size;
            state.first = read_key_at(file, state.wrap_pos)?;
        } else {
            // Still growing: append at the end of the file.
            let _disk = self.disk.lock();
            write_record_at(file, state.file_size, rec)?;
            state.file_size += STRIDE;
            state.entries += 1;
            if state.entries == 1 {
                state.first = Key {
                    rev: rec.rev,
                    ts: rec.ts,
                };
            }
        }
        counter!(DATALOG_IO).increment(1);
        Ok(())
    }

    /// Read a record by revision. O(1): the slot offset is a pure function
    /// of the revision, the first revision and the wrap position.
    fn read_rev(&self, state: &mut LogState, rev: u32) -> MeterResult<Record> {
        if rev < state.first.rev || rev > state.last.rev {
            return Err(MeterError::RevisionOutOfRange(rev));
        }
        let Some(file) = state.file.as_mut() else {
            return Err(MeterError::NotOpen);
        };
        let pos = (u64::from(rev - state.first.rev) * STRIDE + state.wrap_pos) % state.file_size;
        let rec = {
            let _disk = self.disk.lock();
            read_record_at(file, pos)?
        };
        state.read_cache.push(rec.key());
        counter!(DATALOG_IO).increment(1);
        Ok(rec)
    }

    /// Interpolating search: derive revision bounds from both bracket ends,
    /// probe them, and fall back to bisection when gaps leave the bounds
    /// uninformative.
    fn search(&self, state: &mut LogState, ts: u32, mut b: Bracket) -> MeterResult<Record> {
        let interval = self.interval;
        loop {
            debug_assert!(b.low_ts <= ts && ts <= b.high_ts);
            debug_assert!(b.low_rev < b.high_rev);

            // If this stretch is gapless the bounds meet at the exact
            // revision; otherwise each end still bounds the answer.
            let floor_rev = b
                .low_rev
                .max(b.high_rev.saturating_sub((b.high_ts - ts) / interval));
            let ceil_rev = b
                .high_rev
                .min(b.low_rev.saturating_add((ts - b.low_ts) / interval));

            if ceil_rev < b.high_rev || floor_rev == ceil_rev {
                let rec = self.read_rev(state, ceil_rev)?;
                if rec.ts == ts {
                    return Ok(rec);
                }
                b.high_ts = rec.ts;
                b.high_rev = rec.rev;
                continue;
            }
            if floor_rev > b.low_rev {
                let rec = self.read_rev(state, floor_rev)?;
                if rec.ts == ts {
                    return Ok(rec);
                }
                b.low_ts = rec.ts;
                b.low_rev = rec.rev;
                continue;
            }

            // The bounds did not narrow anything; plain bisection.
            if b.high_rev - b.low_rev <= 1 {
                return self.read_rev(state, b.low_rev);
            }
            let rec = self.read_rev(state, (b.low_rev + b.high_rev) / 2)?;
            if rec.ts == ts {
                return Ok(rec);
            }
            if rec.ts < ts {
                b.low_ts = rec.ts;
                b.low_rev = rec.rev;
            } else {
                b.high_ts = rec.ts;
                b.high_rev = rec.rev;
            }
        }
    }
}

/// Locate the wrap boundary of a wrapped file by bisecting record-aligned
/// byte offsets. The bracket satisfies `low_ts > high_ts` throughout; the
/// boundary is the returned `high_pos`.
fn find_wrap_pos(
    file: &mut File,
    mut low_pos: u64,
    mut low_ts: u32,
    mut high_pos: u64,
    mut high_ts: u32,
) -> MeterResult<u64> {
    while high_pos - low_pos > STRIDE {
        debug_assert!(low_ts > high_ts);
        let mut mid_pos = (low_pos + high_pos) / 2;
        mid_pos -= mid_pos % STRIDE;
        let mid_ts = read_key_at(file, mid_pos)?.ts;
        if mid_ts > low_ts {
            low_pos = mid_pos;
            low_ts = mid_ts;
        } else {
            high_pos = mid_pos;
            high_ts = mid_ts;
        }
    }
    Ok(high_pos)
}

fn read_key_at(file: &mut File, pos: u64) -> MeterResult<Key> {
    let mut buf = [0u8; KEY_SIZE];
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(&mut buf)?;
    Ok(Key::decode(&buf))
}

fn read_record_at(file: &mut File, pos: u64) -> MeterResult<Record> {
    let mut buf = [0u8; RECORD_SIZE];
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(&mut buf)?;
    Ok(Record::decode(&buf))
}

fn write_record_at(file: &mut File, pos: u64, rec: &Record) -> MeterResult<()> {
    file.seek(SeekFrom::Start(pos))?;
    file.write_all(&rec.encode())?;
    // Power is lost often in the field; sync every append.
    file.sync_data()?;
    Ok(())
}
