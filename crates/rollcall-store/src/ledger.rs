//! Per-day attendance ledger, one JSON file per calendar date.
//!
//! `mark_present` is a read-modify-write of the day's file, so writers for
//! the same date take that date's lock first: an in-process mutex, then an
//! advisory `flock` on `<date>.lock` that also excludes other processes
//! sharing the directory. Files are only ever replaced by rename, which lets
//! readers go without any lock.

use crate::fsio;
use crate::record::{AttendanceRecord, DATE_FORMAT};
use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("attendance for {date} is locked by another writer (gave up after {attempts} attempts)")]
    ConcurrentWriteConflict { date: NaiveDate, attempts: u32 },
    #[error("corrupt attendance record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("attendance I/O on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("attendance encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Bounded exponential backoff for the per-date write lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            base_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Both halves of a date lock, held until the record is written.
struct DateGuard<'a> {
    _file: Flock<File>,
    _local: MutexGuard<'a, ()>,
}

pub struct AttendanceLedger {
    dir: PathBuf,
    retry: RetryPolicy,
    locks: Mutex<HashMap<NaiveDate, Arc<Mutex<()>>>>,
}

impl AttendanceLedger {
    /// Open (creating if needed) the ledger directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| LedgerError::Io {
            path: dir.clone(),
            source,
        })?;
        tracing::info!(dir = %dir.display(), "attendance ledger opened");
        Ok(Self {
            dir,
            retry: RetryPolicy::default(),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", date.format(DATE_FORMAT)))
    }

    fn lock_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.lock", date.format(DATE_FORMAT)))
    }

    /// Mark every identity present on `when`'s calendar day.
    ///
    /// Identities already marked that day keep their original timestamp.
    /// Timestamps are stored at whole-second precision.
    pub fn mark_present<I, S>(
        &self,
        identities: I,
        when: NaiveDateTime,
    ) -> Result<AttendanceRecord, LedgerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let when = when.with_nanosecond(0).unwrap_or(when);
        let date = when.date();

        let lock = self.date_lock(date);
        let result = self.mark_locked(&lock, identities, when);
        self.release_date_lock(date, lock);
        result
    }

    fn mark_locked<I, S>(
        &self,
        lock: &Mutex<()>,
        identities: I,
        when: NaiveDateTime,
    ) -> Result<AttendanceRecord, LedgerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let date = when.date();
        let _guard = self.acquire(lock, date)?;

        let mut record = self
            .read_record(date)?
            .unwrap_or_else(|| AttendanceRecord::empty(date));

        let mut added = 0usize;
        for identity in identities {
            let identity = identity.as_ref();
            if identity.is_empty() {
                tracing::warn!(%date, "ignoring empty identity");
                continue;
            }
            if record.insert_if_absent(identity, when) {
                tracing::info!(%date, identity, "marked present");
                added += 1;
            }
        }

        self.write_record(&record)?;
        tracing::debug!(%date, added, total = record.len(), "attendance record saved");
        Ok(record)
    }

    /// The record for `date`, or an empty one if nobody was marked.
    pub fn get(&self, date: NaiveDate) -> Result<AttendanceRecord, LedgerError> {
        Ok(self
            .read_record(date)?
            .unwrap_or_else(|| AttendanceRecord::empty(date)))
    }

    /// The record for the local calendar day.
    pub fn today(&self) -> Result<AttendanceRecord, LedgerError> {
        self.get(Local::now().date_naive())
    }

    /// Every persisted record, newest date first.
    pub fn list_all(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(LedgerError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| LedgerError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let Some(date) = record_date(&entry.path()) else {
                continue;
            };
            if let Some(record) = self.read_record(date)? {
                records.push(record);
            }
        }

        records.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(records)
    }

    fn date_lock(&self, date: NaiveDate) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(date).or_default())
    }

    /// Forget the date's mutex once nobody else is waiting on it.
    fn release_date_lock(&self, date: NaiveDate, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&date);
        }
    }

    fn acquire<'a>(
        &self,
        lock: &'a Mutex<()>,
        date: NaiveDate,
    ) -> Result<DateGuard<'a>, LedgerError> {
        let attempts = self.retry.attempts.max(1);
        for attempt in 0..attempts {
            if let Some(guard) = self.try_acquire(lock, date)? {
                return Ok(guard);
            }
            if attempt + 1 < attempts {
                let delay = self.retry.delay(attempt);
                tracing::debug!(%date, attempt, ?delay, "attendance lock busy; backing off");
                std::thread::sleep(delay);
            }
        }
        tracing::warn!(%date, attempts, "attendance lock retries exhausted");
        Err(LedgerError::ConcurrentWriteConflict { date, attempts })
    }

    fn try_acquire<'a>(
        &self,
        lock: &'a Mutex<()>,
        date: NaiveDate,
    ) -> Result<Option<DateGuard<'a>>, LedgerError> {
        let local = match lock.try_lock() {
            Ok(guard) => guard,
            // The guarded data is `()`; a panicked writer left nothing half-done in memory.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Ok(None),
        };

        let path = self.lock_path(date);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| LedgerError::Io {
                path: path.clone(),
                source,
            })?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(file) => Ok(Some(DateGuard {
                _file: file,
                _local: local,
            })),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
            Err((_, errno)) => Err(LedgerError::Io {
                path,
                source: io::Error::from(errno),
            }),
        }
    }

    fn read_record(&self, date: NaiveDate) -> Result<Option<AttendanceRecord>, LedgerError> {
        let path = self.record_path(date);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(LedgerError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| LedgerError::Corrupt { path, source })
    }

    fn write_record(&self, record: &AttendanceRecord) -> Result<(), LedgerError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        record.serialize(&mut ser).map_err(LedgerError::Encode)?;

        let path = self.record_path(record.date);
        fsio::write_atomic(&path, &buf).map_err(|source| LedgerError::Io { path, source })
    }
}

/// `2024-03-18.json` → 2024-03-18. Anything else is not a record file.
fn record_date(path: &Path) -> Option<NaiveDate> {
    if path.extension()? != "json" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    NaiveDate::parse_from_str(stem, DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Status;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn at(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        day(d).and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_mark_creates_record() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();

        let record = ledger.mark_present(["alice"], at(18, 8, 0, 0)).unwrap();
        assert_eq!(record.date, day(18));
        assert_eq!(record.len(), 1);
        let entry = record.get("alice").unwrap();
        assert_eq!(entry.status, Status::Present);
        assert_eq!(entry.timestamp, at(18, 8, 0, 0));
        assert!(ledger.record_path(day(18)).exists());
    }

    #[test]
    fn test_mark_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();

        ledger.mark_present(["alice"], at(18, 8, 0, 0)).unwrap();
        let record = ledger.mark_present(["alice"], at(18, 14, 30, 0)).unwrap();

        assert_eq!(record.len(), 1);
        assert_eq!(record.get("alice").unwrap().timestamp, at(18, 8, 0, 0));
        assert_eq!(ledger.get(day(18)).unwrap(), record);
    }

    #[test]
    fn test_mark_truncates_subseconds() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        let when = day(18).and_hms_milli_opt(9, 15, 0, 750).unwrap();

        let record = ledger.mark_present(["bob"], when).unwrap();
        assert_eq!(record.get("bob").unwrap().timestamp, at(18, 9, 15, 0));
        assert_eq!(ledger.get(day(18)).unwrap(), record);
    }

    #[test]
    fn test_duplicate_identities_in_one_call() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        let record = ledger
            .mark_present(vec!["bob", "alice", "bob", ""], at(18, 8, 0, 0))
            .unwrap();
        assert_eq!(record.records.keys().collect::<Vec<_>>(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_days_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        ledger.mark_present(["alice"], at(18, 8, 0, 0)).unwrap();
        let next = ledger.mark_present(["alice"], at(19, 9, 0, 0)).unwrap();
        assert_eq!(next.get("alice").unwrap().timestamp, at(19, 9, 0, 0));
    }

    #[test]
    fn test_get_missing_date_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        let record = ledger.get(day(1)).unwrap();
        assert_eq!(record, AttendanceRecord::empty(day(1)));
    }

    #[test]
    fn test_list_all_newest_first_and_ignores_strays() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        ledger.mark_present(["a"], at(5, 8, 0, 0)).unwrap();
        ledger.mark_present(["b"], at(20, 8, 0, 0)).unwrap();
        ledger.mark_present(["c"], at(12, 8, 0, 0)).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        std::fs::write(dir.path().join("summary.json"), "{}").unwrap();

        let dates: Vec<_> = ledger.list_all().unwrap().iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(20), day(12), day(5)]);
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        std::fs::write(ledger.record_path(day(18)), "{ not json").unwrap();
        assert!(matches!(ledger.get(day(18)), Err(LedgerError::Corrupt { .. })));
        assert!(matches!(
            ledger.mark_present(["a"], at(18, 8, 0, 0)),
            Err(LedgerError::Corrupt { .. })
        ));
        // The corrupt file was not overwritten.
        assert_eq!(std::fs::read_to_string(ledger.record_path(day(18))).unwrap(), "{ not json");
    }

    #[test]
    fn test_file_uses_four_space_indent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        ledger.mark_present(["alice"], at(18, 8, 0, 0)).unwrap();
        let text = std::fs::read_to_string(ledger.record_path(day(18))).unwrap();
        assert!(text.starts_with("{\n    \"date\": \"2024-03-18\","), "{text}");
    }

    #[test]
    fn test_held_lock_yields_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap().with_retry(RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        });

        let lock = ledger.date_lock(day(18));
        let _held = lock.lock().unwrap();
        match ledger.mark_present(["alice"], at(18, 8, 0, 0)) {
            Err(LedgerError::ConcurrentWriteConflict { date, attempts }) => {
                assert_eq!(date, day(18));
                assert_eq!(attempts, 3);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        // Another date is unaffected.
        assert!(ledger.mark_present(["alice"], at(19, 8, 0, 0)).is_ok());
    }

    #[test]
    fn test_other_ledger_holding_date_yields_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let holder = AttendanceLedger::open(dir.path()).unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap().with_retry(RetryPolicy {
            attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        });

        let lock = holder.date_lock(day(18));
        let held = holder.acquire(&lock, day(18)).unwrap();
        assert!(matches!(
            ledger.mark_present(["alice"], at(18, 8, 0, 0)),
            Err(LedgerError::ConcurrentWriteConflict { attempts: 2, .. })
        ));
        assert!(!ledger.record_path(day(18)).exists());

        drop(held);
        let record = ledger.mark_present(["alice"], at(18, 8, 0, 0)).unwrap();
        assert!(record.contains("alice"));
    }

    #[test]
    fn test_date_locks_are_released() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        for d in 1..=5 {
            ledger.mark_present(["alice"], at(d, 8, 0, 0)).unwrap();
        }
        assert!(ledger.locks.lock().unwrap().is_empty());
        assert_eq!(ledger.list_all().unwrap().len(), 5);
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(2));
        assert_eq!(policy.delay(3), Duration::from_millis(16));
        assert_eq!(policy.delay(40), Duration::from_millis(100));
    }
}
