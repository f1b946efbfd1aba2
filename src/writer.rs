//! Daily log file writer.
//!
//! Each record is appended to `<log_dir>/console-<YYYY-MM-DD>.log` for the
//! local date at write time, and mirrored to the console. The file is
//! opened, appended to and closed for every line; no handle is kept between
//! writes.

use crate::error::WriteError;
use crate::record::LogRecord;
use chrono::{Local, NaiveDate, NaiveDateTime};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info};

/// Appends formatted records to daily log files.
pub struct LogWriter {
    /// Directory holding the daily files
    log_dir: PathBuf,
    /// Serializes appends so lines from different connections never interleave
    append_lock: Mutex<()>,
}

impl LogWriter {
    /// Create a writer for the given directory.
    ///
    /// The directory is not created here; the server prepares it at startup.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            append_lock: Mutex::new(()),
        }
    }

    /// Directory this writer appends to.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Path of the daily file for `date`.
    pub fn daily_path(&self, date: NaiveDate) -> PathBuf {
        self.log_dir
            .join(format!("console-{}.log", date.format("%Y-%m-%d")))
    }

    /// Write a record stamped with the current local time.
    ///
    /// Failures are logged and the record is dropped.
    pub fn write(&self, record: &LogRecord) {
        self.write_at(record, Local::now().naive_local());
    }

    /// Write a record stamped with `at` (local wall-clock time).
    ///
    /// Failures are logged and the record is dropped.
    pub fn write_at(&self, record: &LogRecord, at: NaiveDateTime) {
        let time_str = at.format("%H:%M:%S%.3f").to_string();
        let level = record.level_tag();
        let message = record.message();
        let line = format!("[{time_str}] [{level}] {message} (from: {})\n", record.url);

        match self.append(at.date(), &line) {
            Ok(()) => info!("[{time_str}] [{level}] {message}"),
            Err(e) => error!(error = %e, "Error writing log"),
        }
    }

    /// Append one complete line to the daily file for `date`.
    ///
    /// Blocking `std::fs` I/O, run inline on the calling task. Each call is
    /// one short append. `block_in_place` is not used since it panics on a
    /// current-thread runtime.
    fn append(&self, date: NaiveDate, line: &str) -> Result<(), WriteError> {
        let path = self.daily_path(date);

        // The lock guards no data, so a poisoned lock is still usable.
        let _guard = self
            .append_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(line.as_bytes()));

        result.map_err(|source| WriteError { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_milli_opt(h, min, s, ms)
            .unwrap()
    }

    fn record(level: &str, args: Vec<serde_json::Value>, url: &str) -> LogRecord {
        LogRecord {
            level: level.to_string(),
            args,
            url: url.to_string(),
        }
    }

    #[test]
    fn test_daily_path() {
        let writer = LogWriter::new("/var/log/browser");
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(
            writer.daily_path(date),
            PathBuf::from("/var/log/browser/console-2026-03-07.log")
        );
    }

    #[test]
    fn test_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogWriter::new(dir.path());
        let rec = record("log", vec![json!("hello"), json!("world")], "http://x/y");

        writer.write_at(&rec, at(2026, 10, 17, 9, 5, 3, 7));

        let contents =
            std::fs::read_to_string(dir.path().join("console-2026-10-17.log")).unwrap();
        assert_eq!(contents, "[09:05:03.007] [LOG] hello world (from: http://x/y)\n");
    }

    #[test]
    fn test_default_record_line() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogWriter::new(dir.path());
        let rec = crate::record::decode("{}").unwrap().normalize().unwrap();

        writer.write_at(&rec, at(2026, 10, 17, 12, 0, 0, 0));

        let contents =
            std::fs::read_to_string(dir.path().join("console-2026-10-17.log")).unwrap();
        assert_eq!(contents, "[12:00:00.000] [UNKNOWN]  (from: unknown)\n");
    }

    #[test]
    fn test_appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogWriter::new(dir.path());

        writer.write_at(&record("info", vec![json!("first")], "u"), at(2026, 1, 2, 8, 0, 0, 1));
        writer.write_at(&record("warn", vec![json!("second")], "u"), at(2026, 1, 2, 8, 0, 0, 2));

        let contents =
            std::fs::read_to_string(dir.path().join("console-2026-01-02.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[08:00:00.001] [INFO] first (from: u)",
                "[08:00:00.002] [WARN] second (from: u)",
            ]
        );
    }

    #[test]
    fn test_midnight_switches_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogWriter::new(dir.path());

        writer.write_at(&record("log", vec![json!("before")], "u"), at(2026, 12, 31, 23, 59, 59, 999));
        writer.write_at(&record("log", vec![json!("after")], "u"), at(2027, 1, 1, 0, 0, 0, 1));

        let before =
            std::fs::read_to_string(dir.path().join("console-2026-12-31.log")).unwrap();
        let after = std::fs::read_to_string(dir.path().join("console-2027-01-01.log")).unwrap();
        assert_eq!(before, "[23:59:59.999] [LOG] before (from: u)\n");
        assert_eq!(after, "[00:00:00.001] [LOG] after (from: u)\n");
    }

    #[test]
    fn test_unicode_content() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogWriter::new(dir.path());

        writer.write_at(
            &record("error", vec![json!("ошибка"), json!("✗")], "https://例え.jp/"),
            at(2026, 5, 5, 5, 5, 5, 500),
        );

        let contents =
            std::fs::read_to_string(dir.path().join("console-2026-05-05.log")).unwrap();
        assert_eq!(contents, "[05:05:05.500] [ERROR] ошибка ✗ (from: https://例え.jp/)\n");
    }

    #[test]
    fn test_write_failure_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogWriter::new(dir.path().join("missing"));

        // Directory does not exist: the write is dropped without panicking.
        writer.write_at(&record("log", vec![], "u"), at(2026, 1, 1, 0, 0, 0, 0));
        assert!(!dir.path().join("missing").exists());

        let err = writer
            .append(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(), "x\n")
            .unwrap_err();
        assert!(err.path.ends_with("console-2026-01-01.log"));
    }

    #[test]
    fn test_concurrent_writers_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(LogWriter::new(dir.path()));
        let payload = "x".repeat(4096);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let writer = Arc::clone(&writer);
                let payload = payload.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let rec = record(
                            "log",
                            vec![json!(format!("t{t}")), json!(i), json!(payload)],
                            "u",
                        );
                        writer.write_at(&rec, at(2026, 6, 1, 10, 0, 0, 0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents =
            std::fs::read_to_string(dir.path().join("console-2026-06-01.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 400);

        for t in 0..8 {
            let prefix = format!("[10:00:00.000] [LOG] t{t} ");
            let seen: Vec<usize> = lines
                .iter()
                .filter_map(|line| line.strip_prefix(prefix.as_str()))
                .map(|rest| {
                    assert!(rest.ends_with(&format!(" {payload} (from: u)")));
                    rest.split(' ').next().unwrap().parse().unwrap()
                })
                .collect();
            assert_eq!(seen, (0..50).collect::<Vec<_>>());
        }
    }
}
