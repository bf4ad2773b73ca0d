use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::TelemetrySection;

/// One attempt of one page operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub operation_key: String,
    pub operation_kind: String,
    pub effective_timeout_sec: f64,
    pub actual_duration_sec: f64,
    pub attempt_index: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("telemetry sink poisoned")]
    Poisoned,
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Append-only destination for timing records.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: &TimingRecord) -> TelemetryResult<()>;
}

#[derive(Debug, Default)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn record(&self, _record: &TimingRecord) -> TelemetryResult<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    records: Mutex<Vec<TimingRecord>>,
}

impl MemoryTelemetry {
    pub fn records(&self) -> Vec<TimingRecord> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn record(&self, record: &TimingRecord) -> TelemetryResult<()> {
        let mut guard = self.records.lock().map_err(|_| TelemetryError::Poisoned)?;
        guard.push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimingSummary {
    pub operation_key: String,
    pub attempts: u64,
    pub failures: u64,
    pub mean_duration_sec: f64,
    pub max_duration_sec: f64,
}

/// Timing records written to a JSON-lines file and a SQLite table.
#[derive(Debug)]
pub struct TimingTelemetry {
    log: Mutex<File>,
    log_path: PathBuf,
    db_path: PathBuf,
    flags: OpenFlags,
}

impl TimingTelemetry {
    pub fn new(log_path: impl AsRef<Path>, db_path: impl AsRef<Path>) -> TelemetryResult<Self> {
        let log_path = log_path.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            create_dir_all(parent)?;
        }
        let telemetry = Self {
            log: Mutex::new(file),
            log_path,
            db_path,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };
        telemetry.initialize_db()?;
        Ok(telemetry)
    }

    pub fn from_section(
        section: &TelemetrySection,
        resolve: impl Fn(&Path) -> PathBuf,
    ) -> TelemetryResult<Self> {
        Self::new(resolve(&section.timing_log), resolve(&section.timing_db))
    }

    fn initialize_db(&self) -> TelemetryResult<()> {
        let conn = self.open_db()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS operation_timings (
                ts TEXT NOT NULL,
                session_id TEXT NOT NULL,
                operation_key TEXT NOT NULL,
                operation_kind TEXT NOT NULL,
                effective_timeout_sec REAL NOT NULL,
                actual_duration_sec REAL NOT NULL,
                attempt_index INTEGER NOT NULL,
                success INTEGER NOT NULL,
                category TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_operation_timings_ts ON operation_timings(ts DESC);
            CREATE INDEX IF NOT EXISTS idx_operation_timings_key ON operation_timings(operation_key);",
        )?;
        Ok(())
    }

    fn open_db(&self) -> TelemetryResult<Connection> {
        Ok(Connection::open_with_flags(&self.db_path, self.flags)?)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Deletes database rows older than `cutoff`. Returns the number removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> TelemetryResult<usize> {
        let conn = self.open_db()?;
        let removed = conn.execute(
            "DELETE FROM operation_timings WHERE ts < ?1",
            params![format_ts(&cutoff)],
        )?;
        Ok(removed)
    }

    pub fn summary(&self) -> TelemetryResult<Vec<TimingSummary>> {
        summarize(&self.open_db()?)
    }
}

/// Per-key aggregates over every row of `operation_timings`.
pub fn summarize(conn: &Connection) -> TelemetryResult<Vec<TimingSummary>> {
    let mut stmt = conn.prepare(
        "SELECT operation_key, COUNT(*), SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END),
                AVG(actual_duration_sec), MAX(actual_duration_sec)
         FROM operation_timings
         GROUP BY operation_key
         ORDER BY operation_key",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(TimingSummary {
            operation_key: row.get(0)?,
            attempts: row.get::<_, i64>(1)?.max(0) as u64,
            failures: row.get::<_, i64>(2)?.max(0) as u64,
            mean_duration_sec: row.get(3)?,
            max_duration_sec: row.get(4)?,
        })
    })?;
    let mut summary = Vec::new();
    for row in rows {
        summary.push(row?);
    }
    Ok(summary)
}

impl TelemetrySink for TimingTelemetry {
    fn record(&self, record: &TimingRecord) -> TelemetryResult<()> {
        let json = serde_json::to_string(record)?;
        {
            let mut guard = self.log.lock().map_err(|_| TelemetryError::Poisoned)?;
            writeln!(guard, "{json}")?;
            guard.flush()?;
        }
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO operation_timings (
                ts, session_id, operation_key, operation_kind, effective_timeout_sec,
                actual_duration_sec, attempt_index, success, category
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                format_ts(&record.timestamp),
                record.session_id,
                record.operation_key,
                record.operation_kind,
                record.effective_timeout_sec,
                record.actual_duration_sec,
                i64::from(record.attempt_index),
                if record.success { 1 } else { 0 },
                record.category,
            ],
        )?;
        Ok(())
    }
}

fn format_ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn record(key: &str, success: bool, at: DateTime<Utc>) -> TimingRecord {
        TimingRecord {
            timestamp: at,
            session_id: "session".into(),
            operation_key: key.into(),
            operation_kind: "click".into(),
            effective_timeout_sec: 5.0,
            actual_duration_sec: 1.25,
            attempt_index: 0,
            success,
            category: (!success).then(|| "timeout".to_string()),
        }
    }

    #[test]
    fn telemetry_persists_entries() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("timing").join("timing_data.jsonl");
        let db_path = dir.path().join("timing").join("timing.sqlite");
        let telemetry = TimingTelemetry::new(&log_path, &db_path).unwrap();

        let now = Utc::now();
        telemetry.record(&record("page_load", true, now)).unwrap();
        telemetry.record(&record("page_load", false, now)).unwrap();
        telemetry.record(&record("quick_dom", true, now)).unwrap();

        let log_contents = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(log_contents.lines().count(), 3);
        let first: TimingRecord =
            serde_json::from_str(log_contents.lines().next().unwrap()).unwrap();
        assert_eq!(first.operation_key, "page_load");

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM operation_timings", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 3);

        let summary = telemetry.summary().unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].operation_key, "page_load");
        assert_eq!(summary[0].attempts, 2);
        assert_eq!(summary[0].failures, 1);
    }

    #[test]
    fn prune_removes_old_rows() {
        let dir = tempdir().unwrap();
        let telemetry = TimingTelemetry::new(
            dir.path().join("timing.jsonl"),
            dir.path().join("timing.sqlite"),
        )
        .unwrap();
        let now = Utc::now();
        telemetry
            .record(&record("default", true, now - Duration::days(45)))
            .unwrap();
        telemetry.record(&record("default", true, now)).unwrap();

        let removed = telemetry
            .prune_older_than(now - Duration::days(30))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(telemetry.summary().unwrap()[0].attempts, 1);
    }

    #[test]
    fn memory_sink_keeps_records() {
        let sink = MemoryTelemetry::default();
        sink.record(&record("default", true, Utc::now())).unwrap();
        assert_eq!(sink.records().len(), 1);
    }
}
