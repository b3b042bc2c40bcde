//! Bounded persistent log of dispatch outcomes.
//!
//! Every attempt — real or synthesized — lands here exactly once. The log
//! is append-only from the runner's point of view and capped at
//! [`HISTORY_CAP`] entries: once full, the oldest rows are evicted first.

use crate::runner::{DispatchOutcome, OutcomeKind};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Maximum number of retained entries.
pub const HISTORY_CAP: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("corrupt history row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One row as read back for display.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub phone: String,
    pub name: String,
    pub status: OutcomeKind,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

/// SQLite-backed dispatch history.
pub struct HistoryLog {
    conn: Mutex<Connection>,
}

impl HistoryLog {
    /// Open (creating if needed) the log at `path`.
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory log for tests.
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init(conn: &Connection) -> Result<(), HistoryError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS message_history (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                phone     TEXT NOT NULL,
                name      TEXT NOT NULL,
                status    TEXT NOT NULL,
                result    TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )",
        )?;
        Ok(())
    }

    /// Append one outcome, evicting the oldest rows past the cap.
    pub fn append(&self, outcome: &DispatchOutcome) -> Result<(), HistoryError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO message_history (phone, name, status, result, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                outcome.phone,
                outcome.name,
                outcome.kind.as_str(),
                outcome.result,
                outcome.timestamp.to_rfc3339(),
            ],
        )?;
        conn.execute(
            "DELETE FROM message_history WHERE id NOT IN (
                SELECT id FROM message_history ORDER BY id DESC LIMIT ?1
             )",
            [HISTORY_CAP as i64],
        )?;
        Ok(())
    }

    /// Newest entries first, up to `limit`.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT phone, name, status, result, timestamp
             FROM message_history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (phone, name, status, result, timestamp) = row?;
            let status = OutcomeKind::parse(&status)
                .ok_or_else(|| HistoryError::Corrupt(format!("unknown status {status}")))?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|err| HistoryError::Corrupt(format!("bad timestamp: {err}")))?
                .with_timezone(&Utc);
            entries.push(HistoryEntry { phone, name, status, result, timestamp });
        }
        Ok(entries)
    }

    /// Number of retained entries.
    pub fn len(&self) -> Result<usize, HistoryError> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM message_history", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, HistoryError> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::OutcomeKind;

    fn outcome(n: usize, kind: OutcomeKind) -> DispatchOutcome {
        DispatchOutcome {
            kind,
            phone: format!("1555{n:07}"),
            name: format!("contact-{n}"),
            result: format!("result {n}"),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn append_and_read_back() {
        let log = HistoryLog::open_in_memory().unwrap();
        log.append(&outcome(1, OutcomeKind::Sent)).unwrap();
        log.append(&outcome(2, OutcomeKind::Failed)).unwrap();

        let entries = log.recent(10).unwrap();
        assert_eq!(entries.len(), 2);
        // Newest first.
        assert_eq!(entries[0].name, "contact-2");
        assert_eq!(entries[0].status, OutcomeKind::Failed);
        assert_eq!(entries[1].status, OutcomeKind::Sent);
    }

    #[test]
    fn cap_keeps_only_the_last_hundred_in_order() {
        let log = HistoryLog::open_in_memory().unwrap();
        for n in 0..150 {
            log.append(&outcome(n, OutcomeKind::Sent)).unwrap();
        }

        assert_eq!(log.len().unwrap(), HISTORY_CAP);
        let mut entries = log.recent(HISTORY_CAP).unwrap();
        entries.reverse(); // oldest retained first
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.name, format!("contact-{}", i + 50));
        }
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let log = HistoryLog::open(&path).unwrap();
            log.append(&outcome(1, OutcomeKind::Cancelled)).unwrap();
        }
        let log = HistoryLog::open(&path).unwrap();
        let entries = log.recent(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, OutcomeKind::Cancelled);
    }
}
