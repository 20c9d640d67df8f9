//! SQLite 会话存储
//!
//! 两张表：sessions（session_id 主键，scheduled_date 唯一）与 action_records（只追加）。
//! 每次 commit 在一个事务里更新会话行并追加记录，崩溃不会留下半条记录。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::model::{
    ActionOutcome, ActionRecord, ActionType, EngagementProgress, Phase, PublishStatus, Session,
};
use super::store::SessionStore;
use crate::core::StorageError;

const SESSION_COLUMNS: &str = "session_id, scheduled_date, phase, publish_status, progress, \
     started_at, completed_at, publish_attempted_at, last_progress_at";

pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                scheduled_date TEXT NOT NULL UNIQUE,
                phase TEXT NOT NULL,
                publish_status TEXT NOT NULL,
                progress TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                publish_attempted_at TEXT,
                last_progress_at TEXT
             );
             CREATE TABLE IF NOT EXISTS action_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(session_id),
                action_type TEXT NOT NULL,
                target_id TEXT NOT NULL,
                connection_id TEXT,
                phase TEXT NOT NULL,
                attempt_count INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                reason TEXT,
                timestamp TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_action_records_session ON action_records(session_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn query_session(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Session>, StorageError> {
        let raw = conn.query_row(sql, params, RawSession::from_row).optional()?;
        raw.map(RawSession::into_session).transpose()
    }
}

/// 数据库中的原始会话行（字符串枚举尚未解析）
struct RawSession {
    session_id: String,
    scheduled_date: NaiveDate,
    phase: String,
    publish_status: String,
    progress: String,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    publish_attempted_at: Option<DateTime<Utc>>,
    last_progress_at: Option<DateTime<Utc>>,
}

impl RawSession {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get(0)?,
            scheduled_date: row.get(1)?,
            phase: row.get(2)?,
            publish_status: row.get(3)?,
            progress: row.get(4)?,
            started_at: row.get(5)?,
            completed_at: row.get(6)?,
            publish_attempted_at: row.get(7)?,
            last_progress_at: row.get(8)?,
        })
    }

    fn into_session(self) -> Result<Session, StorageError> {
        let phase = Phase::parse(&self.phase)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown phase '{}'", self.phase)))?;
        let publish_status = PublishStatus::parse(&self.publish_status).ok_or_else(|| {
            StorageError::Corrupt(format!("unknown publish status '{}'", self.publish_status))
        })?;
        let engagement_progress: EngagementProgress = serde_json::from_str(&self.progress)?;
        Ok(Session {
            session_id: self.session_id,
            scheduled_date: self.scheduled_date,
            phase,
            publish_status,
            engagement_progress,
            started_at: self.started_at,
            completed_at: self.completed_at,
            publish_attempted_at: self.publish_attempted_at,
            last_progress_at: self.last_progress_at,
        })
    }
}

type RawRecord = (
    String,
    String,
    Option<String>,
    String,
    u32,
    String,
    Option<String>,
    DateTime<Utc>,
);

fn parse_record(raw: RawRecord) -> Result<ActionRecord, StorageError> {
    let (action_type, target_id, connection_id, phase, attempt_count, outcome, reason, timestamp) =
        raw;
    Ok(ActionRecord {
        action_type: ActionType::parse(&action_type)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown action type '{action_type}'")))?,
        target_id,
        connection_id,
        phase: Phase::parse(&phase)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown phase '{phase}'")))?,
        attempt_count,
        outcome: ActionOutcome::parse(&outcome)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown outcome '{outcome}'")))?,
        reason,
        timestamp,
    })
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self, date: NaiveDate) -> Result<Option<Session>, StorageError> {
        let conn = self.conn()?;
        Self::query_session(
            &conn,
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE scheduled_date = ?1"),
            params![date],
        )
    }

    async fn latest(&self) -> Result<Option<Session>, StorageError> {
        let conn = self.conn()?;
        Self::query_session(
            &conn,
            &format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY scheduled_date DESC LIMIT 1"),
            [],
        )
    }

    async fn create(&self, session: &Session) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO sessions ({SESSION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                session.session_id,
                session.scheduled_date,
                session.phase.as_str(),
                session.publish_status.as_str(),
                serde_json::to_string(&session.engagement_progress)?,
                session.started_at,
                session.completed_at,
                session.publish_attempted_at,
                session.last_progress_at,
            ],
        )?;
        Ok(inserted == 1)
    }

    async fn commit(
        &self,
        session: &Session,
        record: Option<&ActionRecord>,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE sessions
             SET phase = ?2, publish_status = ?3, progress = ?4, started_at = ?5,
                 completed_at = ?6, publish_attempted_at = ?7, last_progress_at = ?8
             WHERE session_id = ?1",
            params![
                session.session_id,
                session.phase.as_str(),
                session.publish_status.as_str(),
                serde_json::to_string(&session.engagement_progress)?,
                session.started_at,
                session.completed_at,
                session.publish_attempted_at,
                session.last_progress_at,
            ],
        )?;
        if updated != 1 {
            return Err(StorageError::Corrupt(format!(
                "session {} was never created",
                session.session_id
            )));
        }
        if let Some(record) = record {
            tx.execute(
                "INSERT INTO action_records
                 (session_id, action_type, target_id, connection_id, phase,
                  attempt_count, outcome, reason, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    session.session_id,
                    record.action_type.as_str(),
                    record.target_id,
                    record.connection_id,
                    record.phase.as_str(),
                    record.attempt_count,
                    record.outcome.as_str(),
                    record.reason,
                    record.timestamp,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn records(&self, session_id: &str) -> Result<Vec<ActionRecord>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT action_type, target_id, connection_id, phase, attempt_count, outcome,
                    reason, timestamp
             FROM action_records WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| -> rusqlite::Result<RawRecord> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })?;

        let mut records = Vec::new();
        for raw in rows {
            records.push(parse_record(raw?)?);
        }
        Ok(records)
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }
}
