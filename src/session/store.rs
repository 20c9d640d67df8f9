//! 会话存储抽象层
//!
//! 定义统一的会话持久化接口，支持内存和 SQLite 两种实现。
//! 单写者假设：同一 scheduled_date 只能创建一次会话（`create` 返回是否真正创建）。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use super::model::{ActionRecord, Session};
use super::sqlite::SqliteSessionStore;
use crate::core::StorageError;

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 按日期点查会话
    async fn load(&self, date: NaiveDate) -> Result<Option<Session>, StorageError>;

    /// 最近一个会话（按日期）
    async fn latest(&self) -> Result<Option<Session>, StorageError>;

    /// 创建会话；该日期已有会话时不覆盖并返回 false
    async fn create(&self, session: &Session) -> Result<bool, StorageError>;

    /// 原子地保存会话并追加一条记录
    async fn commit(
        &self,
        session: &Session,
        record: Option<&ActionRecord>,
    ) -> Result<(), StorageError>;

    /// 会话的全部记录（按追加顺序）
    async fn records(&self, session_id: &str) -> Result<Vec<ActionRecord>, StorageError>;

    /// 关闭前落盘
    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<NaiveDate, Session>,
    records: HashMap<String, Vec<ActionRecord>>,
}

/// 内存会话存储（测试与 dry-run 用；进程退出即丢失）
#[derive(Default)]
pub struct MemorySessionStore {
    inner: RwLock<MemoryState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, date: NaiveDate) -> Result<Option<Session>, StorageError> {
        Ok(self.inner.read().await.sessions.get(&date).cloned())
    }

    async fn latest(&self) -> Result<Option<Session>, StorageError> {
        let state = self.inner.read().await;
        Ok(state
            .sessions
            .values()
            .max_by_key(|s| s.scheduled_date)
            .cloned())
    }

    async fn create(&self, session: &Session) -> Result<bool, StorageError> {
        let mut state = self.inner.write().await;
        if state.sessions.contains_key(&session.scheduled_date) {
            return Ok(false);
        }
        state.sessions.insert(session.scheduled_date, session.clone());
        state.records.entry(session.session_id.clone()).or_default();
        Ok(true)
    }

    async fn commit(
        &self,
        session: &Session,
        record: Option<&ActionRecord>,
    ) -> Result<(), StorageError> {
        let mut state = self.inner.write().await;
        if !state.sessions.contains_key(&session.scheduled_date) {
            return Err(StorageError::Corrupt(format!(
                "session {} was never created",
                session.session_id
            )));
        }
        state.sessions.insert(session.scheduled_date, session.clone());
        if let Some(record) = record {
            state
                .records
                .entry(session.session_id.clone())
                .or_default()
                .push(record.clone());
        }
        Ok(())
    }

    async fn records(&self, session_id: &str) -> Result<Vec<ActionRecord>, StorageError> {
        Ok(self
            .inner
            .read()
            .await
            .records
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// 创建会话存储
///
/// `in_memory` 时使用内存存储；否则打开（必要时创建）SQLite 文件。
/// 打开失败直接返回错误，不静默回退。
pub fn create_session_store(
    db_path: &Path,
    in_memory: bool,
) -> Result<Arc<dyn SessionStore>, StorageError> {
    if in_memory {
        tracing::info!("Using in-memory session store");
        return Ok(Arc::new(MemorySessionStore::new()));
    }
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = SqliteSessionStore::open(db_path)?;
    tracing::info!("Using persistent session store: {:?}", db_path);
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::{ActionOutcome, ActionType, Phase};
    use chrono::{TimeZone, Utc};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 21).unwrap()
    }

    #[tokio::test]
    async fn test_create_is_idempotent_per_date() {
        let store = MemorySessionStore::new();
        let session = Session::new(date());
        assert!(store.create(&session).await.unwrap());
        assert!(!store.create(&session).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_appends_records() {
        let store = MemorySessionStore::new();
        let mut session = Session::new(date());
        store.create(&session).await.unwrap();

        session.phase = Phase::PreEngagement;
        let record = ActionRecord {
            action_type: ActionType::Like,
            target_id: "post-1".into(),
            connection_id: Some("conn-1".into()),
            phase: Phase::PreEngagement,
            attempt_count: 1,
            outcome: ActionOutcome::Success,
            reason: None,
            timestamp: Utc.with_ymd_and_hms(2026, 10, 21, 9, 5, 0).unwrap(),
        };
        store.commit(&session, Some(&record)).await.unwrap();
        store.commit(&session, None).await.unwrap();

        let loaded = store.load(date()).await.unwrap().unwrap();
        assert_eq!(loaded.phase, Phase::PreEngagement);
        assert_eq!(store.records(&session.session_id).await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_commit_without_create_fails() {
        let store = MemorySessionStore::new();
        let session = Session::new(date());
        assert!(store.commit(&session, None).await.is_err());
    }
}
