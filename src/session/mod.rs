//! 会话状态：数据模型与持久化（内存 / SQLite）

pub mod model;
pub mod sqlite;
pub mod store;

pub use model::{
    ActionOutcome, ActionRecord, ActionType, EngagementProgress, Phase, PhaseProgress,
    PublishStatus, Session,
};
pub use sqlite::SqliteSessionStore;
pub use store::{create_session_store, MemorySessionStore, SessionStore};
