//! 错误分类：外部调用错误（瞬时 / 永久）、存储错误、核心错误
//!
//! 与 RetryPolicy 配合：瞬时错误按退避重试，永久错误立即放弃；
//! 存储错误使当前 tick 失败，由外层循环下一 tick 重试。

use thiserror::Error;

/// 外部调用（社交网络 API / 内容生成）失败的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Call timed out")]
    Timeout,

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    /// 内容生成失败一律视为瞬时错误
    #[error("Content generation failed: {0}")]
    Generation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Rejected {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl ActionError {
    /// 是否值得重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ActionError::RateLimited { .. }
                | ActionError::Timeout
                | ActionError::Server { .. }
                | ActionError::Network(_)
                | ActionError::Generation(_)
        )
    }

    /// 服务端建议的等待时间
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ActionError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }

    /// HTTP 状态码到错误分类的映射
    ///
    /// - 408 / 429 / 5xx：瞬时
    /// - 401 / 403 / 400 / 404 / 409 / 410 / 422 及其它非 2xx：永久
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        retry_after_secs: Option<u64>,
    ) -> Self {
        let message = message.into();
        match status {
            408 => ActionError::Timeout,
            429 => ActionError::RateLimited { retry_after_secs },
            500..=599 => ActionError::Server { status, message },
            401 => ActionError::Unauthorized(message),
            403 => ActionError::Forbidden(message),
            400 | 404 | 409 | 410 | 422 => {
                ActionError::InvalidTarget(format!("{status}: {message}"))
            }
            _ => ActionError::Rejected { status, message },
        }
    }
}

/// 会话存储失败
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 核心层错误：配置错误启动即失败；存储错误只让当前 tick 失败
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Config error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
