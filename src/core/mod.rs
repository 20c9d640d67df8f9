//! 核心编排层：错误分类、时钟与调度、限速与重试、恢复、会话编排、后台循环与优雅关闭

pub mod builder;
pub mod clock;
pub mod error;
pub mod orchestrator;
pub mod rate_limiter;
pub mod recovery;
pub mod retry;
pub mod runtime;
pub mod scheduler;
pub mod shutdown;

pub use builder::OrchestratorBuilder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ActionError, CoreError, StorageError};
pub use orchestrator::{SessionOrchestrator, SessionReport, SessionSettings, TickOutcome};
pub use rate_limiter::RateLimiter;
pub use recovery::{Reconciled, RecoveryAction, RecoveryEngine};
pub use retry::{with_timeout, Attempted, RetryPolicy};
pub use runtime::SessionRuntime;
pub use scheduler::{ScheduleWindow, Scheduler};
pub use shutdown::{
    ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownSignal, StoreCleanup,
};
