//! 优雅关闭
//!
//! Ctrl+C / SIGTERM 取消同一个 CancellationToken；tick 循环只在两次 tick 之间观察它，
//! 所以正在执行的 tick 会完成（或被自身超时放弃），不会留下写了一半的会话。
//! 循环退出后由 ShutdownCoordinator 依次执行清理（会话存储落盘），每项有超时上限。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::session::SessionStore;

/// 触发关闭的信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM（systemd / 容器停止）
    Terminate,
}

/// 持有关闭 token，并记住最先到达的信号
#[derive(Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    signal: Mutex<Option<ShutdownSignal>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭；重复触发只保留第一个信号
    pub fn trigger(&self, signal: ShutdownSignal) {
        if let Ok(mut slot) = self.signal.lock() {
            slot.get_or_insert(signal);
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn signal(&self) -> Option<ShutdownSignal> {
        self.signal.lock().ok().and_then(|slot| *slot)
    }

    /// 后台监听 Ctrl+C 与 SIGTERM，任一到达即触发关闭
    pub fn listen_for_signals(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let signal = tokio::select! {
                _ = interrupt() => ShutdownSignal::Interrupt,
                _ = terminate() => ShutdownSignal::Terminate,
                _ = manager.token.cancelled() => return,
            };
            tracing::info!(?signal, "Shutdown signal received, finishing current tick");
            manager.trigger(signal);
        });
    }
}

async fn interrupt() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}

/// 关闭时执行的清理任务
#[async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 日志中显示的名称
    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理任务
pub struct ShutdownCoordinator {
    tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            timeout,
        }
    }

    pub fn register(&mut self, task: impl ShutdownCleanup + 'static) {
        self.tasks.push(Arc::new(task));
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// 执行全部清理，返回失败（含超时）的任务数；单项失败不影响后续任务
    pub async fn run(&self) -> usize {
        let mut failed = 0;
        for task in &self.tasks {
            let task_name = task.name();
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!(task = task_name, "Cleanup finished"),
                Ok(Err(e)) => {
                    failed += 1;
                    tracing::warn!(task = task_name, error = %e, "Cleanup failed");
                }
                Err(_) => {
                    failed += 1;
                    tracing::warn!(
                        task = task_name,
                        timeout_secs = self.timeout.as_secs(),
                        "Cleanup timed out"
                    );
                }
            }
        }
        failed
    }
}

/// 会话存储落盘（SQLite 为 WAL checkpoint）
pub struct StoreCleanup {
    store: Arc<dyn SessionStore>,
}

impl StoreCleanup {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ShutdownCleanup for StoreCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.store.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "session-store"
    }
}
