//! 有界指数退避重试
//!
//! 瞬时错误等待 `base_delay * 2^(attempt-1)`（不超过 `max_delay`）后重试；永久错误立即放弃。
//! 策略本身无状态，结果由调用方持久化。

use std::future::Future;
use std::time::Duration;

use crate::core::ActionError;

/// 一次（可能多轮尝试的）执行结果
#[derive(Debug, Clone)]
pub struct Attempted<T> {
    pub attempts: u32,
    pub result: Result<T, ActionError>,
}

impl<T> Attempted<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// 不重试（测试 / 读取类调用）
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 第 `attempt` 次失败后的等待时长（attempt 从 1 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// 每次尝试最多耗时 `per_attempt` 时，`execute` 的最坏总耗时
    ///
    /// Retry-After 可把任一次等待抬到 `max_delay`，所以按每次等待都取上限计算。
    pub fn worst_case(&self, per_attempt: Duration) -> Duration {
        let waits = self.max_delay.saturating_mul(self.max_attempts - 1);
        per_attempt
            .saturating_mul(self.max_attempts)
            .saturating_add(waits)
    }

    /// 执行 `action`，闭包参数为当前尝试序号（从 1 开始）
    pub async fn execute<T, F, Fut>(&self, mut action: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ActionError>>,
    {
        let mut attempt = 1;
        loop {
            match action(attempt).await {
                Ok(value) => {
                    return Attempted {
                        attempts: attempt,
                        result: Ok(value),
                    }
                }
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let mut delay = self.delay_for(attempt);
                    if let Some(secs) = err.retry_after_secs() {
                        delay = delay.max(Duration::from_secs(secs)).min(self.max_delay);
                    }
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if !err.is_transient() {
                        tracing::warn!(attempt, error = %err, "Permanent failure, not retrying");
                    }
                    return Attempted {
                        attempts: attempt,
                        result: Err(err),
                    };
                }
            }
        }
    }
}

/// 给单次外部调用加上超时；超时视为瞬时错误
pub async fn with_timeout<T, Fut>(limit: Duration, fut: Fut) -> Result<T, ActionError>
where
    Fut: Future<Output = Result<T, ActionError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ActionError::Timeout),
    }
}
