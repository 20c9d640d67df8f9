//! 动作限速：最小调用间隔 Δ + 每会话调用上限 C
//!
//! `allow` 无副作用；只有真正发出调用之后才 `record_call`。
//! 重启后由已持久化的 ActionRecord 重放恢复。

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    ceiling: u32,
    calls: u32,
    last_call: Option<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, ceiling: u32) -> Self {
        Self {
            min_interval,
            ceiling,
            calls: 0,
            last_call: None,
        }
    }

    /// 间隔与上限都满足时才放行
    pub fn allow(&self, now: DateTime<Utc>) -> bool {
        if self.calls >= self.ceiling {
            return false;
        }
        match self.last_call {
            Some(last) => now - last >= self.min_interval,
            None => true,
        }
    }

    pub fn record_call(&mut self, now: DateTime<Utc>) {
        self.calls = self.calls.saturating_add(1);
        self.last_call = Some(match self.last_call {
            Some(last) if last > now => last,
            _ => now,
        });
    }

    /// 剩余可用调用次数
    pub fn remaining(&self) -> u32 {
        self.ceiling.saturating_sub(self.calls)
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }

    /// 下一次允许调用的最早时刻；已达上限时为 None
    pub fn next_allowed_at(&self) -> Option<DateTime<Utc>> {
        if self.calls >= self.ceiling {
            return None;
        }
        Some(match self.last_call {
            Some(last) => last + self.min_interval,
            None => DateTime::<Utc>::MIN_UTC,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 21, 9, min, sec).unwrap()
    }

    #[test]
    fn test_min_interval_enforced() {
        let mut limiter = RateLimiter::new(Duration::seconds(60), 10);
        assert!(limiter.allow(t(0, 0)));
        limiter.record_call(t(0, 0));
        assert!(!limiter.allow(t(0, 30)));
        assert!(limiter.allow(t(1, 0)));
    }

    #[test]
    fn test_ceiling_enforced() {
        let mut limiter = RateLimiter::new(Duration::zero(), 2);
        limiter.record_call(t(0, 0));
        limiter.record_call(t(1, 0));
        assert!(!limiter.allow(t(30, 0)));
        assert_eq!(limiter.remaining(), 0);
        assert!(limiter.next_allowed_at().is_none());
    }

    #[test]
    fn test_allow_is_side_effect_free() {
        let limiter = RateLimiter::new(Duration::seconds(60), 1);
        for _ in 0..5 {
            assert!(limiter.allow(t(0, 0)));
        }
        assert_eq!(limiter.calls(), 0);
    }

    #[test]
    fn test_replay_out_of_order_keeps_latest() {
        let mut limiter = RateLimiter::new(Duration::seconds(60), 10);
        limiter.record_call(t(5, 0));
        limiter.record_call(t(1, 0));
        assert_eq!(limiter.next_allowed_at(), Some(t(6, 0)));
    }
}
