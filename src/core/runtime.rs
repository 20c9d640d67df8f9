//! 后台 tick 循环
//!
//! 固定间隔调用 `SessionOrchestrator::tick`；每个 tick 受 `tick_timeout` 约束。
//! 关闭信号只在两次 tick 之间生效：正在执行的 tick 要么完成，要么被自身超时放弃。
//! tick 失败（存储错误 / 超时）时丢弃内存中的会话，下一 tick 从存储重新加载。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::{Clock, SessionOrchestrator};
use crate::session::Session;

pub struct SessionRuntime<Tz: TimeZone> {
    orchestrator: Arc<SessionOrchestrator<Tz>>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    tick_timeout: Duration,
}

impl<Tz: TimeZone> SessionRuntime<Tz> {
    pub fn new(
        orchestrator: Arc<SessionOrchestrator<Tz>>,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
        tick_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            clock,
            tick_interval,
            tick_timeout,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            tick_interval_secs = self.tick_interval.as_secs(),
            tick_timeout_secs = self.tick_timeout.as_secs(),
            "Session runtime started"
        );

        let mut timer = tokio::time::interval(self.tick_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut current: Option<Session> = None;
        let mut announced: Option<DateTime<Utc>> = None;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, leaving tick loop");
                    break;
                }
                _ = timer.tick() => {
                    current = self.run_tick(current.take(), &mut announced).await;
                }
            }
        }
    }

    async fn run_tick(
        &self,
        current: Option<Session>,
        announced: &mut Option<DateTime<Utc>>,
    ) -> Option<Session> {
        let now = self.clock.now();
        match tokio::time::timeout(self.tick_timeout, self.orchestrator.tick(current, now)).await {
            Ok(Ok(outcome)) => {
                if let Some(window) = outcome.next_due.filter(|_| outcome.is_idle()) {
                    if *announced != Some(window.start) {
                        tracing::info!(
                            scheduled_date = %window.scheduled_date,
                            window_start = %window.start,
                            "Idle until next window"
                        );
                        *announced = Some(window.start);
                    }
                }
                outcome.open_session().cloned()
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Tick failed, session will be reloaded from store");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.tick_timeout.as_secs(),
                    "Tick timed out, session will be reloaded from store"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ManualClock, RetryPolicy, Scheduler, SessionSettings};
    use crate::engagement::EngagementPlanner;
    use crate::llm::{LlmContentGenerator, MockLlmClient};
    use crate::session::{MemorySessionStore, Phase, SessionStore};
    use crate::social::{Connection, MockSocialClient, Post};
    use chrono::{NaiveDate, NaiveTime, Weekday};

    #[tokio::test(start_paused = true)]
    async fn test_runtime_paces_and_stops_on_shutdown() {
        let now = Utc.with_ymd_and_hms(2026, 10, 21, 9, 5, 0).unwrap();
        let social = Arc::new(MockSocialClient::new().with_connection(
            Connection {
                id: "c1".into(),
                name: "Grace".into(),
                headline: None,
            },
            vec![Post {
                id: "p1".into(),
                connection_id: "c1".into(),
                author_name: "Grace".into(),
                text: "Compilers are fun".into(),
                published_at: now - chrono::Duration::hours(3),
                num_likes: 2,
                num_comments: 1,
            }],
        ));
        let store = Arc::new(MemorySessionStore::new());
        let orchestrator = Arc::new(SessionOrchestrator::new(
            Scheduler::new(
                Utc,
                vec![Weekday::Wed],
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                chrono::Duration::minutes(30),
                NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            ),
            store.clone(),
            social.clone(),
            Arc::new(LlmContentGenerator::new(Arc::new(MockLlmClient))),
            EngagementPlanner::new(7),
            RetryPolicy::no_retry(),
            SessionSettings::default(),
        ));
        // 时钟不动：限速间隔永远不满足，只应发出一次动作
        let runtime = SessionRuntime::new(
            orchestrator,
            Arc::new(ManualClock::new(now)),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );

        let token = CancellationToken::new();
        let stopper = {
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                token.cancel();
            }
        };
        tokio::join!(runtime.run(token.clone()), stopper);

        assert_eq!(social.likes(), vec!["p1".to_string()]);
        let session = store
            .load(NaiveDate::from_ymd_opt(2026, 10, 21).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.phase, Phase::PreEngagement);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slowest_publish_tick_commits_within_configured_timeout() {
        use crate::config::AppConfig;
        use crate::core::{ActionError, OrchestratorBuilder};
        use crate::llm::ContentGenerator;
        use crate::session::{ActionOutcome, ActionType, PublishStatus};

        // 每次生成都挂起，直到单次生成超时；全部重试耗尽后才有结果
        struct Hanging;

        #[async_trait::async_trait]
        impl ContentGenerator for Hanging {
            async fn generate_post(&self, _topic: &str) -> Result<String, ActionError> {
                std::future::pending().await
            }
            async fn generate_comment(&self, _post: &Post) -> Result<String, ActionError> {
                std::future::pending().await
            }
        }

        let mut config = AppConfig::default();
        config.social.dry_run = true;
        config.llm.provider = "mock".into();
        let store = Arc::new(MemorySessionStore::new());
        let social = Arc::new(MockSocialClient::new());
        let builder = OrchestratorBuilder::new(config)
            .with_store(store.clone())
            .with_social(social.clone())
            .with_content(Arc::new(Hanging));
        let orchestrator = Arc::new(builder.build(Utc).unwrap());
        let runtime = SessionRuntime::new(
            orchestrator,
            Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2026, 10, 21, 9, 31, 0).unwrap(),
            )),
            builder.config().tick_interval(),
            builder.config().tick_timeout(),
        );

        let token = CancellationToken::new();
        let stopper = {
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1300)).await;
                token.cancel();
            }
        };
        tokio::join!(runtime.run(token.clone()), stopper);

        let session = store
            .load(NaiveDate::from_ymd_opt(2026, 10, 21).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.publish_status, PublishStatus::Failed);
        assert_eq!(session.phase, Phase::Completed);
        assert!(social.publishes().is_empty());

        let records = store.records(&session.session_id).await.unwrap();
        let publish = records
            .iter()
            .find(|r| r.action_type == ActionType::Publish)
            .unwrap();
        assert_eq!(publish.outcome, ActionOutcome::Skipped);
        assert_eq!(publish.attempt_count, 3);
        assert!(publish
            .reason
            .as_deref()
            .is_some_and(|r| r.starts_with("content generation failed")));
    }
}
