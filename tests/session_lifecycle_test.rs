//! 会话生命周期集成测试：时间旅行驱动编排器，覆盖阶段推进、发布至多一次、限速与预算、重启恢复

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence::core::recovery::UNKNOWN_PUBLISH_REASON;
use cadence::core::{
    ActionError, Clock, ManualClock, RetryPolicy, Scheduler, SessionOrchestrator, SessionSettings,
    TickOutcome,
};
use cadence::engagement::{fetch_candidates, EngagementPlanner};
use cadence::llm::{LlmContentGenerator, MockLlmClient};
use cadence::session::{
    ActionOutcome, ActionRecord, ActionType, EngagementProgress, MemorySessionStore, Phase,
    PublishStatus, Session, SessionStore, SqliteSessionStore,
};
use cadence::social::{Connection, MockOp, MockSocialClient, Post, SocialClient};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use tempfile::TempDir;

fn wed(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 21, h, m, s).unwrap()
}

fn session_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 21).unwrap()
}

/// n 个联系人，每人一条帖子；c0 最新
fn network(n: usize) -> MockSocialClient {
    (0..n).fold(MockSocialClient::new(), |client, i| {
        let id = format!("c{i}");
        let name = format!("Person {i}");
        let post = Post {
            id: format!("p{i}"),
            connection_id: id.clone(),
            author_name: name.clone(),
            text: format!("Lessons from project {i}"),
            published_at: wed(8, 0, 0) - chrono::Duration::hours(i as i64),
            num_likes: 10,
            num_comments: 2,
        };
        client.with_connection(
            Connection {
                id,
                name,
                headline: None,
            },
            vec![post],
        )
    })
}

fn scheduler() -> Scheduler<Utc> {
    Scheduler::new(
        Utc,
        vec![Weekday::Wed, Weekday::Sat],
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        chrono::Duration::minutes(30),
        NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
    )
}

fn orchestrator(
    store: Arc<dyn SessionStore>,
    social: Arc<dyn SocialClient>,
    settings: SessionSettings,
) -> SessionOrchestrator<Utc> {
    SessionOrchestrator::new(
        scheduler(),
        store,
        social,
        Arc::new(LlmContentGenerator::new(Arc::new(MockLlmClient))),
        EngagementPlanner::new(7),
        RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50)),
        settings,
    )
}

/// 依次在各时刻 tick，传递上一 tick 返回的会话
async fn drive(
    orch: &SessionOrchestrator<Utc>,
    clock: &ManualClock,
    times: impl IntoIterator<Item = DateTime<Utc>>,
) -> Vec<TickOutcome> {
    let mut current: Option<Session> = None;
    let mut outcomes = Vec::new();
    for t in times {
        clock.set(t);
        let outcome = orch.tick(current.take(), clock.now()).await.unwrap();
        current = outcome.open_session().cloned();
        outcomes.push(outcome);
    }
    outcomes
}

fn every(step_secs: i64, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut times = Vec::new();
    let mut t = from;
    while t <= to {
        times.push(t);
        t += chrono::Duration::seconds(step_secs);
    }
    times
}

fn stores(dir: &TempDir) -> Vec<(&'static str, Arc<dyn SessionStore>)> {
    vec![
        ("memory", Arc::new(MemorySessionStore::new()) as Arc<dyn SessionStore>),
        (
            "sqlite",
            Arc::new(SqliteSessionStore::open(dir.path().join("cadence.db")).unwrap())
                as Arc<dyn SessionStore>,
        ),
    ]
}

/// 发布调用计数；可让发布永远挂起，模拟进程在发布途中崩溃
struct TrackingSocial {
    inner: MockSocialClient,
    publish_calls: AtomicUsize,
    hang_publish: AtomicBool,
}

impl TrackingSocial {
    fn new(inner: MockSocialClient) -> Self {
        Self {
            inner,
            publish_calls: AtomicUsize::new(0),
            hang_publish: AtomicBool::new(false),
        }
    }

    fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocialClient for TrackingSocial {
    async fn fetch_top_connections(&self, n: usize) -> Result<Vec<Connection>, ActionError> {
        self.inner.fetch_top_connections(n).await
    }

    async fn fetch_recent_posts(
        &self,
        connection: &Connection,
        since: DateTime<Utc>,
    ) -> Result<Vec<Post>, ActionError> {
        self.inner.fetch_recent_posts(connection, since).await
    }

    async fn like(&self, post_id: &str) -> Result<(), ActionError> {
        self.inner.like(post_id).await
    }

    async fn comment(&self, post_id: &str, text: &str) -> Result<(), ActionError> {
        self.inner.comment(post_id, text).await
    }

    async fn publish(&self, text: &str) -> Result<String, ActionError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_publish.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.publish(text).await
    }
}

#[tokio::test]
async fn test_phase_sequence_across_window() {
    let dir = TempDir::new().unwrap();
    for (name, store) in stores(&dir) {
        let social = Arc::new(network(10));
        let orch = orchestrator(store, social.clone(), SessionSettings::default());
        let clock = ManualClock::new(wed(8, 0, 0));

        let outcomes = drive(
            &orch,
            &clock,
            [wed(9, 5, 0), wed(9, 35, 0), wed(9, 58, 0), wed(10, 5, 0)],
        )
        .await;
        let phases: Vec<Phase> = outcomes
            .iter()
            .map(|o| o.session.as_ref().unwrap().phase)
            .collect();
        assert_eq!(
            phases,
            vec![
                Phase::PreEngagement,
                Phase::PostEngagement,
                Phase::PostEngagement,
                Phase::Completed
            ],
            "store: {name}"
        );
        assert_eq!(
            outcomes[1].transitions,
            vec![
                (Phase::PreEngagement, Phase::Publishing),
                (Phase::Publishing, Phase::PostEngagement)
            ],
            "store: {name}"
        );
        assert_eq!(social.publishes().len(), 1, "store: {name}");
        let report = outcomes[3].report.as_ref().unwrap();
        assert!(report.succeeded(), "store: {name}");
    }
}

#[tokio::test]
async fn test_permanent_publish_failure_still_reaches_post_engagement() {
    let social = Arc::new(network(5));
    social.fail_next(MockOp::Publish, ActionError::Forbidden("posting not allowed".into()));
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let orch = orchestrator(store.clone(), social.clone(), SessionSettings::default());
    let clock = ManualClock::new(wed(9, 0, 0));

    let outcomes = drive(&orch, &clock, [wed(9, 5, 0), wed(9, 30, 0), wed(9, 31, 0)]).await;

    let at_publish = &outcomes[1];
    let record = at_publish.dispatched.as_ref().unwrap();
    assert_eq!(record.action_type, ActionType::Publish);
    assert_eq!(record.outcome, ActionOutcome::Failed);
    assert_eq!(record.attempt_count, 1, "permanent errors are not retried");

    let session = outcomes[2].session.as_ref().unwrap();
    assert_eq!(session.publish_status, PublishStatus::Failed);
    assert_eq!(session.phase, Phase::PostEngagement);
    assert!(social.publishes().is_empty());
    // 发布失败不阻塞发布后互动
    assert_eq!(
        outcomes[2].dispatched.as_ref().map(|r| r.phase),
        Some(Phase::PostEngagement)
    );
}

#[tokio::test]
async fn test_transient_publish_failure_is_retried() {
    let social = Arc::new(network(0));
    social.fail_next(MockOp::Publish, ActionError::RateLimited { retry_after_secs: None });
    let orch = orchestrator(
        Arc::new(MemorySessionStore::new()),
        social.clone(),
        SessionSettings::default(),
    );
    let outcome = orch.tick(None, wed(9, 30, 0)).await.unwrap();
    let record = outcome.dispatched.unwrap();
    assert_eq!(record.outcome, ActionOutcome::Success);
    assert_eq!(record.attempt_count, 2);
    assert_eq!(social.publishes().len(), 1);
}

#[tokio::test]
async fn test_restart_after_three_likes_excludes_those_connections() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cadence.db");
    let clock = ManualClock::new(wed(9, 0, 0));

    {
        let store = Arc::new(SqliteSessionStore::open(&path).unwrap());
        let orch = orchestrator(store, Arc::new(network(6)), SessionSettings::default());
        let outcomes = drive(&orch, &clock, [wed(9, 5, 0), wed(9, 5, 30), wed(9, 6, 0)]).await;
        let successful_like = |r: &ActionRecord| {
            r.action_type == ActionType::Like && r.outcome == ActionOutcome::Success
        };
        assert!(outcomes
            .iter()
            .all(|o| o.dispatched.as_ref().is_some_and(successful_like)));
    }

    // 进程重启：新存储句柄、新客户端
    let store = Arc::new(SqliteSessionStore::open(&path).unwrap());
    let session = store.load(session_date()).await.unwrap().unwrap();
    let records = store.records(&session.session_id).await.unwrap();
    assert_eq!(session.engagement_progress.pre.likes, 3);

    let liked = ["c0", "c1", "c2"];
    let social = network(6);
    let candidates = fetch_candidates(&social, 50, wed(9, 7, 0) - chrono::Duration::days(7))
        .await
        .unwrap();
    let plan = EngagementPlanner::new(7).plan(&candidates, wed(9, 7, 0), 25, 0, &records);
    assert_eq!(plan.len(), 3);
    assert!(plan
        .actions
        .iter()
        .all(|a| !liked.contains(&a.connection_id.as_str())));

    let social = Arc::new(social);
    let orch = orchestrator(store, social.clone(), SessionSettings::default());
    let outcome = orch.tick(None, wed(9, 7, 0)).await.unwrap();
    assert_eq!(outcome.session.as_ref().map(|s| s.phase), Some(Phase::PreEngagement));
    let record = outcome.dispatched.unwrap();
    assert_eq!(record.action_type, ActionType::Like);
    assert_eq!(record.connection_id.as_deref(), Some("c3"));
    assert_eq!(social.likes(), vec!["p3".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_publish_at_most_once_when_crashing_mid_publish() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cadence.db");
    let social = Arc::new(TrackingSocial::new(network(4)));
    social.hang_publish.store(true, Ordering::SeqCst);

    {
        let store = Arc::new(SqliteSessionStore::open(&path).unwrap());
        let orch = orchestrator(store, social.clone(), SessionSettings::default());
        // 发布挂起，tick 被外层超时放弃，等同于进程在发布途中退出
        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), orch.tick(None, wed(9, 31, 0))).await;
        assert!(abandoned.is_err());
    }
    assert_eq!(social.publish_calls(), 1);
    social.hang_publish.store(false, Ordering::SeqCst);

    let store = Arc::new(SqliteSessionStore::open(&path).unwrap());
    let stored = store.load(session_date()).await.unwrap().unwrap();
    assert_eq!(stored.phase, Phase::Publishing);
    assert!(stored.publish_attempted_at.is_some());

    let orch = orchestrator(store.clone(), social.clone(), SessionSettings::default());
    let clock = ManualClock::new(wed(9, 32, 0));
    let outcomes = drive(&orch, &clock, every(60, wed(9, 32, 0), wed(10, 5, 0))).await;

    let resumed = outcomes[0].session.as_ref().unwrap();
    assert_eq!(resumed.publish_status, PublishStatus::Failed);
    assert_eq!(resumed.phase, Phase::PostEngagement);
    assert_eq!(
        outcomes.last().and_then(|o| o.session.as_ref()).map(|s| s.phase),
        Some(Phase::Completed)
    );
    assert_eq!(social.publish_calls(), 1);

    let records = store.records(&stored.session_id).await.unwrap();
    let publishes: Vec<&ActionRecord> = records
        .iter()
        .filter(|r| r.action_type == ActionType::Publish)
        .collect();
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0].outcome, ActionOutcome::Skipped);
    assert_eq!(publishes[0].reason.as_deref(), Some(UNKNOWN_PUBLISH_REASON));
}

#[tokio::test]
async fn test_completed_publish_never_repeats_across_restarts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cadence.db");
    let social = Arc::new(TrackingSocial::new(network(8)));

    // 每个 tick 都模拟一次重启：新的存储句柄与编排器，不传入上一 tick 的会话
    for t in every(120, wed(9, 0, 0), wed(10, 10, 0)) {
        let store = Arc::new(SqliteSessionStore::open(&path).unwrap());
        let orch = orchestrator(store, social.clone(), SessionSettings::default());
        orch.tick(None, t).await.unwrap();
    }

    assert_eq!(social.publish_calls(), 1);
    let store = SqliteSessionStore::open(&path).unwrap();
    let session = store.load(session_date()).await.unwrap().unwrap();
    assert_eq!(session.publish_status, PublishStatus::Done);
    assert_eq!(session.phase, Phase::Completed);
}

#[tokio::test]
async fn test_rate_limit_one_dispatch_per_tick_with_min_spacing() {
    let dir = TempDir::new().unwrap();
    for (name, store) in stores(&dir) {
        let orch = orchestrator(store.clone(), Arc::new(network(30)), SessionSettings::default());
        let clock = ManualClock::new(wed(9, 0, 0));
        let outcomes = drive(&orch, &clock, every(10, wed(9, 0, 0), wed(10, 10, 0))).await;

        let dispatching_ticks = outcomes.iter().filter(|o| o.dispatched.is_some()).count();
        let records = store.records(&Session::id_for(session_date())).await.unwrap();
        assert_eq!(records.len(), dispatching_ticks, "store: {name}");

        let times: Vec<DateTime<Utc>> = records
            .iter()
            .filter(|r| r.is_dispatch())
            .map(|r| r.timestamp)
            .collect();
        assert!(times.len() > 10, "store: {name}");
        for pair in times.windows(2) {
            assert!(
                pair[1] - pair[0] >= chrono::Duration::seconds(30),
                "store: {name}, dispatches at {} and {}",
                pair[0],
                pair[1]
            );
        }
    }
}

#[tokio::test]
async fn test_budgets_hold_across_both_phases() {
    let dir = TempDir::new().unwrap();
    for (name, store) in stores(&dir) {
        let social = Arc::new(network(10));
        let settings = SessionSettings {
            like_budget: 4,
            comment_budget: 2,
            ..SessionSettings::default()
        };
        let orch = orchestrator(store.clone(), social.clone(), settings);
        let clock = ManualClock::new(wed(9, 0, 0));
        let outcomes = drive(&orch, &clock, every(30, wed(9, 0, 0), wed(10, 5, 0))).await;

        assert_eq!(social.likes().len(), 4, "store: {name}");
        assert_eq!(social.comments().len(), 2, "store: {name}");

        let session = store.load(session_date()).await.unwrap().unwrap();
        let progress = session.engagement_progress;
        assert_eq!(progress.pre.likes, 2, "store: {name}");
        assert_eq!(progress.pre.comments, 1, "store: {name}");
        assert_eq!(progress.total_likes(), 4, "store: {name}");
        assert_eq!(progress.total_comments(), 2, "store: {name}");

        // 预算用尽即提前完成
        let completed_at = outcomes
            .iter()
            .find(|o| o.report.is_some())
            .and_then(|o| o.session.as_ref())
            .and_then(|s| s.completed_at)
            .unwrap();
        assert!(completed_at < wed(10, 0, 0), "store: {name}");
    }
}

#[tokio::test]
async fn test_sqlite_roundtrip_reproduces_phase_and_progress() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cadence.db");
    let original = {
        let store = Arc::new(SqliteSessionStore::open(&path).unwrap());
        let orch = orchestrator(store, Arc::new(network(5)), SessionSettings::default());
        let clock = ManualClock::new(wed(9, 0, 0));
        let outcomes = drive(&orch, &clock, every(30, wed(9, 0, 0), wed(9, 40, 0))).await;
        outcomes
            .last()
            .and_then(|o| o.session.clone())
            .unwrap()
    };

    let store = SqliteSessionStore::open(&path).unwrap();
    let reloaded = store.load(session_date()).await.unwrap().unwrap();
    let records = store.records(&reloaded.session_id).await.unwrap();
    assert_eq!(reloaded.phase, original.phase);
    assert_eq!(reloaded.engagement_progress, original.engagement_progress);
    assert_eq!(reloaded.publish_status, original.publish_status);
    assert_eq!(EngagementProgress::from_records(&records), reloaded.engagement_progress);
}

#[tokio::test]
async fn test_comment_budget_two_of_five_most_recent() {
    let social = network(5);
    let now = wed(9, 5, 0);
    let mut candidates = fetch_candidates(&social, 50, now - chrono::Duration::days(7))
        .await
        .unwrap();
    // 打乱排名，计划仍按发布时间
    candidates.reverse();
    let plan = EngagementPlanner::new(7).plan(&candidates, now, 0, 2, &[]);
    let posts: Vec<&str> = plan.actions.iter().map(|a| a.post.id.as_str()).collect();
    assert_eq!(posts, vec!["p0", "p1"]);
    assert!(plan.actions.iter().all(|a| a.action_type == ActionType::Comment));
}

#[tokio::test]
async fn test_no_second_session_for_same_date() {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let orch = orchestrator(store.clone(), Arc::new(network(0)), SessionSettings::default());
    let clock = ManualClock::new(wed(9, 0, 0));
    drive(&orch, &clock, [wed(9, 5, 0), wed(9, 35, 0)]).await;

    // 会话已完成；同一窗口内再次 tick 不会重建
    let outcome = orch.tick(None, wed(9, 50, 0)).await.unwrap();
    assert!(outcome.is_idle());
    let next = outcome.next_due.unwrap();
    assert_eq!(next.scheduled_date, NaiveDate::from_ymd_opt(2026, 10, 24).unwrap());
}
