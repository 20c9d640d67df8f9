//! 会话编排器：由时钟 tick 驱动的状态机
//!
//! 每次 `tick(current, now)`：
//! 1. 确定会话：沿用传入的未结束会话；否则从存储恢复最近的未结束会话（经 RecoveryEngine 对齐）；
//!    否则若 `now` 落在窗口内且当天没有会话则创建
//! 2. 以已持久化的记录重放限速器
//! 3. 按时间推进阶段（窗口结束、主帖时刻）
//! 4. 至多执行一个外部动作（点赞 / 评论 / 发布），经 RetryPolicy 与单次调用超时
//! 5. 会话与新记录在一个事务中提交；进入终态时输出 SessionReport
//!
//! 会话值显式传入、返回，编排器本身不持有「当前会话」。

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::core::retry::with_timeout;
use crate::core::{
    CoreError, RateLimiter, RecoveryEngine, RetryPolicy, ScheduleWindow, Scheduler,
};
use crate::engagement::{fetch_candidates, Candidate, EngagementPlanner, PlannedAction};
use crate::llm::{select_topic, ContentGenerator};
use crate::session::{
    ActionOutcome, ActionRecord, ActionType, Phase, PublishStatus, Session, SessionStore,
};
use crate::social::SocialClient;

/// 编排参数（来自配置）
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub top_connections: usize,
    pub like_budget: u32,
    pub comment_budget: u32,
    /// 发布前阶段可用的预算比例（0..=100），未用完的部分留给发布后阶段
    pub pre_engagement_share_pct: u32,
    pub min_interval: Duration,
    pub max_calls_per_session: u32,
    /// 单次社交网络调用的超时
    pub call_timeout: std::time::Duration,
    /// 单次内容生成的超时
    pub generation_timeout: std::time::Duration,
    pub stall_timeout: Duration,
    pub topics: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            top_connections: 50,
            like_budget: 50,
            comment_budget: 25,
            pre_engagement_share_pct: 50,
            min_interval: Duration::seconds(30),
            max_calls_per_session: 100,
            call_timeout: std::time::Duration::from_secs(30),
            generation_timeout: std::time::Duration::from_secs(180),
            stall_timeout: Duration::minutes(15),
            topics: Vec::new(),
        }
    }
}

impl SessionSettings {
    /// 一轮候选拉取的上限：联系人列表加每个联系人一次帖子拉取
    pub fn fetch_budget(&self) -> std::time::Duration {
        let calls = u32::try_from(self.top_connections)
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        self.call_timeout.saturating_mul(calls)
    }

    /// 单个 tick 的最坏耗时：一轮候选拉取，再加最慢的一次动作（评论或发布）
    ///
    /// tick 超时必须不小于它，否则动作完成后、落盘前就会被取消。
    pub fn worst_case_tick(&self, retry: &RetryPolicy) -> std::time::Duration {
        let comment = retry.worst_case(self.generation_timeout.saturating_add(self.call_timeout));
        let publish = retry
            .worst_case(self.generation_timeout)
            .saturating_add(retry.worst_case(self.call_timeout));
        self.fetch_budget().saturating_add(comment.max(publish))
    }
}

/// 会话结束时的汇总；聚合失败只报告，不抛出
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub final_phase: Phase,
    pub publish_status: PublishStatus,
    pub likes: u32,
    pub comments: u32,
    pub failures: usize,
    pub skipped: usize,
    pub duration_secs: Option<i64>,
}

impl SessionReport {
    pub fn new(session: &Session, records: &[ActionRecord]) -> Self {
        Self {
            session_id: session.session_id.clone(),
            final_phase: session.phase,
            publish_status: session.publish_status,
            likes: session.engagement_progress.total_likes(),
            comments: session.engagement_progress.total_comments(),
            failures: records
                .iter()
                .filter(|r| r.outcome == ActionOutcome::Failed)
                .count(),
            skipped: records
                .iter()
                .filter(|r| r.outcome == ActionOutcome::Skipped)
                .count(),
            duration_secs: session
                .started_at
                .zip(session.completed_at)
                .map(|(start, end)| (end - start).num_seconds()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.final_phase == Phase::Completed && self.publish_status == PublishStatus::Done
    }

    pub fn log(&self) {
        if self.succeeded() {
            tracing::info!(
                session_id = %self.session_id,
                likes = self.likes,
                comments = self.comments,
                failures = self.failures,
                duration_secs = ?self.duration_secs,
                "Session completed"
            );
        } else {
            tracing::warn!(
                session_id = %self.session_id,
                final_phase = %self.final_phase,
                publish_status = self.publish_status.as_str(),
                likes = self.likes,
                comments = self.comments,
                failures = self.failures,
                skipped = self.skipped,
                "Session finished with failures"
            );
        }
    }
}

/// 一次 tick 的结果
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    /// 本次处理的会话（空闲时为 None）
    pub session: Option<Session>,
    /// 本次发出的动作
    pub dispatched: Option<ActionRecord>,
    pub transitions: Vec<(Phase, Phase)>,
    /// 空闲时下一个到期窗口
    pub next_due: Option<ScheduleWindow>,
    pub report: Option<SessionReport>,
}

impl TickOutcome {
    fn idle(next_due: Option<ScheduleWindow>) -> Self {
        Self {
            next_due,
            ..Self::default()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.session.is_none()
    }

    /// 会话仍在进行（下一 tick 应继续传入）
    pub fn open_session(&self) -> Option<&Session> {
        self.session.as_ref().filter(|s| !s.is_terminal())
    }
}

enum Engagement {
    Dispatched(ActionRecord),
    /// 本阶段无事可做（计划为空 / 预算或限速上限用尽）
    Exhausted,
    /// 等待后续 tick（限速间隔未到 / 候选拉取失败）
    Waiting,
}

struct CandidateCache {
    session_id: String,
    phase: Phase,
    candidates: Vec<Candidate>,
}

pub struct SessionOrchestrator<Tz: TimeZone> {
    scheduler: Scheduler<Tz>,
    store: Arc<dyn SessionStore>,
    social: Arc<dyn SocialClient>,
    content: Arc<dyn ContentGenerator>,
    planner: EngagementPlanner,
    retry: RetryPolicy,
    recovery: RecoveryEngine,
    settings: SessionSettings,
    candidates: Mutex<Option<CandidateCache>>,
}

impl<Tz: TimeZone> SessionOrchestrator<Tz> {
    pub fn new(
        scheduler: Scheduler<Tz>,
        store: Arc<dyn SessionStore>,
        social: Arc<dyn SocialClient>,
        content: Arc<dyn ContentGenerator>,
        planner: EngagementPlanner,
        retry: RetryPolicy,
        settings: SessionSettings,
    ) -> Self {
        Self {
            scheduler,
            store,
            social,
            content,
            planner,
            retry,
            recovery: RecoveryEngine::new(),
            settings,
            candidates: Mutex::new(None),
        }
    }

    pub fn scheduler(&self) -> &Scheduler<Tz> {
        &self.scheduler
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.store)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// 下一个尚未创建会话的窗口
    pub async fn next_due(&self, now: DateTime<Utc>) -> Result<Option<ScheduleWindow>, CoreError> {
        let latest = self.store.latest().await?.map(|s| s.scheduled_date);
        Ok(self
            .scheduler
            .next_due(now, |date| latest.is_some_and(|l| date <= l)))
    }

    pub async fn tick(
        &self,
        current: Option<Session>,
        now: DateTime<Utc>,
    ) -> Result<TickOutcome, CoreError> {
        let Some(mut session) = self.resolve_session(current, now).await? else {
            return Ok(TickOutcome::idle(self.next_due(now).await?));
        };
        let before = session.clone();

        let records = self.store.records(&session.session_id).await?;
        let window = self.scheduler.window_on(session.scheduled_date);
        let limiter = self.limiter_from(&records);
        let mut transitions = Vec::new();
        let mut dispatched = None;

        if session.phase == Phase::NotStarted {
            advance(&mut session, Phase::PreEngagement, now, &mut transitions);
        }

        if now >= window.end {
            if session.phase == Phase::PostEngagement {
                advance(&mut session, Phase::Completed, now, &mut transitions);
            } else if !session.is_terminal() && self.stalled(&session, now) {
                advance(&mut session, Phase::Aborted, now, &mut transitions);
            }
        }
        if session.phase == Phase::PreEngagement && now >= window.main_post {
            advance(&mut session, Phase::Publishing, now, &mut transitions);
        }

        if matches!(session.phase, Phase::PreEngagement | Phase::PostEngagement) {
            match self.engage(&mut session, &records, &limiter, now).await {
                Engagement::Dispatched(record) => dispatched = Some(record),
                Engagement::Exhausted => {
                    let next = if session.phase == Phase::PreEngagement {
                        Phase::Publishing
                    } else {
                        Phase::Completed
                    };
                    advance(&mut session, next, now, &mut transitions);
                }
                Engagement::Waiting => {}
            }
        }

        if session.phase == Phase::Publishing
            && session.publish_status == PublishStatus::Pending
            && dispatched.is_none()
        {
            dispatched = self.publish(&mut session, &limiter, now).await?;
        }
        if session.phase == Phase::Publishing && session.publish_status != PublishStatus::Pending {
            advance(&mut session, Phase::PostEngagement, now, &mut transitions);
        }

        if session != before || dispatched.is_some() {
            self.store.commit(&session, dispatched.as_ref()).await?;
        }

        let report = if session.is_terminal() && !transitions.is_empty() {
            let mut all = records;
            all.extend(dispatched.iter().cloned());
            let report = SessionReport::new(&session, &all);
            report.log();
            Some(report)
        } else {
            None
        };

        Ok(TickOutcome {
            session: Some(session),
            dispatched,
            transitions,
            next_due: None,
            report,
        })
    }

    async fn resolve_session(
        &self,
        current: Option<Session>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, CoreError> {
        if let Some(session) = current.filter(|s| !s.is_terminal()) {
            return Ok(Some(session));
        }

        if let Some(stored) = self.store.latest().await?.filter(|s| !s.is_terminal()) {
            let records = self.store.records(&stored.session_id).await?;
            tracing::info!(
                session_id = %stored.session_id,
                phase = %stored.phase,
                records = records.len(),
                "Resuming session"
            );
            let reconciled = self.recovery.reconcile(stored, &records, now);
            if reconciled.changed() {
                self.store
                    .commit(&reconciled.session, reconciled.record.as_ref())
                    .await?;
            }
            return Ok(Some(reconciled.session));
        }

        let Some(window) = self.scheduler.window_containing(now) else {
            return Ok(None);
        };
        if self.store.load(window.scheduled_date).await?.is_some() {
            return Ok(None);
        }

        let mut session = Session::new(window.scheduled_date);
        session.started_at = Some(now);
        if !self.store.create(&session).await? {
            tracing::warn!(
                session_id = %session.session_id,
                "Session already created by another writer, skipping"
            );
            return Ok(None);
        }
        tracing::info!(
            session_id = %session.session_id,
            window_start = %window.start,
            main_post = %window.main_post,
            window_end = %window.end,
            "Session created"
        );
        Ok(Some(session))
    }

    /// 以真正发出的调用重放限速器
    fn limiter_from(&self, records: &[ActionRecord]) -> RateLimiter {
        let mut limiter = RateLimiter::new(
            self.settings.min_interval,
            self.settings.max_calls_per_session,
        );
        for record in records.iter().filter(|r| r.is_dispatch()) {
            limiter.record_call(record.timestamp);
        }
        limiter
    }

    fn stalled(&self, session: &Session, now: DateTime<Utc>) -> bool {
        let last = session
            .last_progress_at
            .or(session.started_at)
            .unwrap_or(now);
        now - last >= self.settings.stall_timeout
    }

    /// 本阶段剩余的 (点赞, 评论) 预算
    fn remaining_budget(&self, session: &Session) -> (u32, u32) {
        let progress = &session.engagement_progress;
        match session.phase {
            Phase::PreEngagement => {
                let share = u64::from(self.settings.pre_engagement_share_pct.min(100));
                // 结果不超过 budget 本身，回转 u32 不会截断
                let cap = |budget: u32| (u64::from(budget) * share / 100) as u32;
                let like_cap = cap(self.settings.like_budget);
                let comment_cap = cap(self.settings.comment_budget);
                (
                    like_cap.saturating_sub(progress.pre.likes),
                    comment_cap.saturating_sub(progress.pre.comments),
                )
            }
            Phase::PostEngagement => (
                self.settings.like_budget.saturating_sub(progress.total_likes()),
                self.settings
                    .comment_budget
                    .saturating_sub(progress.total_comments()),
            ),
            _ => (0, 0),
        }
    }

    async fn engage(
        &self,
        session: &mut Session,
        records: &[ActionRecord],
        limiter: &RateLimiter,
        now: DateTime<Utc>,
    ) -> Engagement {
        // 发布前阶段为主帖保留一次调用
        let reserved = if session.phase == Phase::PreEngagement { 1 } else { 0 };
        if limiter.remaining() <= reserved {
            tracing::info!(
                session_id = %session.session_id,
                phase = %session.phase,
                "Call ceiling reached"
            );
            return Engagement::Exhausted;
        }
        let (like_budget, comment_budget) = self.remaining_budget(session);
        if like_budget == 0 && comment_budget == 0 {
            return Engagement::Exhausted;
        }

        let candidates = match self.candidates_for(session, now).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "Candidate fetch failed, retrying next tick"
                );
                return Engagement::Waiting;
            }
        };
        let plan = self
            .planner
            .plan(&candidates, now, like_budget, comment_budget, records);
        let Some(action) = plan.next() else {
            tracing::info!(
                session_id = %session.session_id,
                phase = %session.phase,
                "Engagement plan empty"
            );
            return Engagement::Exhausted;
        };
        if !limiter.allow(now) {
            tracing::debug!(
                next_allowed_at = ?limiter.next_allowed_at(),
                "Rate limited, waiting"
            );
            return Engagement::Waiting;
        }

        let record = self.execute(session.phase, action, now).await;
        if record.outcome == ActionOutcome::Success {
            session
                .engagement_progress
                .count(record.phase, record.action_type);
            session.last_progress_at = Some(now);
        }
        Engagement::Dispatched(record)
    }

    /// 候选在每次进入阶段时拉取一次
    async fn candidates_for(
        &self,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, crate::core::ActionError> {
        let mut cache = self.candidates.lock().await;
        if let Some(cached) = cache
            .as_ref()
            .filter(|c| c.session_id == session.session_id && c.phase == session.phase)
        {
            return Ok(cached.candidates.clone());
        }
        let fetch = fetch_candidates(
            self.social.as_ref(),
            self.settings.top_connections,
            self.planner.since(now),
        );
        let candidates = with_timeout(self.settings.fetch_budget(), fetch).await?;
        *cache = Some(CandidateCache {
            session_id: session.session_id.clone(),
            phase: session.phase,
            candidates: candidates.clone(),
        });
        Ok(candidates)
    }

    async fn execute(
        &self,
        phase: Phase,
        action: &PlannedAction,
        now: DateTime<Utc>,
    ) -> ActionRecord {
        let social: &dyn SocialClient = self.social.as_ref();
        let content: &dyn ContentGenerator = self.content.as_ref();
        let timeout = self.settings.call_timeout;
        let generation_timeout = self.settings.generation_timeout;
        let post = &action.post;

        let attempted = match action.action_type {
            ActionType::Comment => {
                self.retry
                    .execute(move |_| async move {
                        let text =
                            with_timeout(generation_timeout, content.generate_comment(post)).await?;
                        with_timeout(timeout, social.comment(&post.id, &text)).await
                    })
                    .await
            }
            _ => {
                self.retry
                    .execute(move |_| with_timeout(timeout, social.like(&post.id)))
                    .await
            }
        };

        let (outcome, reason) = match &attempted.result {
            Ok(()) => (ActionOutcome::Success, None),
            Err(e) => (ActionOutcome::Failed, Some(e.to_string())),
        };
        tracing::info!(
            action = action.action_type.as_str(),
            post_id = %post.id,
            connection_id = %action.connection_id,
            attempts = attempted.attempts,
            outcome = outcome.as_str(),
            reason = ?reason,
            "Action dispatched"
        );
        ActionRecord {
            action_type: action.action_type,
            target_id: post.id.clone(),
            connection_id: Some(action.connection_id.clone()),
            phase,
            attempt_count: attempted.attempts,
            outcome,
            reason,
            timestamp: now,
        }
    }

    /// 发布主帖；`Done` 之后永不再调用
    async fn publish(
        &self,
        session: &mut Session,
        limiter: &RateLimiter,
        now: DateTime<Utc>,
    ) -> Result<Option<ActionRecord>, CoreError> {
        let topic = select_topic(
            &self.settings.topics,
            self.scheduler
                .weekday_position(session.scheduled_date)
                .unwrap_or(0),
        );
        let record = |outcome: ActionOutcome,
                      target_id: String,
                      attempts: u32,
                      reason: Option<String>| ActionRecord {
            action_type: ActionType::Publish,
            target_id,
            connection_id: None,
            phase: Phase::Publishing,
            attempt_count: attempts,
            outcome,
            reason,
            timestamp: now,
        };

        if limiter.remaining() == 0 {
            tracing::warn!(
                session_id = %session.session_id,
                "Call ceiling reached before publish"
            );
            session.publish_status = PublishStatus::Failed;
            return Ok(Some(record(
                ActionOutcome::Skipped,
                topic,
                0,
                Some("call ceiling reached".to_string()),
            )));
        }
        if !limiter.allow(now) {
            tracing::debug!(
                next_allowed_at = ?limiter.next_allowed_at(),
                "Publish waiting for rate limiter"
            );
            return Ok(None);
        }

        let content: &dyn ContentGenerator = self.content.as_ref();
        let social: &dyn SocialClient = self.social.as_ref();
        let timeout = self.settings.call_timeout;
        let generation_timeout = self.settings.generation_timeout;

        let topic_ref = topic.as_str();
        let generated = self
            .retry
            .execute(move |_| {
                with_timeout(generation_timeout, content.generate_post(topic_ref))
            })
            .await;
        let text = match generated.result {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    topic = %topic,
                    error = %e,
                    "Post generation failed, not publishing"
                );
                session.publish_status = PublishStatus::Failed;
                return Ok(Some(record(
                    ActionOutcome::Skipped,
                    topic,
                    generated.attempts,
                    Some(format!("content generation failed: {e}")),
                )));
            }
        };

        // 先落盘发布意图，崩溃后据此判定结果未知
        session.publish_attempted_at = Some(now);
        self.store.commit(session, None).await?;

        let text_ref = text.as_str();
        let attempted = self
            .retry
            .execute(move |_| with_timeout(timeout, social.publish(text_ref)))
            .await;
        let published = match attempted.result {
            Ok(post_id) => {
                tracing::info!(
                    session_id = %session.session_id,
                    topic = %topic,
                    post_id = %post_id,
                    attempts = attempted.attempts,
                    "Main post published"
                );
                session.publish_status = PublishStatus::Done;
                record(ActionOutcome::Success, post_id, attempted.attempts, None)
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    topic = %topic,
                    attempts = attempted.attempts,
                    error = %e,
                    "Publish failed"
                );
                session.publish_status = PublishStatus::Failed;
                let reason = Some(e.to_string());
                record(ActionOutcome::Failed, topic, attempted.attempts, reason)
            }
        };
        Ok(Some(published))
    }
}

fn advance(
    session: &mut Session,
    to: Phase,
    now: DateTime<Utc>,
    transitions: &mut Vec<(Phase, Phase)>,
) {
    transitions.push((session.phase, to));
    session.transition(to, now);
}
