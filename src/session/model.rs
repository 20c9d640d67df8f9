//! 会话数据模型：Session / Phase / PublishStatus / ActionRecord
//!
//! session_id 由日期确定性派生，重启后重新推导得到同一个 id（幂等键）。

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 会话阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    NotStarted,
    PreEngagement,
    Publishing,
    PostEngagement,
    Completed,
    /// 窗口结束且长时间无进展
    Aborted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::NotStarted => "NotStarted",
            Phase::PreEngagement => "PreEngagement",
            Phase::Publishing => "Publishing",
            Phase::PostEngagement => "PostEngagement",
            Phase::Completed => "Completed",
            Phase::Aborted => "Aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NotStarted" => Some(Phase::NotStarted),
            "PreEngagement" => Some(Phase::PreEngagement),
            "Publishing" => Some(Phase::Publishing),
            "PostEngagement" => Some(Phase::PostEngagement),
            "Completed" => Some(Phase::Completed),
            "Aborted" => Some(Phase::Aborted),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 主帖发布状态；`Done` 每个会话至多出现一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishStatus {
    Pending,
    Done,
    Failed,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Pending => "Pending",
            PublishStatus::Done => "Done",
            PublishStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(PublishStatus::Pending),
            "Done" => Some(PublishStatus::Done),
            "Failed" => Some(PublishStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    Like,
    Comment,
    Publish,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Like => "Like",
            ActionType::Comment => "Comment",
            ActionType::Publish => "Publish",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Like" => Some(ActionType::Like),
            "Comment" => Some(ActionType::Comment),
            "Publish" => Some(ActionType::Publish),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionOutcome {
    Success,
    Failed,
    /// 未真正发出调用（如重启后结果未知）
    Skipped,
}

impl ActionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOutcome::Success => "Success",
            ActionOutcome::Failed => "Failed",
            ActionOutcome::Skipped => "Skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Success" => Some(ActionOutcome::Success),
            "Failed" => Some(ActionOutcome::Failed),
            "Skipped" => Some(ActionOutcome::Skipped),
            _ => None,
        }
    }
}

/// 单个阶段已完成的点赞 / 评论数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub likes: u32,
    pub comments: u32,
}

/// 两个互动阶段的进度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementProgress {
    pub pre: PhaseProgress,
    pub post: PhaseProgress,
}

impl EngagementProgress {
    /// 从成功的 ActionRecord 重新累计（记录为准）
    pub fn from_records(records: &[ActionRecord]) -> Self {
        let mut progress = Self::default();
        for record in records.iter().filter(|r| r.outcome == ActionOutcome::Success) {
            progress.count(record.phase, record.action_type);
        }
        progress
    }

    pub fn count(&mut self, phase: Phase, action: ActionType) {
        let slot = match phase {
            Phase::PreEngagement => &mut self.pre,
            Phase::PostEngagement => &mut self.post,
            _ => return,
        };
        match action {
            ActionType::Like => slot.likes += 1,
            ActionType::Comment => slot.comments += 1,
            ActionType::Publish => {}
        }
    }

    pub fn total_likes(&self) -> u32 {
        self.pre.likes + self.post.likes
    }

    pub fn total_comments(&self) -> u32 {
        self.pre.comments + self.post.comments
    }
}

/// 一次计划内会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub scheduled_date: NaiveDate,
    pub phase: Phase,
    pub publish_status: PublishStatus,
    pub engagement_progress: EngagementProgress,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 发布调用发出前写入；重启时据此识别「结果未知」的发布
    pub publish_attempted_at: Option<DateTime<Utc>>,
    /// 最近一次进展（阶段变化或新记录）
    pub last_progress_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(scheduled_date: NaiveDate) -> Self {
        Self {
            session_id: Self::id_for(scheduled_date),
            scheduled_date,
            phase: Phase::NotStarted,
            publish_status: PublishStatus::Pending,
            engagement_progress: EngagementProgress::default(),
            started_at: None,
            completed_at: None,
            publish_attempted_at: None,
            last_progress_at: None,
        }
    }

    /// 由日期确定性派生的会话 id
    pub fn id_for(date: NaiveDate) -> String {
        format!("session-{}", date.format("%Y-%m-%d"))
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// 切换阶段并记为一次进展；进入终态时写入完成时间
    pub fn transition(&mut self, to: Phase, now: DateTime<Utc>) {
        tracing::info!(
            session_id = %self.session_id,
            from = %self.phase,
            to = %to,
            "Phase transition"
        );
        self.phase = to;
        self.last_progress_at = Some(now);
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
    }
}

/// 每次外部调用尝试一条记录；只追加
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_type: ActionType,
    /// 帖子 id；发布成功时为新帖 id，否则为主题
    pub target_id: String,
    pub connection_id: Option<String>,
    /// 发起该动作时所在阶段
    pub phase: Phase,
    pub attempt_count: u32,
    pub outcome: ActionOutcome,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActionRecord {
    /// 是否真正发出过调用（计入限速）
    pub fn is_dispatch(&self) -> bool {
        self.outcome != ActionOutcome::Skipped
    }
}
