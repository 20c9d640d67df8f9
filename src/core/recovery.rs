//! 重启恢复引擎
//!
//! 从存储加载的会话先经 reconcile 与其记录对齐，再交给编排器继续：
//! - 进度计数以成功记录为准重新累计
//! - 已有发布记录时发布状态以记录为准
//! - 发布已发出（`publish_attempted_at` 已写入）但没有任何发布记录：结果未知，
//!   标记 Failed 并追加 Skipped 记录，保证发布至多一次

use chrono::{DateTime, Utc};

use crate::session::{
    ActionOutcome, ActionRecord, ActionType, EngagementProgress, PublishStatus, Session,
};

/// 发布结果未知时写入记录的原因
pub const UNKNOWN_PUBLISH_REASON: &str = "outcome unknown after restart";

/// 恢复时对会话做出的修正
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 进度计数与记录不一致，已按记录重建
    ProgressRebuilt,
    /// 发布状态按已有发布记录修正
    PublishStatusFromRecord(PublishStatus),
    /// 发布已发出但结果未知，按失败处理且不再发布
    PublishOutcomeUnknown,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub session: Session,
    /// 需要随会话一并提交的新记录
    pub record: Option<ActionRecord>,
    pub actions: Vec<RecoveryAction>,
}

impl Reconciled {
    pub fn changed(&self) -> bool {
        !self.actions.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn reconcile(
        &self,
        mut session: Session,
        records: &[ActionRecord],
        now: DateTime<Utc>,
    ) -> Reconciled {
        let mut actions = Vec::new();
        let mut record = None;

        let progress = EngagementProgress::from_records(records);
        if progress != session.engagement_progress {
            tracing::warn!(
                session_id = %session.session_id,
                stored = ?session.engagement_progress,
                replayed = ?progress,
                "Progress counters diverged from records, rebuilding"
            );
            session.engagement_progress = progress;
            actions.push(RecoveryAction::ProgressRebuilt);
        }

        if session.publish_status == PublishStatus::Pending {
            let published = records
                .iter()
                .filter(|r| r.action_type == ActionType::Publish)
                .map(|r| r.outcome)
                .fold(None, |acc, outcome| match (acc, outcome) {
                    (Some(ActionOutcome::Success), _) | (_, ActionOutcome::Success) => {
                        Some(ActionOutcome::Success)
                    }
                    (_, other) => Some(other),
                });

            match published {
                Some(outcome) => {
                    let status = if outcome == ActionOutcome::Success {
                        PublishStatus::Done
                    } else {
                        PublishStatus::Failed
                    };
                    session.publish_status = status;
                    actions.push(RecoveryAction::PublishStatusFromRecord(status));
                }
                None if session.publish_attempted_at.is_some() => {
                    tracing::warn!(
                        session_id = %session.session_id,
                        attempted_at = ?session.publish_attempted_at,
                        "Publish outcome unknown after restart, marking failed"
                    );
                    session.publish_status = PublishStatus::Failed;
                    record = Some(ActionRecord {
                        action_type: ActionType::Publish,
                        target_id: session.session_id.clone(),
                        connection_id: None,
                        phase: session.phase,
                        attempt_count: 0,
                        outcome: ActionOutcome::Skipped,
                        reason: Some(UNKNOWN_PUBLISH_REASON.to_string()),
                        timestamp: now,
                    });
                    actions.push(RecoveryAction::PublishOutcomeUnknown);
                }
                None => {}
            }
        }

        if !actions.is_empty() {
            tracing::info!(session_id = %session.session_id, ?actions, "Session reconciled");
        }

        Reconciled {
            session,
            record,
            actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Phase;
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 21, 9, 40, 0).unwrap()
    }

    fn session(phase: Phase) -> Session {
        let mut s = Session::new(NaiveDate::from_ymd_opt(2026, 10, 21).unwrap());
        s.phase = phase;
        s
    }

    fn record(action_type: ActionType, outcome: ActionOutcome) -> ActionRecord {
        ActionRecord {
            action_type,
            target_id: "t".into(),
            connection_id: Some("c1".into()),
            phase: Phase::PreEngagement,
            attempt_count: 1,
            outcome,
            reason: None,
            timestamp: now(),
        }
    }

    #[test]
    fn test_clean_session_is_untouched() {
        let reconciled = RecoveryEngine::new().reconcile(session(Phase::PreEngagement), &[], now());
        assert!(!reconciled.changed());
        assert!(reconciled.record.is_none());
    }

    #[test]
    fn test_progress_rebuilt_from_records() {
        let records = vec![
            record(ActionType::Like, ActionOutcome::Success),
            record(ActionType::Like, ActionOutcome::Success),
        ];
        let reconciled =
            RecoveryEngine::new().reconcile(session(Phase::PreEngagement), &records, now());
        assert_eq!(reconciled.session.engagement_progress.pre.likes, 2);
        assert_eq!(reconciled.actions, vec![RecoveryAction::ProgressRebuilt]);
    }

    #[test]
    fn test_unknown_publish_marked_failed_with_skipped_record() {
        let mut s = session(Phase::Publishing);
        s.publish_attempted_at = Some(now());
        let reconciled = RecoveryEngine::new().reconcile(s, &[], now());
        assert_eq!(reconciled.session.publish_status, PublishStatus::Failed);
        let record = reconciled.record.unwrap();
        assert_eq!(record.outcome, ActionOutcome::Skipped);
        assert_eq!(record.action_type, ActionType::Publish);
        assert_eq!(record.reason.as_deref(), Some(UNKNOWN_PUBLISH_REASON));
    }

    #[test]
    fn test_publish_record_wins_over_pending_status() {
        let mut s = session(Phase::Publishing);
        s.publish_attempted_at = Some(now());
        let records = vec![record(ActionType::Publish, ActionOutcome::Success)];
        let reconciled = RecoveryEngine::new().reconcile(s, &records, now());
        assert_eq!(reconciled.session.publish_status, PublishStatus::Done);
        assert!(reconciled.record.is_none());
    }
}
