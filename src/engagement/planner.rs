//! 互动计划：从排名靠前的联系人近期帖子中挑出本阶段要做的点赞 / 评论
//!
//! 排序：发布时间（新→旧）> 互动强度（高→低）> 联系人排名（前→后）> 帖子 id，结果确定可测。
//! 每个联系人每个会话至多一次点赞、一次评论；已有记录（成功或失败）的 (联系人, 类型) 不再计划。
//! 先点赞后评论；不超过各自预算，候选不足时返回更短的计划。

use std::cmp::Reverse;
use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::core::ActionError;
use crate::session::{ActionOutcome, ActionRecord, ActionType};
use crate::social::{Connection, Post, SocialClient};

/// 一个联系人及其近期帖子；在候选列表中的下标即排名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub connection: Connection,
    pub posts: Vec<Post>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    pub action_type: ActionType,
    pub connection_id: String,
    pub post: Post,
}

/// 临时计划，不持久化；每个 tick 重新计算
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngagementPlan {
    pub actions: Vec<PlannedAction>,
}

impl EngagementPlan {
    pub fn next(&self) -> Option<&PlannedAction> {
        self.actions.first()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct EngagementPlanner {
    lookback: Duration,
}

impl EngagementPlanner {
    pub fn new(lookback_days: u32) -> Self {
        Self {
            lookback: Duration::days(i64::from(lookback_days)),
        }
    }

    /// 回看窗口起点
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.lookback
    }

    pub fn plan(
        &self,
        candidates: &[Candidate],
        now: DateTime<Utc>,
        like_budget: u32,
        comment_budget: u32,
        already_done: &[ActionRecord],
    ) -> EngagementPlan {
        let since = self.since(now);

        let mut ranked: Vec<(usize, &Post)> = candidates
            .iter()
            .enumerate()
            .flat_map(|(rank, c)| c.posts.iter().map(move |p| (rank, p)))
            .filter(|(_, p)| p.published_at >= since)
            .collect();
        ranked.sort_by(|(rank_a, a), (rank_b, b)| {
            (Reverse(a.published_at), Reverse(a.engagement_signal()), rank_a, &a.id).cmp(&(
                Reverse(b.published_at),
                Reverse(b.engagement_signal()),
                rank_b,
                &b.id,
            ))
        });

        let done: HashSet<(&str, ActionType)> = already_done
            .iter()
            .filter(|r| matches!(r.outcome, ActionOutcome::Success | ActionOutcome::Failed))
            .filter_map(|r| r.connection_id.as_deref().map(|c| (c, r.action_type)))
            .collect();

        let mut actions = Vec::new();
        for (action_type, budget) in [
            (ActionType::Like, like_budget),
            (ActionType::Comment, comment_budget),
        ] {
            let mut chosen: HashSet<&str> = HashSet::new();
            for (_, post) in &ranked {
                if chosen.len() >= budget as usize {
                    break;
                }
                let connection = post.connection_id.as_str();
                if done.contains(&(connection, action_type)) || !chosen.insert(connection) {
                    continue;
                }
                actions.push(PlannedAction {
                    action_type,
                    connection_id: connection.to_string(),
                    post: (*post).clone(),
                });
            }
        }

        EngagementPlan { actions }
    }
}

/// 拉取前 `top_n` 个联系人及其 `since` 之后的帖子
///
/// 联系人列表拉取失败返回错误；单个联系人的帖子拉取失败只跳过该联系人。
pub async fn fetch_candidates(
    social: &dyn SocialClient,
    top_n: usize,
    since: DateTime<Utc>,
) -> Result<Vec<Candidate>, ActionError> {
    let connections = social.fetch_top_connections(top_n).await?;
    let mut candidates = Vec::with_capacity(connections.len());
    for connection in connections {
        match social.fetch_recent_posts(&connection, since).await {
            Ok(posts) => candidates.push(Candidate { connection, posts }),
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection.id,
                    error = %e,
                    "Skipping connection, post fetch failed"
                );
            }
        }
    }
    tracing::info!(
        connections = candidates.len(),
        posts = candidates.iter().map(|c| c.posts.len()).sum::<usize>(),
        "Fetched engagement candidates"
    );
    Ok(candidates)
}
