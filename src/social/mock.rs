//! Mock 社交网络客户端（dry-run 与测试用，不发出任何网络请求）
//!
//! 记录每次调用，可按操作预置失败，便于驱动重试与永久失败分支。

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Connection, Post, SocialClient};
use crate::core::ActionError;

/// 可预置失败的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    FetchConnections,
    FetchPosts,
    Like,
    Comment,
    Publish,
}

#[derive(Default)]
struct MockState {
    connections: Vec<Connection>,
    posts: HashMap<String, Vec<Post>>,
    scripted: HashMap<MockOp, VecDeque<ActionError>>,
    broken_posts: HashMap<String, ActionError>,
    likes: Vec<String>,
    comments: Vec<(String, String)>,
    publishes: Vec<String>,
    connection_fetches: usize,
}

#[derive(Default)]
pub struct MockSocialClient {
    state: Mutex<MockState>,
}

impl MockSocialClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(self, connection: Connection, posts: Vec<Post>) -> Self {
        {
            let mut state = self.state();
            state.posts.insert(connection.id.clone(), posts);
            state.connections.push(connection);
        }
        self
    }

    /// 下一次 `op` 调用返回 `err`（可多次排队）
    pub fn fail_next(&self, op: MockOp, err: ActionError) {
        self.state().scripted.entry(op).or_default().push_back(err);
    }

    /// 对某帖子的点赞 / 评论始终失败
    pub fn fail_post(&self, post_id: &str, err: ActionError) {
        self.state().broken_posts.insert(post_id.to_string(), err);
    }

    pub fn likes(&self) -> Vec<String> {
        self.state().likes.clone()
    }

    pub fn comments(&self) -> Vec<(String, String)> {
        self.state().comments.clone()
    }

    pub fn publishes(&self) -> Vec<String> {
        self.state().publishes.clone()
    }

    pub fn connection_fetches(&self) -> usize {
        self.state().connection_fetches
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn scripted(state: &mut MockState, op: MockOp) -> Result<(), ActionError> {
        match state.scripted.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SocialClient for MockSocialClient {
    async fn fetch_top_connections(&self, n: usize) -> Result<Vec<Connection>, ActionError> {
        let mut state = self.state();
        Self::scripted(&mut state, MockOp::FetchConnections)?;
        state.connection_fetches += 1;
        Ok(state.connections.iter().take(n).cloned().collect())
    }

    async fn fetch_recent_posts(
        &self,
        connection: &Connection,
        since: DateTime<Utc>,
    ) -> Result<Vec<Post>, ActionError> {
        let mut state = self.state();
        Self::scripted(&mut state, MockOp::FetchPosts)?;
        Ok(state
            .posts
            .get(&connection.id)
            .map(|posts| posts.iter().filter(|p| p.published_at >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn like(&self, post_id: &str) -> Result<(), ActionError> {
        let mut state = self.state();
        Self::scripted(&mut state, MockOp::Like)?;
        if let Some(err) = state.broken_posts.get(post_id) {
            return Err(err.clone());
        }
        tracing::info!(post_id, "[mock] like");
        state.likes.push(post_id.to_string());
        Ok(())
    }

    async fn comment(&self, post_id: &str, text: &str) -> Result<(), ActionError> {
        let mut state = self.state();
        Self::scripted(&mut state, MockOp::Comment)?;
        if let Some(err) = state.broken_posts.get(post_id) {
            return Err(err.clone());
        }
        tracing::info!(post_id, chars = text.len(), "[mock] comment");
        state.comments.push((post_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn publish(&self, text: &str) -> Result<String, ActionError> {
        let mut state = self.state();
        Self::scripted(&mut state, MockOp::Publish)?;
        tracing::info!(chars = text.len(), "[mock] publish");
        state.publishes.push(text.to_string());
        Ok(format!("mock-post-{}", state.publishes.len()))
    }
}
