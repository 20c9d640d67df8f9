//! 社交网络客户端抽象
//!
//! 所有实现（REST / Mock）实现 SocialClient；失败一律以 ActionError 返回，
//! 瞬时 / 永久分类由实现给出。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ActionError;

/// 一个联系人（按重要度排序返回）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub headline: Option<String>,
}

/// 联系人发布的帖子
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub connection_id: String,
    pub author_name: String,
    pub text: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub num_likes: u32,
    #[serde(default)]
    pub num_comments: u32,
}

impl Post {
    /// 互动强度：点赞 + 2 × 评论
    pub fn engagement_signal(&self) -> u64 {
        u64::from(self.num_likes) + 2 * u64::from(self.num_comments)
    }
}

#[async_trait]
pub trait SocialClient: Send + Sync {
    /// 前 n 个联系人（顺序即排名）
    async fn fetch_top_connections(&self, n: usize) -> Result<Vec<Connection>, ActionError>;

    /// 某联系人 `since` 之后的帖子
    async fn fetch_recent_posts(
        &self,
        connection: &Connection,
        since: DateTime<Utc>,
    ) -> Result<Vec<Post>, ActionError>;

    async fn like(&self, post_id: &str) -> Result<(), ActionError>;

    async fn comment(&self, post_id: &str, text: &str) -> Result<(), ActionError>;

    /// 发布主帖，返回新帖 id
    async fn publish(&self, text: &str) -> Result<String, ActionError>;
}
