//! 内容生成：主帖 / 评论文本
//!
//! ContentGenerator 是编排器面对的接口；LlmContentGenerator 基于任意 LlmClient 组织提示词。
//! 生成失败（模型不可达、空输出）统一映射为 `ActionError::Generation`，按瞬时错误重试。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::ActionError;
use crate::llm::{CompletionRequest, LlmClient};
use crate::social::Post;

/// 主题列表为空时使用的主题
pub const DEFAULT_TOPIC: &str = "Professional Insights";

/// 评论提示词中帖子正文的最大字符数
const POST_CONTEXT_CHARS: usize = 500;

const POST_TEMPERATURE: f32 = 0.8;
const COMMENT_TEMPERATURE: f32 = 0.7;

/// 按会话在配置星期列表中的位置选主题（循环取用）
pub fn select_topic(topics: &[String], position: usize) -> String {
    if topics.is_empty() {
        return DEFAULT_TOPIC.to_string();
    }
    topics[position % topics.len()].clone()
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_post(&self, topic: &str) -> Result<String, ActionError>;

    async fn generate_comment(&self, post: &Post) -> Result<String, ActionError>;
}

pub struct LlmContentGenerator {
    llm: Arc<dyn LlmClient>,
}

impl LlmContentGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ActionError> {
        let completion = self
            .llm
            .complete(&request)
            .await
            .map_err(|e| ActionError::Generation(e.to_string()))?;
        tracing::debug!(
            model = self.llm.model(),
            prompt_tokens = ?completion.prompt_tokens,
            completion_tokens = ?completion.completion_tokens,
            "Completion received"
        );
        let text = completion.text.trim();
        if text.is_empty() {
            return Err(ActionError::Generation("empty completion".to_string()));
        }
        Ok(text.to_string())
    }
}

fn post_request(topic: &str) -> CompletionRequest {
    let system = "You are a LinkedIn content expert who writes engaging, \
        professional posts that spark meaningful conversation. You write in a \
        clear, confident voice and never use emojis.";
    let user = format!(
        "Write a LinkedIn post about: {topic}\n\n\
         Requirements:\n\
         - About 500 words (between 450 and 550)\n\
         - Open with a strong hook in the first line\n\
         - Share practical, actionable insights or tips\n\
         - End with a question that invites comments\n\
         - Add 3-5 relevant hashtags on the last line\n\
         - No emojis\n\n\
         Return only the post text."
    );
    CompletionRequest::new(system, user).with_temperature(POST_TEMPERATURE)
}

fn comment_request(post: &Post) -> CompletionRequest {
    let system = "You are a LinkedIn engagement expert who writes thoughtful, \
        genuine comments that add value to the conversation.";
    let context: String = post.text.chars().take(POST_CONTEXT_CHARS).collect();
    let user = format!(
        "Write a comment on this LinkedIn post by {author}:\n\n\
         \"{context}\"\n\n\
         Requirements:\n\
         - 25-40 words\n\
         - Reference a specific detail from the post\n\
         - Write in the first person, sound natural\n\
         - At most one follow-up question\n\
         - No hashtags, no emojis\n\n\
         Return only the comment text.",
        author = post.author_name,
    );
    CompletionRequest::new(system, user).with_temperature(COMMENT_TEMPERATURE)
}

#[async_trait]
impl ContentGenerator for LlmContentGenerator {
    async fn generate_post(&self, topic: &str) -> Result<String, ActionError> {
        let text = self.complete(post_request(topic)).await?;
        tracing::debug!(topic, words = text.split_whitespace().count(), "Generated post");
        Ok(text)
    }

    async fn generate_comment(&self, post: &Post) -> Result<String, ActionError> {
        let text = self.complete(comment_request(post)).await?;
        tracing::debug!(
            post_id = %post.id,
            words = text.split_whitespace().count(),
            "Generated comment"
        );
        Ok(text)
    }
}
