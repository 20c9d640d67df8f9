//! dry-run 与测试用 LLM：不访问模型，把用户提示首行包装成草稿文本

use async_trait::async_trait;

use crate::llm::{Completion, CompletionRequest, LlmClient, LlmError};

#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    fn model(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let headline = request
            .user_prompt()
            .and_then(|prompt| prompt.lines().next())
            .unwrap_or("(empty prompt)");
        Ok(Completion::text(format!("[draft] {headline}")))
    }
}
