//! OpenAI 兼容端点客户端
//!
//! 经 async_openai 调用 `/chat/completions`；默认指向本地 Ollama（`http://localhost:11434/v1`），
//! 也可指向 OpenAI 或任意兼容代理。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{Completion, CompletionRequest, LlmClient, LlmError, Message, Role};

/// 本地端点不校验 key，未配置时的占位值
const PLACEHOLDER_API_KEY: &str = "ollama";

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiClient {
    /// key 依次取参数、`OPENAI_API_KEY`、占位值
    pub fn new(base_url: &str, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(str::to_string)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| PLACEHOLDER_API_KEY.to_string());
        let config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(api_key);

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }
}

fn to_api_message(message: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    let built = match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content.as_str())
            .build()
            .map(ChatCompletionRequestMessage::System),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content.as_str())
            .build()
            .map(ChatCompletionRequestMessage::User),
    };
    built.map_err(|e| LlmError::InvalidRequest(e.to_string()))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let messages = request
            .messages
            .iter()
            .map(to_api_message)
            .collect::<Result<Vec<_>, _>>()?;
        let api_request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(messages)
            .temperature(request.temperature)
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(api_request)
            .await
            .map_err(|e| LlmError::Endpoint(e.to_string()))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(Completion {
            text,
            prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_map_to_api_messages() {
        let request = CompletionRequest::new("be brief", "hello");
        let converted: Vec<_> = request
            .messages
            .iter()
            .map(|m| to_api_message(m).unwrap())
            .collect();
        assert!(matches!(converted[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(converted[1], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_client_reports_configured_model() {
        let client = OpenAiClient::new("http://localhost:11434/v1", "mistral:7b", Some("k"));
        assert_eq!(client.model(), "mistral:7b");
    }
}
