//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）及内容生成

pub mod content;
pub mod mock;
pub mod openai;
pub mod traits;

pub use content::{select_topic, ContentGenerator, LlmContentGenerator, DEFAULT_TOPIC};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{
    Completion, CompletionRequest, LlmClient, LlmError, Message, Role, DEFAULT_TEMPERATURE,
};
