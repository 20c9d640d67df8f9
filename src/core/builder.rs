//! 编排器构建器：统一的组件初始化逻辑
//!
//! 按配置装配存储、社交网络客户端、LLM 与内容生成器；测试可用 `with_*` 注入替身。

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeZone;

use crate::config::AppConfig;
use crate::core::{CoreError, SessionOrchestrator};
use crate::engagement::EngagementPlanner;
use crate::llm::{ContentGenerator, LlmClient, LlmContentGenerator, MockLlmClient, OpenAiClient};
use crate::session::{create_session_store, SessionStore};
use crate::social::{MockSocialClient, RestSocialClient, SocialClient};

pub struct OrchestratorBuilder {
    config: AppConfig,
    store: Option<Arc<dyn SessionStore>>,
    social: Option<Arc<dyn SocialClient>>,
    content: Option<Arc<dyn ContentGenerator>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            store: None,
            social: None,
            content: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_social(mut self, social: Arc<dyn SocialClient>) -> Self {
        self.social = Some(social);
        self
    }

    pub fn with_content(mut self, content: Arc<dyn ContentGenerator>) -> Self {
        self.content = Some(content);
        self
    }

    /// 构建会话存储；SQLite 打不开时直接失败，不退回内存
    pub fn build_store(&self) -> Result<Arc<dyn SessionStore>, CoreError> {
        if let Some(store) = &self.store {
            return Ok(Arc::clone(store));
        }
        let storage = &self.config.storage;
        let store = create_session_store(&storage.db_path, storage.in_memory)?;
        tracing::info!(
            db_path = %storage.db_path.display(),
            in_memory = storage.in_memory,
            "Session store ready"
        );
        Ok(store)
    }

    /// 构建社交网络客户端（dry-run 时为 Mock）
    pub fn build_social(&self) -> Result<Arc<dyn SocialClient>, CoreError> {
        if let Some(social) = &self.social {
            return Ok(Arc::clone(social));
        }
        let social = &self.config.social;
        if social.dry_run {
            tracing::warn!("Dry run: using mock social client, no requests will be sent");
            return Ok(Arc::new(MockSocialClient::new()));
        }
        let client = RestSocialClient::new(
            &social.base_url,
            &social.access_token,
            &social.author_urn,
            Duration::from_secs(self.config.retry.call_timeout_secs),
        )
        .map_err(|e| CoreError::Configuration(format!("social client: {e}")))?;
        tracing::info!(base_url = %social.base_url, "Using REST social client");
        Ok(Arc::new(client))
    }

    /// 根据配置选择 LLM 后端（OpenAI 兼容 / Mock）
    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        let llm = &self.config.llm;
        if llm.provider.eq_ignore_ascii_case("mock") {
            tracing::warn!("Using Mock LLM");
            return Arc::new(MockLlmClient);
        }
        tracing::info!(base_url = %llm.base_url, model = %llm.model, "Using OpenAI-compatible LLM");
        Arc::new(OpenAiClient::new(&llm.base_url, &llm.model, llm.api_key.as_deref()))
    }

    pub fn build_content(&self) -> Arc<dyn ContentGenerator> {
        match &self.content {
            Some(content) => Arc::clone(content),
            None => Arc::new(LlmContentGenerator::new(self.build_llm())),
        }
    }

    /// 校验配置并构建完整的编排器
    pub fn build<Tz: TimeZone>(&self, tz: Tz) -> Result<SessionOrchestrator<Tz>, CoreError> {
        self.config.validate()?;
        Ok(SessionOrchestrator::new(
            self.config.scheduler(tz)?,
            self.build_store()?,
            self.build_social()?,
            self.build_content(),
            EngagementPlanner::new(self.config.engagement.lookback_days),
            self.config.retry_policy(),
            self.config.session_settings(),
        ))
    }

    /// 获取配置
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
