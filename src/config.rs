//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CADENCE__*` 覆盖
//! （双下划线表示嵌套，如 `CADENCE__ENGAGEMENT__COMMENT_BUDGET=10`）。
//! 所有字段都有默认值，空文件即可得到可用配置；
//! `validate` 在启动时把不合法的配置转为 `CoreError::Configuration`。

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{NaiveTime, TimeZone, Weekday};
use serde::Deserialize;

use crate::core::{CoreError, RetryPolicy, Scheduler, SessionSettings};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub schedule: ScheduleSection,
    pub engagement: EngagementSection,
    pub rate_limit: RateLimitSection,
    pub retry: RetrySection,
    pub storage: StorageSection,
    pub social: SocialSection,
    pub llm: LlmSection,
    pub content: ContentSection,
}

/// 会话时间窗口（本地时间）
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSection {
    #[serde(default = "default_weekdays")]
    pub weekdays: Vec<String>,
    /// "HH:MM"
    #[serde(default = "default_window_start")]
    pub window_start: String,
    #[serde(default = "default_main_post_offset_mins")]
    pub main_post_offset_mins: u32,
    #[serde(default = "default_window_end")]
    pub window_end: String,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_tick_timeout_secs")]
    pub tick_timeout_secs: u64,
    /// 窗口结束后无进展多久判定为中止
    #[serde(default = "default_stall_timeout_mins")]
    pub stall_timeout_mins: u32,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            weekdays: default_weekdays(),
            window_start: default_window_start(),
            main_post_offset_mins: default_main_post_offset_mins(),
            window_end: default_window_end(),
            tick_interval_secs: default_tick_interval_secs(),
            tick_timeout_secs: default_tick_timeout_secs(),
            stall_timeout_mins: default_stall_timeout_mins(),
        }
    }
}

fn default_weekdays() -> Vec<String> {
    vec!["wed".to_string(), "sat".to_string()]
}

fn default_window_start() -> String {
    "09:00".to_string()
}

fn default_main_post_offset_mins() -> u32 {
    30
}

fn default_window_end() -> String {
    "10:00".to_string()
}

fn default_tick_interval_secs() -> u64 {
    30
}

fn default_tick_timeout_secs() -> u64 {
    2400
}

fn default_stall_timeout_mins() -> u32 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngagementSection {
    #[serde(default = "default_top_connections")]
    pub top_connections: usize,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_like_budget")]
    pub like_budget: u32,
    #[serde(default = "default_comment_budget")]
    pub comment_budget: u32,
    /// 发布前阶段可用的预算比例（百分比）
    #[serde(default = "default_pre_engagement_share_pct")]
    pub pre_engagement_share_pct: u32,
}

impl Default for EngagementSection {
    fn default() -> Self {
        Self {
            top_connections: default_top_connections(),
            lookback_days: default_lookback_days(),
            like_budget: default_like_budget(),
            comment_budget: default_comment_budget(),
            pre_engagement_share_pct: default_pre_engagement_share_pct(),
        }
    }
}

fn default_top_connections() -> usize {
    50
}

fn default_lookback_days() -> u32 {
    7
}

fn default_like_budget() -> u32 {
    50
}

fn default_comment_budget() -> u32 {
    25
}

fn default_pre_engagement_share_pct() -> u32 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
    #[serde(default = "default_max_calls_per_session")]
    pub max_calls_per_session: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval_secs(),
            max_calls_per_session: default_max_calls_per_session(),
        }
    }
}

fn default_min_interval_secs() -> u64 {
    30
}

fn default_max_calls_per_session() -> u32 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 单次社交网络调用超时
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_call_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// 仅用内存存储（重启即丢失，测试 / 演示用）
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            in_memory: false,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/cadence.db")
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocialSection {
    #[serde(default = "default_social_base_url")]
    pub base_url: String,
    /// 一般通过 `CADENCE__SOCIAL__ACCESS_TOKEN` 注入
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub author_urn: String,
    /// 使用 Mock 客户端，不发出任何网络请求
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for SocialSection {
    fn default() -> Self {
        Self {
            base_url: default_social_base_url(),
            access_token: String::new(),
            author_urn: String::new(),
            dry_run: false,
        }
    }
}

fn default_social_base_url() -> String {
    "https://api.linkedin.com/v2".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// "openai"（任意 OpenAI 兼容端点，含本地 Ollama）或 "mock"
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_llm_base_url(),
            model: default_model(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_llm_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_model() -> String {
    "mistral:7b-instruct-v0.3-q4_0".to_string()
}

fn default_request_timeout_secs() -> u64 {
    180
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentSection {
    /// 按会话星期位置轮流取用
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
}

impl Default for ContentSection {
    fn default() -> Self {
        Self {
            topics: default_topics(),
        }
    }
}

fn default_topics() -> Vec<String> {
    [
        "Artificial Intelligence and Machine Learning trends",
        "Digital transformation in business",
        "Remote work productivity tips",
        "Leadership and team management",
        "Industry insights and market analysis",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn config_error(msg: impl Into<String>) -> CoreError {
    CoreError::Configuration(msg.into())
}

fn parse_time(field: &str, value: &str) -> Result<NaiveTime, CoreError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| config_error(format!("schedule.{field} = {value:?} is not HH:MM ({e})")))
}

impl AppConfig {
    /// 启动时校验；任何错误都是致命的，不重试
    pub fn validate(&self) -> Result<(), CoreError> {
        let weekdays = self.weekdays()?;
        let start = parse_time("window_start", &self.schedule.window_start)?;
        let end = parse_time("window_end", &self.schedule.window_end)?;
        if start >= end {
            return Err(config_error(format!(
                "schedule.window_start ({start}) must be before window_end ({end})"
            )));
        }
        let (main_post, overflow) = start.overflowing_add_signed(chrono::Duration::minutes(
            i64::from(self.schedule.main_post_offset_mins),
        ));
        if overflow != 0 || main_post >= end {
            return Err(config_error(format!(
                "schedule.main_post_offset_mins ({}) puts the main post outside the window",
                self.schedule.main_post_offset_mins
            )));
        }
        if weekdays.is_empty() {
            return Err(config_error("schedule.weekdays must not be empty"));
        }
        if self.schedule.tick_interval_secs == 0 || self.schedule.tick_timeout_secs == 0 {
            return Err(config_error("schedule tick interval and timeout must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error("retry.max_attempts must be at least 1"));
        }
        let worst_case = self.session_settings().worst_case_tick(&self.retry_policy());
        if self.tick_timeout() < worst_case {
            return Err(config_error(format!(
                "schedule.tick_timeout_secs ({}) is shorter than the worst-case tick; \
                 raise it to at least {}",
                self.schedule.tick_timeout_secs,
                worst_case.as_secs_f64().ceil() as u64
            )));
        }
        if self.rate_limit.max_calls_per_session == 0 {
            return Err(config_error("rate_limit.max_calls_per_session must be at least 1"));
        }
        if self.engagement.pre_engagement_share_pct > 100 {
            return Err(config_error("engagement.pre_engagement_share_pct must be within 0..=100"));
        }
        let missing_credentials = self.social.access_token.trim().is_empty()
            || self.social.author_urn.trim().is_empty();
        if !self.social.dry_run && missing_credentials {
            return Err(config_error(
                "social.access_token and social.author_urn are required \
                 unless social.dry_run is set",
            ));
        }
        match self.llm.provider.to_lowercase().as_str() {
            "openai" | "mock" => {}
            other => return Err(config_error(format!("unknown llm.provider {other:?}"))),
        }
        Ok(())
    }

    /// 解析星期列表（mon / monday，大小写不敏感），拒绝未知名称与重复
    pub fn weekdays(&self) -> Result<Vec<Weekday>, CoreError> {
        let mut seen = HashSet::new();
        self.schedule
            .weekdays
            .iter()
            .map(|name| {
                let day = name
                    .trim()
                    .parse::<Weekday>()
                    .map_err(|_| config_error(format!("unknown weekday {name:?}")))?;
                if !seen.insert(day) {
                    return Err(config_error(format!("duplicate weekday {name:?}")));
                }
                Ok(day)
            })
            .collect()
    }

    pub fn scheduler<Tz: TimeZone>(&self, tz: Tz) -> Result<Scheduler<Tz>, CoreError> {
        Ok(Scheduler::new(
            tz,
            self.weekdays()?,
            parse_time("window_start", &self.schedule.window_start)?,
            chrono::Duration::minutes(i64::from(self.schedule.main_post_offset_mins)),
            parse_time("window_end", &self.schedule.window_end)?,
        ))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
        )
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            top_connections: self.engagement.top_connections,
            like_budget: self.engagement.like_budget,
            comment_budget: self.engagement.comment_budget,
            pre_engagement_share_pct: self.engagement.pre_engagement_share_pct,
            min_interval: chrono::Duration::seconds(
                i64::try_from(self.rate_limit.min_interval_secs).unwrap_or(i64::MAX / 1000),
            ),
            max_calls_per_session: self.rate_limit.max_calls_per_session,
            call_timeout: Duration::from_secs(self.retry.call_timeout_secs),
            generation_timeout: Duration::from_secs(self.llm.request_timeout_secs),
            stall_timeout: chrono::Duration::minutes(i64::from(self.schedule.stall_timeout_mins)),
            topics: self.content.topics.clone(),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.tick_interval_secs)
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.schedule.tick_timeout_secs)
    }
}

/// 从默认路径与环境变量加载配置
///
/// 默认文件依次查找 `config/default.toml`、`../config/default.toml`、`default.toml`，
/// 取第一个存在的；
/// 再叠加显式指定的文件与 `CADENCE__*` 环境变量。
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CADENCE")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("schedule.weekdays")
            .with_list_parse_key("content.topics"),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
