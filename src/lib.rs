//! Cadence - 定时社交网络会话自动化
//!
//! 在配置的星期与本地时间窗口内，按「发布前互动 → 发布主帖 → 发布后互动」推进一次会话，
//! 限速、重试、可在重启后无重复地继续。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）与校验
//! - **core**: 调度、限速、重试、恢复、会话编排、后台循环与优雅关闭
//! - **engagement**: 候选拉取与互动计划
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）、内容生成
//! - **observability**: 日志初始化
//! - **session**: 会话数据模型与持久化（内存 / SQLite）
//! - **social**: 社交网络客户端抽象与实现（REST / Mock）

pub mod config;
pub mod core;
pub mod engagement;
pub mod llm;
pub mod observability;
pub mod session;
pub mod social;
