//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `OPSPILOT__*` 覆盖（双下划线表示嵌套，如 `OPSPILOT__LLM__PROVIDER=mock`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{OrchestratorSettings, RetryPolicy};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// SQLite 数据库文件
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/opspilot.db")
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai / mock；openai 但没有 OPENAI_API_KEY 时回退到 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// [agent] 段：循环上限、重试策略、并发
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: i64,
    /// 单个工具调用最多派发次数（含首次）
    #[serde(default = "default_max_tool_attempts")]
    pub max_tool_attempts: u32,
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    /// 重试计数的存活时间
    #[serde(default = "default_retry_ttl_secs")]
    pub retry_ttl_secs: u64,
    /// 同时推进的 Run 数
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_tool_attempts: default_max_tool_attempts(),
            backoff_unit_ms: default_backoff_unit_ms(),
            retry_ttl_secs: default_retry_ttl_secs(),
            workers: default_workers(),
        }
    }
}

fn default_max_steps() -> i64 {
    10
}

fn default_max_tool_attempts() -> u32 {
    3
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_retry_ttl_secs() -> u64 {
    3600
}

fn default_workers() -> usize {
    4
}

impl AgentSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_tool_attempts.max(1),
            ttl: Duration::from_secs(self.retry_ttl_secs),
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_steps: self.max_steps.max(1),
        }
    }
}

/// [tools] 段：各工具读写的目录 / 文件
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default = "default_metrics_file")]
    pub metrics_file: PathBuf,
    #[serde(default = "default_tickets_dir")]
    pub tickets_dir: PathBuf,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            logs_dir: default_logs_dir(),
            metrics_file: default_metrics_file(),
            tickets_dir: default_tickets_dir(),
        }
    }
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("data/logs")
}

fn default_metrics_file() -> PathBuf {
    PathBuf::from("data/metrics/metrics.json")
}

fn default_tickets_dir() -> PathBuf {
    PathBuf::from("data/tickets")
}

/// 加载配置：config/default.toml（若存在）→ 指定文件（若存在）→ OPSPILOT__* 环境变量
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, ignoring", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("OPSPILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
