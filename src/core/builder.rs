//! Orchestrator 构建器：统一的初始化逻辑
//!
//! CLI 与测试共用：按配置注册工具、选择 LLM 后端、打开 RunStore 并让重试计数共用同一连接。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::retry::{RetryCoordinator, SqliteRetryStore};
use crate::core::{AgentError, Orchestrator};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::oracle::DecisionOracle;
use crate::store::RunStore;
use crate::tools::{CreateTicketTool, GenerateReportTool, QueryMetricsTool, SearchLogsTool, ToolRegistry};

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    match cfg.llm.provider.to_lowercase().as_str() {
        "openai" if std::env::var("OPENAI_API_KEY").is_ok() => {
            tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
            Ok(Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                None,
            )))
        }
        "openai" => {
            tracing::warn!("OPENAI_API_KEY not set, using Mock LLM");
            Ok(Arc::new(MockLlmClient))
        }
        "mock" => {
            tracing::info!("Using Mock LLM");
            Ok(Arc::new(MockLlmClient))
        }
        other => Err(AgentError::Config(format!(
            "unknown LLM provider '{other}' (expected openai or mock)"
        ))),
    }
}

/// 构建器：可替换 LLM 与 RunStore（测试注入脚本化 LLM 和内存库）
pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    store: Option<RunStore>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            store: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    /// 内置的四个运维工具
    pub fn build_tool_registry(&self) -> ToolRegistry {
        let tools_cfg = &self.config.tools;
        let mut tools = ToolRegistry::new();
        tools.register(SearchLogsTool::new(&tools_cfg.logs_dir));
        tools.register(QueryMetricsTool::new(&tools_cfg.metrics_file));
        tools.register(CreateTicketTool::new(&tools_cfg.tickets_dir));
        tools.register(GenerateReportTool);
        tools
    }

    pub fn build(self) -> Result<Orchestrator, AgentError> {
        let registry = Arc::new(self.build_tool_registry());
        let store = match self.store {
            Some(store) => store,
            None => RunStore::open(&self.config.app.database_path)?,
        };
        let llm = match self.llm {
            Some(llm) => llm,
            None => create_llm_from_config(&self.config)?,
        };
        tracing::debug!(model = llm.model_name(), tools = ?registry.tool_names(), "Building orchestrator");

        let oracle = DecisionOracle::new(
            llm,
            Duration::from_secs(self.config.llm.request_timeout_secs.max(1)),
        );
        let retry_store = SqliteRetryStore::new(store.shared_connection())?;
        let retry = RetryCoordinator::new(Arc::new(retry_store), self.config.agent.retry_policy());

        Ok(Orchestrator::new(
            store,
            registry,
            oracle,
            retry,
            self.config.agent.orchestrator_settings(),
        ))
    }
}
