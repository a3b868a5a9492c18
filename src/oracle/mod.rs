//! 决策 Oracle 客户端
//!
//! 对 LlmClient 的两处调用（plan / evaluate）：构建 prompt、施加请求超时、解析结构化回复。
//! 调用失败（传输错误、超时、空回复）返回 Oracle 错误；回复格式错误返回 ResponseFormat。

pub mod context;
pub mod parse;
pub mod schema;

use std::sync::Arc;
use std::time::Duration;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::store::HistoryEntry;
use crate::tools::ToolInfo;

pub use parse::{Evaluation, EvaluationDecision, PlanDecision};

/// Oracle：持有 LLM 与请求超时
pub struct DecisionOracle {
    llm: Arc<dyn LlmClient>,
    request_timeout: Duration,
}

impl DecisionOracle {
    pub fn new(llm: Arc<dyn LlmClient>, request_timeout: Duration) -> Self {
        Self { llm, request_timeout }
    }

    pub async fn plan(
        &self,
        goal: &str,
        tools: &[ToolInfo],
        history: &[HistoryEntry],
    ) -> Result<PlanDecision, AgentError> {
        let prompt = context::planning_prompt(goal, tools, history);
        let text = self.invoke(&prompt).await?;
        tracing::debug!(response = %preview(&text), "Planning response");
        parse::parse_plan(&text)
    }

    pub async fn evaluate(
        &self,
        goal: &str,
        tools: &[ToolInfo],
        history: &[HistoryEntry],
    ) -> Result<Evaluation, AgentError> {
        let prompt = context::evaluation_prompt(goal, tools, history);
        let text = self.invoke(&prompt).await?;
        tracing::debug!(response = %preview(&text), "Evaluation response");
        parse::parse_evaluation(&text)
    }

    async fn invoke(&self, prompt: &str) -> Result<String, AgentError> {
        let text = tokio::time::timeout(self.request_timeout, self.llm.complete(prompt))
            .await
            .map_err(|_| {
                AgentError::Oracle(format!("request timed out after {:?}", self.request_timeout))
            })?
            .map_err(|e| AgentError::Oracle(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(AgentError::Oracle("empty response".to_string()));
        }
        Ok(text)
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
