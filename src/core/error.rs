//! Agent 错误类型
//!
//! 按处理方式分组：Oracle / ResponseFormat / Validation 直接把当前 Run 置为 FAILED；
//! ToolExecution / ToolTimeout 由重试协调器重试，超过上限后置为 FAILED；
//! InvalidTransition 与 Store 属于意外错误，记录 FAILED 后向调用方返回。

use thiserror::Error;

use crate::core::State;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 状态机拒绝的迁移（附带当前状态允许的目标集合）
    #[error("Invalid transition: {from} -> {to} (allowed from {from}: {allowed:?})")]
    InvalidTransition {
        from: State,
        to: State,
        allowed: Vec<State>,
    },

    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Tool '{tool}' timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    /// Oracle 不可达、请求超时或返回空内容
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// Oracle 返回内容无法解析或缺少必需字段
    #[error("Response format error: {0}")]
    ResponseFormat(String),

    #[error("Run {0} not found")]
    RunNotFound(i64),

    #[error("Run {run_id} is not awaiting approval (status: {status})")]
    NotAwaitingApproval { run_id: i64, status: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 只有工具执行类错误会进入重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ToolExecution(_) | Self::ToolTimeout { .. })
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(format!("json: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_tool_failures_are_retryable() {
        assert!(AgentError::ToolExecution("boom".into()).is_retryable());
        assert!(AgentError::ToolTimeout { tool: "search_logs".into(), secs: 30 }.is_retryable());
        assert!(!AgentError::Oracle("down".into()).is_retryable());
        assert!(!AgentError::ResponseFormat("bad json".into()).is_retryable());
        assert!(!AgentError::Validation("missing title".into()).is_retryable());
    }

    #[test]
    fn test_invalid_transition_message_names_allowed_set() {
        let err = AgentError::InvalidTransition {
            from: State::Plan,
            to: State::Evaluate,
            allowed: vec![State::ExecuteTool, State::Done, State::Failed],
        };
        let msg = err.to_string();
        assert!(msg.contains("plan -> evaluate"));
        assert!(msg.contains("ExecuteTool"));
    }
}
