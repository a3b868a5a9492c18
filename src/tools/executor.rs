//! 工具执行器
//!
//! 持有共享的 ToolRegistry，execute_with_timeout 把工具放到独立的 tokio 任务中运行并施加超时；
//! 超时时 abort 该任务（工具内部的阻塞代码无法被抢占，只是不再等待其结果），
//! 工具返回 Err 或 panic 转为 ToolExecution；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::ToolRegistry;

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// 使用工具自身声明的超时执行
    pub async fn execute(&self, tool_name: &str, inputs: Map<String, Value>) -> Result<Value, AgentError> {
        let limit = self.registry.get(tool_name)?.timeout();
        self.execute_with_timeout(tool_name, inputs, limit).await
    }

    /// 执行指定工具；超时返回 ToolTimeout，工具返回 Err 或 panic 转为 ToolExecution；输出 JSON 审计日志
    pub async fn execute_with_timeout(
        &self,
        tool_name: &str,
        inputs: Map<String, Value>,
        limit: Duration,
    ) -> Result<Value, AgentError> {
        let tool = self.registry.get(tool_name)?;
        let start = Instant::now();
        let args_preview = args_preview(&inputs);

        let mut handle = tokio::spawn(async move { tool.execute(inputs).await });
        let result = match timeout(limit, &mut handle).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(AgentError::ToolExecution(e)),
            Ok(Err(join_err)) => Err(AgentError::ToolExecution(if join_err.is_panic() {
                format!("tool '{tool_name}' panicked")
            } else {
                format!("tool '{tool_name}' was cancelled")
            })),
            Err(_) => {
                handle.abort();
                Err(AgentError::ToolTimeout {
                    tool: tool_name.to_string(),
                    secs: limit.as_secs(),
                })
            }
        };

        let (ok, outcome): (bool, &str) = match &result {
            Ok(_) => (true, "ok"),
            Err(AgentError::ToolTimeout { .. }) => (false, "timeout"),
            Err(_) => (false, "error"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }
}

fn args_preview(args: &Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
