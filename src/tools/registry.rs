//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / schema / execute 及审批、超时、分类策略），
//! 由 ToolRegistry 按名注册与查找；validate_inputs 在落库前校验并规范化 Oracle 给出的参数，
//! ToolExecutor 在调用时加超时并统一转 AgentError。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::tools::schema::ToolSchema;

/// 工具分类（仅用于展示与日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    Observability,
    Action,
    Reporting,
    General,
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Observability => "observability",
            Self::Action => "action",
            Self::Reporting => "reporting",
            Self::General => "general",
        };
        f.write_str(s)
    }
}

/// 工具 trait：名称、描述（供 Oracle 理解）、参数 schema、策略标记、异步执行（inputs 为已校验的 JSON 对象）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（Oracle 回复中的 "tool_name"）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
    }

    /// 高风险工具返回 true，执行前需人工审批
    fn requires_approval(&self) -> bool {
        false
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::General
    }

    async fn execute(&self, inputs: Map<String, Value>) -> Result<Value, String>;
}

/// 工具目录条目（list 的返回值）
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub schema: Value,
    pub requires_approval: bool,
    pub timeout: Duration,
    pub category: ToolCategory,
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>, AgentError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))
    }

    /// 未注册的工具视为无需审批
    pub fn requires_approval(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map(|t| t.requires_approval())
            .unwrap_or(false)
    }

    /// 按名称排序的工具目录
    pub fn list(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|tool| ToolInfo {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                schema: tool.schema().to_json(),
                requires_approval: tool.requires_approval(),
                timeout: tool.timeout(),
                category: tool.category(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// 校验并规范化参数：必需参数、默认值、类型、枚举；只保留已声明的参数
    pub fn validate_inputs(&self, name: &str, raw: &Value) -> Result<Map<String, Value>, AgentError> {
        let tool = self.get(name)?;
        let schema = tool.schema();
        let inputs = raw.as_object().ok_or_else(|| {
            AgentError::Validation(format!("inputs for '{name}' must be a JSON object"))
        })?;

        for required in schema.required_names() {
            if !inputs.contains_key(required) {
                return Err(AgentError::Validation(format!(
                    "Missing required parameter: {required}"
                )));
            }
        }

        let mut validated = Map::new();
        for spec in schema.params() {
            let value = match inputs.get(&spec.name) {
                Some(v) => v.clone(),
                None => match &spec.default {
                    Some(d) => d.clone(),
                    None => continue,
                },
            };
            if !spec.ty.accepts(&value) {
                return Err(AgentError::Validation(format!(
                    "Parameter {} must be of type {}",
                    spec.name,
                    spec.ty.as_str()
                )));
            }
            if !spec.enum_values.is_empty() {
                let allowed = value
                    .as_str()
                    .map(|s| spec.enum_values.iter().any(|e| e == s))
                    .unwrap_or(false);
                if !allowed {
                    return Err(AgentError::Validation(format!(
                        "Parameter {} must be one of: {:?}",
                        spec.name, spec.enum_values
                    )));
                }
            }
            validated.insert(spec.name.clone(), value);
        }
        Ok(validated)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}
