//! Oracle 回复格式的 JSON Schema（schemars 自动生成）
//!
//! 拼入 prompt，减少 LLM 输出格式错误；解析本身见 [`super::parse`]。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};

#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(rename_all = "snake_case")]
enum PlanAction {
    CallTool,
    Done,
}

/// 规划回复：调用一个工具，或宣布目标已完成
#[allow(dead_code)]
#[derive(JsonSchema)]
struct PlanFormat {
    /// "call_tool" 或 "done"
    action: PlanAction,
    /// action 为 call_tool 时必填：工具名
    tool_name: Option<String>,
    /// action 为 call_tool 时必填：工具参数，需包含全部必需参数
    inputs: Option<HashMap<String, serde_json::Value>>,
    /// 选择该动作的理由
    reasoning: Option<String>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(rename_all = "snake_case")]
enum EvaluationDecisionFormat {
    Continue,
    Done,
    NeedsApproval,
    Failed,
}

/// 评估回复
#[allow(dead_code)]
#[derive(JsonSchema)]
struct EvaluationFormat {
    decision: EvaluationDecisionFormat,
    reasoning: Option<String>,
}

pub fn plan_schema_json() -> String {
    serde_json::to_string_pretty(&schema_for!(PlanFormat)).unwrap_or_default()
}

pub fn evaluation_schema_json() -> String {
    serde_json::to_string_pretty(&schema_for!(EvaluationFormat)).unwrap_or_default()
}
