//! Oracle 回复解析
//!
//! 去掉可选的 ```json / ``` 代码围栏后按 JSON 解析；缺字段或取值未知一律返回 ResponseFormat，
//! 由 Orchestrator 将当前 Run 置为 FAILED（不重试）。
//! 评估回复例外：只要是 JSON 对象就保留 reasoning，无法识别的 decision 记为 `Invalid`，
//! 以便先把 reasoning 写入 Step 再失败。

use serde_json::{Map, Value};

use crate::core::AgentError;

/// 规划决策
#[derive(Debug, Clone, PartialEq)]
pub enum PlanDecision {
    CallTool {
        tool_name: String,
        /// 未经校验的原始参数（对象）
        inputs: Value,
        reasoning: String,
    },
    Done {
        reasoning: String,
    },
}

impl PlanDecision {
    pub fn reasoning(&self) -> &str {
        match self {
            Self::CallTool { reasoning, .. } | Self::Done { reasoning } => reasoning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationDecision {
    Continue,
    Done,
    NeedsApproval,
    Failed,
    /// 缺失或未知的 decision，附带错误描述
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: EvaluationDecision,
    /// 未给出时为 None
    pub reasoning: Option<String>,
}

/// 去掉首尾代码围栏
pub fn strip_fences(text: &str) -> &str {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```json") {
        t = rest;
    } else if let Some(rest) = t.strip_prefix("```") {
        t = rest;
    }
    if let Some(rest) = t.strip_suffix("```") {
        t = rest;
    }
    t.trim()
}

fn parse_object(text: &str) -> Result<Map<String, Value>, AgentError> {
    let body = strip_fences(text);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| AgentError::ResponseFormat(format!("invalid JSON: {e}")))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(AgentError::ResponseFormat(format!(
            "expected a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn reasoning_of(obj: &Map<String, Value>) -> Option<String> {
    obj.get("reasoning").and_then(|v| v.as_str()).map(str::to_string)
}

pub fn parse_plan(text: &str) -> Result<PlanDecision, AgentError> {
    let obj = parse_object(text)?;
    let action = obj
        .get("action")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AgentError::ResponseFormat("missing 'action'".to_string()))?;
    let reasoning = reasoning_of(&obj).unwrap_or_default();

    match action {
        "done" => Ok(PlanDecision::Done { reasoning }),
        "call_tool" => {
            let tool_name = obj
                .get("tool_name")
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| AgentError::ResponseFormat("missing 'tool_name'".to_string()))?;
            let inputs = obj
                .get("inputs")
                .filter(|v| v.is_object())
                .cloned()
                .ok_or_else(|| {
                    AgentError::ResponseFormat("call_tool requires an 'inputs' object".to_string())
                })?;
            Ok(PlanDecision::CallTool {
                tool_name: tool_name.to_string(),
                inputs,
                reasoning,
            })
        }
        other => Err(AgentError::ResponseFormat(format!("unknown action '{other}'"))),
    }
}

pub fn parse_evaluation(text: &str) -> Result<Evaluation, AgentError> {
    let obj = parse_object(text)?;
    let decision = match obj.get("decision").and_then(|v| v.as_str()) {
        Some("continue") => EvaluationDecision::Continue,
        Some("done") => EvaluationDecision::Done,
        Some("needs_approval") => EvaluationDecision::NeedsApproval,
        Some("failed") => EvaluationDecision::Failed,
        Some(other) => EvaluationDecision::Invalid(format!("unknown decision '{other}'")),
        None => EvaluationDecision::Invalid("missing 'decision'".to_string()),
    };
    Ok(Evaluation {
        decision,
        reasoning: reasoning_of(&obj),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_fences("  {}  "), "{}");
    }

    #[test]
    fn test_parse_call_tool() {
        let text = r#"```json
{"action": "call_tool", "tool_name": "search_logs", "inputs": {"query": "timeout"}, "reasoning": "check logs"}
```"#;
        match parse_plan(text).unwrap() {
            PlanDecision::CallTool { tool_name, inputs, reasoning } => {
                assert_eq!(tool_name, "search_logs");
                assert_eq!(inputs, json!({"query": "timeout"}));
                assert_eq!(reasoning, "check logs");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_done_without_reasoning() {
        assert_eq!(
            parse_plan(r#"{"action": "done"}"#).unwrap(),
            PlanDecision::Done { reasoning: String::new() }
        );
    }

    #[test]
    fn test_plan_errors() {
        let cases = [
            ("not json", "invalid JSON"),
            ("[1, 2]", "expected a JSON object"),
            (r#"{"reasoning": "x"}"#, "missing 'action'"),
            (r#"{"action": "sleep"}"#, "unknown action 'sleep'"),
            (r#"{"action": "call_tool", "inputs": {}}"#, "missing 'tool_name'"),
            (r#"{"action": "call_tool", "tool_name": "search_logs"}"#, "'inputs' object"),
            (r#"{"action": "call_tool", "tool_name": "x", "inputs": "q"}"#, "'inputs' object"),
        ];
        for (text, expected) in cases {
            match parse_plan(text) {
                Err(AgentError::ResponseFormat(msg)) => {
                    assert!(msg.contains(expected), "{text}: {msg}")
                }
                other => panic!("{text}: expected ResponseFormat, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_evaluation() {
        let e = parse_evaluation(r#"{"decision": "needs_approval", "reasoning": "ticket"}"#).unwrap();
        assert_eq!(e.decision, EvaluationDecision::NeedsApproval);
        assert_eq!(e.reasoning.as_deref(), Some("ticket"));

        let e = parse_evaluation(r#"{"decision": "failed"}"#).unwrap();
        assert_eq!(e.reasoning, None);
    }

    #[test]
    fn test_unknown_decision_keeps_reasoning() {
        let e = parse_evaluation(r#"{"decision": "maybe", "reasoning": "unsure"}"#).unwrap();
        assert_eq!(e.decision, EvaluationDecision::Invalid("unknown decision 'maybe'".into()));
        assert_eq!(e.reasoning.as_deref(), Some("unsure"));

        let e = parse_evaluation(r#"{"reasoning": "?"}"#).unwrap();
        assert_eq!(e.decision, EvaluationDecision::Invalid("missing 'decision'".into()));

        assert!(matches!(parse_evaluation("[]"), Err(AgentError::ResponseFormat(_))));
    }
}
