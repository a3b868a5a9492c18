//! Oracle prompt 构建
//!
//! 规划 prompt：目标 + 工具目录（带审批标记）+ 已完成工具调用的一行摘要 + 回复 Schema。
//! 评估 prompt：目标 + 全部工具调用的输入输出（审批工具标注 REQUIRES APPROVAL）+ 回复 Schema。

use std::collections::HashSet;

use serde_json::Value;

use super::schema::{evaluation_schema_json, plan_schema_json};
use crate::store::HistoryEntry;
use crate::tools::ToolInfo;

pub const NO_HISTORY: &str = "None yet";
pub const EVALUATION_HEADER: &str = "You are evaluating progress on this goal:";
const APPROVAL_NOTE: &str = " (REQUIRES APPROVAL)";

/// 工具输出的一行摘要
pub fn summarize_output(outputs: &Value) -> String {
    if let Some(count) = outputs.get("count") {
        return format!("{} results", count.as_i64().unwrap_or(0));
    }
    if let Some(agg) = outputs.get("aggregates") {
        let avg = agg.get("avg").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let max = agg.get("max").and_then(|v| v.as_f64()).unwrap_or(0.0);
        return format!("avg={avg:.2}, max={max:.2}");
    }
    if let Some(id) = outputs.get("ticket_id").and_then(|v| v.as_str()) {
        return format!("Created {id}");
    }
    if let Some(n) = outputs.get("findings_count") {
        return format!("{} findings", n.as_i64().unwrap_or(0));
    }
    "Success".to_string()
}

fn tool_catalog(tools: &[ToolInfo]) -> String {
    tools
        .iter()
        .map(|t| {
            let note = if t.requires_approval { APPROVAL_NOTE } else { "" };
            format!("- {}{}: {}", t.name, note, t.description)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn planning_prompt(goal: &str, tools: &[ToolInfo], history: &[HistoryEntry]) -> String {
    let steps: Vec<String> = history
        .iter()
        .filter_map(|h| {
            h.tool_call.outputs.as_ref().map(|out| {
                format!(
                    "Step {}: Called {}, result summary: {}",
                    h.step_number,
                    h.tool_call.tool_name,
                    summarize_output(out)
                )
            })
        })
        .collect();
    let steps_text = if steps.is_empty() {
        NO_HISTORY.to_string()
    } else {
        steps.join("\n")
    };

    format!(
        r#"You are an ops automation agent. Your goal is:

{goal}

Available tools:
{catalog}

Previous steps:
{steps_text}

What should you do next? If you need to call a tool, answer with action "call_tool",
the tool_name, the inputs object (include all required parameters) and your reasoning.
If the goal is achieved, answer with action "done" and your reasoning.
For generate_report, "findings" must be an array of objects like
[{{"type": "log", "summary": "No errors found", "details": {{"count": 0}}}}], not a string.

Your answer must match this JSON schema:
{schema}

Respond with ONLY a single JSON object, no prose and no other text."#,
        catalog = tool_catalog(tools),
        schema = plan_schema_json(),
    )
}

pub fn evaluation_prompt(goal: &str, tools: &[ToolInfo], history: &[HistoryEntry]) -> String {
    let gated: HashSet<&str> = tools
        .iter()
        .filter(|t| t.requires_approval)
        .map(|t| t.name.as_str())
        .collect();
    let steps: Vec<String> = history
        .iter()
        .map(|h| {
            let tc = &h.tool_call;
            let note = if gated.contains(tc.tool_name.as_str()) { APPROVAL_NOTE } else { "" };
            let outputs = tc
                .outputs
                .as_ref()
                .map(|o| o.to_string())
                .unwrap_or_else(|| "N/A".to_string());
            format!(
                "Step {}: {}{}\nInputs: {}\nOutputs: {}\n",
                h.step_number,
                tc.tool_name,
                note,
                Value::Object(tc.inputs.clone()),
                outputs
            )
        })
        .collect();
    let steps_text = if steps.is_empty() {
        "None".to_string()
    } else {
        steps.join("\n")
    };

    format!(
        r#"{EVALUATION_HEADER}

{goal}

Steps executed so far:
{steps_text}

Has the goal been achieved? Choose one decision:
- "done": the goal is complete
- "continue": more tools need to be called
- "needs_approval": a tool marked "(REQUIRES APPROVAL)" was just executed and a human must confirm
- "failed": the goal cannot be achieved
Include your reasoning.

Your answer must match this JSON schema:
{schema}

Respond with ONLY a single JSON object, no prose and no other text."#,
        schema = evaluation_schema_json(),
    )
}
