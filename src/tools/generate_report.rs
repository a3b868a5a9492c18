//! 调查报告工具：把 findings 渲染成 Markdown

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::tools::schema::{ParamSpec, ParamType, ToolSchema};
use crate::tools::{Tool, ToolCategory};

pub struct GenerateReportTool;

fn finding_type(f: &Value) -> &str {
    f.get("type").and_then(|v| v.as_str()).unwrap_or("observation")
}

fn detail_str(details: &Value, key: &str) -> String {
    match details.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => "unknown".to_string(),
    }
}

fn detail_f64(details: &Value, key: &str) -> f64 {
    details.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
}

/// 两三句话的概览
pub fn summarize(findings: &[Value]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for f in findings {
        *counts.entry(finding_type(f)).or_default() += 1;
    }

    let mut parts = Vec::new();
    if let Some(n) = counts.get("log") {
        parts.push(format!("{n} log-related findings"));
    }
    if let Some(n) = counts.get("metric") {
        parts.push(format!("{n} metric anomalies"));
    }
    if let Some(n) = counts.get("ticket") {
        parts.push(format!("{n} ticket(s) created"));
    }

    let mut summary = if parts.is_empty() {
        "Investigation completed. ".to_string()
    } else {
        format!("Investigation identified {}. ", parts.join(", "))
    };

    let severities: Vec<&str> = findings
        .iter()
        .filter(|f| finding_type(f) == "ticket")
        .filter_map(|f| f.get("details").and_then(|d| d.get("severity")).and_then(|s| s.as_str()))
        .collect();
    if counts.contains_key("ticket") {
        if severities.iter().any(|s| *s == "critical" || *s == "high") {
            summary.push_str("Immediate action recommended.");
        } else {
            summary.push_str("Follow-up investigation recommended.");
        }
    }
    summary
}

pub fn render(findings: &[Value]) -> Value {
    if findings.is_empty() {
        return json!({
            "report": "# Investigation Report\n\nNo findings to report.",
            "summary": "No significant findings.",
            "findings_count": 0,
        });
    }

    let summary = summarize(findings);
    let mut lines = vec![
        "# OpsPilot Investigation Report".to_string(),
        format!("\n**Generated:** {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC")),
        format!("\n**Findings:** {}", findings.len()),
        "\n---\n".to_string(),
        "## Executive Summary\n".to_string(),
        summary.clone(),
        "\n---\n".to_string(),
        "## Detailed Findings\n".to_string(),
    ];

    let empty = json!({});
    for (i, finding) in findings.iter().enumerate() {
        let kind = finding_type(finding);
        let title = finding
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("No summary provided");
        let details = finding.get("details").unwrap_or(&empty);
        lines.push(format!("### {}. {}: {}\n", i + 1, kind.to_uppercase(), title));

        match kind {
            "log" => {
                lines.push(format!("- **Occurrences:** {}", details.get("count").and_then(|v| v.as_i64()).unwrap_or(0)));
                lines.push(format!("- **Time Range:** {}", detail_str(details, "time_range")));
                if let Some(samples) = details.get("sample_messages").and_then(|v| v.as_array()) {
                    lines.push("- **Sample Messages:**".to_string());
                    for msg in samples.iter().take(3) {
                        let text = msg.as_str().map(str::to_string).unwrap_or_else(|| msg.to_string());
                        lines.push(format!("  - `{text}`"));
                    }
                }
            }
            "metric" => {
                let agg = details.get("aggregates").unwrap_or(&empty);
                lines.push(format!("- **Metric:** {}", detail_str(details, "metric")));
                lines.push(format!("- **Average:** {:.2}", detail_f64(agg, "avg")));
                lines.push(format!("- **Peak:** {:.2}", detail_f64(agg, "max")));
                lines.push(format!("- **P95:** {:.2}", detail_f64(agg, "p95")));
            }
            "ticket" => {
                lines.push(format!("- **Ticket ID:** {}", detail_str(details, "ticket_id")));
                lines.push(format!("- **Severity:** {}", detail_str(details, "severity")));
            }
            _ => {}
        }
        lines.push(String::new());
    }

    let tickets: Vec<&Value> = findings.iter().filter(|f| finding_type(f) == "ticket").collect();
    if !tickets.is_empty() {
        lines.push("---\n".to_string());
        lines.push("## Actions Taken\n".to_string());
        for t in tickets {
            let details = t.get("details").unwrap_or(&empty);
            lines.push(format!("- Created {} for investigation", detail_str(details, "ticket_id")));
        }
    }

    json!({
        "report": lines.join("\n"),
        "summary": summary,
        "findings_count": findings.len(),
    })
}

#[async_trait]
impl Tool for GenerateReportTool {
    fn name(&self) -> &str {
        "generate_report"
    }

    fn description(&self) -> &str {
        "Generate a markdown investigation report from findings"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().param(
            ParamSpec::new(
                "findings",
                ParamType::Array,
                "List of findings like [{\"type\": \"log\", \"summary\": \"...\", \"details\": {\"count\": 0}}]",
            )
            .required(),
        )
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(20)
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Reporting
    }

    async fn execute(&self, inputs: Map<String, Value>) -> Result<Value, String> {
        let findings = inputs
            .get("findings")
            .and_then(|v| v.as_array())
            .ok_or("findings must be an array")?;
        Ok(render(findings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_findings() {
        let out = render(&[]);
        assert_eq!(out["findings_count"], 0);
        assert_eq!(out["summary"], "No significant findings.");
    }

    #[test]
    fn test_report_sections() {
        let findings = vec![
            json!({"type": "log", "summary": "Timeouts spiking", "details": {"count": 42, "time_range": "1h", "sample_messages": ["a", "b", "c", "d"]}}),
            json!({"type": "metric", "summary": "CPU high", "details": {"metric": "cpu_usage", "aggregates": {"avg": 71.234, "max": 99.0, "p95": 97.5}}}),
            json!({"type": "ticket", "summary": "Filed", "details": {"ticket_id": "TICKET-ABCD1234", "severity": "high"}}),
        ];
        let out = render(&findings);
        let report = out["report"].as_str().unwrap();
        assert!(report.contains("### 1. LOG: Timeouts spiking"));
        assert!(report.contains("- **Occurrences:** 42"));
        assert!(!report.contains("`d`"));
        assert!(report.contains("- **Average:** 71.23"));
        assert!(report.contains("## Actions Taken"));
        assert!(report.contains("- Created TICKET-ABCD1234 for investigation"));
        assert_eq!(out["findings_count"], 3);
        assert_eq!(
            out["summary"],
            "Investigation identified 1 log-related findings, 1 metric anomalies, 1 ticket(s) created. Immediate action recommended."
        );
    }

    #[test]
    fn test_summary_without_known_types() {
        assert_eq!(summarize(&[json!({"summary": "note"})]), "Investigation completed. ");
    }
}
