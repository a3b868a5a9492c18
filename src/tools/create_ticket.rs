//! 工单创建工具（高风险，执行前需人工审批）
//!
//! 每张工单写成工单目录下的 `TICKET-XXXXXXXX.json`。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::tools::schema::{ParamSpec, ParamType, ToolSchema};
use crate::tools::{Tool, ToolCategory};

const SEVERITIES: [&str; 4] = ["critical", "high", "medium", "low"];

pub struct CreateTicketTool {
    tickets_dir: PathBuf,
}

impl CreateTicketTool {
    pub fn new(tickets_dir: impl AsRef<Path>) -> Self {
        Self {
            tickets_dir: tickets_dir.as_ref().to_path_buf(),
        }
    }
}

fn new_ticket_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("TICKET-{}", hex[..8].to_uppercase())
}

#[async_trait]
impl Tool for CreateTicketTool {
    fn name(&self) -> &str {
        "create_ticket"
    }

    fn description(&self) -> &str {
        "Create a new incident ticket (HIGH-RISK: requires approval)"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .param(ParamSpec::new("title", ParamType::String, "Brief, actionable title for the ticket").required())
            .param(
                ParamSpec::new(
                    "description",
                    ParamType::String,
                    "Detailed description with evidence, timeline, and impact",
                )
                .required(),
            )
            .param(
                ParamSpec::new("severity", ParamType::String, "Severity level (use severity OR priority)")
                    .one_of(&SEVERITIES),
            )
            .param(
                ParamSpec::new("priority", ParamType::String, "Priority level (use severity OR priority)")
                    .one_of(&SEVERITIES),
            )
            .param(ParamSpec::new("tags", ParamType::Array, "Optional categorization tags"))
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Action
    }

    async fn execute(&self, inputs: Map<String, Value>) -> Result<Value, String> {
        let title = inputs
            .get("title")
            .and_then(|v| v.as_str())
            .ok_or("Missing title")?;
        let description = inputs
            .get("description")
            .and_then(|v| v.as_str())
            .ok_or("Missing description")?;
        let severity = inputs
            .get("severity")
            .or_else(|| inputs.get("priority"))
            .and_then(|v| v.as_str())
            .filter(|s| SEVERITIES.contains(s))
            .unwrap_or("medium");
        let tags = inputs.get("tags").cloned().unwrap_or_else(|| json!([]));

        let ticket_id = new_ticket_id();
        let created_at = Utc::now().to_rfc3339();
        let ticket = json!({
            "ticket_id": ticket_id,
            "title": title,
            "description": description,
            "severity": severity,
            "tags": tags,
            "status": "open",
            "created_at": created_at,
            "created_by": "opspilot-agent",
        });

        tokio::fs::create_dir_all(&self.tickets_dir)
            .await
            .map_err(|e| format!("Failed to create {}: {e}", self.tickets_dir.display()))?;
        let path = self.tickets_dir.join(format!("{ticket_id}.json"));
        let body = serde_json::to_string_pretty(&ticket).map_err(|e| e.to_string())?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| format!("Failed to write {}: {e}", path.display()))?;

        tracing::info!(ticket_id = %ticket_id, severity, "Ticket created");
        Ok(json!({
            "ticket_id": ticket_id,
            "title": title,
            "created_at": created_at,
            "severity": severity,
            "status": "open",
            "file_path": path.display().to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_id_format() {
        let id = new_ticket_id();
        assert!(id.starts_with("TICKET-"));
        assert_eq!(id.len(), 15);
        assert_eq!(id[7..].to_uppercase(), id[7..]);
    }

    #[tokio::test]
    async fn test_writes_ticket_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = CreateTicketTool::new(dir.path().join("tickets"));
        let mut inputs = Map::new();
        inputs.insert("title".into(), json!("DB pool exhausted"));
        inputs.insert("description".into(), json!("Connection timeouts since 10:00"));
        inputs.insert("priority".into(), json!("high"));

        let out = tool.execute(inputs).await.unwrap();
        assert_eq!(out["severity"], "high");
        assert_eq!(out["status"], "open");

        let path = out["file_path"].as_str().unwrap();
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(saved["ticket_id"], out["ticket_id"]);
        assert_eq!(saved["tags"], json!([]));
    }

    #[tokio::test]
    async fn test_invalid_severity_falls_back_to_medium() {
        let dir = tempfile::tempdir().unwrap();
        let tool = CreateTicketTool::new(dir.path());
        let mut inputs = Map::new();
        inputs.insert("title".into(), json!("t"));
        inputs.insert("description".into(), json!("d"));
        inputs.insert("severity".into(), json!("urgent"));
        let out = tool.execute(inputs).await.unwrap();
        assert_eq!(out["severity"], "medium");
    }

    #[test]
    fn test_policy() {
        let tool = CreateTicketTool::new("/tmp");
        assert!(tool.requires_approval());
        assert_eq!(tool.timeout(), Duration::from_secs(10));
        assert_eq!(tool.category(), ToolCategory::Action);
    }
}
