//! 日志检索工具
//!
//! 扫描日志目录下的 `*.log` 文件，行格式 `YYYY-MM-DD HH:MM:SS [LEVEL] message`（本地时间）。
//! 检索词支持 ` OR ` / `|` 分隔的多个备选，大小写不敏感的子串匹配；结果按时间倒序，最多返回 100 条。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::tools::schema::{ParamSpec, ParamType, ToolSchema};
use crate::tools::{Tool, ToolCategory};

const MAX_MATCHES: usize = 100;

/// 单条匹配的日志
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: NaiveDateTime,
    pub level: String,
    pub message: String,
}

impl LogEntry {
    fn to_json(&self) -> Value {
        json!({
            "timestamp": self.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "level": self.level,
            "message": self.message,
        })
    }
}

pub struct SearchLogsTool {
    logs_dir: PathBuf,
}

impl SearchLogsTool {
    pub fn new(logs_dir: impl AsRef<Path>) -> Self {
        Self {
            logs_dir: logs_dir.as_ref().to_path_buf(),
        }
    }
}

/// `1h` / `24h` / `7d`，可带 `last_` 前缀；无法识别或超出范围时按 1 小时处理
pub fn parse_time_range(range: &str) -> ChronoDuration {
    let range = range.strip_prefix("last_").unwrap_or(range);
    let parsed = if let Some(hours) = range.strip_suffix('h') {
        hours.parse::<i64>().ok().and_then(ChronoDuration::try_hours)
    } else if let Some(days) = range.strip_suffix('d') {
        days.parse::<i64>().ok().and_then(ChronoDuration::try_days)
    } else {
        None
    };
    parsed.unwrap_or_else(|| ChronoDuration::hours(1))
}

/// 拆分检索词，返回小写备选列表
pub fn search_terms(term: &str) -> Vec<String> {
    if term.contains(" OR ") || term.contains('|') {
        term.replace('|', " OR ")
            .split(" OR ")
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    } else {
        vec![term.to_lowercase()]
    }
}

fn line_pattern() -> Result<Regex, String> {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}) (\d{2}:\d{2}:\d{2}) \[?([^\]\s]+)\]? (.*)$")
        .map_err(|e| format!("Invalid log line pattern: {e}"))
}

fn parse_line(re: &Regex, line: &str) -> Option<LogEntry> {
    let caps = re.captures(line.trim())?;
    let timestamp =
        NaiveDateTime::parse_from_str(&format!("{} {}", &caps[1], &caps[2]), "%Y-%m-%d %H:%M:%S").ok()?;
    Some(LogEntry {
        timestamp,
        level: caps[3].to_string(),
        message: caps[4].to_string(),
    })
}

/// 在目录中检索，返回全部匹配（按时间倒序）
pub fn scan_logs(dir: &Path, terms: &[String], cutoff: NaiveDateTime) -> Result<Vec<LogEntry>, String> {
    if !dir.is_dir() {
        return Err(format!("Log directory not found: {}", dir.display()));
    }
    let re = line_pattern()?;
    let pattern = dir.join("*.log");
    let paths = glob::glob(&pattern.to_string_lossy()).map_err(|e| format!("Invalid glob: {e}"))?;

    let mut matches = Vec::new();
    for path in paths.filter_map(|p| p.ok()) {
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable log file");
                continue;
            }
        };
        for line in content.lines() {
            let Some(entry) = parse_line(&re, line) else {
                continue;
            };
            if entry.timestamp < cutoff {
                continue;
            }
            let message = entry.message.to_lowercase();
            if terms.iter().any(|t| message.contains(t.as_str())) {
                matches.push(entry);
            }
        }
    }
    matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(matches)
}

#[async_trait]
impl Tool for SearchLogsTool {
    fn name(&self) -> &str {
        "search_logs"
    }

    fn description(&self) -> &str {
        "Search through application logs for specific patterns or errors"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .param(ParamSpec::new(
                "query",
                ParamType::String,
                "Search term or pattern to find in logs (use query OR pattern)",
            ))
            .param(ParamSpec::new(
                "pattern",
                ParamType::String,
                "Search term or pattern to find in logs (use query OR pattern)",
            ))
            .param(
                ParamSpec::new("time_range", ParamType::String, "Time window to search (e.g., '1h', '24h', '7d')")
                    .with_default(json!("1h")),
            )
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Observability
    }

    async fn execute(&self, inputs: Map<String, Value>) -> Result<Value, String> {
        let term = inputs
            .get("query")
            .or_else(|| inputs.get("pattern"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let Some(term) = term else {
            return Ok(json!({
                "matches": [],
                "count": 0,
                "error": "Must provide either 'query' or 'pattern' parameter",
            }));
        };
        let time_range = inputs
            .get("time_range")
            .and_then(|v| v.as_str())
            .unwrap_or("1h")
            .to_string();

        let now = Local::now().naive_local();
        let cutoff = now
            .checked_sub_signed(parse_time_range(&time_range))
            .unwrap_or(NaiveDateTime::MIN);
        let terms = search_terms(&term);
        let dir = self.logs_dir.clone();
        let matches = tokio::task::spawn_blocking(move || scan_logs(&dir, &terms, cutoff))
            .await
            .map_err(|e| format!("log scan task failed: {e}"))??;

        let count = matches.len();
        let shown: Vec<Value> = matches.iter().take(MAX_MATCHES).map(LogEntry::to_json).collect();
        Ok(json!({
            "matches": shown,
            "count": count,
            "time_range": time_range,
            "search_term": term,
            "searched_at": now.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn stamp(minutes_ago: i64) -> String {
        (Local::now().naive_local() - ChronoDuration::minutes(minutes_ago))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    fn write_log(dir: &Path, name: &str, lines: &[String]) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        for l in lines {
            writeln!(f, "{l}").unwrap();
        }
    }

    #[test]
    fn test_parse_time_range() {
        assert_eq!(parse_time_range("24h"), ChronoDuration::hours(24));
        assert_eq!(parse_time_range("last_7d"), ChronoDuration::days(7));
        assert_eq!(parse_time_range("yesterday"), ChronoDuration::hours(1));
        assert_eq!(parse_time_range("xh"), ChronoDuration::hours(1));
        assert_eq!(parse_time_range("99999999999999h"), ChronoDuration::hours(1));
        assert_eq!(parse_time_range("9999999999999d"), ChronoDuration::hours(1));
    }

    #[test]
    fn test_search_terms() {
        assert_eq!(search_terms("Timeout"), vec!["timeout"]);
        assert_eq!(search_terms("error OR Timeout"), vec!["error", "timeout"]);
        assert_eq!(search_terms("500|502"), vec!["500", "502"]);
    }

    #[tokio::test]
    async fn test_search_filters_window_and_sorts_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        write_log(
            dir.path(),
            "app.log",
            &[
                format!("{} [ERROR] Database timeout on orders", stamp(30)),
                format!("{} [INFO] request ok", stamp(20)),
                format!("{} [ERROR] old timeout", stamp(600)),
                "garbage line".to_string(),
            ],
        );
        write_log(dir.path(), "api.log", &[format!("{} [WARN] upstream TIMEOUT", stamp(5))]);
        write_log(dir.path(), "notes.txt", &[format!("{} [ERROR] timeout in txt", stamp(1))]);

        let tool = SearchLogsTool::new(dir.path());
        let mut inputs = Map::new();
        inputs.insert("query".into(), json!("timeout"));
        inputs.insert("time_range".into(), json!("1h"));
        let out = tool.execute(inputs).await.unwrap();

        assert_eq!(out["count"], 2);
        let matches = out["matches"].as_array().unwrap();
        assert_eq!(matches[0]["level"], "WARN");
        assert_eq!(matches[1]["message"], "Database timeout on orders");
    }

    #[tokio::test]
    async fn test_missing_term_is_reported_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let out = SearchLogsTool::new(dir.path()).execute(Map::new()).await.unwrap();
        assert_eq!(out["count"], 0);
        assert!(out["error"].as_str().unwrap().contains("query"));
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let tool = SearchLogsTool::new("/nonexistent/opspilot/logs");
        let mut inputs = Map::new();
        inputs.insert("pattern".into(), json!("error"));
        assert!(tool.execute(inputs).await.is_err());
    }

    #[tokio::test]
    async fn test_caps_at_limit_but_counts_all() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<String> = (0..120).map(|i| format!("{} [ERROR] error {i}", stamp(1))).collect();
        write_log(dir.path(), "big.log", &lines);

        let mut inputs = Map::new();
        inputs.insert("query".into(), json!("error"));
        let out = SearchLogsTool::new(dir.path()).execute(inputs).await.unwrap();
        assert_eq!(out["count"], 120);
        assert_eq!(out["matches"].as_array().unwrap().len(), MAX_MATCHES);
    }
}
