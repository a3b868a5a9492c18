//! 指标查询工具
//!
//! 读取 JSON 指标文件 `{metric: [{timestamp, value}, ...]}`（UTC 时间），
//! 按时间窗过滤并计算 min / max / avg / p95。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde_json::{json, Map, Value};

use crate::tools::schema::{ParamSpec, ParamType, ToolSchema};
use crate::tools::{Tool, ToolCategory};

pub const METRICS: [&str; 4] = ["error_rate", "response_time", "cpu_usage", "memory_usage"];

pub struct QueryMetricsTool {
    metrics_file: PathBuf,
}

impl QueryMetricsTool {
    pub fn new(metrics_file: impl AsRef<Path>) -> Self {
        Self {
            metrics_file: metrics_file.as_ref().to_path_buf(),
        }
    }
}

/// `now`、相对时间（`1h` / `7d`）或 ISO 时间；都无法解析时取 now。
/// 相对时间超出可表示范围时取最早时刻。
pub fn parse_time(value: &str, now: NaiveDateTime) -> NaiveDateTime {
    if value == "now" {
        return now;
    }
    if let Some(hours) = value.strip_suffix('h').and_then(|h| h.parse::<i64>().ok()) {
        return ago(now, ChronoDuration::try_hours(hours));
    }
    if let Some(days) = value.strip_suffix('d').and_then(|d| d.parse::<i64>().ok()) {
        return ago(now, ChronoDuration::try_days(days));
    }
    parse_timestamp(value).unwrap_or(now)
}

fn ago(now: NaiveDateTime, delta: Option<ChronoDuration>) -> NaiveDateTime {
    delta
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(NaiveDateTime::MIN)
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

/// 最近秩百分位：sorted[min(len * p / 100, len - 1)]
pub fn percentile(values: &[f64], pct: usize) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let index = (sorted.len() * pct / 100).min(sorted.len() - 1);
    sorted[index]
}

fn aggregates(values: &[f64]) -> Value {
    if values.is_empty() {
        return json!({"min": 0.0, "max": 0.0, "avg": 0.0, "p95": 0.0});
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    json!({"min": min, "max": max, "avg": avg, "p95": percentile(values, 95)})
}

/// 纯查询逻辑（便于测试注入 now）
pub fn query(
    all: &Map<String, Value>,
    metric: &str,
    start: &str,
    end: &str,
    interval: &str,
    now: NaiveDateTime,
) -> Value {
    let Some(series) = all.get(metric) else {
        return json!({
            "error": format!("Metric '{metric}' not found"),
            "available_metrics": all.keys().collect::<Vec<_>>(),
        });
    };
    let start_time = parse_time(start, now);
    let end_time = parse_time(end, now);

    let points: Vec<&Value> = series
        .as_array()
        .map(|a| a.iter().collect())
        .unwrap_or_default();
    let mut datapoints = Vec::new();
    let mut values = Vec::new();
    for point in points {
        let ts = point
            .get("timestamp")
            .and_then(|t| t.as_str())
            .and_then(parse_timestamp);
        let value = point.get("value").and_then(|v| v.as_f64());
        if let (Some(ts), Some(value)) = (ts, value) {
            if start_time <= ts && ts <= end_time {
                datapoints.push(point.clone());
                values.push(value);
            }
        }
    }

    json!({
        "metric": metric,
        "datapoints": datapoints,
        "aggregates": aggregates(&values),
        "interval": interval,
        "time_range": {
            "start": start_time.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "end": end_time.format("%Y-%m-%dT%H:%M:%S").to_string(),
        },
        "count": values.len(),
    })
}

fn str_input<'a>(inputs: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    inputs.get(key).and_then(|v| v.as_str())
}

#[async_trait]
impl Tool for QueryMetricsTool {
    fn name(&self) -> &str {
        "query_metrics"
    }

    fn description(&self) -> &str {
        "Query time-series metrics data (error_rate, response_time, cpu_usage, memory_usage)"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .param(
                ParamSpec::new(
                    "metric",
                    ParamType::String,
                    "Name of metric to query (use metric, metric_type, or metric_name)",
                )
                .one_of(&METRICS),
            )
            .param(
                ParamSpec::new("metric_type", ParamType::String, "Alternative: type of metric to query")
                    .one_of(&METRICS),
            )
            .param(
                ParamSpec::new("metric_name", ParamType::String, "Alternative: name of metric to query")
                    .one_of(&METRICS),
            )
            .param(
                ParamSpec::new("start", ParamType::String, "Start time (ISO format or relative like '1h', '24h')")
                    .with_default(json!("1h")),
            )
            .param(
                ParamSpec::new("end", ParamType::String, "End time (ISO format or 'now')")
                    .with_default(json!("now")),
            )
            .param(ParamSpec::new(
                "time_range",
                ParamType::String,
                "Alternative to start: relative window like '1h'",
            ))
            .param(
                ParamSpec::new("interval", ParamType::String, "Data aggregation interval")
                    .with_default(json!("5m")),
            )
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Observability
    }

    async fn execute(&self, inputs: Map<String, Value>) -> Result<Value, String> {
        let metric = str_input(&inputs, "metric")
            .or_else(|| str_input(&inputs, "metric_type"))
            .or_else(|| str_input(&inputs, "metric_name"));
        let Some(metric) = metric else {
            return Ok(json!({
                "error": "Must provide metric, metric_type, or metric_name parameter",
                "datapoints": [],
                "aggregates": {},
            }));
        };
        let start = str_input(&inputs, "time_range")
            .or_else(|| str_input(&inputs, "start"))
            .unwrap_or("1h");
        let end = str_input(&inputs, "end").unwrap_or("now");
        let interval = str_input(&inputs, "interval").unwrap_or("5m");

        let raw = tokio::fs::read_to_string(&self.metrics_file)
            .await
            .map_err(|e| format!("Failed to read metrics file {}: {e}", self.metrics_file.display()))?;
        let all: Map<String, Value> =
            serde_json::from_str(&raw).map_err(|e| format!("Invalid metrics file: {e}"))?;

        Ok(query(&all, metric, start, end, interval, Utc::now().naive_utc()))
    }
}
