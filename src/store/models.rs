//! 持久化实体：Run / Step / ToolCall / Transition

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{AgentError, State};

/// Run 状态（机器状态的投影）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    NeedsApproval,
    Done,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::NeedsApproval => "needs_approval",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// 机器状态 -> Run 状态；非终止、非暂停状态都视为 RUNNING
    pub fn from_state(state: State) -> Self {
        match state {
            State::Done => Self::Done,
            State::Failed => Self::Failed,
            State::NeedsApproval => Self::NeedsApproval,
            State::Plan | State::ExecuteTool | State::Evaluate => Self::Running,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = AgentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(Self::Running),
            "needs_approval" => Ok(Self::NeedsApproval),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(AgentError::Store(format!("unknown run status '{value}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Success,
    Failed,
    NeedsApproval,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::NeedsApproval => "needs_approval",
        }
    }
}

impl fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolCallStatus {
    type Err = AgentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "needs_approval" => Ok(Self::NeedsApproval),
            _ => Err(AgentError::Store(format!("unknown tool call status '{value}'"))),
        }
    }
}

/// 一次完整的调查
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub goal: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 循环一轮的审计记录；state 记录该轮推进到的机器位置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: i64,
    pub run_id: i64,
    pub state: State,
    pub step_number: i64,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

/// 工具调用；重试复用同一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: i64,
    pub step_id: i64,
    pub tool_name: String,
    pub inputs: Map<String, Value>,
    pub outputs: Option<Value>,
    pub status: ToolCallStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

/// 已落库的状态迁移
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: i64,
    pub run_id: i64,
    pub step_number: i64,
    pub from_state: State,
    pub to_state: State,
    pub created_at: DateTime<Utc>,
}

/// 提供给 Oracle 的历史条目
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub step_number: i64,
    pub tool_call: ToolCall,
}
