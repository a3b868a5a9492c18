//! Run 持久化层
//!
//! - **models**: Run / Step / ToolCall / 迁移记录
//! - **sqlite**: 基于 rusqlite 的 RunStore

pub mod models;
pub mod sqlite;

pub use models::{HistoryEntry, Run, RunStatus, Step, ToolCall, ToolCallStatus, TransitionRecord};
pub use sqlite::RunStore;
