//! SQLite 持久化：runs / steps / tool_calls / transitions
//!
//! 连接放在 `Arc<Mutex<Connection>>` 中，所有方法同步执行且不跨 `.await` 持锁；
//! 同一连接可交给 [`crate::core::SqliteRetryStore`] 共用。
//! 多表写入（新 Step + ToolCall、迁移提交、失败记录）都在单个事务内完成。

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use super::models::{HistoryEntry, Run, RunStatus, Step, ToolCall, ToolCallStatus, TransitionRecord};
use crate::core::{AgentError, State};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    goal TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS steps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    state TEXT NOT NULL,
    step_number INTEGER NOT NULL,
    reasoning TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    UNIQUE(run_id, step_number)
);
CREATE TABLE IF NOT EXISTS tool_calls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    step_id INTEGER NOT NULL REFERENCES steps(id),
    tool_name TEXT NOT NULL,
    inputs TEXT NOT NULL,
    outputs TEXT,
    status TEXT NOT NULL,
    error_message TEXT,
    created_at TEXT NOT NULL,
    executed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_tool_calls_step ON tool_calls(step_id);
CREATE TABLE IF NOT EXISTS transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    step_number INTEGER NOT NULL,
    from_state TEXT NOT NULL,
    to_state TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transitions_run ON transitions(run_id);
";

const TOOL_CALL_COLUMNS: &str =
    "id, step_id, tool_name, inputs, outputs, status, error_message, created_at, executed_at";

/// Run 持久化仓库
#[derive(Clone)]
pub struct RunStore {
    conn: Arc<Mutex<Connection>>,
}

impl RunStore {
    /// 打开（必要时创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AgentError::Store(format!("create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, AgentError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, AgentError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 共享底层连接（SQLite 重试计数使用）
    pub fn shared_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AgentError> {
        self.conn
            .lock()
            .map_err(|_| AgentError::Store("database lock poisoned".to_string()))
    }

    // ---------- runs ----------

    pub fn create_run(&self, goal: &str) -> Result<Run, AgentError> {
        let now = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (goal, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![goal, RunStatus::Running.as_str(), now],
        )?;
        Ok(Run {
            id: conn.last_insert_rowid(),
            goal: goal.to_string(),
            status: RunStatus::Running,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_run(&self, run_id: i64) -> Result<Run, AgentError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, goal, status, created_at, updated_at FROM runs WHERE id = ?1",
            params![run_id],
            run_from_row,
        )
        .optional()?
        .ok_or(AgentError::RunNotFound(run_id))
    }

    /// 最近创建的 Run 在前
    pub fn list_runs(&self, status: Option<RunStatus>, limit: usize) -> Result<Vec<Run>, AgentError> {
        let conn = self.lock()?;
        let limit = limit as i64;
        let runs = match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT id, goal, status, created_at, updated_at FROM runs
                     WHERE status = ?1 ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![status.as_str(), limit], run_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, goal, status, created_at, updated_at FROM runs
                     ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit], run_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(runs)
    }

    pub fn set_run_status(&self, run_id: i64, status: RunStatus) -> Result<(), AgentError> {
        let conn = self.lock()?;
        update_run_status(&conn, run_id, status)
    }

    // ---------- steps ----------

    pub fn list_steps(&self, run_id: i64) -> Result<Vec<Step>, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, state, step_number, reasoning, created_at FROM steps
             WHERE run_id = ?1 ORDER BY step_number ASC",
        )?;
        let rows = stmt.query_map(params![run_id], step_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// step_number 最大的 Step（重建状态机使用）
    pub fn latest_step(&self, run_id: i64) -> Result<Option<Step>, AgentError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, run_id, state, step_number, reasoning, created_at FROM steps
                 WHERE run_id = ?1 ORDER BY step_number DESC LIMIT 1",
                params![run_id],
                step_from_row,
            )
            .optional()?)
    }

    pub fn get_step(&self, run_id: i64, step_number: i64) -> Result<Option<Step>, AgentError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, run_id, state, step_number, reasoning, created_at FROM steps
                 WHERE run_id = ?1 AND step_number = ?2",
                params![run_id, step_number],
                step_from_row,
            )
            .optional()?)
    }

    /// 追加一个不带工具调用的 Step（不记录迁移）
    #[cfg(test)]
    fn append_step(
        &self,
        run_id: i64,
        step_number: i64,
        state: State,
        reasoning: &str,
    ) -> Result<Step, AgentError> {
        let conn = self.lock()?;
        insert_step(&conn, run_id, step_number, state, reasoning)
    }

    /// 新 Step（state = to）+ 迁移记录 + Run 状态投影，单事务
    pub fn append_step_transition(
        &self,
        run_id: i64,
        step_number: i64,
        from: State,
        to: State,
        reasoning: &str,
    ) -> Result<Step, AgentError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let step = insert_step(&tx, run_id, step_number, to, reasoning)?;
        insert_transition(&tx, run_id, step_number, from, to)?;
        update_run_status(&tx, run_id, RunStatus::from_state(to))?;
        tx.commit()?;
        Ok(step)
    }

    /// 规划出工具调用：新 Step（EXECUTE_TOOL）+ PENDING ToolCall + PLAN -> EXECUTE_TOOL 迁移，单事务
    pub fn append_planned_step(
        &self,
        run_id: i64,
        step_number: i64,
        reasoning: &str,
        tool_name: &str,
        inputs: &Map<String, Value>,
    ) -> Result<(Step, ToolCall), AgentError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let step = insert_step(&tx, run_id, step_number, State::ExecuteTool, reasoning)?;
        let now = Utc::now();
        tx.execute(
            "INSERT INTO tool_calls (step_id, tool_name, inputs, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                step.id,
                tool_name,
                serde_json::to_string(inputs)?,
                ToolCallStatus::Pending.as_str(),
                now
            ],
        )?;
        let tool_call = ToolCall {
            id: tx.last_insert_rowid(),
            step_id: step.id,
            tool_name: tool_name.to_string(),
            inputs: inputs.clone(),
            outputs: None,
            status: ToolCallStatus::Pending,
            error_message: None,
            created_at: now,
            executed_at: None,
        };
        insert_transition(&tx, run_id, step_number, State::Plan, State::ExecuteTool)?;
        tx.commit()?;
        Ok((step, tool_call))
    }

    /// 在 Step 的 reasoning 末尾追加文本
    pub fn append_reasoning(&self, step_id: i64, text: &str) -> Result<(), AgentError> {
        self.lock()?.execute(
            "UPDATE steps SET reasoning = reasoning || ?1 WHERE id = ?2",
            params![text, step_id],
        )?;
        Ok(())
    }

    // ---------- tool calls ----------

    /// 当前 Step 中待派发的 ToolCall；进程在派发中途退出时遗留的 RUNNING 行同样视为待派发
    pub fn pending_tool_call(&self, step_id: i64) -> Result<Option<ToolCall>, AgentError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {TOOL_CALL_COLUMNS} FROM tool_calls
             WHERE step_id = ?1 AND status IN ('pending', 'running')
             ORDER BY id ASC LIMIT 1"
        );
        Ok(conn.query_row(&sql, params![step_id], tool_call_from_row).optional()?)
    }

    pub fn latest_tool_call(&self, step_id: i64) -> Result<Option<ToolCall>, AgentError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {TOOL_CALL_COLUMNS} FROM tool_calls WHERE step_id = ?1 ORDER BY id DESC LIMIT 1"
        );
        Ok(conn.query_row(&sql, params![step_id], tool_call_from_row).optional()?)
    }

    pub fn list_tool_calls(&self, step_id: i64) -> Result<Vec<ToolCall>, AgentError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {TOOL_CALL_COLUMNS} FROM tool_calls WHERE step_id = ?1 ORDER BY id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![step_id], tool_call_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// 整行覆盖可变字段（outputs / status / error_message / executed_at）
    pub fn update_tool_call(&self, tool_call: &ToolCall) -> Result<(), AgentError> {
        let outputs = tool_call
            .outputs
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.lock()?.execute(
            "UPDATE tool_calls SET outputs = ?1, status = ?2, error_message = ?3, executed_at = ?4
             WHERE id = ?5",
            params![
                outputs,
                tool_call.status.as_str(),
                tool_call.error_message,
                tool_call.executed_at,
                tool_call.id
            ],
        )?;
        Ok(())
    }

    /// 按 step_number 排序的全部工具调用
    pub fn history(&self, run_id: i64) -> Result<Vec<HistoryEntry>, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT s.step_number, t.id, t.step_id, t.tool_name, t.inputs, t.outputs, t.status,
                    t.error_message, t.created_at, t.executed_at
             FROM tool_calls t JOIN steps s ON s.id = t.step_id
             WHERE s.run_id = ?1
             ORDER BY s.step_number ASC, t.id ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(HistoryEntry {
                step_number: row.get(0)?,
                tool_call: tool_call_from_row_at(row, 1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ---------- transitions ----------

    /// 更新 Step.state、追加迁移记录，并可同时更新 Run 状态，单事务
    pub fn commit_transition(
        &self,
        run_id: i64,
        step_number: i64,
        from: State,
        to: State,
        run_status: Option<RunStatus>,
    ) -> Result<(), AgentError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE steps SET state = ?1 WHERE run_id = ?2 AND step_number = ?3",
            params![to.as_str(), run_id, step_number],
        )?;
        insert_transition(&tx, run_id, step_number, from, to)?;
        if let Some(status) = run_status {
            update_run_status(&tx, run_id, status)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// 失败记录：FAILED Step + Run FAILED + 迁移记录，单事务
    pub fn record_failure(
        &self,
        run_id: i64,
        step_number: i64,
        from: State,
        reason: &str,
    ) -> Result<Step, AgentError> {
        self.append_step_transition(run_id, step_number, from, State::Failed, reason)
    }

    /// 该 Step 是否已提交过 NEEDS_APPROVAL -> EXECUTE_TOOL（即审批通过）
    pub fn approval_committed(&self, run_id: i64, step_number: i64) -> Result<bool, AgentError> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM transitions
             WHERE run_id = ?1 AND step_number = ?2 AND from_state = ?3 AND to_state = ?4)",
            params![
                run_id,
                step_number,
                State::NeedsApproval.as_str(),
                State::ExecuteTool.as_str()
            ],
            |row| row.get(0),
        )?)
    }

    pub fn transitions(&self, run_id: i64) -> Result<Vec<TransitionRecord>, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, step_number, from_state, to_state, created_at FROM transitions
             WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(TransitionRecord {
                id: row.get(0)?,
                run_id: row.get(1)?,
                step_number: row.get(2)?,
                from_state: parse_column(row, 3)?,
                to_state: parse_column(row, 4)?,
                created_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn insert_step(
    conn: &Connection,
    run_id: i64,
    step_number: i64,
    state: State,
    reasoning: &str,
) -> Result<Step, AgentError> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO steps (run_id, state, step_number, reasoning, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![run_id, state.as_str(), step_number, reasoning, now],
    )?;
    Ok(Step {
        id: conn.last_insert_rowid(),
        run_id,
        state,
        step_number,
        reasoning: reasoning.to_string(),
        created_at: now,
    })
}

fn update_run_status(conn: &Connection, run_id: i64, status: RunStatus) -> Result<(), AgentError> {
    let changed = conn.execute(
        "UPDATE runs SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), Utc::now(), run_id],
    )?;
    if changed == 0 {
        return Err(AgentError::RunNotFound(run_id));
    }
    Ok(())
}

fn insert_transition(
    conn: &Connection,
    run_id: i64,
    step_number: i64,
    from: State,
    to: State,
) -> Result<(), AgentError> {
    conn.execute(
        "INSERT INTO transitions (run_id, step_number, from_state, to_state, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![run_id, step_number, from.as_str(), to.as_str(), Utc::now()],
    )?;
    Ok(())
}

/// 读取文本列并用 FromStr 解析（枚举列）
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = AgentError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column<T: serde::de::DeserializeOwned>(raw: &str, idx: usize) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    Ok(Run {
        id: row.get(0)?,
        goal: row.get(1)?,
        status: parse_column(row, 2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<Step> {
    Ok(Step {
        id: row.get(0)?,
        run_id: row.get(1)?,
        state: parse_column(row, 2)?,
        step_number: row.get(3)?,
        reasoning: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn tool_call_from_row(row: &Row<'_>) -> rusqlite::Result<ToolCall> {
    tool_call_from_row_at(row, 0)
}

fn tool_call_from_row_at(row: &Row<'_>, base: usize) -> rusqlite::Result<ToolCall> {
    let inputs: String = row.get(base + 3)?;
    let outputs: Option<String> = row.get(base + 4)?;
    let executed_at: Option<DateTime<Utc>> = row.get(base + 8)?;
    Ok(ToolCall {
        id: row.get(base)?,
        step_id: row.get(base + 1)?,
        tool_name: row.get(base + 2)?,
        inputs: json_column(&inputs, base + 3)?,
        outputs: outputs
            .map(|raw| json_column::<Value>(&raw, base + 4))
            .transpose()?,
        status: parse_column(row, base + 5)?,
        error_message: row.get(base + 6)?,
        created_at: row.get(base + 7)?,
        executed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_create_and_get_run() {
        let store = RunStore::open_in_memory().unwrap();
        let run = store.create_run("Investigate 500s").unwrap();
        let loaded = store.get_run(run.id).unwrap();
        assert_eq!(loaded.goal, "Investigate 500s");
        assert_eq!(loaded.status, RunStatus::Running);

        assert!(matches!(store.get_run(999), Err(AgentError::RunNotFound(999))));
    }

    #[test]
    fn test_list_runs_filters_by_status() {
        let store = RunStore::open_in_memory().unwrap();
        let a = store.create_run("a").unwrap();
        let b = store.create_run("b").unwrap();
        store.set_run_status(b.id, RunStatus::Done).unwrap();

        let all = store.list_runs(None, 10).unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b.id, a.id]);

        let done = store.list_runs(Some(RunStatus::Done), 10).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, b.id);
    }

    #[test]
    fn test_planned_step_creates_pending_tool_call() {
        let store = RunStore::open_in_memory().unwrap();
        let run = store.create_run("goal").unwrap();
        let (step, call) = store
            .append_planned_step(run.id, 1, "look at logs", "search_logs", &inputs(json!({"query": "error"})))
            .unwrap();

        assert_eq!(step.state, State::ExecuteTool);
        assert_eq!(store.transitions(run.id).unwrap().len(), 1);
        let pending = store.pending_tool_call(step.id).unwrap().unwrap();
        assert_eq!(pending.id, call.id);
        assert_eq!(pending.status, ToolCallStatus::Pending);
        assert_eq!(pending.inputs["query"], "error");
        assert!(pending.outputs.is_none());
    }

    #[test]
    fn test_step_number_unique_per_run() {
        let store = RunStore::open_in_memory().unwrap();
        let run = store.create_run("goal").unwrap();
        store.append_step(run.id, 1, State::Plan, "").unwrap();
        assert!(store.append_step(run.id, 1, State::Done, "").is_err());

        // 另一个 Run 可以使用相同编号
        let other = store.create_run("other").unwrap();
        store.append_step(other.id, 1, State::Plan, "").unwrap();
    }

    #[test]
    fn test_failed_planned_step_leaves_no_tool_call() {
        let store = RunStore::open_in_memory().unwrap();
        let run = store.create_run("goal").unwrap();
        store.append_step(run.id, 1, State::Plan, "").unwrap();
        let err = store.append_planned_step(run.id, 1, "", "search_logs", &Map::new());
        assert!(err.is_err());
        assert!(store.history(run.id).unwrap().is_empty());
    }

    #[test]
    fn test_update_tool_call_and_history() {
        let store = RunStore::open_in_memory().unwrap();
        let run = store.create_run("goal").unwrap();
        let (step, mut call) = store
            .append_planned_step(run.id, 1, "", "query_metrics", &inputs(json!({"metric": "cpu_usage"})))
            .unwrap();

        call.status = ToolCallStatus::Success;
        call.outputs = Some(json!({"count": 3}));
        call.executed_at = Some(Utc::now());
        store.update_tool_call(&call).unwrap();

        assert!(store.pending_tool_call(step.id).unwrap().is_none());
        let history = store.history(run.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].step_number, 1);
        assert_eq!(history[0].tool_call.outputs, Some(json!({"count": 3})));
        assert!(history[0].tool_call.executed_at.is_some());
    }

    #[test]
    fn test_commit_transition_updates_step_state() {
        let store = RunStore::open_in_memory().unwrap();
        let run = store.create_run("goal").unwrap();
        store.append_step(run.id, 1, State::Plan, "").unwrap();
        store.commit_transition(run.id, 1, State::Plan, State::ExecuteTool, None).unwrap();
        store
            .commit_transition(run.id, 1, State::ExecuteTool, State::NeedsApproval, Some(RunStatus::NeedsApproval))
            .unwrap();

        assert_eq!(store.latest_step(run.id).unwrap().unwrap().state, State::NeedsApproval);
        assert_eq!(store.get_run(run.id).unwrap().status, RunStatus::NeedsApproval);
        let transitions = store.transitions(run.id).unwrap();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].from_state, State::Plan);
        assert_eq!(transitions[1].to_state, State::NeedsApproval);
    }

    #[test]
    fn test_approval_committed_per_step() {
        let store = RunStore::open_in_memory().unwrap();
        let run = store.create_run("goal").unwrap();
        store.append_step(run.id, 1, State::NeedsApproval, "").unwrap();
        assert!(!store.approval_committed(run.id, 1).unwrap());

        store
            .commit_transition(run.id, 1, State::NeedsApproval, State::ExecuteTool, Some(RunStatus::Running))
            .unwrap();
        assert!(store.approval_committed(run.id, 1).unwrap());
        assert!(!store.approval_committed(run.id, 2).unwrap());
    }

    #[test]
    fn test_record_failure_is_atomic() {
        let store = RunStore::open_in_memory().unwrap();
        let run = store.create_run("goal").unwrap();
        store.append_step(run.id, 1, State::Plan, "").unwrap();
        store.record_failure(run.id, 2, State::Evaluate, "boom").unwrap();

        assert_eq!(store.get_run(run.id).unwrap().status, RunStatus::Failed);
        let latest = store.latest_step(run.id).unwrap().unwrap();
        assert_eq!(latest.state, State::Failed);
        assert_eq!(latest.reasoning, "boom");
        assert_eq!(store.transitions(run.id).unwrap().len(), 1);

        // 编号冲突时整个事务回滚
        assert!(store.record_failure(run.id, 2, State::Plan, "again").is_err());
        assert_eq!(store.transitions(run.id).unwrap().len(), 1);
    }

    #[test]
    fn test_append_reasoning() {
        let store = RunStore::open_in_memory().unwrap();
        let run = store.create_run("goal").unwrap();
        let step = store.append_step(run.id, 1, State::Plan, "plan").unwrap();
        store.append_reasoning(step.id, "\n[Evaluation] ok").unwrap();
        let step = store.get_step(run.id, 1).unwrap().unwrap();
        assert_eq!(step.reasoning, "plan\n[Evaluation] ok");
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("opspilot.db");
        let run_id = {
            let store = RunStore::open(&path).unwrap();
            store.create_run("persist me").unwrap().id
        };
        let store = RunStore::open(&path).unwrap();
        assert_eq!(store.get_run(run_id).unwrap().goal, "persist me");
    }
}
