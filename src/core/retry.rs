//! 重试协调器
//!
//! 以 (run, tool_call) 为键记录失败次数（带 TTL），决定下一次派发前的指数退避与是否放弃。
//! 计数存储可替换：SQLite（与 RunStore 共用连接，跨重启保留）或内存（测试用）。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rusqlite::{params, Connection, OptionalExtension};

use crate::core::AgentError;

/// 重试计数键：`retry:{run_id}:{tool_call_id}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetryKey {
    pub run_id: i64,
    pub tool_call_id: i64,
}

impl RetryKey {
    pub fn new(run_id: i64, tool_call_id: i64) -> Self {
        Self { run_id, tool_call_id }
    }
}

impl fmt::Display for RetryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "retry:{}:{}", self.run_id, self.tool_call_id)
    }
}

/// 计数存储接口；实现必须支持多个 Run 并发访问
pub trait RetryStore: Send + Sync {
    /// 当前失败次数；不存在或已过期返回 0
    fn get_attempts(&self, key: &RetryKey) -> Result<u32, AgentError>;

    fn record_attempt(&self, key: &RetryKey, attempts: u32, ttl: Duration) -> Result<(), AgentError>;

    fn clear(&self, key: &RetryKey) -> Result<(), AgentError>;
}

/// 内存计数（进程退出即丢失）
#[derive(Debug, Default)]
pub struct MemoryRetryStore {
    entries: Mutex<HashMap<String, (u32, Instant)>>,
}

impl MemoryRetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (u32, Instant)>>, AgentError> {
        self.entries
            .lock()
            .map_err(|_| AgentError::Store("retry store lock poisoned".to_string()))
    }
}

impl RetryStore for MemoryRetryStore {
    fn get_attempts(&self, key: &RetryKey) -> Result<u32, AgentError> {
        let mut entries = self.lock()?;
        let k = key.to_string();
        match entries.get(&k) {
            Some((attempts, expires_at)) if Instant::now() < *expires_at => Ok(*attempts),
            Some(_) => {
                entries.remove(&k);
                Ok(0)
            }
            None => Ok(0),
        }
    }

    fn record_attempt(&self, key: &RetryKey, attempts: u32, ttl: Duration) -> Result<(), AgentError> {
        self.lock()?
            .insert(key.to_string(), (attempts, Instant::now() + ttl));
        Ok(())
    }

    fn clear(&self, key: &RetryKey) -> Result<(), AgentError> {
        self.lock()?.remove(&key.to_string());
        Ok(())
    }
}

/// SQLite 计数：与 RunStore 共享同一个连接，重启后可继续计数
#[derive(Clone)]
pub struct SqliteRetryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRetryStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self, AgentError> {
        let store = Self { conn };
        store.init_table()?;
        Ok(store)
    }

    fn init_table(&self) -> Result<(), AgentError> {
        self.lock()?.execute(
            "CREATE TABLE IF NOT EXISTS retry_attempts (
                key TEXT PRIMARY KEY,
                attempts INTEGER NOT NULL,
                expires_at_ms INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AgentError> {
        self.conn
            .lock()
            .map_err(|_| AgentError::Store("database lock poisoned".to_string()))
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl RetryStore for SqliteRetryStore {
    fn get_attempts(&self, key: &RetryKey) -> Result<u32, AgentError> {
        let conn = self.lock()?;
        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT attempts, expires_at_ms FROM retry_attempts WHERE key = ?1",
                params![key.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((attempts, expires_at)) if expires_at > now_ms() => Ok(attempts.max(0) as u32),
            Some(_) => {
                conn.execute(
                    "DELETE FROM retry_attempts WHERE key = ?1",
                    params![key.to_string()],
                )?;
                Ok(0)
            }
            None => Ok(0),
        }
    }

    fn record_attempt(&self, key: &RetryKey, attempts: u32, ttl: Duration) -> Result<(), AgentError> {
        let expires_at = now_ms() + ttl.as_millis() as i64;
        self.lock()?.execute(
            "INSERT INTO retry_attempts (key, attempts, expires_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET attempts = excluded.attempts, expires_at_ms = excluded.expires_at_ms",
            params![key.to_string(), attempts as i64, expires_at],
        )?;
        Ok(())
    }

    fn clear(&self, key: &RetryKey) -> Result<(), AgentError> {
        self.lock()?.execute(
            "DELETE FROM retry_attempts WHERE key = ?1",
            params![key.to_string()],
        )?;
        Ok(())
    }
}

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 单个 ToolCall 最多派发次数（含首次）
    pub max_attempts: u32,
    pub ttl: Duration,
    /// 退避基本单位：第 k 次失败后等待 unit * 2^(k-1)
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            ttl: Duration::from_secs(3600),
            backoff_unit: Duration::from_secs(1),
        }
    }
}

/// 一次失败之后的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// 已记录第 n 次失败，ToolCall 保持 PENDING 等待下一轮
    Retry(u32),
    /// 达到上限，不再派发
    Exhausted(u32),
}

/// 重试协调器：包装计数存储与策略
#[derive(Clone)]
pub struct RetryCoordinator {
    store: Arc<dyn RetryStore>,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(store: Arc<dyn RetryStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn attempts(&self, key: &RetryKey) -> Result<u32, AgentError> {
        self.store.get_attempts(key)
    }

    /// 已有 attempts 次失败时，下次派发前的等待时长
    pub fn backoff(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempts - 1);
        self.policy.backoff_unit.saturating_mul(factor)
    }

    /// 只阻塞当前 Run 的任务
    pub async fn wait_before_dispatch(&self, key: &RetryKey, attempts: u32) {
        let delay = self.backoff(attempts);
        if delay.is_zero() {
            return;
        }
        tracing::info!(key = %key, attempts, delay_ms = delay.as_millis() as u64, "Retry backoff");
        tokio::time::sleep(delay).await;
    }

    /// 记录一次失败（previous 为本次派发前的失败数）
    pub fn record_failure(&self, key: &RetryKey, previous: u32) -> Result<RetryVerdict, AgentError> {
        let failures = previous + 1;
        if failures >= self.policy.max_attempts {
            self.store.clear(key)?;
            return Ok(RetryVerdict::Exhausted(failures));
        }
        self.store.record_attempt(key, failures, self.policy.ttl)?;
        Ok(RetryVerdict::Retry(failures))
    }

    pub fn clear(&self, key: &RetryKey) -> Result<(), AgentError> {
        self.store.clear(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(store: Arc<dyn RetryStore>) -> RetryCoordinator {
        RetryCoordinator::new(
            store,
            RetryPolicy {
                max_attempts: 3,
                ttl: Duration::from_secs(60),
                backoff_unit: Duration::from_millis(10),
            },
        )
    }

    #[test]
    fn test_key_format() {
        assert_eq!(RetryKey::new(7, 42).to_string(), "retry:7:42");
    }

    #[test]
    fn test_backoff_is_exponential() {
        let c = coordinator(Arc::new(MemoryRetryStore::new()));
        assert_eq!(c.backoff(0), Duration::ZERO);
        assert_eq!(c.backoff(1), Duration::from_millis(10));
        assert_eq!(c.backoff(2), Duration::from_millis(20));
        assert_eq!(c.backoff(3), Duration::from_millis(40));
    }

    #[test]
    fn test_record_failure_until_exhausted() {
        let c = coordinator(Arc::new(MemoryRetryStore::new()));
        let key = RetryKey::new(1, 1);
        assert_eq!(c.record_failure(&key, 0).unwrap(), RetryVerdict::Retry(1));
        assert_eq!(c.attempts(&key).unwrap(), 1);
        assert_eq!(c.record_failure(&key, 1).unwrap(), RetryVerdict::Retry(2));
        assert_eq!(c.record_failure(&key, 2).unwrap(), RetryVerdict::Exhausted(3));
        assert_eq!(c.attempts(&key).unwrap(), 0);
    }

    #[test]
    fn test_memory_store_expires() {
        let store = MemoryRetryStore::new();
        let key = RetryKey::new(1, 2);
        store.record_attempt(&key, 2, Duration::ZERO).unwrap();
        assert_eq!(store.get_attempts(&key).unwrap(), 0);
        store.record_attempt(&key, 2, Duration::from_secs(60)).unwrap();
        assert_eq!(store.get_attempts(&key).unwrap(), 2);
        store.clear(&key).unwrap();
        assert_eq!(store.get_attempts(&key).unwrap(), 0);
    }

    #[test]
    fn test_keys_are_isolated_per_run() {
        let store = MemoryRetryStore::new();
        store.record_attempt(&RetryKey::new(1, 5), 2, Duration::from_secs(60)).unwrap();
        assert_eq!(store.get_attempts(&RetryKey::new(2, 5)).unwrap(), 0);
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retry.db");
        let key = RetryKey::new(3, 9);
        {
            let conn = Arc::new(Mutex::new(Connection::open(&path).unwrap()));
            let store = SqliteRetryStore::new(conn).unwrap();
            store.record_attempt(&key, 2, Duration::from_secs(60)).unwrap();
        }
        let conn = Arc::new(Mutex::new(Connection::open(&path).unwrap()));
        let store = SqliteRetryStore::new(conn).unwrap();
        assert_eq!(store.get_attempts(&key).unwrap(), 2);
        store.record_attempt(&key, 1, Duration::ZERO).unwrap();
        assert_eq!(store.get_attempts(&key).unwrap(), 0);
    }
}
