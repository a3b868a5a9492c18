//! 离线 LLM 客户端（无需 API）
//!
//! - `MockLlmClient`：按 prompt 类型给出固定决策，便于本地跑通整个循环
//! - `ScriptedLlmClient`：按顺序返回预置回复并记录收到的 prompt，用于测试

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::oracle::context::{EVALUATION_HEADER, NO_HISTORY};

/// Mock 客户端：首轮检索错误日志，之后宣布完成
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        if prompt.starts_with(EVALUATION_HEADER) {
            return Ok(r#"{"decision": "done", "reasoning": "Mock evaluation: evidence collected"}"#.to_string());
        }
        if prompt.contains(NO_HISTORY) {
            return Ok(r#"{"action": "call_tool", "tool_name": "search_logs", "inputs": {"query": "error", "time_range": "24h"}, "reasoning": "Mock plan: look for recent errors"}"#.to_string());
        }
        Ok(r#"{"action": "done", "reasoning": "Mock plan: nothing left to do"}"#.to_string())
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// 脚本化客户端：按顺序弹出预置回复；耗尽后返回 LlmError::Exhausted
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条回复
    pub fn push(&self, response: impl Into<String>) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(Ok(response.into()));
        }
    }

    /// 追加一次调用失败
    pub fn push_error(&self, error: LlmError) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(Err(error));
        }
    }

    /// 已收到的全部 prompt
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push(prompt.to_string());
        }
        let next = self
            .responses
            .lock()
            .map_err(|_| LlmError::ApiError("scripted client lock poisoned".to_string()))?
            .pop_front();
        next.unwrap_or(Err(LlmError::Exhausted))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
