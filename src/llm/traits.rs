//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Scripted / Mock）实现 LlmClient：complete 接收完整 prompt，返回原始文本。
//! 解析与超时由上层的 DecisionOracle 负责。

use async_trait::async_trait;
use thiserror::Error;

/// 后端调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request build error: {0}")]
    Request(String),

    /// 脚本化客户端的回复已耗尽
    #[error("No scripted response left")]
    Exhausted,
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// 后端/模型名，用于日志
    fn model_name(&self) -> &str {
        "unknown"
    }
}
