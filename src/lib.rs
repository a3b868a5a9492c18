//! OpsPilot - 显式状态机驱动的运维调查智能体
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态机、重试协调、Orchestrator 主控循环、构建器、Run 调度
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / 脚本化）
//! - **observability**: tracing 初始化
//! - **oracle**: 规划 / 评估 prompt 构建与结构化回复解析
//! - **store**: SQLite 持久化（Run / Step / ToolCall / Transition）
//! - **tools**: 运维工具（日志检索、指标查询、工单、报告）与执行器

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod oracle;
pub mod store;
pub mod tools;
