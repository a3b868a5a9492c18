//! 核心编排层：错误、状态机、重试协调、主控循环、构建器、Run 调度

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod state_machine;
pub mod task_scheduler;

pub use builder::{create_llm_from_config, OrchestratorBuilder};
pub use error::AgentError;
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use retry::{
    MemoryRetryStore, RetryCoordinator, RetryKey, RetryPolicy, RetryStore, RetryVerdict,
    SqliteRetryStore,
};
pub use state_machine::{State, StateMachine};
pub use task_scheduler::{RunNotification, RunScheduler};
