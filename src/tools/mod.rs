//! 工具箱：运维工具、注册表与带超时的执行器

pub mod create_ticket;
pub mod executor;
pub mod generate_report;
pub mod query_metrics;
pub mod registry;
pub mod schema;
pub mod search_logs;

pub use create_ticket::CreateTicketTool;
pub use executor::ToolExecutor;
pub use generate_report::GenerateReportTool;
pub use query_metrics::QueryMetricsTool;
pub use registry::{Tool, ToolCategory, ToolInfo, ToolRegistry};
pub use schema::{ParamSpec, ParamType, ToolSchema};
pub use search_logs::SearchLogsTool;
