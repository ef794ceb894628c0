//! 计划执行：协作者接口、计划模型、TaskExecutor

pub mod collaborators;
pub mod plan;
pub mod task_executor;

pub use collaborators::{
    Approval, LogNotifier, Notifier, PolicyApproval, ToolRecommendation, ToolRouter, ToolService,
};
pub use plan::{ExecutionPath, ExecutionSummary, Plan, TaskExecutionOutcome, ToolCallRecord};
pub use task_executor::{ExecutorSettings, TaskExecutor};
