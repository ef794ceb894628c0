//! 错误类型
//!
//! - `AgentError`：Agent / 工具 / AI 流在执行过程中抛出的错误
//! - `SchedulingError`：调度阶段的错误（找不到 Agent、首选 Agent 无法处理、类未注册/禁用），直接返回调用方，不重试
//! - `OrchestratorError`：AgentManager / TaskExecutor 对外的统一错误

use thiserror::Error;

use crate::agents::{AgentStatus, TaskStatus};

/// Agent 执行过程中可能出现的错误
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("AI provider error: {0}")]
    Provider(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("No tool intent for task: {0}")]
    NoToolIntent(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// 调度错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("No suitable agent for task {task_id}")]
    NoSuitableAgent { task_id: String },

    #[error("Preferred agent {agent_id} cannot handle task {task_id}")]
    PreferredAgentCannotHandle { agent_id: String, task_id: String },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent class not found: {0}")]
    AgentClassNotFound(String),

    #[error("Agent class disabled: {0}")]
    AgentClassDisabled(String),

    #[error("Agent already registered: {0}")]
    AgentAlreadyRegistered(String),

    /// 初始化失败或已终止的 Agent 不接收任务
    #[error("Agent {agent_id} is unavailable ({status:?})")]
    AgentUnavailable { agent_id: String, status: AgentStatus },

    /// 只有 Pending 任务可以入队或执行
    #[error("Task {task_id} is not pending ({status:?})")]
    TaskNotPending { task_id: String, status: TaskStatus },
}

/// 编排层对外错误
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    /// Agent 在 executeTask 中抛错；已记录为 failed 结果
    #[error("Task {task_id} failed on agent {agent_id}: {source}")]
    Execution {
        task_id: String,
        agent_id: String,
        #[source]
        source: AgentError,
    },

    /// 任务超时，只对该任务致命
    #[error("Task {task_id} timed out after {timeout_secs}s")]
    Timeout { task_id: String, timeout_secs: u64 },

    #[error("Illegal task transition for {task_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Agent {agent_id} failed to initialize: {source}")]
    Initialization {
        agent_id: String,
        #[source]
        source: AgentError,
    },
}

impl OrchestratorError {
    /// 是否为调度类错误（调用方不应重试）
    pub fn is_scheduling(&self) -> bool {
        matches!(self, Self::Scheduling(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduling_error_wraps() {
        let err: OrchestratorError = SchedulingError::AgentNotFound("a1".into()).into();
        assert!(err.is_scheduling());
        assert_eq!(err.to_string(), "Agent not found: a1");
    }

    #[test]
    fn test_execution_error_message() {
        let err = OrchestratorError::Execution {
            task_id: "t1".into(),
            agent_id: "a1".into(),
            source: AgentError::Other("boom".into()),
        };
        assert!(!err.is_scheduling());
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_unavailable_agent_message() {
        let err: OrchestratorError = SchedulingError::AgentUnavailable {
            agent_id: "broken".into(),
            status: AgentStatus::Error,
        }
        .into();
        assert!(err.is_scheduling());
        assert_eq!(err.to_string(), "Agent broken is unavailable (Error)");
    }
}
