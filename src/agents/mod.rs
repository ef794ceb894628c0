//! Agent 子系统：数据模型、Agent trait、类注册表、管理器、指导文档、内置 Agent

pub mod builtin;
pub mod guidance;
pub mod manager;
pub mod registry;
pub mod traits;
pub mod types;

pub use builtin::{register_builtin_agents, ToolAgent};
pub use guidance::{
    AgentSystemConfig, ConfigProvider, FileGuidanceProvider, GuidanceProvider, StaticGuidance,
};
pub use manager::{AgentHandle, AgentManager, AgentSnapshot, BatchReport, ManagerStats};
pub use registry::{AgentClassMetadata, AgentFactory, AgentOverrides, AgentRegistry};
pub use traits::Agent;
pub use types::{
    AgentContext, AgentMetrics, AgentProfile, AgentStatus, AgentTask, ExecutionPolicy,
    Permissions, TaskOutput, TaskPriority, TaskResult, TaskStatus, TodoItem, TodoStatus,
};
