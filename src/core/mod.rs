//! 核心编排层：错误分类、事件总线、依赖注入容器、任务链、应用装配

pub mod bootstrap;
pub mod container;
pub mod error;
pub mod event_bus;
pub mod task_chain;

pub use bootstrap::{names, start_builtin_agents, HiveBuilder, PLANNER_AGENT_ID};
pub use container::{
    ContainerError, HealthState, Lifecycle, Resolver, ServiceContainer, ServiceHealth,
    ServiceLifetime, ServiceStatus,
};
pub use error::{AgentError, OrchestratorError, SchedulingError};
pub use event_bus::{EventBus, EventTopic, OrchestratorEvent, TopicSubscription};
pub use task_chain::{
    ChainMember, ChainMetadata, ChainSpec, ChainStats, ChainStatus, TaskChain, TaskChainManager,
};
