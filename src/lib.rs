//! Hive - 多 Agent 编排核心
//!
//! 模块划分：
//! - **agents**: Agent 数据模型、trait、类注册表、AgentManager（调度 / 限流 / 执行）、内置 Agent
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、事件总线、依赖注入容器、任务链、应用装配
//! - **executor**: 计划执行器及其协作者接口
//! - **llm**: AI 流式接口与 Mock 实现
//! - **observability**: 日志初始化
//! - **tools**: 工具箱（read_file、list_dir、analyze_project）、关键词路由与执行器

pub mod agents;
pub mod config;
pub mod core;
pub mod executor;
pub mod llm;
pub mod observability;
pub mod tools;

pub use agents::{AgentManager, AgentTask};
pub use core::{EventBus, ServiceContainer, TaskChainManager};
pub use executor::{Plan, TaskExecutor};
