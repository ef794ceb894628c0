//! 应用装配：把配置、事件总线、工具、Agent 管理器、任务链管理器、计划执行器注册进容器
//!
//! 所有接入方式（CLI、测试、嵌入）共享同一套装配逻辑。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::agents::{
    register_builtin_agents, AgentManager, FileGuidanceProvider, GuidanceProvider, Permissions,
};
use crate::config::AppConfig;
use crate::core::{EventBus, ServiceContainer, TaskChainManager};
use crate::executor::{ExecutorSettings, PolicyApproval, TaskExecutor};
use crate::llm::{AiProvider, MockAiProvider};
use crate::tools::{default_registry, KeywordToolRouter, ToolExecutor};

/// 容器中的服务名
pub mod names {
    pub const CONFIG: &str = "config";
    pub const EVENT_BUS: &str = "event_bus";
    pub const TOOL_EXECUTOR: &str = "tool_executor";
    pub const TOOL_ROUTER: &str = "tool_router";
    pub const GUIDANCE: &str = "guidance";
    pub const AGENT_MANAGER: &str = "agent_manager";
    pub const TASK_CHAIN_MANAGER: &str = "task_chain_manager";
    pub const TASK_EXECUTOR: &str = "task_executor";
}

/// 计划执行器发布事件时使用的 agent id
pub const PLANNER_AGENT_ID: &str = "planner";

/// 装配器：统一配置并注册各个组件
pub struct HiveBuilder {
    config: AppConfig,
    workspace: PathBuf,
    ai: Arc<dyn AiProvider>,
}

impl HiveBuilder {
    pub fn new(config: AppConfig, workspace: PathBuf) -> Self {
        Self {
            config,
            workspace,
            ai: Arc::new(MockAiProvider),
        }
    }

    /// 工作目录：配置中的 workspace_root，否则当前目录
    pub fn workspace_from_config(config: &AppConfig) -> PathBuf {
        config
            .app
            .workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn with_ai_provider(mut self, ai: Arc<dyn AiProvider>) -> Self {
        self.ai = ai;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// 注册全部服务；解析是惰性的，initialize_all 时才真正构造
    pub fn build(self) -> ServiceContainer {
        let container = ServiceContainer::new();
        let workspace = self.workspace;
        let capacity = self.config.events.capacity;

        container.register_instance(names::CONFIG, Arc::new(self.config));

        container.register_singleton(names::EVENT_BUS, move |_| Ok(EventBus::new(capacity)));

        let ws = workspace.clone();
        container.register_singleton(names::TOOL_EXECUTOR, move |r| {
            let cfg = r.get::<AppConfig>(names::CONFIG)?;
            Ok(ToolExecutor::new(
                default_registry(&ws),
                Permissions::from(cfg.agents.sandbox),
                cfg.tools.tool_timeout_secs,
            ))
        });

        container.register_singleton(names::TOOL_ROUTER, |r| {
            let tools = r.get::<ToolExecutor>(names::TOOL_EXECUTOR)?;
            Ok(KeywordToolRouter::from_registry(tools.registry()))
        });

        container.register_singleton(names::GUIDANCE, |r| {
            let cfg = r.get::<AppConfig>(names::CONFIG)?;
            Ok(FileGuidanceProvider::new(&cfg.agents.guidance_dir))
        });

        let ws = workspace.clone();
        container.register_managed_singleton(names::AGENT_MANAGER, move |r| {
            let cfg = r.get::<AppConfig>(names::CONFIG)?;
            let guidance: Arc<dyn GuidanceProvider> =
                r.get::<FileGuidanceProvider>(names::GUIDANCE)?;
            let bus = r.get::<EventBus>(names::EVENT_BUS)?;
            Ok(AgentManager::new(cfg, guidance, (*bus).clone(), ws.clone()))
        });

        container.register_managed_singleton(names::TASK_CHAIN_MANAGER, |r| {
            let cfg = r.get::<AppConfig>(names::CONFIG)?;
            let bus = r.get::<EventBus>(names::EVENT_BUS)?;
            Ok(TaskChainManager::from_config(&cfg.chains, (*bus).clone()))
        });

        // 每个计划一个执行器
        let ai = self.ai;
        container.register_transient(names::TASK_EXECUTOR, move |r| {
            let cfg = r.get::<AppConfig>(names::CONFIG)?;
            let bus = r.get::<EventBus>(names::EVENT_BUS)?;
            let tools = r.get::<ToolExecutor>(names::TOOL_EXECUTOR)?;
            let router = r.get::<KeywordToolRouter>(names::TOOL_ROUTER)?;
            Ok(TaskExecutor::new(router, tools, ai.clone(), &workspace)
                .with_settings(ExecutorSettings::from(&cfg.executor))
                .with_approval(Arc::new(PolicyApproval::new(cfg.agents.approval_policy)))
                .with_event_bus((*bus).clone(), PLANNER_AGENT_ID))
        });

        container
    }
}

/// 登记内置 Agent 类并为每个类创建一个实例，返回创建成功的 agent id
pub async fn start_builtin_agents(container: &ServiceContainer) -> anyhow::Result<Vec<String>> {
    let manager = container
        .get::<AgentManager>(names::AGENT_MANAGER)
        .context("agent manager unavailable")?;
    let tools = container.get::<ToolExecutor>(names::TOOL_EXECUTOR)?;
    let router = container.get::<KeywordToolRouter>(names::TOOL_ROUTER)?;

    let classes = register_builtin_agents(&manager, tools, router);
    let mut created = Vec::with_capacity(classes.len());
    for class_id in classes {
        match manager.create_agent(&class_id, None).await {
            Ok(handle) => created.push(handle.id().to_string()),
            Err(e) => tracing::warn!(class_id = %class_id, error = %e, "builtin agent not started"),
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HealthState;

    #[tokio::test]
    async fn test_build_and_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let container = HiveBuilder::new(AppConfig::default(), dir.path().to_path_buf()).build();

        assert!(container.has(names::AGENT_MANAGER));
        // config 之外无 Lifecycle 需要额外处理；两个 manager 被初始化
        assert_eq!(container.initialize_all().await, 2);

        let agents = start_builtin_agents(&container).await.unwrap();
        assert_eq!(agents.len(), 4);

        let e1 = container.get::<TaskExecutor>(names::TASK_EXECUTOR).unwrap();
        let e2 = container.get::<TaskExecutor>(names::TASK_EXECUTOR).unwrap();
        assert!(!Arc::ptr_eq(&e1, &e2));

        let m1 = container.get::<AgentManager>(names::AGENT_MANAGER).unwrap();
        let m2 = container.get::<AgentManager>(names::AGENT_MANAGER).unwrap();
        assert!(Arc::ptr_eq(&m1, &m2));

        let status = container.get_services_status();
        let manager_status = status
            .iter()
            .find(|s| s.name == names::AGENT_MANAGER)
            .unwrap();
        assert!(manager_status.initialized);
        assert_eq!(manager_status.health, HealthState::Healthy);

        container.shutdown_all().await;
        assert_eq!(m1.get_stats().total_agents, 0);
    }
}
