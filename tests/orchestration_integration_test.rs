//! 编排集成测试：容器装配 → 内置 Agent 调度 → 事件驱动任务链 → 计划执行

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hive::agents::{
    Agent, AgentContext, AgentManager, AgentProfile, AgentTask, TaskOutput, TaskStatus,
};
use hive::config::AppConfig;
use hive::core::{
    names, start_builtin_agents, AgentError, ChainSpec, ChainStatus, ContainerError, EventTopic,
    HiveBuilder, OrchestratorError, OrchestratorEvent, SchedulingError, ServiceContainer,
    TaskChainManager, PLANNER_AGENT_ID,
};
use hive::executor::{ExecutionPath, Plan, TaskExecutor};

fn workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "hello from notes").unwrap();
    dir
}

async fn boot(dir: &tempfile::TempDir) -> ServiceContainer {
    let container = HiveBuilder::new(AppConfig::default(), dir.path().to_path_buf()).build();
    container.initialize_all().await;
    start_builtin_agents(&container).await.unwrap();
    container
}

/// 总是失败的 Agent
struct Flaky {
    profile: AgentProfile,
}

#[async_trait]
impl Agent for Flaky {
    fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    async fn initialize(&self, _context: AgentContext) -> Result<(), AgentError> {
        Ok(())
    }

    async fn execute_task(&self, task: &AgentTask) -> Result<TaskOutput, AgentError> {
        Err(AgentError::Other(format!("cannot do {}", task.title)))
    }
}

#[tokio::test]
async fn test_scheduled_tasks_advance_chain() {
    let dir = workspace();
    let container = boot(&dir).await;
    let manager = container.get::<AgentManager>(names::AGENT_MANAGER).unwrap();
    let chains = container
        .get::<TaskChainManager>(names::TASK_CHAIN_MANAGER)
        .unwrap();
    let mut done = manager
        .events()
        .subscribe_topics(&[EventTopic::ChainCompleted]);

    let chain = chains.create_chain(ChainSpec::new("notes").with_total_steps(2));
    assert!(chains.add_agent_to_chain(&chain.id, "general", "worker"));

    let read = AgentTask::new("io", "read the file notes.txt")
        .with_id("t-read")
        .with_capabilities(["analysis"]);
    let list = AgentTask::new("io", "list the files")
        .with_id("t-list")
        .with_capabilities(["analysis"]);
    // general（并发 2，能力 2 项）得分高于 code_reviewer（并发 1）
    assert_eq!(manager.schedule_task(read, None).unwrap(), "general");
    assert_eq!(manager.schedule_task(list, None).unwrap(), "general");

    let event = tokio::time::timeout(Duration::from_secs(5), done.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        event,
        OrchestratorEvent::ChainCompleted { ref chain_id } if *chain_id == chain.id
    ));

    let read = manager.task_result("t-read").unwrap();
    assert_eq!(read.status, TaskStatus::Completed);
    assert!(read.output.unwrap().summary.contains("hello from notes"));
    let list = manager.task_result("t-list").unwrap();
    assert!(list.is_success());

    assert_eq!(chains.get_chain(&chain.id).unwrap().progress, 100);
    assert!(!chains.is_agent_in_active_chain("general"));
    assert_eq!(manager.get_agent("general").unwrap().current_tasks(), 0);

    container.shutdown_all().await;
}

#[tokio::test]
async fn test_failed_task_fails_chain_and_is_recorded() {
    let dir = workspace();
    let container = boot(&dir).await;
    let manager = container.get::<AgentManager>(names::AGENT_MANAGER).unwrap();
    let chains = container
        .get::<TaskChainManager>(names::TASK_CHAIN_MANAGER)
        .unwrap();
    let mut failed = manager.events().subscribe_topics(&[EventTopic::ChainFailed]);

    manager
        .register_agent(Arc::new(Flaky {
            profile: AgentProfile::new("flaky", "testing").with_capabilities(["testing"]),
        }))
        .await
        .unwrap();
    let chain = chains.create_chain(ChainSpec::new("doomed").with_total_steps(3));
    chains.add_agent_to_chain(&chain.id, "flaky", "tester");

    let err = manager
        .execute_task("flaky", AgentTask::new("qa", "run suite").with_id("t-flaky"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Execution { .. }));
    assert_eq!(manager.get_agent("flaky").unwrap().current_tasks(), 0);
    assert_eq!(
        manager.task_result("t-flaky").unwrap().status,
        TaskStatus::Failed
    );

    let event = tokio::time::timeout(Duration::from_secs(5), failed.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        OrchestratorEvent::ChainFailed { chain_id, reason } => {
            assert_eq!(chain_id, chain.id);
            assert_eq!(reason, "t-flaky");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(chains.get_chain(&chain.id).unwrap().status, ChainStatus::Failed);

    container.shutdown_all().await;
}

#[tokio::test]
async fn test_preferred_agent_is_not_substituted() {
    let dir = workspace();
    let container = boot(&dir).await;
    let manager = container.get::<AgentManager>(names::AGENT_MANAGER).unwrap();

    let task = AgentTask::new("docs", "write docs").with_capabilities(["documentation"]);
    let err = manager.schedule_task(task.clone(), Some("tester")).unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Scheduling(SchedulingError::PreferredAgentCannotHandle { .. })
    ));
    assert_eq!(manager.schedule_task(task, None).unwrap(), "doc_writer");

    container.shutdown_all().await;
}

#[tokio::test]
async fn test_plan_run_streams_tools_and_tracks_chain() {
    let dir = workspace();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/scheduler.rs"), "fn tick() {}\n").unwrap();
    let container = boot(&dir).await;

    let executor = container.get::<TaskExecutor>(names::TASK_EXECUTOR).unwrap();
    let chains = container
        .get::<TaskChainManager>(names::TASK_CHAIN_MANAGER)
        .unwrap();
    let manager = container.get::<AgentManager>(names::AGENT_MANAGER).unwrap();
    let mut done = manager
        .events()
        .subscribe_topics(&[EventTopic::ChainCompleted]);

    let mut plan = Plan::new("plan")
        .with_task(AgentTask::new("io", "read the file notes.txt"))
        .with_task(AgentTask::new("refactor", "Refactor scheduler"));
    let chain = chains.create_chain(ChainSpec::new("plan").with_total_steps(2));
    chains.add_agent_to_chain(&chain.id, PLANNER_AGENT_ID, "planner");

    let summary = executor.execute_plan(&mut plan).await;
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.remaining, 0);

    let streamed = &summary.outcomes[0];
    assert!(matches!(
        streamed.path,
        Some(ExecutionPath::ToolStream { ref tool, .. }) if tool == "read_file"
    ));
    assert_eq!(streamed.tool_calls[0].output.as_deref(), Some("hello from notes"));

    let fallback = &summary.outcomes[1];
    match &fallback.path {
        Some(ExecutionPath::Fallback { related_files }) => {
            assert_eq!(related_files, &["src/scheduler.rs"]);
        }
        other => panic!("expected fallback, got {other:?}"),
    }

    tokio::time::timeout(Duration::from_secs(5), done.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chains.get_chain(&chain.id).unwrap().status, ChainStatus::Completed);

    container.shutdown_all().await;
}

#[test]
fn test_container_reports_circular_dependency() {
    let container = ServiceContainer::new();
    container.register_singleton("a", |r| {
        let b = r.get::<u32>("b")?;
        Ok(*b)
    });
    container.register_singleton("b", |r| {
        let a = r.get::<u32>("a")?;
        Ok(*a + 1)
    });

    match container.get::<u32>("a") {
        Err(ContainerError::CircularDependency { name, chain }) => {
            assert_eq!(name, "a");
            assert_eq!(chain, "a -> b -> a");
        }
        other => panic!("expected circular dependency, got {other:?}"),
    }
}
