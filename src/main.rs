//! Hive - 多 Agent 编排核心
//!
//! 入口：初始化日志、加载配置、装配容器并启动内置 Agent，
//! 把每个命令行参数作为一个计划任务执行，打印汇总后关闭所有服务。

use std::path::PathBuf;

use anyhow::Context;
use hive::agents::{AgentManager, AgentTask};
use hive::config::load_config;
use hive::core::{
    names, start_builtin_agents, ChainSpec, HiveBuilder, TaskChainManager, PLANNER_AGENT_ID,
};
use hive::executor::{Plan, TaskExecutor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    hive::observability::init();

    let goals: Vec<String> = std::env::args().skip(1).collect();
    if goals.is_empty() {
        eprintln!("usage: hive <task> [<task> ...]");
        eprintln!("  each argument becomes one task of the plan, e.g.");
        eprintln!("  hive \"read the file Cargo.toml\" \"analyze project structure\"");
        return Ok(());
    }

    let config = load_config(std::env::var_os("HIVE_CONFIG").map(PathBuf::from))
        .context("Failed to load config")?;
    let workspace = HiveBuilder::workspace_from_config(&config);
    tracing::info!(workspace = %workspace.display(), "starting hive");

    let container = HiveBuilder::new(config, workspace).build();
    container.initialize_all().await;
    let agents = start_builtin_agents(&container).await?;
    tracing::info!(agents = ?agents, "builtin agents ready");

    let executor = container
        .get::<TaskExecutor>(names::TASK_EXECUTOR)
        .context("Failed to build task executor")?;
    let chains = container.get::<TaskChainManager>(names::TASK_CHAIN_MANAGER)?;
    let manager = container.get::<AgentManager>(names::AGENT_MANAGER)?;

    let mut plan = Plan::new("cli");
    for goal in &goals {
        plan.push(AgentTask::new("cli", goal.as_str()).with_description(goal.as_str()));
    }
    let chain = chains.create_chain(
        ChainSpec::new(&plan.name)
            .with_root_task(plan.tasks[0].id.clone())
            .with_total_steps(plan.tasks.len() as u32),
    );
    chains.add_agent_to_chain(&chain.id, PLANNER_AGENT_ID, "planner");

    let summary = tokio::select! {
        summary = executor.execute_plan(&mut plan) => Some(summary),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, shutting down");
            None
        }
    };

    if let Some(summary) = summary {
        println!(
            "completed: {}  failed: {}  remaining: {}",
            summary.completed, summary.failed, summary.remaining
        );
        for outcome in &summary.outcomes {
            let status = if outcome.success { "ok" } else { "failed" };
            let detail = outcome
                .summary
                .as_deref()
                .or(outcome.error.as_deref())
                .unwrap_or("");
            println!("  [{status}] {} {detail}", outcome.task_id);
        }
        println!("{}", serde_json::to_string_pretty(&manager.get_stats())?);
    }

    container.shutdown_all().await;
    Ok(())
}
