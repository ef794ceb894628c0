//! 计划执行器：逐个执行计划中的任务
//!
//! 每个任务：标记 InProgress → 通知开始 → 工具意图分析 →
//! 高置信度走 AI 流式执行（ToolCall 由 ToolService 执行），否则走通用分析（读相关文件 + analyze_project）。
//! 成功后询问是否进入下一个任务（默认继续），失败后询问是否继续（默认停止）。
//! 每个任务有墙钟超时；超时或正常结束时都会取消交给 AI 提供方的子 CancellationToken。

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentTask, TaskStatus};
use crate::config::ExecutorSection;
use crate::core::{AgentError, EventBus, OrchestratorError, OrchestratorEvent};
use crate::executor::{
    Approval, ExecutionPath, ExecutionSummary, LogNotifier, Notifier, Plan, PolicyApproval,
    TaskExecutionOutcome, ToolCallRecord, ToolRecommendation, ToolRouter, ToolService,
};
use crate::llm::{AiProvider, AiTaskRequest, StreamEvent};
use crate::tools::router::tokenize;
use crate::tools::SafeFs;

/// 未配置事件来源时使用的 agent id
const EXECUTOR_AGENT_ID: &str = "task_executor";

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "into", "from", "this", "that", "all", "add", "fix", "task",
];

/// 执行参数
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub task_timeout: Duration,
    pub confidence_threshold: f32,
    pub max_related_files: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&ExecutorSection::default())
    }
}

impl From<&ExecutorSection> for ExecutorSettings {
    fn from(section: &ExecutorSection) -> Self {
        Self {
            task_timeout: section.task_timeout(),
            confidence_threshold: section.tool_confidence_threshold,
            max_related_files: section.max_related_files,
        }
    }
}

pub struct TaskExecutor {
    router: Arc<dyn ToolRouter>,
    tools: Arc<dyn ToolService>,
    ai: Arc<dyn AiProvider>,
    approval: Arc<dyn Approval>,
    notifier: Arc<dyn Notifier>,
    workspace: SafeFs,
    settings: ExecutorSettings,
    events: Option<(EventBus, String)>,
    shutdown: CancellationToken,
}

impl TaskExecutor {
    pub fn new(
        router: Arc<dyn ToolRouter>,
        tools: Arc<dyn ToolService>,
        ai: Arc<dyn AiProvider>,
        workspace: &Path,
    ) -> Self {
        Self {
            router,
            tools,
            ai,
            approval: Arc::new(PolicyApproval::new(Default::default())),
            notifier: Arc::new(LogNotifier),
            workspace: SafeFs::new(workspace),
            settings: ExecutorSettings::default(),
            events: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_approval(mut self, approval: Arc<dyn Approval>) -> Self {
        self.approval = approval;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.settings.task_timeout = timeout;
        self
    }

    /// 以 agent_id 的名义在总线上发布 TaskStarted / TaskCompleted / TaskFailed
    pub fn with_event_bus(mut self, bus: EventBus, agent_id: impl Into<String>) -> Self {
        self.events = Some((bus, agent_id.into()));
        self
    }

    /// 取消后正在执行的任务以 Cancelled 失败，循环不再开始新任务
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn agent_id(&self) -> &str {
        self.events
            .as_ref()
            .map(|(_, id)| id.as_str())
            .unwrap_or(EXECUTOR_AGENT_ID)
    }

    fn publish(&self, event: OrchestratorEvent) {
        if let Some((bus, _)) = &self.events {
            bus.publish(event);
        }
    }

    /// 执行整个计划，总是返回汇总
    pub async fn execute_plan(&self, plan: &mut Plan) -> ExecutionSummary {
        tracing::info!(
            plan_id = %plan.id,
            name = %plan.name,
            tasks = plan.tasks.len(),
            "executing plan"
        );
        let mut summary = ExecutionSummary::default();

        while let Some(idx) = plan.current_index() {
            if self.shutdown.is_cancelled() {
                summary.stopped_early = true;
                break;
            }

            let task = &mut plan.tasks[idx];
            if task.status == TaskStatus::Pending {
                if let Err(e) = task.start() {
                    tracing::error!(error = %e, "cannot start task");
                    break;
                }
            } else {
                tracing::info!(task_id = %task.id, "resuming in-progress task");
            }
            self.notifier.task_started(task);
            self.publish(OrchestratorEvent::TaskStarted {
                task_id: task.id.clone(),
                agent_id: self.agent_id().to_string(),
            });

            let snapshot = task.clone();
            let (outcome, result) = self.run_with_timeout(&snapshot).await;
            let task = &mut plan.tasks[idx];

            let proceed = match result {
                Ok(()) => {
                    if let Err(e) = task.complete() {
                        tracing::warn!(error = %e, "unexpected task transition failure");
                    }
                    self.notifier
                        .task_completed(task, true, outcome.summary.as_deref().unwrap_or(""));
                    self.publish(OrchestratorEvent::TaskCompleted {
                        task_id: task.id.clone(),
                        agent_id: self.agent_id().to_string(),
                        duration_ms: outcome.duration_ms,
                    });
                    summary.outcomes.push(outcome);
                    match plan.next_pending() {
                        Some(next) => {
                            self.approval
                                .confirm("Proceed to the next task?", &next.title, true)
                                .await
                        }
                        None => true,
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    if let Err(e) = task.fail(message.clone()) {
                        tracing::warn!(error = %e, "unexpected task transition failure");
                    }
                    self.notifier.task_completed(task, false, &message);
                    self.publish(OrchestratorEvent::TaskFailed {
                        task_id: task.id.clone(),
                        agent_id: self.agent_id().to_string(),
                        error: message.clone(),
                    });
                    summary.outcomes.push(outcome);
                    if plan.next_pending().is_some() {
                        let prompt = "Task failed. Continue with the remaining tasks?";
                        self.approval.confirm(prompt, &message, false).await
                    } else {
                        true
                    }
                }
            };

            if !proceed {
                tracing::info!(plan_id = %plan.id, "plan stopped by approval");
                summary.stopped_early = true;
                break;
            }
        }

        summary.completed = plan.count(TaskStatus::Completed);
        summary.failed = plan.count(TaskStatus::Failed);
        summary.remaining = plan.remaining();
        self.notifier
            .plan_summary(summary.completed, summary.failed, summary.remaining);
        summary
    }

    /// 带超时执行单个任务；子 token 在任何退出路径上都被取消
    async fn run_with_timeout(
        &self,
        task: &AgentTask,
    ) -> (TaskExecutionOutcome, Result<(), OrchestratorError>) {
        let token = self.shutdown.child_token();
        let _cancel_on_exit = token.clone().drop_guard();
        let mut outcome = TaskExecutionOutcome::new(&task.id);
        let clock = Instant::now();

        let timed = tokio::time::timeout(
            self.settings.task_timeout,
            self.run_task(task, &token, &mut outcome),
        )
        .await;
        outcome.duration_ms = clock.elapsed().as_millis() as u64;

        let result = match timed {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(OrchestratorError::Execution {
                task_id: task.id.clone(),
                agent_id: self.agent_id().to_string(),
                source,
            }),
            Err(_) => {
                tracing::warn!(
                    task_id = %task.id,
                    timeout_secs = self.settings.task_timeout.as_secs(),
                    "task timed out"
                );
                Err(OrchestratorError::Timeout {
                    task_id: task.id.clone(),
                    timeout_secs: self.settings.task_timeout.as_secs(),
                })
            }
        };
        outcome.success = result.is_ok();
        outcome.error = result.as_ref().err().map(|e| e.to_string());
        (outcome, result)
    }

    #[tracing::instrument(skip_all, fields(task_id = %task.id))]
    async fn run_task(
        &self,
        task: &AgentTask,
        token: &CancellationToken,
        outcome: &mut TaskExecutionOutcome,
    ) -> Result<(), AgentError> {
        let message = task_message(task);
        let top = self
            .router
            .analyze_message(&message)
            .into_iter()
            .next()
            .filter(|r| r.confidence >= self.settings.confidence_threshold);

        match top {
            Some(rec) => self.stream_with_tool(task, rec, token, outcome).await,
            None => self.generic_analysis(task, outcome).await,
        }
    }

    async fn stream_with_tool(
        &self,
        task: &AgentTask,
        rec: ToolRecommendation,
        token: &CancellationToken,
        outcome: &mut TaskExecutionOutcome,
    ) -> Result<(), AgentError> {
        tracing::info!(tool = %rec.tool, confidence = rec.confidence, "tool intent detected");
        outcome.path = Some(ExecutionPath::ToolStream {
            tool: rec.tool.clone(),
            confidence: rec.confidence,
        });

        let request = AiTaskRequest {
            task_id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            recommendation: rec,
        };
        let mut stream = self.ai.stream_task(request, token.clone()).await?;

        loop {
            let event = tokio::select! {
                _ = token.cancelled() => return Err(AgentError::Cancelled),
                event = stream.next() => event,
            };
            let Some(event) = event else {
                tracing::debug!("stream ended without completion event");
                return Ok(());
            };
            match event {
                StreamEvent::TextDelta { text } => outcome.text.push_str(&text),
                StreamEvent::ToolCall { id, name, args } => {
                    let record = self.call_tool(id, name, args).await;
                    outcome.tool_calls.push(record);
                }
                StreamEvent::ToolResult {
                    id,
                    name,
                    output,
                    is_error,
                } => {
                    let (output, error) = if is_error {
                        (None, Some(output))
                    } else {
                        (Some(output), None)
                    };
                    outcome.tool_results.push(ToolCallRecord {
                        id,
                        name,
                        args: serde_json::Value::Null,
                        output,
                        error,
                    });
                }
                StreamEvent::Complete { summary } => {
                    outcome.summary = Some(summary);
                    return Ok(());
                }
                StreamEvent::Error { message } => return Err(AgentError::Provider(message)),
            }
        }
    }

    /// 工具错误只记录，不使任务失败
    async fn call_tool(&self, id: String, name: String, args: serde_json::Value) -> ToolCallRecord {
        match self.tools.execute_tool(&name, args.clone()).await {
            Ok(output) => ToolCallRecord {
                id,
                name,
                args,
                output: Some(output),
                error: None,
            },
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool call failed");
                ToolCallRecord {
                    id,
                    name,
                    args,
                    output: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// 通用分析：读取与标题相关的文件，再对项目做一次整体分析
    async fn generic_analysis(
        &self,
        task: &AgentTask,
        outcome: &mut TaskExecutionOutcome,
    ) -> Result<(), AgentError> {
        let keywords: Vec<String> = tokenize(&task.title)
            .into_iter()
            .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
            .collect();
        let files = self
            .workspace
            .find_related_files(&keywords, self.settings.max_related_files);
        tracing::info!(related = files.len(), "no clear tool intent, running generic analysis");
        outcome.path = Some(ExecutionPath::Fallback {
            related_files: files.clone(),
        });

        for (n, path) in files.iter().enumerate() {
            let record = self
                .call_tool(
                    format!("{}-read-{n}", task.id),
                    "read_file".to_string(),
                    json!({ "path": path }),
                )
                .await;
            outcome.tool_calls.push(record);
        }

        let args = json!({ "focus": task.title, "files": files });
        let analysis = self.tools.execute_tool("analyze_project", args.clone()).await?;
        outcome.summary = analysis.lines().next().map(str::to_string);
        outcome.tool_calls.push(ToolCallRecord {
            id: format!("{}-analyze", task.id),
            name: "analyze_project".to_string(),
            args,
            output: Some(analysis),
            error: None,
        });
        Ok(())
    }
}

fn task_message(task: &AgentTask) -> String {
    if task.description.is_empty() || task.description == task.title {
        task.title.clone()
    } else {
        format!("{}\n{}", task.title, task.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Permissions;
    use crate::config::ApprovalPolicy;
    use crate::llm::{MockAiProvider, ScriptedAiProvider};
    use crate::tools::{default_registry, KeywordToolRouter, ToolExecutor};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    struct FixedRouter(Vec<ToolRecommendation>);

    impl ToolRouter for FixedRouter {
        fn analyze_message(&self, _message: &str) -> Vec<ToolRecommendation> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingTools {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ToolService for RecordingTools {
        async fn execute_tool(&self, name: &str, _args: Value) -> Result<String, AgentError> {
            self.calls.lock().push(name.to_string());
            match name {
                "broken" => Err(AgentError::ToolExecutionFailed("broken tool".into())),
                _ => Ok(format!("{name} ok")),
            }
        }
    }

    fn rec(tool: &str, confidence: f32) -> ToolRecommendation {
        ToolRecommendation {
            tool: tool.into(),
            confidence,
            args: json!({}),
        }
    }

    fn executor(
        router: Vec<ToolRecommendation>,
        tools: Arc<RecordingTools>,
        ai: Arc<dyn AiProvider>,
        policy: ApprovalPolicy,
    ) -> TaskExecutor {
        TaskExecutor::new(
            Arc::new(FixedRouter(router)),
            tools,
            ai,
            &std::env::temp_dir(),
        )
        .with_approval(Arc::new(PolicyApproval::new(policy)))
    }

    fn plan(titles: &[&str]) -> Plan {
        titles
            .iter()
            .fold(Plan::new("test"), |p, t| p.with_task(AgentTask::new("x", *t)))
    }

    #[tokio::test]
    async fn test_high_confidence_streams_and_runs_tool_calls() {
        let tools = Arc::new(RecordingTools::default());
        let exec = executor(
            vec![rec("read_file", 0.9)],
            tools.clone(),
            Arc::new(MockAiProvider),
            ApprovalPolicy::Prompt,
        );
        let mut p = plan(&["read it"]);
        let summary = exec.execute_plan(&mut p).await;

        assert_eq!(summary.completed, 1);
        assert_eq!(tools.calls.lock().as_slice(), ["read_file"]);
        let outcome = &summary.outcomes[0];
        assert!(outcome.success);
        assert_eq!(outcome.tool_calls[0].output.as_deref(), Some("read_file ok"));
        assert!(outcome.text.contains("read_file"));
        assert_eq!(p.tasks[0].progress, 100);
    }

    #[tokio::test]
    async fn test_tool_error_recorded_without_failing_task() {
        let tools = Arc::new(RecordingTools::default());
        let ai = ScriptedAiProvider::new(vec![
            StreamEvent::ToolCall {
                id: "c1".into(),
                name: "broken".into(),
                args: json!({}),
            },
            StreamEvent::ToolResult {
                id: "c0".into(),
                name: "remote".into(),
                output: "42".into(),
                is_error: false,
            },
        ]);
        let exec = executor(vec![rec("broken", 0.9)], tools, Arc::new(ai), ApprovalPolicy::Prompt);
        let mut p = plan(&["try"]);
        let summary = exec.execute_plan(&mut p).await;

        // 流在没有 Complete 的情况下结束也算成功
        assert_eq!(summary.completed, 1);
        let outcome = &summary.outcomes[0];
        assert!(outcome.tool_calls[0].is_error());
        assert_eq!(outcome.tool_results[0].output.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_stream_error_fails_and_default_stops() {
        let tools = Arc::new(RecordingTools::default());
        let ai = ScriptedAiProvider::new(vec![StreamEvent::Error {
            message: "model overloaded".into(),
        }]);
        let recs = vec![rec("read_file", 0.9)];
        let exec = executor(recs, tools, Arc::new(ai), ApprovalPolicy::Prompt);
        let mut p = plan(&["first", "second"]);
        let summary = exec.execute_plan(&mut p).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.remaining, 1);
        assert!(summary.stopped_early);
        assert!(p.tasks[0].error.as_deref().unwrap().contains("model overloaded"));
        assert_eq!(p.tasks[1].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_auto_approve_continues_after_failure() {
        let tools = Arc::new(RecordingTools::default());
        let exec = executor(
            vec![rec("read_file", 0.9)],
            tools,
            Arc::new(ScriptedAiProvider::failing("no key")),
            ApprovalPolicy::AutoApprove,
        );
        let mut p = plan(&["a", "b", "c"]);
        let summary = exec.execute_plan(&mut p).await;
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.remaining, 0);
        assert!(!summary.stopped_early);
    }

    #[tokio::test]
    async fn test_decline_after_success_stops() {
        let tools = Arc::new(RecordingTools::default());
        let exec = executor(
            vec![rec("read_file", 0.9)],
            tools,
            Arc::new(MockAiProvider),
            ApprovalPolicy::AutoDecline,
        );
        let mut p = plan(&["a", "b"]);
        let summary = exec.execute_plan(&mut p).await;
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.remaining, 1);
        assert!(summary.stopped_early);
    }

    #[tokio::test]
    async fn test_timeout_fails_task_and_cancels_stream() {
        let tools = Arc::new(RecordingTools::default());
        let ai = ScriptedAiProvider::new(vec![StreamEvent::Complete {
            summary: "late".into(),
        }])
        .with_delay(Duration::from_millis(500));
        let recs = vec![rec("read_file", 0.9)];
        let exec = executor(recs, tools, Arc::new(ai), ApprovalPolicy::Prompt)
            .with_task_timeout(Duration::from_millis(30));
        let mut p = plan(&["slow"]);
        let summary = exec.execute_plan(&mut p).await;

        assert_eq!(summary.failed, 1);
        assert!(summary.outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_resumes_in_progress_task() {
        let tools = Arc::new(RecordingTools::default());
        let recs = vec![rec("read_file", 0.9)];
        let exec = executor(recs, tools, Arc::new(MockAiProvider), ApprovalPolicy::Prompt);
        let mut p = plan(&["done", "half"]);
        p.tasks[0].start().unwrap();
        p.tasks[0].complete().unwrap();
        p.tasks[1].start().unwrap();

        let summary = exec.execute_plan(&mut p).await;
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.outcomes.len(), 1);
        assert_eq!(summary.outcomes[0].task_id, p.tasks[1].id);
    }

    #[tokio::test]
    async fn test_fallback_reads_related_files_and_analyzes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/scheduler.rs"), "fn tick() {}\n").unwrap();

        let registry = default_registry(dir.path());
        let router = Arc::new(KeywordToolRouter::from_registry(&registry));
        let permissions = Permissions {
            file_system: true,
            network: false,
            commands: false,
        };
        let tools = Arc::new(ToolExecutor::new(registry, permissions, 5));
        let exec = TaskExecutor::new(router, tools, Arc::new(MockAiProvider), dir.path());

        let mut p = Plan::new("refactor").with_task(AgentTask::new("x", "Refactor scheduler"));
        let summary = exec.execute_plan(&mut p).await;

        assert_eq!(summary.completed, 1);
        let outcome = &summary.outcomes[0];
        assert_eq!(
            outcome.path,
            Some(ExecutionPath::Fallback {
                related_files: vec!["src/scheduler.rs".into()]
            })
        );
        assert_eq!(outcome.tool_calls[0].output.as_deref(), Some("fn tick() {}\n"));
        assert_eq!(outcome.tool_calls[1].name, "analyze_project");
        assert!(outcome.summary.as_deref().unwrap().starts_with("Project: 1 files"));
    }

    #[tokio::test]
    async fn test_publishes_events_under_agent_id() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let tools = Arc::new(RecordingTools::default());
        let recs = vec![rec("read_file", 0.9)];
        let exec = executor(recs, tools, Arc::new(MockAiProvider), ApprovalPolicy::Prompt)
            .with_event_bus(bus.clone(), "planner");
        let mut p = plan(&["one"]);
        exec.execute_plan(&mut p).await;

        match rx.recv().await.unwrap() {
            OrchestratorEvent::TaskStarted { agent_id, .. } => assert_eq!(agent_id, "planner"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            OrchestratorEvent::TaskCompleted { .. }
        ));
    }
}
