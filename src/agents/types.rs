//! Agent 数据模型：任务、结果、状态、执行上下文

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ApprovalPolicy, SandboxSection};
use crate::core::OrchestratorError;

/// Agent 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Instantiated,
    Ready,
    Busy,
    Error,
    Terminated,
}

/// 任务状态；合法转移只有 Pending -> InProgress -> Completed | Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// 任务优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Agent 身份与并发上限
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub specialization: String,
    pub capabilities: BTreeSet<String>,
    pub max_concurrent_tasks: usize,
}

impl AgentProfile {
    pub fn new(id: impl Into<String>, specialization: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            specialization: specialization.into(),
            capabilities: BTreeSet::new(),
            max_concurrent_tasks: 1,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }

    /// 与任务所需能力的交集大小
    pub fn matched_capabilities(&self, task: &AgentTask) -> usize {
        task.required_capabilities
            .iter()
            .filter(|c| self.capabilities.contains(*c))
            .count()
    }
}

/// 单个任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: String,
    pub task_type: String,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub required_capabilities: BTreeSet<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 0-100
    pub progress: u8,
    pub error: Option<String>,
}

impl AgentTask {
    pub fn new(task_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            task_type: task_type.into(),
            title: title.into(),
            description: String::new(),
            priority: TaskPriority::Normal,
            status: TaskStatus::Pending,
            required_capabilities: BTreeSet::new(),
            payload: serde_json::Value::Null,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            error: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), OrchestratorError> {
        let legal = matches!(
            (self.status, to),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        );
        if !legal {
            return Err(OrchestratorError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Pending -> InProgress，记录开始时间
    pub fn start(&mut self) -> Result<(), OrchestratorError> {
        self.transition(TaskStatus::InProgress)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// InProgress -> Completed，进度置 100
    pub fn complete(&mut self) -> Result<(), OrchestratorError> {
        self.transition(TaskStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        self.progress = 100;
        Ok(())
    }

    /// InProgress -> Failed
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), OrchestratorError> {
        self.transition(TaskStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        Ok(())
    }

    /// 从旧版 todo 条目转换：根据内容关键词推断所需能力
    pub fn from_todo(todo: &TodoItem) -> Self {
        let status = match todo.status {
            TodoStatus::Pending => TaskStatus::Pending,
            TodoStatus::InProgress => TaskStatus::InProgress,
            TodoStatus::Completed => TaskStatus::Completed,
        };
        let priority = match todo.priority.to_lowercase().as_str() {
            "low" => TaskPriority::Low,
            "high" => TaskPriority::High,
            "urgent" | "critical" => TaskPriority::Urgent,
            _ => TaskPriority::Normal,
        };
        let mut task = Self::new("todo", todo.content.clone())
            .with_id(todo.id.clone())
            .with_description(todo.content.clone())
            .with_priority(priority)
            .with_capabilities(infer_capabilities(&todo.content));
        task.status = status;
        if status == TaskStatus::Completed {
            task.progress = 100;
        }
        task
    }
}

/// 关键词 -> 能力 映射
const CAPABILITY_KEYWORDS: &[(&str, &[&str])] = &[
    ("testing", &["test", "spec", "coverage", "测试"]),
    ("code_review", &["review", "audit", "审查"]),
    ("documentation", &["doc", "readme", "comment", "文档"]),
    ("refactoring", &["refactor", "cleanup", "重构"]),
    ("debugging", &["fix", "bug", "debug", "error", "修复"]),
    ("code_generation", &["implement", "write", "create", "add", "build", "实现"]),
    ("analysis", &["analyze", "analyse", "investigate", "explain", "分析"]),
];

fn infer_capabilities(content: &str) -> Vec<&'static str> {
    let lower = content.to_lowercase();
    CAPABILITY_KEYWORDS
        .iter()
        .filter(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(cap, _)| *cap)
        .collect()
}

/// 旧版 todo 条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

/// Agent 成功执行任务后的产出
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOutput {
    pub summary: String,
    pub data: Option<serde_json::Value>,
}

impl TaskOutput {
    pub fn text(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            data: None,
        }
    }
}

/// 任务执行结果，按任务 id 存入历史
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub agent_id: String,
    pub status: TaskStatus,
    pub output: Option<TaskOutput>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// 任务的最终快照
    pub task: AgentTask,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Agent 运行指标
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AgentMetrics {
    pub success_rate: f64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub average_duration_ms: f64,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            tasks_completed: 0,
            tasks_failed: 0,
            average_duration_ms: 0.0,
        }
    }
}

/// 沙箱权限
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Permissions {
    pub file_system: bool,
    pub network: bool,
    pub commands: bool,
}

impl From<SandboxSection> for Permissions {
    fn from(sandbox: SandboxSection) -> Self {
        Self {
            file_system: sandbox.allow_file_system,
            network: sandbox.allow_network,
            commands: sandbox.allow_commands,
        }
    }
}

/// 执行策略
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPolicy {
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub approval_policy: ApprovalPolicy,
}

/// registerAgent 时交给 agent.initialize 的执行上下文
#[derive(Debug, Clone, Serialize)]
pub struct AgentContext {
    pub agent_id: String,
    pub working_directory: PathBuf,
    pub guidance: String,
    pub permissions: Permissions,
    pub policy: ExecutionPolicy,
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}
