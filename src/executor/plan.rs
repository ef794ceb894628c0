//! 计划与执行结果
//!
//! Plan 是有序任务列表；当前任务 = 第一个 Pending，若没有则恢复第一个 InProgress，
//! 已完成或失败的任务不会被重跑。

use serde::Serialize;
use serde_json::Value;

use crate::agents::{AgentTask, TaskStatus, TodoItem};

#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub tasks: Vec<AgentTask>,
}

impl Plan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: format!("plan_{}", uuid::Uuid::new_v4()),
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: AgentTask) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn push(&mut self, task: AgentTask) {
        self.tasks.push(task);
    }

    /// 由旧版 todo 列表生成计划（已完成的 todo 跳过）
    pub fn from_todos(name: impl Into<String>, todos: &[TodoItem]) -> Self {
        let mut plan = Self::new(name);
        plan.tasks = todos
            .iter()
            .filter(|t| t.status != crate::agents::TodoStatus::Completed)
            .map(AgentTask::from_todo)
            .collect();
        plan
    }

    pub fn current_index(&self) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.status == TaskStatus::Pending)
            .or_else(|| {
                self.tasks
                    .iter()
                    .position(|t| t.status == TaskStatus::InProgress)
            })
    }

    pub fn next_pending(&self) -> Option<&AgentTask> {
        self.tasks.iter().find(|t| t.status == TaskStatus::Pending)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// 未结束的任务数（Pending + InProgress）
    pub fn remaining(&self) -> usize {
        self.tasks.iter().filter(|t| !t.status.is_terminal()).count()
    }
}

/// 任务走的执行路径
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionPath {
    /// 高置信度工具意图，经 AI 流式执行
    ToolStream { tool: String, confidence: f32 },
    /// 无明确意图，通用分析
    Fallback { related_files: Vec<String> },
}

/// 一次工具调用的记录
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub args: Value,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ToolCallRecord {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// 单任务执行记录：流中的文本、工具调用、工具结果
#[derive(Debug, Clone, Serialize)]
pub struct TaskExecutionOutcome {
    pub task_id: String,
    pub success: bool,
    pub path: Option<ExecutionPath>,
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tool_results: Vec<ToolCallRecord>,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TaskExecutionOutcome {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            path: None,
            text: String::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            summary: None,
            error: None,
            duration_ms: 0,
        }
    }
}

/// 计划执行汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionSummary {
    pub completed: usize,
    pub failed: usize,
    pub remaining: usize,
    /// 因审批拒绝或取消而提前结束
    pub stopped_early: bool,
    pub outcomes: Vec<TaskExecutionOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::TodoStatus;

    #[test]
    fn test_current_task_selection() {
        let mut plan = Plan::new("p")
            .with_task(AgentTask::new("x", "a"))
            .with_task(AgentTask::new("x", "b"));
        assert_eq!(plan.current_index(), Some(0));

        plan.tasks[0].start().unwrap();
        assert_eq!(plan.current_index(), Some(1));

        plan.tasks[1].start().unwrap();
        plan.tasks[1].complete().unwrap();
        // 没有 Pending 时恢复第一个 InProgress
        assert_eq!(plan.current_index(), Some(0));

        plan.tasks[0].fail("boom").unwrap();
        assert_eq!(plan.current_index(), None);
        assert_eq!(plan.remaining(), 0);
    }

    #[test]
    fn test_from_todos_skips_completed() {
        let todos = vec![
            TodoItem {
                id: "1".into(),
                content: "write tests".into(),
                status: TodoStatus::Pending,
                priority: "high".into(),
            },
            TodoItem {
                id: "2".into(),
                content: "done already".into(),
                status: TodoStatus::Completed,
                priority: String::new(),
            },
        ];
        let plan = Plan::from_todos("legacy", &todos);
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].status, TaskStatus::Pending);
    }
}
