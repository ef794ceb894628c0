//! TaskExecutor 的外部协作者：工具路由、工具服务、审批、通知
//!
//! 流式 AI 接口见 crate::llm::AiProvider。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::agents::AgentTask;
use crate::config::ApprovalPolicy;
use crate::core::AgentError;

/// 工具推荐：置信度 0.0-1.0，args 为建议参数
#[derive(Debug, Clone, Serialize)]
pub struct ToolRecommendation {
    pub tool: String,
    pub confidence: f32,
    pub args: Value,
}

/// 分析任务文本，返回按置信度降序排列的工具推荐
pub trait ToolRouter: Send + Sync {
    fn analyze_message(&self, message: &str) -> Vec<ToolRecommendation>;
}

#[async_trait]
pub trait ToolService: Send + Sync {
    async fn execute_tool(&self, name: &str, args: Value) -> Result<String, AgentError>;
}

/// 是否继续的确认
#[async_trait]
pub trait Approval: Send + Sync {
    async fn confirm(&self, prompt: &str, detail: &str, default: bool) -> bool;
}

/// 按配置的审批策略作答；Prompt 模式下无人交互，取调用方给的默认值
#[derive(Debug, Clone, Copy)]
pub struct PolicyApproval {
    pub policy: ApprovalPolicy,
}

impl PolicyApproval {
    pub fn new(policy: ApprovalPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Approval for PolicyApproval {
    async fn confirm(&self, prompt: &str, detail: &str, default: bool) -> bool {
        let answer = match self.policy {
            ApprovalPolicy::AutoApprove => true,
            ApprovalPolicy::AutoDecline => false,
            ApprovalPolicy::Prompt => default,
        };
        tracing::info!(prompt, detail, answer, "approval");
        answer
    }
}

/// 计划执行通知
pub trait Notifier: Send + Sync {
    fn task_started(&self, task: &AgentTask);
    fn task_completed(&self, task: &AgentTask, success: bool, detail: &str);
    fn plan_summary(&self, completed: usize, failed: usize, remaining: usize);
}

/// 以日志形式输出通知
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn task_started(&self, task: &AgentTask) {
        tracing::info!(task_id = %task.id, title = %task.title, "▶ task started");
    }

    fn task_completed(&self, task: &AgentTask, success: bool, detail: &str) {
        if success {
            tracing::info!(task_id = %task.id, title = %task.title, "✓ task completed");
        } else {
            tracing::warn!(
                task_id = %task.id,
                title = %task.title,
                error = detail,
                "✗ task failed"
            );
        }
    }

    fn plan_summary(&self, completed: usize, failed: usize, remaining: usize) {
        tracing::info!(completed, failed, remaining, "plan finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_policy_approval() {
        let prompt = PolicyApproval::new(ApprovalPolicy::Prompt);
        assert!(prompt.confirm("next?", "", true).await);
        assert!(!prompt.confirm("continue?", "", false).await);

        let yes = PolicyApproval::new(ApprovalPolicy::AutoApprove);
        assert!(yes.confirm("continue?", "", false).await);

        let no = PolicyApproval::new(ApprovalPolicy::AutoDecline);
        assert!(!no.confirm("next?", "", true).await);
    }
}
