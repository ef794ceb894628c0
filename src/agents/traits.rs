//! Agent trait：可插拔的任务执行者
//!
//! 运行时簿记（状态、并发计数、成功率）由 AgentManager 持有的 AgentHandle 维护，
//! 实现方只需关心身份、能力匹配与任务执行。

use async_trait::async_trait;

use crate::agents::{AgentContext, AgentProfile, AgentTask, TaskOutput};
use crate::core::AgentError;

#[async_trait]
pub trait Agent: Send + Sync {
    fn profile(&self) -> &AgentProfile;

    /// 注册时调用一次，拿到工作目录、指导文档、权限与执行策略
    async fn initialize(&self, context: AgentContext) -> Result<(), AgentError>;

    /// 默认：任务所需能力是 Agent 能力的子集
    fn can_handle(&self, task: &AgentTask) -> bool {
        task.required_capabilities
            .is_subset(&self.profile().capabilities)
    }

    async fn execute_task(&self, task: &AgentTask) -> Result<TaskOutput, AgentError>;

    /// 指导文档变更时推送
    fn update_guidance(&self, _guidance: &str) {}

    async fn cleanup(&self) -> Result<(), AgentError> {
        Ok(())
    }
}
