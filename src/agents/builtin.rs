//! 内置 Agent：基于工具路由的通用执行者
//!
//! ToolAgent 用 ToolRouter 分析任务文本，调用置信度最高的工具；没有任何推荐时返回 NoToolIntent。
//! register_builtin_agents 登记几个按专长区分的 ToolAgent 类。

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;

use crate::agents::registry::AgentClassMetadata;
use crate::agents::{Agent, AgentContext, AgentManager, AgentProfile, AgentTask, TaskOutput};
use crate::core::AgentError;
use crate::executor::{ToolRouter, ToolService};

pub struct ToolAgent {
    profile: AgentProfile,
    tools: Arc<dyn ToolService>,
    router: Arc<dyn ToolRouter>,
    context: RwLock<Option<AgentContext>>,
    guidance: RwLock<String>,
}

impl ToolAgent {
    pub fn new(
        profile: AgentProfile,
        tools: Arc<dyn ToolService>,
        router: Arc<dyn ToolRouter>,
    ) -> Self {
        Self {
            profile,
            tools,
            router,
            context: RwLock::new(None),
            guidance: RwLock::new(String::new()),
        }
    }

    pub fn guidance(&self) -> String {
        self.guidance.read().clone()
    }
}

#[async_trait]
impl Agent for ToolAgent {
    fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    async fn initialize(&self, context: AgentContext) -> Result<(), AgentError> {
        tracing::debug!(
            agent_id = %context.agent_id,
            guidance_chars = context.guidance.len(),
            file_system = context.permissions.file_system,
            "tool agent initialized"
        );
        *self.guidance.write() = context.guidance.clone();
        *self.context.write() = Some(context);
        Ok(())
    }

    async fn execute_task(&self, task: &AgentTask) -> Result<TaskOutput, AgentError> {
        let message = if task.description.is_empty() {
            task.title.clone()
        } else {
            format!("{}\n{}", task.title, task.description)
        };
        let rec = self
            .router
            .analyze_message(&message)
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::NoToolIntent(task.id.clone()))?;

        // payload 中的参数优先于路由器给出的参数
        let mut args = rec.args.clone();
        if let (Some(base), Some(extra)) = (args.as_object_mut(), task.payload.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }

        tracing::info!(
            agent_id = %self.profile.id,
            tool = %rec.tool,
            confidence = rec.confidence,
            "agent calling tool"
        );
        let output = self.tools.execute_tool(&rec.tool, args.clone()).await?;
        let summary = output.lines().next().unwrap_or_default().to_string();
        Ok(TaskOutput {
            summary,
            data: Some(json!({
                "tool": rec.tool,
                "confidence": rec.confidence,
                "args": args,
                "output": output,
            })),
        })
    }

    fn update_guidance(&self, guidance: &str) {
        *self.guidance.write() = guidance.to_string();
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        self.context.write().take();
        Ok(())
    }
}

/// 内置类：(class id, 专长, 能力, 并发上限, 描述)
const BUILTIN_CLASSES: &[(&str, &str, &[&str], usize, &str)] = &[
    (
        "general",
        "general",
        &["analysis", "code_generation"],
        2,
        "General purpose agent backed by the workspace tools",
    ),
    (
        "code_reviewer",
        "code_review",
        &["code_review", "analysis"],
        1,
        "Reads and summarizes code for review",
    ),
    (
        "tester",
        "testing",
        &["testing", "debugging"],
        1,
        "Inspects tests and failures",
    ),
    (
        "doc_writer",
        "documentation",
        &["documentation"],
        1,
        "Reads and outlines documentation",
    ),
];

/// 登记内置 ToolAgent 类，返回登记的 class id
pub fn register_builtin_agents(
    manager: &AgentManager,
    tools: Arc<dyn ToolService>,
    router: Arc<dyn ToolRouter>,
) -> Vec<String> {
    BUILTIN_CLASSES
        .iter()
        .map(|(class_id, specialization, caps, max, description)| {
            let tools = tools.clone();
            let router = router.clone();
            manager.register_agent_class(
                move |profile, _cwd| {
                    let agent = ToolAgent::new(profile, tools.clone(), router.clone());
                    Arc::new(agent) as Arc<dyn Agent>
                },
                AgentClassMetadata::new(*class_id, *specialization)
                    .with_description(*description)
                    .with_capabilities(caps.iter().copied())
                    .with_max_concurrent_tasks(*max),
            );
            class_id.to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ToolRecommendation;
    use serde_json::Value;

    struct OneTool;

    impl ToolRouter for OneTool {
        fn analyze_message(&self, message: &str) -> Vec<ToolRecommendation> {
            if message.contains("nothing") {
                return Vec::new();
            }
            vec![ToolRecommendation {
                tool: "read_file".into(),
                confidence: 0.9,
                args: json!({"path": "a.txt"}),
            }]
        }
    }

    struct EchoArgs;

    #[async_trait]
    impl ToolService for EchoArgs {
        async fn execute_tool(&self, name: &str, args: Value) -> Result<String, AgentError> {
            Ok(format!("{name} {args}"))
        }
    }

    #[tokio::test]
    async fn test_tool_agent_calls_top_tool_with_payload_args() {
        let agent = ToolAgent::new(
            AgentProfile::new("g", "general"),
            Arc::new(EchoArgs),
            Arc::new(OneTool),
        );
        let task = AgentTask::new("x", "read a file").with_payload(json!({"path": "b.txt"}));
        let out = agent.execute_task(&task).await.unwrap();
        assert!(out.summary.starts_with("read_file"));
        assert!(out.summary.contains("b.txt"));

        let none = AgentTask::new("x", "nothing to do");
        assert!(matches!(
            agent.execute_task(&none).await,
            Err(AgentError::NoToolIntent(_))
        ));
    }
}
