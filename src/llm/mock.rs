//! Mock AI 提供方（用于测试与本地 CLI，无需 API）
//!
//! MockAiProvider 对推荐工具发出一次 ToolCall 后 Complete；
//! ScriptedAiProvider 原样回放给定事件序列。

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::{AiProvider, AiTaskRequest, EventStream, StreamEvent};

/// Mock 提供方：调用推荐的工具并以任务标题作为摘要
#[derive(Debug, Default)]
pub struct MockAiProvider;

#[async_trait]
impl AiProvider for MockAiProvider {
    async fn stream_task(
        &self,
        request: AiTaskRequest,
        _cancel: CancellationToken,
    ) -> Result<EventStream, AgentError> {
        let events = vec![
            StreamEvent::TextDelta {
                text: format!("Using {} for: {}", request.recommendation.tool, request.title),
            },
            StreamEvent::ToolCall {
                id: format!("call_{}", request.task_id),
                name: request.recommendation.tool.clone(),
                args: request.recommendation.args.clone(),
            },
            StreamEvent::Complete {
                summary: format!("Mock finished: {}", request.title),
            },
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// 回放固定事件；可设置每个事件前的延迟，收到取消后停止
#[derive(Debug, Clone, Default)]
pub struct ScriptedAiProvider {
    events: Vec<StreamEvent>,
    delay: Duration,
    fail_with: Option<String>,
}

impl ScriptedAiProvider {
    pub fn new(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// stream_task 直接返回错误
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl AiProvider for ScriptedAiProvider {
    async fn stream_task(
        &self,
        _request: AiTaskRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, AgentError> {
        if let Some(message) = &self.fail_with {
            return Err(AgentError::Provider(message.clone()));
        }
        let delay = self.delay;
        let events = stream::iter(self.events.clone())
            .then(move |event| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                event
            })
            .take_until(cancel.cancelled_owned());
        Ok(Box::pin(events))
    }
}
