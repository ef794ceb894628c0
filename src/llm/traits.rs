//! AI 流式执行接口
//!
//! TaskExecutor 把高置信度工具意图的任务交给 AiProvider，后者返回类型化事件流：
//! 文本增量、工具调用、工具结果、完成、错误。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::executor::ToolRecommendation;

/// 流式事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    /// 需要执行的工具调用（由 TaskExecutor 通过 ToolService 执行）
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    /// 提供方已自行执行的工具结果
    ToolResult {
        id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    Complete {
        summary: String,
    },
    Error {
        message: String,
    },
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// 单个任务的流式请求
#[derive(Debug, Clone, Serialize)]
pub struct AiTaskRequest {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub recommendation: ToolRecommendation,
}

impl AiTaskRequest {
    /// 任务文本（标题 + 描述）
    pub fn message(&self) -> String {
        if self.description.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.description)
        }
    }
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    /// 开始流式执行；cancel 在任务超时时被取消，实现方应尽快结束流
    async fn stream_task(
        &self,
        request: AiTaskRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, AgentError>;
}
