//! AI 流式接口与实现（Mock / Scripted）

pub mod mock;
pub mod traits;

pub use mock::{MockAiProvider, ScriptedAiProvider};
pub use traits::{AiProvider, AiTaskRequest, EventStream, StreamEvent};
