//! 事件总线：基于 broadcast 的进程内发布/订阅
//!
//! AgentManager 发布任务生命周期事件，TaskChainManager 订阅 TaskCompleted / TaskFailed 推进任务链进度。
//! 订阅者可按 `EventTopic` 过滤，慢订阅者会丢事件（Lagged）而不是阻塞发布方。

use serde::Serialize;
use tokio::sync::broadcast;

/// 编排事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    AgentRegistered {
        agent_id: String,
        specialization: String,
    },
    AgentRemoved {
        agent_id: String,
    },
    TaskScheduled {
        task_id: String,
        agent_id: String,
    },
    TaskStarted {
        task_id: String,
        agent_id: String,
    },
    TaskCompleted {
        task_id: String,
        agent_id: String,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: String,
        agent_id: String,
        error: String,
    },
    ChainCreated {
        chain_id: String,
        name: String,
    },
    ChainCompleted {
        chain_id: String,
    },
    ChainFailed {
        chain_id: String,
        reason: String,
    },
}

/// 事件主题（订阅过滤用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    AgentRegistered,
    AgentRemoved,
    TaskScheduled,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    ChainCreated,
    ChainCompleted,
    ChainFailed,
}

impl OrchestratorEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::AgentRegistered { .. } => EventTopic::AgentRegistered,
            Self::AgentRemoved { .. } => EventTopic::AgentRemoved,
            Self::TaskScheduled { .. } => EventTopic::TaskScheduled,
            Self::TaskStarted { .. } => EventTopic::TaskStarted,
            Self::TaskCompleted { .. } => EventTopic::TaskCompleted,
            Self::TaskFailed { .. } => EventTopic::TaskFailed,
            Self::ChainCreated { .. } => EventTopic::ChainCreated,
            Self::ChainCompleted { .. } => EventTopic::ChainCompleted,
            Self::ChainFailed { .. } => EventTopic::ChainFailed,
        }
    }
}

/// 广播事件总线，Clone 后共享同一通道
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 订阅全部事件
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }

    /// 只订阅给定主题
    pub fn subscribe_topics(&self, topics: &[EventTopic]) -> TopicSubscription {
        TopicSubscription {
            rx: self.sender.subscribe(),
            topics: topics.to_vec(),
        }
    }

    /// 发布事件，返回收到事件的订阅者数；无订阅者时静默丢弃
    pub fn publish(&self, event: OrchestratorEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// 按主题过滤的订阅
pub struct TopicSubscription {
    rx: broadcast::Receiver<OrchestratorEvent>,
    topics: Vec<EventTopic>,
}

impl TopicSubscription {
    /// 等待下一条匹配事件；通道关闭时返回 None，落后时跳过丢失部分继续
    pub async fn recv(&mut self) -> Option<OrchestratorEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.topics.contains(&event.topic()) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(OrchestratorEvent::TaskStarted {
            task_id: "t1".into(),
            agent_id: "a1".into(),
        });

        match rx.recv().await.unwrap() {
            OrchestratorEvent::TaskStarted { task_id, agent_id } => {
                assert_eq!(task_id, "t1");
                assert_eq!(agent_id, "a1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_no_subscribers() {
        let bus = EventBus::new(16);
        let count = bus.publish(OrchestratorEvent::ChainCompleted {
            chain_id: "c1".into(),
        });
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_topic_filter_skips_other_events() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe_topics(&[EventTopic::TaskFailed]);

        bus.publish(OrchestratorEvent::TaskCompleted {
            task_id: "t1".into(),
            agent_id: "a1".into(),
            duration_ms: 5,
        });
        bus.publish(OrchestratorEvent::TaskFailed {
            task_id: "t2".into(),
            agent_id: "a1".into(),
            error: "boom".into(),
        });

        let event = sub.recv().await.unwrap();
        assert_eq!(event.topic(), EventTopic::TaskFailed);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(OrchestratorEvent::ChainFailed {
            chain_id: "c1".into(),
            reason: "stale chain".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "chain_failed");
        assert_eq!(json["reason"], "stale chain");
    }
}
