//! 任务链：跟踪协作完成同一目标的一组 Agent
//!
//! - 反向索引 agent -> chain 保证一个 Agent 同时至多在一条活跃（pending / running）链中
//! - 进度 = round(completed_steps / total_steps × 100)，活跃期间只增不减，到 100 自动完成
//! - 完成或失败是终态：释放全部成员，之后拒绝一切修改
//! - 订阅事件总线：TaskCompleted 推进成员所在链一步，TaskFailed 以任务 id 为原因使链失败
//! - 定期清理长时间无进展的活跃链（原因 "stale chain"）

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ChainsSection;
use crate::core::{EventBus, EventTopic, Lifecycle, OrchestratorEvent, ServiceHealth};

/// 链状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl ChainStatus {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainMember {
    pub agent_id: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainMetadata {
    pub root_task_id: Option<String>,
    pub parent_chain_id: Option<String>,
    pub total_steps: u32,
    pub completed_steps: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskChain {
    pub id: String,
    pub name: String,
    pub status: ChainStatus,
    /// 加入顺序
    pub members: Vec<ChainMember>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 0-100
    pub progress: u8,
    pub metadata: ChainMetadata,
    pub failure_reason: Option<String>,
}

impl TaskChain {
    pub fn has_member(&self, agent_id: &str) -> bool {
        self.members.iter().any(|m| m.agent_id == agent_id)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// create_chain 参数
#[derive(Debug, Clone, Default)]
pub struct ChainSpec {
    pub name: String,
    pub root_task_id: Option<String>,
    pub parent_chain_id: Option<String>,
    /// 默认 1
    pub total_steps: Option<u32>,
}

impl ChainSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_root_task(mut self, task_id: impl Into<String>) -> Self {
        self.root_task_id = Some(task_id.into());
        self
    }

    pub fn with_parent(mut self, chain_id: impl Into<String>) -> Self {
        self.parent_chain_id = Some(chain_id.into());
        self
    }

    pub fn with_total_steps(mut self, steps: u32) -> Self {
        self.total_steps = Some(steps);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ChainStats {
    pub total: usize,
    pub active: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct ChainBook {
    chains: HashMap<String, TaskChain>,
    /// agent -> chain
    agent_index: HashMap<String, String>,
}

impl ChainBook {
    fn release_members(&mut self, chain_id: &str) {
        self.agent_index.retain(|_, c| c != chain_id);
    }

    /// 终态转移；返回是否生效
    fn finish(&mut self, chain_id: &str, status: ChainStatus, reason: Option<String>) -> bool {
        let Some(chain) = self.chains.get_mut(chain_id) else {
            return false;
        };
        if chain.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        chain.status = status;
        chain.updated_at = now;
        chain.completed_at = Some(now);
        chain.failure_reason = reason;
        if status == ChainStatus::Completed {
            chain.progress = 100;
            chain.metadata.completed_steps = chain
                .metadata
                .completed_steps
                .max(chain.metadata.total_steps);
        }
        self.release_members(chain_id);
        true
    }
}

/// 任务链管理器；Clone 后共享同一份状态
#[derive(Clone)]
pub struct TaskChainManager {
    book: Arc<RwLock<ChainBook>>,
    events: EventBus,
    stale_threshold: Duration,
    sweep_interval: Duration,
    /// 后台任务的停止信号；shutdown 后再次 initialize 时换新
    cancel: Arc<Mutex<CancellationToken>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskChainManager {
    pub fn new(events: EventBus, stale_threshold: Duration, sweep_interval: Duration) -> Self {
        Self {
            book: Arc::new(RwLock::new(ChainBook::default())),
            events,
            stale_threshold,
            sweep_interval,
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            workers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn from_config(section: &ChainsSection, events: EventBus) -> Self {
        Self::new(events, section.stale_threshold(), section.sweep_interval())
    }

    pub fn create_chain(&self, spec: ChainSpec) -> TaskChain {
        let now = Utc::now();
        let chain = TaskChain {
            id: format!("chain_{}", uuid::Uuid::new_v4()),
            name: spec.name,
            status: ChainStatus::Pending,
            members: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            progress: 0,
            metadata: ChainMetadata {
                root_task_id: spec.root_task_id,
                parent_chain_id: spec.parent_chain_id,
                total_steps: spec.total_steps.unwrap_or(1).max(1),
                completed_steps: 0,
            },
            failure_reason: None,
        };
        self.book
            .write()
            .chains
            .insert(chain.id.clone(), chain.clone());
        tracing::info!(
            chain_id = %chain.id,
            name = %chain.name,
            total_steps = chain.metadata.total_steps,
            "chain created"
        );
        self.events.publish(OrchestratorEvent::ChainCreated {
            chain_id: chain.id.clone(),
            name: chain.name.clone(),
        });
        chain
    }

    /// 加入成员（幂等）。链不存在或已结束、Agent 已在另一条活跃链中时返回 false；
    /// 若 Agent 所在的旧链处于暂停状态，则先脱离旧链。
    pub fn add_agent_to_chain(&self, chain_id: &str, agent_id: &str, role: &str) -> bool {
        let mut book = self.book.write();
        match book.chains.get(chain_id) {
            Some(chain) if !chain.status.is_terminal() => {}
            _ => return false,
        }

        if let Some(current) = book.agent_index.get(agent_id).cloned() {
            if current != chain_id {
                let other_active = book
                    .chains
                    .get(&current)
                    .map(|c| c.status.is_active())
                    .unwrap_or(false);
                if other_active {
                    tracing::warn!(
                        agent_id,
                        chain_id = %current,
                        "agent already in an active chain"
                    );
                    return false;
                }
                if let Some(old) = book.chains.get_mut(&current) {
                    old.members.retain(|m| m.agent_id != agent_id);
                    old.touch();
                }
                book.agent_index.remove(agent_id);
            }
        }

        book.agent_index
            .insert(agent_id.to_string(), chain_id.to_string());
        let Some(chain) = book.chains.get_mut(chain_id) else {
            return false;
        };
        if !chain.has_member(agent_id) {
            chain.members.push(ChainMember {
                agent_id: agent_id.to_string(),
                role: role.to_string(),
                joined_at: Utc::now(),
            });
            tracing::debug!(chain_id, agent_id, role, "agent joined chain");
        }
        if chain.status == ChainStatus::Pending {
            chain.status = ChainStatus::Running;
        }
        chain.touch();
        true
    }

    pub fn remove_agent_from_chain(&self, agent_id: &str) -> bool {
        let mut book = self.book.write();
        let Some(chain_id) = book.agent_index.remove(agent_id) else {
            return false;
        };
        if let Some(chain) = book.chains.get_mut(&chain_id) {
            chain.members.retain(|m| m.agent_id != agent_id);
            chain.touch();
        }
        true
    }

    pub fn is_agent_in_active_chain(&self, agent_id: &str) -> bool {
        let book = self.book.read();
        book.agent_index
            .get(agent_id)
            .and_then(|id| book.chains.get(id))
            .map(|c| c.status.is_active())
            .unwrap_or(false)
    }

    pub fn chain_for_agent(&self, agent_id: &str) -> Option<TaskChain> {
        let book = self.book.read();
        book.agent_index
            .get(agent_id)
            .and_then(|id| book.chains.get(id))
            .cloned()
    }

    /// 更新步数并重算进度；进度不回退，达到 100 自动完成
    pub fn update_progress(
        &self,
        chain_id: &str,
        completed_steps: u32,
        total_steps: Option<u32>,
    ) -> bool {
        let reached_end = {
            let mut book = self.book.write();
            let Some(chain) = book.chains.get_mut(chain_id) else {
                return false;
            };
            if chain.status.is_terminal() {
                return false;
            }
            if let Some(total) = total_steps {
                chain.metadata.total_steps = total.max(1);
            }
            chain.metadata.completed_steps = chain.metadata.completed_steps.max(completed_steps);
            let ratio =
                chain.metadata.completed_steps as f64 / chain.metadata.total_steps as f64;
            let computed = (ratio * 100.0).round().min(100.0) as u8;
            chain.progress = chain.progress.max(computed);
            chain.touch();
            tracing::debug!(chain_id, progress = chain.progress, "chain progress");
            chain.progress >= 100
        };
        if reached_end {
            self.complete_chain(chain_id);
        }
        true
    }

    pub fn complete_chain(&self, chain_id: &str) -> bool {
        let done = self
            .book
            .write()
            .finish(chain_id, ChainStatus::Completed, None);
        if done {
            tracing::info!(chain_id, "chain completed");
            self.events.publish(OrchestratorEvent::ChainCompleted {
                chain_id: chain_id.to_string(),
            });
        }
        done
    }

    pub fn fail_chain(&self, chain_id: &str, reason: &str) -> bool {
        let done = self.book.write().finish(
            chain_id,
            ChainStatus::Failed,
            Some(reason.to_string()),
        );
        if done {
            tracing::warn!(chain_id, reason, "chain failed");
            self.events.publish(OrchestratorEvent::ChainFailed {
                chain_id: chain_id.to_string(),
                reason: reason.to_string(),
            });
        }
        done
    }

    pub fn pause_chain(&self, chain_id: &str) -> bool {
        let mut book = self.book.write();
        match book.chains.get_mut(chain_id) {
            Some(chain) if chain.status.is_active() => {
                chain.status = ChainStatus::Paused;
                chain.touch();
                true
            }
            _ => false,
        }
    }

    pub fn resume_chain(&self, chain_id: &str) -> bool {
        let mut book = self.book.write();
        match book.chains.get_mut(chain_id) {
            Some(chain) if chain.status == ChainStatus::Paused => {
                chain.status = ChainStatus::Running;
                chain.touch();
                true
            }
            _ => false,
        }
    }

    pub fn get_chain(&self, chain_id: &str) -> Option<TaskChain> {
        self.book.read().chains.get(chain_id).cloned()
    }

    pub fn active_chains(&self) -> Vec<TaskChain> {
        let mut chains: Vec<_> = self
            .book
            .read()
            .chains
            .values()
            .filter(|c| c.status.is_active())
            .cloned()
            .collect();
        chains.sort_by_key(|c| c.created_at);
        chains
    }

    pub fn stats(&self) -> ChainStats {
        let book = self.book.read();
        let mut stats = ChainStats {
            total: book.chains.len(),
            ..Default::default()
        };
        for chain in book.chains.values() {
            match chain.status {
                ChainStatus::Pending | ChainStatus::Running => stats.active += 1,
                ChainStatus::Paused => stats.paused += 1,
                ChainStatus::Completed => stats.completed += 1,
                ChainStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// 失败所有 updated_at 早于 threshold 的活跃链，返回其 id
    pub fn cleanup_stale_chains(&self, threshold: Duration) -> Vec<String> {
        let threshold = chrono::Duration::from_std(threshold)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let now = Utc::now();
        let stale: Vec<String> = self
            .book
            .read()
            .chains
            .values()
            .filter(|c| c.status.is_active() && now.signed_duration_since(c.updated_at) > threshold)
            .map(|c| c.id.clone())
            .collect();
        for id in &stale {
            self.fail_chain(id, "stale chain");
        }
        stale
    }

    /// 根据任务事件推进或终止成员所在的活跃链
    pub fn handle_event(&self, event: &OrchestratorEvent) {
        match event {
            OrchestratorEvent::TaskCompleted { agent_id, .. } => {
                let Some(chain) = self.chain_for_agent(agent_id) else {
                    return;
                };
                if chain.status.is_active() {
                    self.update_progress(&chain.id, chain.metadata.completed_steps + 1, None);
                }
            }
            OrchestratorEvent::TaskFailed {
                task_id, agent_id, ..
            } => {
                let Some(chain) = self.chain_for_agent(agent_id) else {
                    return;
                };
                if chain.status.is_active() {
                    self.fail_chain(&chain.id, task_id);
                }
            }
            _ => {}
        }
    }

    fn worker_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    /// 后台订阅 TaskCompleted / TaskFailed
    pub fn spawn_event_listener(&self) -> JoinHandle<()> {
        let mut sub = self
            .events
            .subscribe_topics(&[EventTopic::TaskCompleted, EventTopic::TaskFailed]);
        let manager = self.clone();
        let stop = self.worker_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    event = sub.recv() => match event {
                        Some(event) => manager.handle_event(&event),
                        None => break,
                    },
                }
            }
            tracing::debug!("chain event listener stopped");
        })
    }

    /// 每隔 interval 清理一次陈旧链
    pub fn spawn_stale_sweeper(&self, interval: Duration, threshold: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        let stop = self.worker_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let failed = manager.cleanup_stale_chains(threshold);
                        if !failed.is_empty() {
                            tracing::info!(count = failed.len(), "stale chains failed");
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Lifecycle for TaskChainManager {
    async fn initialize(&self) -> anyhow::Result<()> {
        let mut workers = self.workers.lock();
        if workers.is_empty() {
            {
                let mut cancel = self.cancel.lock();
                if cancel.is_cancelled() {
                    *cancel = CancellationToken::new();
                }
            }
            workers.push(self.spawn_event_listener());
            workers.push(self.spawn_stale_sweeper(self.sweep_interval, self.stale_threshold));
            tracing::info!(
                stale_threshold_secs = self.stale_threshold.as_secs(),
                "chain manager started"
            );
        }
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.cancel.lock().cancel();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "chain worker join failed");
            }
        }
        Ok(())
    }

    fn status(&self) -> ServiceHealth {
        let stats = self.stats();
        ServiceHealth::healthy().with_detail(format!(
            "{} active, {} completed, {} failed",
            stats.active, stats.completed, stats.failed
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TaskChainManager {
        TaskChainManager::new(
            EventBus::new(64),
            Duration::from_secs(3600),
            Duration::from_secs(300),
        )
    }

    #[test]
    fn test_progress_reaches_completion() {
        let m = manager();
        let chain = m.create_chain(ChainSpec::new("release").with_total_steps(4));
        assert_eq!(chain.status, ChainStatus::Pending);
        assert!(m.add_agent_to_chain(&chain.id, "a1", "builder"));

        let expected = [25, 50, 75, 100];
        for (step, want) in (1..=4).zip(expected) {
            assert!(m.update_progress(&chain.id, step, None));
            let c = m.get_chain(&chain.id).unwrap();
            assert_eq!(c.progress, want);
            if step < 4 {
                assert_eq!(c.status, ChainStatus::Running);
            }
        }
        let done = m.get_chain(&chain.id).unwrap();
        assert_eq!(done.status, ChainStatus::Completed);
        assert!(done.completed_at.is_some());
        assert!(!m.is_agent_in_active_chain("a1"));
        assert!(!m.update_progress(&chain.id, 5, None));
    }

    #[test]
    fn test_progress_never_decreases() {
        let m = manager();
        let chain = m.create_chain(ChainSpec::new("p").with_total_steps(4));
        m.update_progress(&chain.id, 2, None);
        m.update_progress(&chain.id, 1, None);
        assert_eq!(m.get_chain(&chain.id).unwrap().progress, 50);
        // 增大 total 也不回退
        m.update_progress(&chain.id, 2, Some(10));
        assert_eq!(m.get_chain(&chain.id).unwrap().progress, 50);
    }

    #[test]
    fn test_default_total_steps_is_one() {
        let m = manager();
        let chain = m.create_chain(ChainSpec::new("single"));
        assert_eq!(chain.metadata.total_steps, 1);
        m.update_progress(&chain.id, 1, None);
        assert_eq!(m.get_chain(&chain.id).unwrap().status, ChainStatus::Completed);
    }

    #[test]
    fn test_agent_in_one_active_chain() {
        let m = manager();
        let c1 = m.create_chain(ChainSpec::new("one"));
        let c2 = m.create_chain(ChainSpec::new("two"));

        assert!(!m.add_agent_to_chain("missing", "a1", "x"));
        assert!(m.add_agent_to_chain(&c1.id, "a1", "lead"));
        assert!(m.add_agent_to_chain(&c1.id, "a1", "lead"));
        assert_eq!(m.get_chain(&c1.id).unwrap().members.len(), 1);
        assert!(!m.add_agent_to_chain(&c2.id, "a1", "helper"));
        assert!(m.is_agent_in_active_chain("a1"));

        // 暂停的链不占用成员
        assert!(m.pause_chain(&c1.id));
        assert!(!m.is_agent_in_active_chain("a1"));
        assert!(m.add_agent_to_chain(&c2.id, "a1", "helper"));
        assert!(!m.get_chain(&c1.id).unwrap().has_member("a1"));
        assert_eq!(m.chain_for_agent("a1").unwrap().id, c2.id);

        assert!(m.remove_agent_from_chain("a1"));
        assert!(!m.remove_agent_from_chain("a1"));
        assert!(m.get_chain(&c2.id).unwrap().members.is_empty());
    }

    #[test]
    fn test_terminal_chain_rejects_mutation() {
        let m = manager();
        let chain = m.create_chain(ChainSpec::new("doomed"));
        m.add_agent_to_chain(&chain.id, "a1", "x");
        assert!(m.fail_chain(&chain.id, "boom"));
        assert!(!m.is_agent_in_active_chain("a1"));
        assert!(!m.add_agent_to_chain(&chain.id, "a2", "x"));
        assert!(!m.complete_chain(&chain.id));
        assert!(!m.fail_chain(&chain.id, "again"));
        assert!(!m.resume_chain(&chain.id));
        assert_eq!(
            m.get_chain(&chain.id).unwrap().failure_reason.as_deref(),
            Some("boom")
        );
    }

    #[test]
    fn test_task_events_drive_chain() {
        let m = manager();
        let chain = m.create_chain(ChainSpec::new("events").with_total_steps(2));
        m.add_agent_to_chain(&chain.id, "a1", "x");

        m.handle_event(&OrchestratorEvent::TaskCompleted {
            task_id: "t1".into(),
            agent_id: "a1".into(),
            duration_ms: 5,
        });
        assert_eq!(m.get_chain(&chain.id).unwrap().progress, 50);

        m.handle_event(&OrchestratorEvent::TaskFailed {
            task_id: "t2".into(),
            agent_id: "a1".into(),
            error: "bad".into(),
        });
        let c = m.get_chain(&chain.id).unwrap();
        assert_eq!(c.status, ChainStatus::Failed);
        assert_eq!(c.failure_reason.as_deref(), Some("t2"));

        // 不在链中的 Agent 不影响任何链
        m.handle_event(&OrchestratorEvent::TaskCompleted {
            task_id: "t3".into(),
            agent_id: "stranger".into(),
            duration_ms: 1,
        });
        assert_eq!(m.stats().failed, 1);
    }

    #[test]
    fn test_cleanup_stale_chains() {
        let m = manager();
        let old = m.create_chain(ChainSpec::new("old"));
        let fresh = m.create_chain(ChainSpec::new("fresh"));
        m.add_agent_to_chain(&old.id, "a1", "x");
        {
            let mut book = m.book.write();
            let chain = book.chains.get_mut(&old.id).unwrap();
            chain.updated_at = Utc::now() - chrono::Duration::hours(2);
        }

        let failed = m.cleanup_stale_chains(Duration::from_secs(3600));
        assert_eq!(failed, vec![old.id.clone()]);
        let c = m.get_chain(&old.id).unwrap();
        assert_eq!(c.failure_reason.as_deref(), Some("stale chain"));
        assert!(!m.is_agent_in_active_chain("a1"));
        assert_eq!(m.get_chain(&fresh.id).unwrap().status, ChainStatus::Pending);
    }

    #[tokio::test]
    async fn test_listener_follows_bus() {
        let bus = EventBus::new(64);
        let m = TaskChainManager::new(
            bus.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(300),
        );
        let mut chain_events = bus.subscribe_topics(&[EventTopic::ChainCompleted]);
        m.initialize().await.unwrap();

        let chain = m.create_chain(ChainSpec::new("bus"));
        m.add_agent_to_chain(&chain.id, "a1", "x");
        bus.publish(OrchestratorEvent::TaskCompleted {
            task_id: "t1".into(),
            agent_id: "a1".into(),
            duration_ms: 3,
        });

        let event = tokio::time::timeout(Duration::from_secs(2), chain_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            OrchestratorEvent::ChainCompleted { chain_id } if chain_id == chain.id
        ));

        m.shutdown().await.unwrap();
        assert!(m.workers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_restart_after_shutdown() {
        let bus = EventBus::new(64);
        let m = TaskChainManager::new(
            bus.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(300),
        );
        m.initialize().await.unwrap();
        m.shutdown().await.unwrap();
        m.initialize().await.unwrap();
        assert_eq!(m.workers.lock().len(), 2);
        assert!(m.workers.lock().iter().all(|w| !w.is_finished()));

        let mut failed = bus.subscribe_topics(&[EventTopic::ChainFailed]);
        let chain = m.create_chain(ChainSpec::new("again"));
        m.add_agent_to_chain(&chain.id, "a1", "x");
        bus.publish(OrchestratorEvent::TaskFailed {
            task_id: "t9".into(),
            agent_id: "a1".into(),
            error: "boom".into(),
        });

        let event = tokio::time::timeout(Duration::from_secs(2), failed.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            OrchestratorEvent::ChainFailed { reason, .. } if reason == "t9"
        ));
        m.shutdown().await.unwrap();
    }
}
