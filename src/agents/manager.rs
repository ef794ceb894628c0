//! Agent 管理器：注册、能力调度、并发限流、任务执行生命周期
//!
//! - 每个 Agent 一个 FIFO 队列与一个信号量（许可数 = maxConcurrentTasks），当前任务数 = 已借出许可数，
//!   许可随执行结束自动归还，任何退出路径都不会泄漏计数
//! - execute_task 单任务接口：失败时先记录 failed 结果再把错误返回给调用方
//! - run_sequential / run_parallel / process_agent_queue 批处理：失败只记日志，继续下一个任务
//! - 所有表由 parking_lot 锁保护，锁从不跨 await 持有

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::agents::registry::AgentClassMetadata;
use crate::agents::{
    Agent, AgentContext, AgentMetrics, AgentOverrides, AgentProfile, AgentRegistry, AgentStatus,
    AgentTask, ConfigProvider, ExecutionPolicy, GuidanceProvider, Permissions, TaskResult,
    TaskStatus,
};
use crate::core::{
    EventBus, HealthState, Lifecycle, OrchestratorError, OrchestratorEvent, SchedulingError,
    ServiceHealth,
};

#[derive(Debug, Default, Clone, Copy)]
struct RunCounters {
    completed: u64,
    failed: u64,
    total_duration_ms: u64,
}

/// 已注册 Agent 的运行时句柄：状态、并发许可、任务队列、指标
pub struct AgentHandle {
    agent: Arc<dyn Agent>,
    profile: AgentProfile,
    status: RwLock<AgentStatus>,
    slots: Arc<Semaphore>,
    queue: Mutex<VecDeque<AgentTask>>,
    counters: Mutex<RunCounters>,
}

impl AgentHandle {
    fn new(agent: Arc<dyn Agent>) -> Self {
        let profile = agent.profile().clone();
        let max = profile.max_concurrent_tasks.max(1);
        Self {
            agent,
            profile: AgentProfile {
                max_concurrent_tasks: max,
                ..profile
            },
            status: RwLock::new(AgentStatus::Instantiated),
            slots: Arc::new(Semaphore::new(max)),
            queue: Mutex::new(VecDeque::new()),
            counters: Mutex::new(RunCounters::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.profile.id
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    /// Ready 且有任务在跑时报告 Busy
    pub fn status(&self) -> AgentStatus {
        match *self.status.read() {
            AgentStatus::Ready if self.current_tasks() > 0 => AgentStatus::Busy,
            status => status,
        }
    }

    fn set_status(&self, status: AgentStatus) {
        *self.status.write() = status;
    }

    /// 只有 Ready / Busy 的 Agent 接收任务
    pub fn is_available(&self) -> bool {
        matches!(self.status(), AgentStatus::Ready | AgentStatus::Busy)
    }

    fn ensure_available(&self) -> Result<(), SchedulingError> {
        if self.is_available() {
            return Ok(());
        }
        Err(SchedulingError::AgentUnavailable {
            agent_id: self.profile.id.clone(),
            status: self.status(),
        })
    }

    pub fn current_tasks(&self) -> usize {
        if self.slots.is_closed() {
            return 0;
        }
        self.profile.max_concurrent_tasks - self.slots.available_permits()
    }

    pub fn spare_capacity(&self) -> usize {
        if self.slots.is_closed() {
            return 0;
        }
        self.slots.available_permits()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn metrics(&self) -> AgentMetrics {
        let c = *self.counters.lock();
        let finished = c.completed + c.failed;
        AgentMetrics {
            success_rate: if finished == 0 {
                1.0
            } else {
                c.completed as f64 / finished as f64
            },
            tasks_completed: c.completed,
            tasks_failed: c.failed,
            average_duration_ms: if finished == 0 {
                0.0
            } else {
                c.total_duration_ms as f64 / finished as f64
            },
        }
    }

    fn record(&self, success: bool, duration_ms: u64) {
        let mut c = self.counters.lock();
        if success {
            c.completed += 1;
        } else {
            c.failed += 1;
        }
        c.total_duration_ms += duration_ms;
    }

    fn try_acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().try_acquire_owned().ok()
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, SchedulingError> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SchedulingError::AgentNotFound(self.profile.id.clone()))
    }

    fn push_task(&self, task: AgentTask) {
        self.queue.lock().push_back(task);
    }

    fn pop_task(&self) -> Option<AgentTask> {
        self.queue.lock().pop_front()
    }

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.profile.id.clone(),
            name: self.profile.name.clone(),
            specialization: self.profile.specialization.clone(),
            capabilities: self.profile.capabilities.iter().cloned().collect(),
            status: self.status(),
            current_tasks: self.current_tasks(),
            max_concurrent_tasks: self.profile.max_concurrent_tasks,
            queued_tasks: self.queue_len(),
            metrics: self.metrics(),
        }
    }

    /// 移除时关闭信号量：等待许可的调用方会收到 AgentNotFound
    fn terminate(&self) -> usize {
        self.slots.close();
        self.set_status(AgentStatus::Terminated);
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.profile.id)
            .field("status", &self.status())
            .field("current_tasks", &self.current_tasks())
            .field("queued_tasks", &self.queue_len())
            .finish()
    }
}

/// Agent 对外快照
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub name: String,
    pub specialization: String,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    pub current_tasks: usize,
    pub max_concurrent_tasks: usize,
    pub queued_tasks: usize,
    pub metrics: AgentMetrics,
}

/// getStats 汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManagerStats {
    pub total_agents: usize,
    pub active_agents: usize,
    pub busy_agents: usize,
    pub pending_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub average_task_duration_ms: f64,
}

/// 批处理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub completed: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, success: bool) {
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
    }

    fn merge(mut self, other: BatchReport) -> Self {
        self.completed += other.completed;
        self.failed += other.failed;
        self
    }
}

#[derive(Default)]
struct AgentTable {
    handles: HashMap<String, Arc<AgentHandle>>,
    /// 注册顺序，决定调度平分时的胜者与批处理顺序
    order: Vec<String>,
}

impl AgentTable {
    fn ordered(&self) -> Vec<Arc<AgentHandle>> {
        self.order
            .iter()
            .filter_map(|id| self.handles.get(id).cloned())
            .collect()
    }

    fn remove(&mut self, agent_id: &str) -> Option<Arc<AgentHandle>> {
        self.order.retain(|id| id != agent_id);
        self.handles.remove(agent_id)
    }
}

/// Agent 管理器
pub struct AgentManager {
    registry: RwLock<AgentRegistry>,
    agents: RwLock<AgentTable>,
    history: RwLock<HashMap<String, TaskResult>>,
    config: Arc<dyn ConfigProvider>,
    guidance: Arc<dyn GuidanceProvider>,
    events: EventBus,
    working_directory: PathBuf,
    /// 覆盖配置中的 defaultAgentTimeout
    execution_timeout: Option<Duration>,
}

impl AgentManager {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        guidance: Arc<dyn GuidanceProvider>,
        events: EventBus,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry: RwLock::new(AgentRegistry::new()),
            agents: RwLock::new(AgentTable::default()),
            history: RwLock::new(HashMap::new()),
            config,
            guidance,
            events,
            working_directory: working_directory.into(),
            execution_timeout: None,
        }
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn execution_timeout(&self) -> Duration {
        self.execution_timeout.unwrap_or_else(|| {
            Duration::from_secs(self.config.agent_config().default_agent_timeout_secs.max(1))
        })
    }

    // ---- 注册 ----

    /// 登记可实例化的 Agent 类，不创建实例
    pub fn register_agent_class<F>(&self, factory: F, metadata: AgentClassMetadata)
    where
        F: Fn(AgentProfile, &Path) -> Arc<dyn Agent> + Send + Sync + 'static,
    {
        self.registry.write().register(factory, metadata);
    }

    pub fn list_agent_classes(&self) -> Vec<AgentClassMetadata> {
        self.registry.read().list()
    }

    pub fn set_agent_class_enabled(&self, class_id: &str, enabled: bool) -> bool {
        self.registry.write().set_enabled(class_id, enabled)
    }

    /// 按类实例化并注册
    pub async fn create_agent(
        &self,
        class_id: &str,
        overrides: Option<AgentOverrides>,
    ) -> Result<Arc<AgentHandle>, OrchestratorError> {
        let (factory, meta) = self.registry.read().resolve(class_id)?;
        let profile = overrides.unwrap_or_default().apply(&meta);
        tracing::info!(class_id, agent_id = %profile.id, "creating agent");
        let agent = factory(profile, &self.working_directory);
        self.register_agent(agent).await
    }

    /// 构建执行上下文、初始化并存入表；初始化失败时以 Error 状态保留并返回错误
    pub async fn register_agent(
        &self,
        agent: Arc<dyn Agent>,
    ) -> Result<Arc<AgentHandle>, OrchestratorError> {
        let agent_id = agent.profile().id.clone();
        if self.agents.read().handles.contains_key(&agent_id) {
            return Err(SchedulingError::AgentAlreadyRegistered(agent_id).into());
        }

        let cfg = self.config.agent_config();
        let specialization = agent.profile().specialization.clone();
        let guidance = if cfg.enable_guidance_system {
            self.guidance
                .context_for_agent(&specialization, &self.working_directory)
        } else {
            String::new()
        };
        let context = AgentContext {
            agent_id: agent_id.clone(),
            working_directory: self.working_directory.clone(),
            guidance,
            permissions: Permissions::from(cfg.sandbox),
            policy: ExecutionPolicy {
                timeout: self.execution_timeout(),
                approval_policy: cfg.approval_policy,
            },
        };

        let handle = Arc::new(AgentHandle::new(agent));
        let init = handle.agent.initialize(context).await;

        {
            let mut table = self.agents.write();
            if table.handles.contains_key(&agent_id) {
                return Err(SchedulingError::AgentAlreadyRegistered(agent_id).into());
            }
            table.handles.insert(agent_id.clone(), handle.clone());
            table.order.push(agent_id.clone());
        }

        if let Err(source) = init {
            handle.set_status(AgentStatus::Error);
            tracing::error!(agent_id = %agent_id, error = %source, "agent initialization failed");
            return Err(OrchestratorError::Initialization { agent_id, source });
        }

        handle.set_status(AgentStatus::Ready);
        tracing::info!(
            agent_id = %agent_id,
            specialization = %specialization,
            max_concurrent_tasks = handle.profile.max_concurrent_tasks,
            "agent registered"
        );
        self.events.publish(OrchestratorEvent::AgentRegistered {
            agent_id,
            specialization,
        });
        Ok(handle)
    }

    /// 移除单个 Agent：调用其 cleanup，丢弃尚未执行的排队任务
    pub async fn unregister_agent(&self, agent_id: &str) -> bool {
        let Some(handle) = self.agents.write().remove(agent_id) else {
            return false;
        };
        let dropped = handle.terminate();
        if dropped > 0 {
            tracing::warn!(agent_id, dropped, "queued tasks dropped with agent");
        }
        if let Err(e) = handle.agent.cleanup().await {
            tracing::warn!(agent_id, error = %e, "agent cleanup failed");
        }
        self.events.publish(OrchestratorEvent::AgentRemoved {
            agent_id: agent_id.to_string(),
        });
        true
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<Arc<AgentHandle>> {
        self.agents.read().handles.get(agent_id).cloned()
    }

    pub fn list_agents(&self) -> Vec<AgentSnapshot> {
        self.agents
            .read()
            .ordered()
            .iter()
            .map(|h| h.snapshot())
            .collect()
    }

    pub fn agent_metrics(&self, agent_id: &str) -> Option<AgentMetrics> {
        self.get_agent(agent_id).map(|h| h.metrics())
    }

    pub fn queue_len(&self, agent_id: &str) -> usize {
        self.get_agent(agent_id).map(|h| h.queue_len()).unwrap_or(0)
    }

    /// 重新读取指导文档并推送给所有 Agent
    pub fn refresh_guidance(&self) -> usize {
        if !self.config.agent_config().enable_guidance_system {
            return 0;
        }
        let handles = self.agents.read().ordered();
        for handle in &handles {
            let text = self
                .guidance
                .context_for_agent(&handle.profile.specialization, &self.working_directory);
            handle.agent.update_guidance(&text);
        }
        handles.len()
    }

    // ---- 调度 ----

    /// 评分：10 × 命中能力数 + 5 × 空闲容量 + 2 × 成功率；同分保留先注册者
    pub fn find_best_agent_for_task(&self, task: &AgentTask) -> Option<Arc<AgentHandle>> {
        let table = self.agents.read();
        let mut best: Option<(f64, &Arc<AgentHandle>)> = None;

        for id in &table.order {
            let Some(handle) = table.handles.get(id) else {
                continue;
            };
            if !handle.is_available() {
                continue;
            }
            let spare = handle.spare_capacity();
            if spare == 0 || !handle.agent.can_handle(task) {
                continue;
            }
            let score = 10.0 * handle.profile.matched_capabilities(task) as f64
                + 5.0 * spare as f64
                + 2.0 * handle.metrics().success_rate;
            tracing::trace!(agent_id = %id, score, "candidate agent");
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, handle));
            }
        }

        best.map(|(_, handle)| handle.clone())
    }

    /// 入队；只接受 Pending 任务。首选 Agent 必须存在、可用且能处理任务，
    /// 否则直接报错，不回退到自动选择。
    /// 有空闲容量时在运行时上异步派发，不在调用方内联执行。
    pub fn schedule_task(
        self: &Arc<Self>,
        task: AgentTask,
        preferred_agent_id: Option<&str>,
    ) -> Result<String, OrchestratorError> {
        ensure_pending(&task)?;
        let handle = match preferred_agent_id {
            Some(agent_id) => {
                let handle = self
                    .get_agent(agent_id)
                    .ok_or_else(|| SchedulingError::AgentNotFound(agent_id.to_string()))?;
                handle.ensure_available()?;
                if !handle.agent.can_handle(&task) {
                    return Err(SchedulingError::PreferredAgentCannotHandle {
                        agent_id: agent_id.to_string(),
                        task_id: task.id.clone(),
                    }
                    .into());
                }
                handle
            }
            None => self.find_best_agent_for_task(&task).ok_or_else(|| {
                SchedulingError::NoSuitableAgent {
                    task_id: task.id.clone(),
                }
            })?,
        };

        let agent_id = handle.id().to_string();
        let task_id = task.id.clone();
        handle.push_task(task);
        tracing::info!(task_id = %task_id, agent_id = %agent_id, "task scheduled");
        self.events.publish(OrchestratorEvent::TaskScheduled {
            task_id,
            agent_id: agent_id.clone(),
        });

        if handle.spare_capacity() > 0 {
            match tokio::runtime::Handle::try_current() {
                Ok(rt) => {
                    let manager = Arc::clone(self);
                    let id = agent_id.clone();
                    rt.spawn(async move {
                        manager.process_agent_queue(&id).await;
                    });
                }
                Err(_) => {
                    tracing::debug!(
                        agent_id = %agent_id,
                        "no runtime, task left queued for batch run"
                    );
                }
            }
        }
        Ok(agent_id)
    }

    // ---- 执行 ----

    /// 单任务执行：失败时记录 failed 结果后返回错误，由调用方决定中止还是继续
    pub async fn execute_task(
        &self,
        agent_id: &str,
        task: AgentTask,
    ) -> Result<TaskResult, OrchestratorError> {
        ensure_pending(&task)?;
        let handle = self
            .get_agent(agent_id)
            .ok_or_else(|| SchedulingError::AgentNotFound(agent_id.to_string()))?;
        handle.ensure_available()?;
        if !handle.agent.can_handle(&task) {
            return Err(SchedulingError::PreferredAgentCannotHandle {
                agent_id: agent_id.to_string(),
                task_id: task.id,
            }
            .into());
        }
        let permit = handle.acquire_slot().await?;
        self.run_with_slot(&handle, task, permit).await
    }

    async fn run_with_slot(
        &self,
        handle: &AgentHandle,
        mut task: AgentTask,
        permit: OwnedSemaphorePermit,
    ) -> Result<TaskResult, OrchestratorError> {
        task.start()?;
        let agent_id = handle.id().to_string();
        let started_at = task.started_at.unwrap_or_else(Utc::now);
        self.events.publish(OrchestratorEvent::TaskStarted {
            task_id: task.id.clone(),
            agent_id: agent_id.clone(),
        });
        tracing::info!(
            task_id = %task.id,
            agent_id = %agent_id,
            title = %task.title,
            "task started"
        );

        let timeout = self.execution_timeout();
        let clock = Instant::now();
        let outcome = tokio::time::timeout(timeout, handle.agent.execute_task(&task)).await;
        let duration_ms = clock.elapsed().as_millis() as u64;
        drop(permit);

        let (output, error) = match outcome {
            Ok(Ok(output)) => (Some(output), None),
            Ok(Err(source)) => (
                None,
                Some(OrchestratorError::Execution {
                    task_id: task.id.clone(),
                    agent_id: agent_id.clone(),
                    source,
                }),
            ),
            // 超时只在编排侧报错，Agent 内部的工作可能仍在进行
            Err(_) => (
                None,
                Some(OrchestratorError::Timeout {
                    task_id: task.id.clone(),
                    timeout_secs: timeout.as_secs(),
                }),
            ),
        };

        let transition = match &error {
            None => task.complete(),
            Some(e) => task.fail(e.to_string()),
        };
        if let Err(e) = transition {
            tracing::warn!(error = %e, "unexpected task transition failure");
        }

        let success = error.is_none();
        handle.record(success, duration_ms);

        let result = TaskResult {
            task_id: task.id.clone(),
            agent_id: agent_id.clone(),
            status: task.status,
            output,
            error: error.as_ref().map(|e| e.to_string()),
            started_at,
            completed_at: task.completed_at.unwrap_or_else(Utc::now),
            duration_ms,
            task,
        };
        self.history
            .write()
            .insert(result.task_id.clone(), result.clone());

        match error {
            None => {
                tracing::info!(
                    task_id = %result.task_id,
                    agent_id = %agent_id,
                    duration_ms,
                    "task completed"
                );
                self.events.publish(OrchestratorEvent::TaskCompleted {
                    task_id: result.task_id.clone(),
                    agent_id,
                    duration_ms,
                });
                Ok(result)
            }
            Some(err) => {
                tracing::warn!(
                    task_id = %result.task_id,
                    agent_id = %agent_id,
                    error = %err,
                    "task failed"
                );
                self.events.publish(OrchestratorEvent::TaskFailed {
                    task_id: result.task_id.clone(),
                    agent_id,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// 批处理中执行一个已出队任务：错误只记日志
    async fn run_queued(
        &self,
        handle: &AgentHandle,
        task: AgentTask,
        permit: OwnedSemaphorePermit,
    ) -> bool {
        let task_id = task.id.clone();
        match self.run_with_slot(handle, task, permit).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    task_id = %task_id,
                    agent_id = %handle.id(),
                    error = %e,
                    "queued task failed, continuing"
                );
                false
            }
        }
    }

    /// 排空单个 Agent 的队列，同时运行的任务数不超过其 maxConcurrentTasks
    pub async fn process_agent_queue(self: &Arc<Self>, agent_id: &str) -> BatchReport {
        let mut report = BatchReport::default();
        let Some(handle) = self.get_agent(agent_id) else {
            return report;
        };
        let mut running = JoinSet::new();

        loop {
            while handle.queue_len() > 0 {
                let Some(permit) = handle.try_acquire_slot() else {
                    break;
                };
                let Some(task) = handle.pop_task() else {
                    break;
                };
                self.spawn_queued(&mut running, &handle, task, permit);
            }

            if let Some(joined) = running.join_next().await {
                match joined {
                    Ok(success) => report.record(success),
                    Err(e) => {
                        tracing::error!(agent_id, error = %e, "task join error");
                        report.record(false);
                    }
                }
                continue;
            }

            if handle.queue_len() == 0 {
                break;
            }
            // 许可全被其它执行占用：等一个空出来
            let Ok(permit) = handle.acquire_slot().await else {
                break;
            };
            match handle.pop_task() {
                Some(task) => self.spawn_queued(&mut running, &handle, task, permit),
                None => break,
            }
        }

        tracing::debug!(
            agent_id,
            completed = report.completed,
            failed = report.failed,
            "agent queue drained"
        );
        report
    }

    fn spawn_queued(
        self: &Arc<Self>,
        running: &mut JoinSet<bool>,
        handle: &Arc<AgentHandle>,
        task: AgentTask,
        permit: OwnedSemaphorePermit,
    ) {
        let manager = Arc::clone(self);
        let handle = Arc::clone(handle);
        running.spawn(async move { manager.run_queued(&handle, task, permit).await });
    }

    /// 按注册顺序逐个 Agent、逐个任务执行
    pub async fn run_sequential(&self) -> BatchReport {
        let mut report = BatchReport::default();
        let handles = self.agents.read().ordered();
        for handle in handles {
            while let Some(task) = handle.pop_task() {
                let permit = match handle.acquire_slot().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        tracing::warn!(
                            agent_id = %handle.id(),
                            error = %e,
                            "agent gone during sequential run"
                        );
                        break;
                    }
                };
                report.record(self.run_queued(&handle, task, permit).await);
            }
        }
        tracing::info!(
            completed = report.completed,
            failed = report.failed,
            "sequential run finished"
        );
        report
    }

    /// 最多 concurrency 个 Agent 并发排空队列（默认 maxConcurrentAgents）
    pub async fn run_parallel(self: &Arc<Self>, concurrency: Option<usize>) -> BatchReport {
        let limit = concurrency
            .unwrap_or_else(|| self.config.agent_config().max_concurrent_agents)
            .max(1);
        let ids: Vec<String> = self.agents.read().order.clone();

        let report = futures_util::stream::iter(ids)
            .map(|id| {
                let manager = Arc::clone(self);
                async move { manager.process_agent_queue(&id).await }
            })
            .buffer_unordered(limit)
            .fold(BatchReport::default(), |acc, r| async move { acc.merge(r) })
            .await;

        tracing::info!(
            concurrency = limit,
            completed = report.completed,
            failed = report.failed,
            "parallel run finished"
        );
        report
    }

    // ---- 查询与清理 ----

    /// 任务历史中的结果（进程生命周期内不删除）
    pub fn task_result(&self, task_id: &str) -> Option<TaskResult> {
        self.history.read().get(task_id).cloned()
    }

    pub fn task_history(&self) -> Vec<TaskResult> {
        let mut results: Vec<_> = self.history.read().values().cloned().collect();
        results.sort_by_key(|r| r.completed_at);
        results
    }

    pub fn get_stats(&self) -> ManagerStats {
        let handles = self.agents.read().ordered();
        let mut stats = ManagerStats {
            total_agents: handles.len(),
            ..Default::default()
        };
        for handle in &handles {
            match handle.status() {
                AgentStatus::Ready => stats.active_agents += 1,
                AgentStatus::Busy => {
                    stats.active_agents += 1;
                    stats.busy_agents += 1;
                }
                _ => {}
            }
            stats.pending_tasks += handle.queue_len();
        }

        let history = self.history.read();
        let mut total_ms = 0u64;
        for result in history.values() {
            match result.status {
                TaskStatus::Completed => {
                    stats.completed_tasks += 1;
                    total_ms += result.duration_ms;
                }
                TaskStatus::Failed => stats.failed_tasks += 1,
                _ => {}
            }
        }
        if stats.completed_tasks > 0 {
            stats.average_task_duration_ms = total_ms as f64 / stats.completed_tasks as f64;
        }
        stats
    }

    /// 对每个 Agent 调用 cleanup（错误只记日志），清空所有内存表
    pub async fn cleanup(&self) {
        let handles = {
            let mut table = self.agents.write();
            let handles = table.ordered();
            table.handles.clear();
            table.order.clear();
            handles
        };
        tracing::info!("Cleaning up {} agents...", handles.len());

        for handle in handles {
            handle.terminate();
            if let Err(e) = handle.agent.cleanup().await {
                tracing::warn!(agent_id = %handle.id(), error = %e, "agent cleanup failed");
            }
        }
        self.history.write().clear();
        self.registry.write().clear();
    }
}

fn ensure_pending(task: &AgentTask) -> Result<(), SchedulingError> {
    if task.status == TaskStatus::Pending {
        return Ok(());
    }
    Err(SchedulingError::TaskNotPending {
        task_id: task.id.clone(),
        status: task.status,
    })
}

#[async_trait]
impl Lifecycle for AgentManager {
    async fn initialize(&self) -> anyhow::Result<()> {
        tracing::info!(
            classes = self.registry.read().list().len(),
            cwd = %self.working_directory.display(),
            "agent manager ready"
        );
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.cleanup().await;
        Ok(())
    }

    fn status(&self) -> ServiceHealth {
        let agents = self.list_agents();
        let errored = agents
            .iter()
            .filter(|a| a.status == AgentStatus::Error)
            .count();
        let state = if errored == 0 {
            HealthState::Healthy
        } else if errored < agents.len() {
            HealthState::Degraded
        } else {
            HealthState::Unhealthy
        };
        ServiceHealth {
            state,
            detail: Some(format!("{} agents, {} in error", agents.len(), errored)),
        }
    }
}
