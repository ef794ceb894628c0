//! 指导文档与配置协作者
//!
//! AgentManager 在 registerAgent 时通过 GuidanceProvider 取得按专长定制的指导文本，
//! 通过 ConfigProvider 取得并发、超时、沙箱与审批配置。

use std::path::{Path, PathBuf};

use crate::config::{AppConfig, ApprovalPolicy, SandboxSection};

/// 指导文档来源
pub trait GuidanceProvider: Send + Sync {
    fn context_for_agent(&self, specialization: &str, cwd: &Path) -> String;
}

/// Agent 子系统配置快照
#[derive(Debug, Clone)]
pub struct AgentSystemConfig {
    pub max_concurrent_agents: usize,
    pub default_agent_timeout_secs: u64,
    pub sandbox: SandboxSection,
    pub approval_policy: ApprovalPolicy,
    pub enable_guidance_system: bool,
}

pub trait ConfigProvider: Send + Sync {
    fn agent_config(&self) -> AgentSystemConfig;
}

impl ConfigProvider for AppConfig {
    fn agent_config(&self) -> AgentSystemConfig {
        AgentSystemConfig {
            max_concurrent_agents: self.agents.max_concurrent_agents.max(1),
            default_agent_timeout_secs: self.agents.default_agent_timeout_secs,
            sandbox: self.agents.sandbox,
            approval_policy: self.agents.approval_policy,
            enable_guidance_system: self.agents.enable_guidance_system,
        }
    }
}

/// 从工作目录读取指导文档：
/// `<cwd>/<dir>/guidance.md`（通用）+ `<cwd>/<dir>/agents/<specialization>.md`（专长）
#[derive(Debug, Clone)]
pub struct FileGuidanceProvider {
    dir: PathBuf,
}

impl FileGuidanceProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl GuidanceProvider for FileGuidanceProvider {
    fn context_for_agent(&self, specialization: &str, cwd: &Path) -> String {
        let root = cwd.join(&self.dir);
        let candidates = [
            root.join("guidance.md"),
            root.join("agents").join(format!("{specialization}.md")),
        ];
        candidates
            .iter()
            .filter_map(|p| std::fs::read_to_string(p).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// 固定文本（测试或嵌入场景）
#[derive(Debug, Clone, Default)]
pub struct StaticGuidance(pub String);

impl GuidanceProvider for StaticGuidance {
    fn context_for_agent(&self, _specialization: &str, _cwd: &Path) -> String {
        self.0.clone()
    }
}
