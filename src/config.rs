//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__AGENTS__MAX_CONCURRENT_AGENTS=4`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agents: AgentsSection,
    pub executor: ExecutorSection,
    pub chains: ChainsSection,
    pub tools: ToolsSection,
    pub events: EventsSection,
}

/// [app] 段：应用名、工作目录
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 工作目录，未设置时用当前目录
    pub workspace_root: Option<PathBuf>,
}

/// 审批策略：TaskExecutor 在任务之间 / 失败后询问是否继续时的默认行为
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    /// 无交互终端时采用提问给出的默认值
    #[default]
    Prompt,
    /// 一律继续
    AutoApprove,
    /// 一律停止
    AutoDecline,
}

/// [agents] 段：并发、超时、沙箱权限、指导文档
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentsSection {
    /// runParallel 默认同时排空的 Agent 数
    pub max_concurrent_agents: usize,
    /// 单个 Agent 执行单个任务的超时（秒）
    pub default_agent_timeout_secs: u64,
    pub approval_policy: ApprovalPolicy,
    pub enable_guidance_system: bool,
    /// 指导文档目录（相对工作目录）
    pub guidance_dir: String,
    pub sandbox: SandboxSection,
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 3,
            default_agent_timeout_secs: 300,
            approval_policy: ApprovalPolicy::default(),
            enable_guidance_system: true,
            guidance_dir: ".hive".to_string(),
            sandbox: SandboxSection::default(),
        }
    }
}

/// [agents.sandbox] 段
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub allow_file_system: bool,
    pub allow_network: bool,
    pub allow_commands: bool,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            allow_file_system: true,
            allow_network: false,
            allow_commands: false,
        }
    }
}

/// [executor] 段：计划执行的超时与工具意图阈值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// 单任务墙钟超时（秒），默认 30 分钟
    pub task_timeout_secs: u64,
    /// 工具推荐置信度达到该值才走工具流水线
    pub tool_confidence_threshold: f32,
    /// 通用分析路径最多读取的相关文件数
    pub max_related_files: usize,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            task_timeout_secs: 30 * 60,
            tool_confidence_threshold: 0.7,
            max_related_files: 3,
        }
    }
}

/// [chains] 段：任务链过期清理
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainsSection {
    pub stale_threshold_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ChainsSection {
    fn default() -> Self {
        Self {
            stale_threshold_secs: 60 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
        }
    }
}

/// [events] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    /// 广播通道容量，慢订阅者超出后会丢事件（Lagged）
    pub capacity: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl AgentsSection {
    pub fn default_agent_timeout(&self) -> Duration {
        Duration::from_secs(self.default_agent_timeout_secs.max(1))
    }
}

impl ExecutorSection {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs.max(1))
    }
}

impl ChainsSection {
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
