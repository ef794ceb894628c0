//! 工具执行器
//!
//! 持有 ToolRegistry、沙箱权限与全局超时，execute(tool_name, args) 先校验权限再在超时内调用工具，
//! 超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed）；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::timeout;

use crate::agents::Permissions;
use crate::core::AgentError;
use crate::executor::ToolService;
use crate::tools::{ToolPermission, ToolRegistry};

/// 工具执行器：对每次调用施加权限检查与超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: ToolRegistry,
    permissions: Permissions,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, permissions: Permissions, timeout_secs: u64) -> Self {
        Self {
            registry,
            permissions,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn check_permission(&self, tool_name: &str, needed: ToolPermission) -> Result<(), AgentError> {
        let allowed = match needed {
            ToolPermission::None => true,
            ToolPermission::FileSystem => self.permissions.file_system,
            ToolPermission::Network => self.permissions.network,
            ToolPermission::Commands => self.permissions.commands,
        };
        if allowed {
            Ok(())
        } else {
            Err(AgentError::PermissionDenied(format!(
                "{tool_name} requires {needed:?} access"
            )))
        }
    }

    /// 执行指定工具；输出 JSON 审计日志
    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<String, AgentError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| AgentError::UnknownTool(tool_name.to_string()))?;
        self.check_permission(tool_name, tool.permission())?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

#[async_trait]
impl ToolService for ToolExecutor {
    async fn execute_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<String, AgentError> {
        self.execute(name, args).await
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use serde_json::{json, Value};

    struct SleepyTool;

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok("awake".into())
        }
    }

    struct NetTool;

    #[async_trait]
    impl Tool for NetTool {
        fn name(&self) -> &str {
            "fetch"
        }

        fn description(&self) -> &str {
            "fetches"
        }

        fn permission(&self) -> ToolPermission {
            ToolPermission::Network
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok("page".into())
        }
    }

    fn permissions(network: bool) -> Permissions {
        Permissions {
            file_system: true,
            network,
            commands: false,
        }
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let exec = ToolExecutor::new(ToolRegistry::new(), permissions(false), 5);
        let err = exec.execute_tool("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(SleepyTool);
        let exec = ToolExecutor::new(registry, permissions(false), 5)
            .with_timeout(Duration::from_millis(20));
        let err = exec.execute("sleepy", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(_)));
    }

    #[tokio::test]
    async fn test_sandbox_permission() {
        let mut registry = ToolRegistry::new();
        registry.register(NetTool);
        let denied = ToolExecutor::new(registry.clone(), permissions(false), 5);
        assert!(matches!(
            denied.execute("fetch", json!({})).await,
            Err(AgentError::PermissionDenied(_))
        ));

        let allowed = ToolExecutor::new(registry, permissions(true), 5);
        assert_eq!(allowed.execute("fetch", json!({})).await.unwrap(), "page");
    }
}
