//! Agent 类注册表
//!
//! 以 class id 为键保存「工厂函数 + 元数据」，只登记不实例化；
//! AgentManager::create_agent 根据元数据生成 AgentProfile、应用覆盖项后调用工厂。

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::agents::{Agent, AgentProfile};
use crate::core::SchedulingError;

/// 工厂：根据 profile 与工作目录构造 Agent
pub type AgentFactory = Arc<dyn Fn(AgentProfile, &Path) -> Arc<dyn Agent> + Send + Sync>;

/// Agent 类元数据
#[derive(Debug, Clone, Serialize)]
pub struct AgentClassMetadata {
    pub class_id: String,
    pub name: String,
    pub specialization: String,
    pub description: String,
    pub capabilities: BTreeSet<String>,
    pub max_concurrent_tasks: usize,
    pub enabled: bool,
}

impl AgentClassMetadata {
    pub fn new(class_id: impl Into<String>, specialization: impl Into<String>) -> Self {
        let class_id = class_id.into();
        Self {
            name: class_id.clone(),
            class_id,
            specialization: specialization.into(),
            description: String::new(),
            capabilities: BTreeSet::new(),
            max_concurrent_tasks: 1,
            enabled: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// createAgent 的覆盖项
#[derive(Debug, Clone, Default)]
pub struct AgentOverrides {
    pub id: Option<String>,
    pub name: Option<String>,
    pub capabilities: Option<BTreeSet<String>>,
    pub max_concurrent_tasks: Option<usize>,
}

impl AgentOverrides {
    /// 由元数据生成 profile 并应用覆盖；实例 id 默认取 class id
    pub fn apply(&self, meta: &AgentClassMetadata) -> AgentProfile {
        AgentProfile {
            id: self.id.clone().unwrap_or_else(|| meta.class_id.clone()),
            name: self.name.clone().unwrap_or_else(|| meta.name.clone()),
            specialization: meta.specialization.clone(),
            capabilities: self
                .capabilities
                .clone()
                .unwrap_or_else(|| meta.capabilities.clone()),
            max_concurrent_tasks: self
                .max_concurrent_tasks
                .unwrap_or(meta.max_concurrent_tasks)
                .max(1),
        }
    }
}

struct AgentClass {
    factory: AgentFactory,
    metadata: AgentClassMetadata,
}

/// Agent 类注册表
#[derive(Default)]
pub struct AgentRegistry {
    classes: HashMap<String, AgentClass>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, factory: F, metadata: AgentClassMetadata)
    where
        F: Fn(AgentProfile, &Path) -> Arc<dyn Agent> + Send + Sync + 'static,
    {
        tracing::debug!(class_id = %metadata.class_id, "agent class registered");
        self.classes.insert(
            metadata.class_id.clone(),
            AgentClass {
                factory: Arc::new(factory),
                metadata,
            },
        );
    }

    /// 查找可实例化的类：未注册返回 AgentClassNotFound，禁用返回 AgentClassDisabled
    pub fn resolve(
        &self,
        class_id: &str,
    ) -> Result<(AgentFactory, AgentClassMetadata), SchedulingError> {
        let class = self
            .classes
            .get(class_id)
            .ok_or_else(|| SchedulingError::AgentClassNotFound(class_id.to_string()))?;
        if !class.metadata.enabled {
            return Err(SchedulingError::AgentClassDisabled(class_id.to_string()));
        }
        Ok((class.factory.clone(), class.metadata.clone()))
    }

    pub fn set_enabled(&mut self, class_id: &str, enabled: bool) -> bool {
        match self.classes.get_mut(class_id) {
            Some(class) => {
                class.metadata.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, class_id: &str) -> bool {
        self.classes.contains_key(class_id)
    }

    /// 元数据列表（按 class id 排序）
    pub fn list(&self) -> Vec<AgentClassMetadata> {
        let mut list: Vec<_> = self.classes.values().map(|c| c.metadata.clone()).collect();
        list.sort_by(|a, b| a.class_id.cmp(&b.class_id));
        list
    }

    pub fn clear(&mut self) {
        self.classes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let meta = AgentClassMetadata::new("coder", "coding")
            .with_capabilities(["write"])
            .with_max_concurrent_tasks(2);

        let profile = AgentOverrides::default().apply(&meta);
        assert_eq!(profile.id, "coder");
        assert_eq!(profile.specialization, "coding");
        assert_eq!(profile.max_concurrent_tasks, 2);

        let overrides = AgentOverrides {
            id: Some("coder-2".into()),
            max_concurrent_tasks: Some(0),
            ..Default::default()
        };
        let profile = overrides.apply(&meta);
        assert_eq!(profile.id, "coder-2");
        assert_eq!(profile.max_concurrent_tasks, 1);
        assert!(profile.capabilities.contains("write"));
    }
}
