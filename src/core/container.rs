//! 依赖注入容器：singleton / transient / instance 三种生命周期
//!
//! - 按名称注册，同名后注册者覆盖先注册者（不合并）
//! - `get` 惰性解析；singleton 首次解析后缓存，transient 每次调用都执行工厂
//! - 工厂通过 `Resolver` 解析依赖，Resolver 携带显式解析栈；同名服务在栈上再次出现即为循环依赖
//! - 另外按线程记录「解析中」的名称，工厂若绕过 Resolver 直接调用容器也能检出循环
//! - 实现了 `Lifecycle` 的服务由 initialize_all / shutdown_all 统一管理

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::ThreadId;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;

type AnyService = Arc<dyn Any + Send + Sync>;
type ServiceFactory =
    Arc<dyn Fn(&mut Resolver<'_>) -> Result<AnyService, ContainerError> + Send + Sync>;
type LifecycleCaster = fn(&AnyService) -> Option<Arc<dyn Lifecycle>>;

/// 容器错误
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Circular dependency detected while resolving '{name}': {chain}")]
    CircularDependency { name: String, chain: String },

    #[error("Service not registered: {0}")]
    NotRegistered(String),

    #[error("Service '{name}' is not of type {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("Factory for '{name}' failed: {source}")]
    Factory {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ContainerError {
    pub fn factory(name: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Factory {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// 服务生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceLifetime {
    Singleton,
    Transient,
    Instance,
}

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// 服务自报的健康信息
#[derive(Debug, Clone)]
pub struct ServiceHealth {
    pub state: HealthState,
    pub detail: Option<String>,
}

impl ServiceHealth {
    pub fn healthy() -> Self {
        Self {
            state: HealthState::Healthy,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// 可被容器统一初始化 / 关闭 / 探活的服务
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn initialize(&self) -> anyhow::Result<()>;

    async fn shutdown(&self) -> anyhow::Result<()>;

    fn status(&self) -> ServiceHealth;
}

/// getServicesStatus 的单条记录
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub lifetime: ServiceLifetime,
    pub initialized: bool,
    pub health: HealthState,
    pub detail: Option<String>,
    pub last_check: DateTime<Utc>,
}

struct ServiceRegistration {
    lifetime: ServiceLifetime,
    factory: Option<ServiceFactory>,
    instance: Option<AnyService>,
    lifecycle: Option<LifecycleCaster>,
    initialized: bool,
}

#[derive(Default)]
struct Registry {
    services: HashMap<String, ServiceRegistration>,
    order: Vec<String>,
}

fn as_lifecycle<T: Lifecycle + 'static>(service: &AnyService) -> Option<Arc<dyn Lifecycle>> {
    service
        .clone()
        .downcast::<T>()
        .ok()
        .map(|s| s as Arc<dyn Lifecycle>)
}

/// 依赖注入容器
#[derive(Default)]
pub struct ServiceContainer {
    registry: RwLock<Registry>,
    in_flight: Mutex<HashSet<(String, ThreadId)>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_singleton<T, F>(&self, name: &str, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&mut Resolver<'_>) -> Result<T, ContainerError> + Send + Sync + 'static,
    {
        self.insert(name, ServiceLifetime::Singleton, Some(erase(factory)), None, None);
    }

    /// 注册实现了 Lifecycle 的 singleton
    pub fn register_managed_singleton<T, F>(&self, name: &str, factory: F)
    where
        T: Lifecycle + 'static,
        F: Fn(&mut Resolver<'_>) -> Result<T, ContainerError> + Send + Sync + 'static,
    {
        self.insert(
            name,
            ServiceLifetime::Singleton,
            Some(erase(factory)),
            None,
            Some(as_lifecycle::<T>),
        );
    }

    pub fn register_transient<T, F>(&self, name: &str, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&mut Resolver<'_>) -> Result<T, ContainerError> + Send + Sync + 'static,
    {
        self.insert(name, ServiceLifetime::Transient, Some(erase(factory)), None, None);
    }

    pub fn register_instance<T>(&self, name: &str, instance: Arc<T>)
    where
        T: Send + Sync + 'static,
    {
        self.insert(name, ServiceLifetime::Instance, None, Some(instance), None);
    }

    /// 注册实现了 Lifecycle 的现成实例
    pub fn register_managed_instance<T>(&self, name: &str, instance: Arc<T>)
    where
        T: Lifecycle + 'static,
    {
        self.insert(
            name,
            ServiceLifetime::Instance,
            None,
            Some(instance),
            Some(as_lifecycle::<T>),
        );
    }

    fn insert(
        &self,
        name: &str,
        lifetime: ServiceLifetime,
        factory: Option<ServiceFactory>,
        instance: Option<AnyService>,
        lifecycle: Option<LifecycleCaster>,
    ) {
        let mut reg = self.registry.write();
        let registration = ServiceRegistration {
            lifetime,
            factory,
            instance,
            lifecycle,
            initialized: false,
        };
        if reg.services.insert(name.to_string(), registration).is_some() {
            tracing::warn!(service = name, "service re-registered, previous registration replaced");
        } else {
            reg.order.push(name.to_string());
        }
        tracing::debug!(service = name, ?lifetime, "service registered");
    }

    pub fn has(&self, name: &str) -> bool {
        self.registry.read().services.contains_key(name)
    }

    /// 按注册顺序列出服务名
    pub fn service_names(&self) -> Vec<String> {
        self.registry.read().order.clone()
    }

    /// 解析服务
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ContainerError> {
        Resolver::new(self).get(name)
    }

    fn resolve_with(
        &self,
        name: &str,
        resolver: &mut Resolver<'_>,
    ) -> Result<AnyService, ContainerError> {
        let (lifetime, factory) = {
            let reg = self.registry.read();
            let entry = reg
                .services
                .get(name)
                .ok_or_else(|| ContainerError::NotRegistered(name.to_string()))?;
            if let Some(instance) = &entry.instance {
                return Ok(instance.clone());
            }
            let factory = entry
                .factory
                .clone()
                .ok_or_else(|| ContainerError::NotRegistered(name.to_string()))?;
            (entry.lifetime, factory)
        };

        let _guard = InFlightGuard::enter(self, name, &resolver.stack)?;
        let value = factory(resolver)?;

        if lifetime == ServiceLifetime::Singleton {
            let mut reg = self.registry.write();
            if let Some(entry) = reg.services.get_mut(name) {
                // 其它线程并发解析时先写入者胜出
                if let Some(existing) = &entry.instance {
                    return Ok(existing.clone());
                }
                entry.instance = Some(value.clone());
            }
        }
        Ok(value)
    }

    fn lifecycle_of(&self, name: &str, service: &AnyService) -> Option<Arc<dyn Lifecycle>> {
        let caster = self.registry.read().services.get(name)?.lifecycle?;
        caster(service)
    }

    /// 解析所有服务，并对实现 Lifecycle 的服务调用 initialize；单个失败只记录日志
    pub async fn initialize_all(&self) -> usize {
        let mut initialized = 0;
        for name in self.service_names() {
            let service = match Resolver::new(self).resolve(&name) {
                Ok(service) => service,
                Err(e) => {
                    tracing::error!(service = %name, error = %e, "service resolution failed");
                    continue;
                }
            };
            let Some(lifecycle) = self.lifecycle_of(&name, &service) else {
                continue;
            };
            let already = self
                .registry
                .read()
                .services
                .get(&name)
                .map(|e| e.initialized)
                .unwrap_or(false);
            if already {
                continue;
            }
            match lifecycle.initialize().await {
                Ok(()) => {
                    if let Some(entry) = self.registry.write().services.get_mut(&name) {
                        entry.initialized = true;
                    }
                    initialized += 1;
                    tracing::info!(service = %name, "service initialized");
                }
                Err(e) => {
                    tracing::error!(service = %name, error = %e, "service initialization failed");
                }
            }
        }
        initialized
    }

    /// 并行关闭所有已解析的 Lifecycle 服务，然后清空注册表
    pub async fn shutdown_all(&self) {
        let targets: Vec<(String, Arc<dyn Lifecycle>)> = {
            let reg = self.registry.read();
            reg.order
                .iter()
                .filter_map(|name| {
                    let entry = reg.services.get(name)?;
                    let caster = entry.lifecycle?;
                    let service = entry.instance.as_ref()?;
                    caster(service).map(|lc| (name.clone(), lc))
                })
                .collect()
        };

        tracing::info!("Shutting down {} services...", targets.len());
        let results = join_all(targets.iter().map(|(_, lc)| lc.shutdown())).await;
        for ((name, _), result) in targets.iter().zip(results) {
            match result {
                Ok(()) => tracing::info!(service = %name, "service shut down"),
                Err(e) => tracing::warn!(service = %name, error = %e, "service shutdown failed"),
            }
        }

        let mut reg = self.registry.write();
        reg.services.clear();
        reg.order.clear();
    }

    /// 每个注册名一条状态记录
    pub fn get_services_status(&self) -> Vec<ServiceStatus> {
        let now = Utc::now();
        let reg = self.registry.read();
        reg.order
            .iter()
            .filter_map(|name| {
                let entry = reg.services.get(name)?;
                let health = entry
                    .lifecycle
                    .zip(entry.instance.as_ref())
                    .and_then(|(caster, service)| caster(service))
                    .map(|lc| lc.status());
                Some(match health {
                    Some(health) => ServiceStatus {
                        name: name.clone(),
                        lifetime: entry.lifetime,
                        initialized: entry.initialized,
                        health: health.state,
                        detail: health.detail,
                        last_check: now,
                    },
                    None => ServiceStatus {
                        name: name.clone(),
                        lifetime: entry.lifetime,
                        initialized: entry.instance.is_some(),
                        health: HealthState::Unknown,
                        detail: None,
                        last_check: now,
                    },
                })
            })
            .collect()
    }
}

fn erase<T, F>(factory: F) -> ServiceFactory
where
    T: Send + Sync + 'static,
    F: Fn(&mut Resolver<'_>) -> Result<T, ContainerError> + Send + Sync + 'static,
{
    Arc::new(move |resolver: &mut Resolver<'_>| {
        factory(resolver).map(|value| Arc::new(value) as AnyService)
    })
}

/// 解析上下文：工厂通过它解析依赖，携带当前解析栈
pub struct Resolver<'a> {
    container: &'a ServiceContainer,
    stack: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn new(container: &'a ServiceContainer) -> Self {
        Self {
            container,
            stack: Vec::new(),
        }
    }

    pub fn get<T: Send + Sync + 'static>(&mut self, name: &str) -> Result<Arc<T>, ContainerError> {
        self.resolve(name)?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn has(&self, name: &str) -> bool {
        self.container.has(name)
    }

    fn resolve(&mut self, name: &str) -> Result<AnyService, ContainerError> {
        if self.stack.iter().any(|n| n == name) {
            return Err(circular(name, &self.stack));
        }
        self.stack.push(name.to_string());
        let result = self.container.resolve_with(name, self);
        self.stack.pop();
        result
    }
}

fn circular(name: &str, stack: &[String]) -> ContainerError {
    let mut chain: Vec<&str> = stack.iter().map(String::as_str).collect();
    chain.push(name);
    ContainerError::CircularDependency {
        name: name.to_string(),
        chain: chain.join(" -> "),
    }
}

struct InFlightGuard<'a> {
    container: &'a ServiceContainer,
    key: (String, ThreadId),
}

impl<'a> InFlightGuard<'a> {
    fn enter(
        container: &'a ServiceContainer,
        name: &str,
        stack: &[String],
    ) -> Result<Self, ContainerError> {
        let key = (name.to_string(), std::thread::current().id());
        if !container.in_flight.lock().insert(key.clone()) {
            // 同一线程上该名称仍在解析中：工厂绕过 Resolver 递归回到了自己
            return Err(circular(name, stack));
        }
        Ok(Self { container, key })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.container.in_flight.lock().remove(&self.key);
    }
}
