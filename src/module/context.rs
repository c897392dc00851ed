//! 模块运行时句柄
//!
//! 钩子被调用时收到的 [`ModuleContext`]，提供对事件总线、本模块存储和
//! 能力注册表的受限访问。所有操作都以本模块身份进行：订阅归属本模块，
//! 发布的事件以本模块为发送方，注册的能力归本模块所有。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use semver::Version;
use serde_json::Value;

use crate::bus::{DeliveryReport, Event, EventBus, EventHandler, SubscriptionId};
use crate::module::capability::{CapabilityEntry, CapabilityRegistry};
use crate::module::manifest::{Manifest, ResolvedRequirement};
use crate::storage::ScopedStorage;
use crate::utils::Result;

/// 模块运行时句柄
#[derive(Debug, Clone)]
pub struct ModuleContext {
    manifest: Arc<Manifest>,
    path: PathBuf,
    bus: EventBus,
    storage: ScopedStorage,
    capabilities: CapabilityRegistry,
    resolved: Vec<ResolvedRequirement>,
}

impl ModuleContext {
    pub(crate) fn new(
        manifest: Arc<Manifest>,
        path: PathBuf,
        bus: EventBus,
        storage: ScopedStorage,
        capabilities: CapabilityRegistry,
        resolved: Vec<ResolvedRequirement>,
    ) -> Self {
        Self {
            manifest,
            path,
            bus,
            storage,
            capabilities,
            resolved,
        }
    }

    /// 模块名
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// 模块目录
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 本模块的存储句柄
    pub fn storage(&self) -> &ScopedStorage {
        &self.storage
    }

    /// 加载时为 `requires_capabilities` 解析到的提供者
    pub fn resolved(&self) -> &[ResolvedRequirement] {
        &self.resolved
    }

    /// 以本模块身份订阅主题
    pub async fn subscribe(&self, topic: impl Into<String>, handler: EventHandler) -> SubscriptionId {
        self.bus.subscribe(self.name(), topic, handler).await
    }

    /// 取消订阅
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.bus.unsubscribe(id).await
    }

    /// 以本模块身份发布事件
    pub async fn emit(&self, topic: impl Into<String>, payload: Value) -> DeliveryReport {
        self.bus.publish(Event::new(topic, self.name(), payload)).await
    }

    /// 解析能力约束，如 `"basic.service>=1.0.0"`
    pub async fn resolve(&self, constraint: &str) -> Result<CapabilityEntry> {
        self.capabilities.resolve_str(constraint).await
    }

    /// 以本模块名义注册能力
    ///
    /// `on_load` 失败时，该模块注册的能力会全部回滚。
    pub async fn register_capability(&self, name: &str, version: Version) -> bool {
        self.capabilities.register(self.name(), name, version).await
    }

    /// 能力的全部提供者
    pub async fn providers(&self, name: &str) -> Vec<CapabilityEntry> {
        self.capabilities.providers(name).await
    }
}
