//! Forge 运行时
//!
//! 组合存储、事件总线、能力注册表、模块加载器和生命周期管理器，
//! 负责整个系统的启动与停止，并对外提供唯一的操作入口。
//!
//! # 示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use forge_core::{ForgeRuntime, RuntimeConfig, StaticBinder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RuntimeConfig::builder().module_dir("./modules").build();
//!     let runtime = ForgeRuntime::new(config, Arc::new(StaticBinder::new()));
//!
//!     let report = runtime.start().await?;
//!     println!("已加载 {} 个模块", report.loaded.len());
//!
//!     for module in runtime.list_modules().await {
//!         println!("{} {} {}", module.name, module.version, module.state);
//!     }
//!
//!     runtime.stop().await?;
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::bus::{
    handler, system_events, DeliveryReport, DispatchStats, Event, EventBus, EventBusConfig,
    SubscriptionId,
};
use crate::core::config::RuntimeConfig;
use crate::module::capability::{CapabilityEntry, CapabilityRegistry};
use crate::module::dependency::DependencyGraph;
use crate::module::lifecycle::{LifecycleConfig, LifecycleManager};
use crate::module::loader::{DiscoveredModule, ModuleLoader};
use crate::module::manifest::{ModuleDetails, ModuleHandle, ModuleState, ModuleSummary};
use crate::module::ModuleBinder;
use crate::storage::StorageManager;
use crate::utils::{error_code, CoreError, ErrorInfo, Result};

/// 管理接口订阅与发布时使用的身份
pub const ADMIN_OWNER: &str = "forge.admin";

// ============================================================================
// 运行时状态
// ============================================================================

/// 运行时状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    /// 已创建，未启动
    Initialized,
    /// 正在启动
    Starting,
    /// 运行中
    Running,
    /// 正在停止
    Stopping,
    /// 已停止（可再次启动）
    Stopped,
}

impl RuntimeState {
    /// 检查是否可以启动
    pub fn can_start(&self) -> bool {
        matches!(self, RuntimeState::Initialized | RuntimeState::Stopped)
    }

    /// 检查是否正在运行
    pub fn is_running(&self) -> bool {
        matches!(self, RuntimeState::Running)
    }
}

/// 一批模块的加载结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// 成功加载的模块（按加载顺序）
    pub loaded: Vec<ModuleHandle>,
    /// 失败的模块及原因
    pub failed: Vec<(String, ErrorInfo)>,
    /// 清单无效、被跳过的目录
    pub invalid: Vec<(PathBuf, ErrorInfo)>,
}

impl LoadReport {
    /// 某个模块的失败原因
    pub fn failure_of(&self, module: &str) -> Option<&ErrorInfo> {
        self.failed
            .iter()
            .find(|(name, _)| name == module)
            .map(|(_, err)| err)
    }
}

/// 批量加载的内部结果，保留原始错误
#[derive(Debug, Default)]
struct BatchOutcome {
    loaded: Vec<ModuleHandle>,
    failed: Vec<(String, CoreError)>,
}

impl BatchOutcome {
    fn take_error(self, module: &str) -> Option<CoreError> {
        self.failed
            .into_iter()
            .find(|(name, _)| name == module)
            .map(|(_, err)| err)
    }

    fn into_report(self) -> LoadReport {
        LoadReport {
            loaded: self.loaded,
            failed: self
                .failed
                .into_iter()
                .map(|(name, err)| (name, err.to_info()))
                .collect(),
            invalid: Vec::new(),
        }
    }
}

/// 不加载任何代码的校验结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// 可加载模块的加载顺序
    pub order: Vec<String>,
    /// 无法加载的模块及原因
    pub failures: Vec<(String, ErrorInfo)>,
    /// 清单无效的目录
    pub invalid: Vec<(PathBuf, ErrorInfo)>,
    /// 模块 -> 直接依赖
    pub graph: BTreeMap<String, Vec<String>>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty() && self.invalid.is_empty()
    }
}

/// 健康状态信息
#[derive(Debug, Clone, Serialize)]
pub struct HealthInfo {
    /// 运行时状态
    pub state: RuntimeState,
    /// 运行时间（秒）
    pub uptime_secs: Option<i64>,
    /// 已记录的模块数
    pub modules: usize,
    /// 已启用的模块数
    pub enabled: usize,
    /// 失败的模块数
    pub failed: usize,
    /// 已注册的能力条目数
    pub capabilities: usize,
    /// 事件订阅数
    pub subscriptions: usize,
    /// 事件分发统计
    pub dispatch: DispatchStats,
}

// ============================================================================
// ForgeRuntime
// ============================================================================

/// Forge 运行时
///
/// 显式构造、按引用（通常是 `Arc<ForgeRuntime>`）传给各个协作方。
///
/// # 生命周期
///
/// 1. `new()` - 创建运行时与所有子系统
/// 2. `start()` - 扫描模块目录，按依赖顺序加载
/// 3. `add()` / `remove()` / `reload()` - 热插拔
/// 4. `stop()` - 逆序禁用并卸载全部模块
pub struct ForgeRuntime {
    config: RuntimeConfig,
    state: RwLock<RuntimeState>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    /// 启动、停止与热插拔共用的全局生命周期锁
    transitions: Mutex<()>,
    bus: EventBus,
    capabilities: CapabilityRegistry,
    storage: StorageManager,
    loader: Arc<ModuleLoader>,
    lifecycle: LifecycleManager,
}

impl std::fmt::Debug for ForgeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForgeRuntime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ForgeRuntime {
    /// 创建运行时实例
    ///
    /// # Arguments
    ///
    /// * `config` - 运行时配置
    /// * `binder` - 把清单映射为模块代码的绑定器
    pub fn new(config: RuntimeConfig, binder: Arc<dyn ModuleBinder>) -> Self {
        info!(version = crate::VERSION, module_dir = %config.modules.module_dir.display(), "初始化 Forge 运行时");

        let bus = EventBus::with_config(EventBusConfig {
            handler_timeout: config.handler_timeout(),
        });
        let capabilities = CapabilityRegistry::new();
        let storage = StorageManager::new(config.storage_dir()).with_fsync(config.storage.fsync);
        let loader = Arc::new(
            ModuleLoader::new(binder).with_manifest_files(config.modules.manifest_files.clone()),
        );
        let lifecycle = LifecycleManager::new(
            loader.clone(),
            bus.clone(),
            capabilities.clone(),
            storage.clone(),
            LifecycleConfig {
                hook_timeout: config.hook_timeout(),
            },
        );

        Self {
            config,
            state: RwLock::new(RuntimeState::Initialized),
            started_at: RwLock::new(None),
            transitions: Mutex::new(()),
            bus,
            capabilities,
            storage,
            loader,
            lifecycle,
        }
    }

    // ========================================================================
    // 启动与停止
    // ========================================================================

    /// 启动运行时
    ///
    /// 扫描模块目录，计算加载计划并按顺序加载。单个模块（或目录）的失败
    /// 只影响它自己和依赖它的模块，不会阻止运行时启动。
    ///
    /// # Errors
    ///
    /// 运行时已在运行，或模块目录存在但无法读取
    #[instrument(skip(self), fields(module_dir = %self.config.modules.module_dir.display()))]
    pub async fn start(&self) -> Result<LoadReport> {
        let _guard = self.transitions.lock().await;
        {
            let mut state = self.state.write().await;
            if !state.can_start() {
                return Err(CoreError::InitFailed(format!(
                    "运行时当前状态 {:?} 不允许启动",
                    *state
                )));
            }
            *state = RuntimeState::Starting;
        }

        let discovery = match self.loader.discover(&self.config.modules.module_dir).await {
            Ok(discovery) => discovery,
            Err(e) => {
                *self.state.write().await = RuntimeState::Stopped;
                return Err(e);
            }
        };

        let mut report = self.load_batch(discovery.modules).await.into_report();
        report.invalid = discovery
            .failures
            .into_iter()
            .map(|f| (f.path, f.error.to_info()))
            .collect();

        *self.state.write().await = RuntimeState::Running;
        *self.started_at.write().await = Some(Utc::now());

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            invalid = report.invalid.len(),
            "Forge 运行时已启动"
        );
        self.bus
            .emit(
                system_events::RUNTIME_STARTED,
                json!({
                    "version": crate::VERSION,
                    "loaded": report.loaded.iter().map(|h| h.name.clone()).collect::<Vec<_>>(),
                    "failed": report.failed.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>(),
                }),
            )
            .await;
        Ok(report)
    }

    /// 停止运行时
    ///
    /// 先按加载逆序禁用所有已启用的模块，再按加载逆序卸载全部模块
    /// （包括失败的模块）。钩子错误只记录日志。
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.transitions.lock().await;
        {
            let mut state = self.state.write().await;
            if !state.is_running() {
                return Ok(());
            }
            *state = RuntimeState::Stopping;
        }
        info!("正在停止 Forge 运行时...");

        let mut enabled = self.lifecycle.names_in_state(|s| s == ModuleState::Enabled).await;
        enabled.reverse();
        for name in enabled {
            if let Err(e) = self.lifecycle.disable(&name).await {
                warn!(module = %name, error = %e, "停止时禁用模块失败");
            }
        }

        let mut all = self.lifecycle.names_in_state(|_| true).await;
        all.reverse();
        for name in all {
            if let Err(e) = self.lifecycle.unload(&name).await {
                warn!(module = %name, error = %e, "停止时卸载模块出错");
            }
        }

        *self.state.write().await = RuntimeState::Stopped;
        *self.started_at.write().await = None;
        self.bus
            .emit(system_events::RUNTIME_STOPPED, json!({ "version": crate::VERSION }))
            .await;
        info!("Forge 运行时已停止");
        Ok(())
    }

    // ========================================================================
    // 热插拔
    // ========================================================================

    /// 加入一个新的模块目录
    ///
    /// 只重新计算受影响的子图：新模块，以及之前因缺少依赖或能力而失败、
    /// 现在可能被满足的模块。
    ///
    /// # Returns
    ///
    /// 新模块的句柄
    ///
    /// # Errors
    ///
    /// - 热插拔被关闭或运行时未运行
    /// - 目录中没有有效清单
    /// - 新模块自身加载失败（此时它以 `failed` 状态留在模块列表中）
    #[instrument(skip(self, dir), fields(dir = %dir.as_ref().display()))]
    pub async fn add(&self, dir: impl AsRef<Path>) -> Result<ModuleHandle> {
        let dir = dir.as_ref();
        self.ensure_hot_plug().await?;
        let _guard = self.transitions.lock().await;

        let module = self
            .loader
            .discover_dir(dir)
            .await?
            .ok_or_else(|| CoreError::Manifest {
                path: dir.display().to_string(),
                reason: "目录中没有清单文件".to_string(),
            })?;
        let name = module.manifest.name.clone();

        let mut batch = vec![module];
        batch.extend(self.retry_candidates(&name).await);
        let outcome = self.load_batch(batch).await;
        let retried = outcome.loaded.len().saturating_sub(1);
        if let Some(err) = outcome.take_error(&name) {
            return Err(err);
        }
        info!(module = %name, retried, "热插拔加入模块完成");
        self.lifecycle.handle(&name).await
    }

    /// 移除模块
    ///
    /// 该模块及所有传递依赖它的模块按依赖逆序依次禁用、卸载：
    /// 依赖者总是在被依赖者之前完成卸载。其中任何一个模块的清单关闭了
    /// `hot_reload` 时整个操作被拒绝，不会卸载任何模块。
    ///
    /// # Returns
    ///
    /// 被移除的模块，按移除顺序
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> Result<Vec<String>> {
        self.ensure_hot_plug().await?;
        let _guard = self.transitions.lock().await;
        self.ensure_module_hot_reload(name).await?;

        let order = self.teardown(name).await;
        info!(removed = ?order, "热插拔移除模块完成");
        Ok(order)
    }

    /// 重新加载模块
    ///
    /// 先从磁盘重新读取清单；清单无效时直接返回错误，已加载的模块保持原状。
    /// 随后拆除该模块及其依赖者，再按依赖顺序加载回来。
    ///
    /// # Errors
    ///
    /// - 清单缺失或无效
    /// - 模块重新加载失败时返回其错误（携带失败的钩子阶段）
    #[instrument(skip(self))]
    pub async fn reload(&self, name: &str) -> Result<ModuleHandle> {
        self.ensure_hot_plug().await?;
        let _guard = self.transitions.lock().await;
        self.ensure_module_hot_reload(name).await?;

        let (_, path) = self.lifecycle.source_of(name).await?;
        let module = self
            .loader
            .discover_dir(&path)
            .await?
            .ok_or_else(|| CoreError::Manifest {
                path: path.display().to_string(),
                reason: "目录中没有清单文件".to_string(),
            })?;
        let new_name = module.manifest.name.clone();

        let graph = self.lifecycle.dependency_graph().await;
        let mut sources = Vec::new();
        for member in graph.teardown_order(name) {
            if member != name {
                if let Ok((manifest, path)) = self.lifecycle.source_of(&member).await {
                    sources.push(DiscoveredModule { manifest, path });
                }
            }
        }

        self.teardown(name).await;

        let mut batch = vec![module];
        batch.extend(sources);
        if let Some(err) = self.load_batch(batch).await.take_error(&new_name) {
            return Err(err);
        }
        info!(module = %new_name, "模块重新加载完成");
        self.lifecycle.handle(&new_name).await
    }

    /// 拆除模块及其传递依赖者，返回拆除顺序
    async fn teardown(&self, name: &str) -> Vec<String> {
        let graph = self.lifecycle.dependency_graph().await;
        let order = graph.teardown_order(name);
        for member in &order {
            if self.lifecycle.state_of(member).await == Some(ModuleState::Enabled) {
                if let Err(e) = self.lifecycle.disable(member).await {
                    warn!(module = %member, error = %e, "禁用模块出错，继续卸载");
                }
            }
            if let Err(e) = self.lifecycle.unload(member).await {
                warn!(module = %member, error = %e, "卸载模块出错");
            }
        }
        order
    }

    /// 之前因依赖或能力缺失而失败的模块
    async fn retry_candidates(&self, exclude: &str) -> Vec<DiscoveredModule> {
        let retryable = [
            error_code::MODULE_MISSING_DEPENDENCY,
            error_code::CAPABILITY_UNSATISFIED,
            error_code::MODULE_DEPENDENCY_FAILED,
        ];
        let mut candidates = Vec::new();
        for (name, err) in self.lifecycle.failures().await {
            if name == exclude || !retryable.contains(&err.code.as_str()) {
                continue;
            }
            if let Ok((manifest, path)) = self.lifecycle.source_of(&name).await {
                debug!(module = %name, "重新尝试加载之前失败的模块");
                candidates.push(DiscoveredModule { manifest, path });
            }
        }
        candidates
    }

    /// 规划并加载一批模块
    async fn load_batch(&self, modules: Vec<DiscoveredModule>) -> BatchOutcome {
        let manifests: Vec<_> = modules.iter().map(|m| m.manifest.clone()).collect();
        let active = self.lifecycle.active_set().await;
        let plan = ModuleLoader::plan(&manifests, &active);
        let find = |name: &str| modules.iter().find(|m| m.manifest.name == name);

        let mut outcome = BatchOutcome::default();
        for failure in plan.failures {
            let error = match find(&failure.module) {
                Some(module) if !matches!(failure.error, CoreError::ModuleAlreadyLoaded(_)) => {
                    warn!(module = %failure.module, error = %failure.error, "模块无法加载");
                    self.lifecycle
                        .record_failure(module.manifest.clone(), module.path.clone(), failure.error)
                        .await
                }
                _ => failure.error,
            };
            outcome.failed.push((failure.module, error));
        }

        for name in &plan.order {
            let Some(module) = find(name) else { continue };

            if let Some(root_cause) = self.failed_dependency(&plan.graph, name).await {
                let err = CoreError::DependencyFailed {
                    module: name.clone(),
                    root_cause,
                };
                warn!(module = %name, error = %err, "依赖失败，跳过加载");
                let err = self
                    .lifecycle
                    .record_failure(module.manifest.clone(), module.path.clone(), err)
                    .await;
                outcome.failed.push((name.clone(), err));
                continue;
            }

            match self.lifecycle.load(module.manifest.clone(), module.path.clone()).await {
                Ok(handle) => outcome.loaded.push(handle),
                Err(e) => outcome.failed.push((name.clone(), e)),
            }
        }
        outcome
    }

    /// 本批次中已失败的直接依赖（含能力提供者）的根因
    async fn failed_dependency(&self, graph: &DependencyGraph, name: &str) -> Option<String> {
        for dep in graph.dependencies(name) {
            if self.lifecycle.state_of(&dep).await == Some(ModuleState::Failed) {
                return Some(self.lifecycle.root_cause(&dep).await.unwrap_or(dep));
            }
        }
        None
    }

    async fn ensure_hot_plug(&self) -> Result<()> {
        if !self.config.modules.hot_reload {
            return Err(CoreError::HotReloadDisabled("*".to_string()));
        }
        if !self.state.read().await.is_running() {
            return Err(CoreError::RuntimeNotRunning);
        }
        Ok(())
    }

    /// 模块及其全部传递依赖者都必须允许热插拔，否则拒绝拆除
    async fn ensure_module_hot_reload(&self, name: &str) -> Result<()> {
        let graph = self.lifecycle.dependency_graph().await;
        let mut members = vec![name.to_string()];
        members.extend(graph.teardown_order(name).into_iter().filter(|m| m != name));
        for member in members {
            let (manifest, _) = self.lifecycle.source_of(&member).await?;
            if !manifest.hot_reload {
                if member != name {
                    warn!(module = %name, dependent = %member, "依赖者不允许热插拔，拒绝拆除");
                }
                return Err(CoreError::HotReloadDisabled(member));
            }
        }
        Ok(())
    }

    // ========================================================================
    // 模块操作与查询
    // ========================================================================

    /// 启用模块
    ///
    /// # Errors
    ///
    /// 失败时返回结构化错误，`HookExecution` 携带失败的钩子与原始错误信息
    pub async fn enable(&self, name: &str) -> Result<()> {
        self.lifecycle.enable(name).await
    }

    /// 禁用模块
    pub async fn disable(&self, name: &str) -> Result<()> {
        self.lifecycle.disable(name).await
    }

    /// 模块列表，按加载顺序
    pub async fn list_modules(&self) -> Vec<ModuleSummary> {
        self.lifecycle.list().await
    }

    /// 单个模块的完整记录
    pub async fn get_module(&self, name: &str) -> Result<ModuleDetails> {
        self.lifecycle.details(name).await
    }

    /// 通过句柄获取模块记录；模块被卸载或替换后返回 `StaleHandle`
    pub async fn get_module_by_handle(&self, handle: &ModuleHandle) -> Result<ModuleDetails> {
        self.lifecycle.details_by_handle(handle).await
    }

    /// 模块 -> 直接依赖（`depends` 与已解析的能力提供者）
    pub async fn dependency_graph(&self) -> BTreeMap<String, Vec<String>> {
        self.lifecycle.dependency_graph().await.to_map()
    }

    /// 能力名 -> `version (module)` 列表
    pub async fn capabilities(&self) -> BTreeMap<String, Vec<String>> {
        self.capabilities.snapshot().await
    }

    /// 解析能力约束
    pub async fn resolve(&self, constraint: &str) -> Result<CapabilityEntry> {
        self.capabilities.resolve_str(constraint).await
    }

    /// 只做扫描与规划，不绑定任何代码
    pub async fn validate(&self) -> Result<ValidationReport> {
        let discovery = self.loader.discover(&self.config.modules.module_dir).await?;
        let plan = ModuleLoader::plan(&discovery.manifests(), &Default::default());
        Ok(ValidationReport {
            order: plan.order,
            failures: plan
                .failures
                .into_iter()
                .map(|f| (f.module, f.error.to_info()))
                .collect(),
            invalid: discovery
                .failures
                .into_iter()
                .map(|f| (f.path, f.error.to_info()))
                .collect(),
            graph: plan.graph.to_map(),
        })
    }

    // ========================================================================
    // 事件总线透传
    // ========================================================================

    /// 以管理身份发布事件
    pub async fn publish(&self, topic: impl Into<String>, payload: Value) -> DeliveryReport {
        self.bus.publish(Event::new(topic, ADMIN_OWNER, payload)).await
    }

    /// 以管理身份订阅主题，事件副本写入返回的接收端
    ///
    /// 接收端被丢弃后，后续投递会记为处理失败；调用 [`Self::unsubscribe`] 释放订阅。
    pub async fn subscribe(
        &self,
        topic: impl Into<String>,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self
            .bus
            .subscribe(
                ADMIN_OWNER,
                topic,
                handler(move |event| {
                    tx.send(event)
                        .map_err(|_| anyhow::anyhow!("订阅接收端已关闭"))
                }),
            )
            .await;
        (id, rx)
    }

    /// 取消订阅
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.bus.unsubscribe(id).await
    }

    // ========================================================================
    // 存储透传
    // ========================================================================

    /// 读取模块的存储键
    pub async fn storage_get(&self, module: &str, key: &str) -> Result<Option<Value>> {
        self.storage.get(module, key).await
    }

    /// 写入模块的存储键
    pub async fn storage_put(&self, module: &str, key: &str, value: &Value) -> Result<()> {
        self.storage.save(module, key, value).await
    }

    /// 删除模块的存储键
    pub async fn storage_delete(&self, module: &str, key: &str) -> Result<bool> {
        self.storage.delete(module, key).await
    }

    /// 列出模块的存储键
    pub async fn storage_keys(&self, module: &str) -> Result<Vec<String>> {
        self.storage.list_keys(module).await
    }

    // ========================================================================
    // 访问器
    // ========================================================================

    /// 当前状态
    pub async fn state(&self) -> RuntimeState {
        *self.state.read().await
    }

    /// 是否正在运行
    pub async fn is_running(&self) -> bool {
        self.state.read().await.is_running()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn capability_registry(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// 健康状态
    pub async fn health(&self) -> HealthInfo {
        let modules = self.lifecycle.list().await;
        HealthInfo {
            state: self.state().await,
            uptime_secs: self
                .started_at
                .read()
                .await
                .map(|t| (Utc::now() - t).num_seconds()),
            modules: modules.len(),
            enabled: modules.iter().filter(|m| m.state == ModuleState::Enabled).count(),
            failed: modules.iter().filter(|m| m.state == ModuleState::Failed).count(),
            capabilities: self.capabilities.len().await,
            subscriptions: self.bus.subscription_count().await,
            dispatch: self.bus.stats().await,
        }
    }
}

// ============================================================================
// 单元测试
// ============================================================================
