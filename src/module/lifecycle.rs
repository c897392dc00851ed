//! 生命周期管理器
//!
//! 以模块名为索引维护模块记录（arena），驱动每个模块走完状态机：
//!
//! ```text
//! discovered → loading → loaded → enabling → enabled → disabling → disabled → unloading → unloaded
//! ```
//!
//! 任何一步失败都进入 `failed`。
//!
//! # 并发约定
//!
//! - 每个模块有一把转换锁（`record`），同一模块的两次转换不会交叠；
//!   手动 `enable` / `disable` 遇到进行中的转换直接返回 `TransitionInProgress`
//! - 状态读取走独立的读写锁，不会被正在执行的钩子阻塞
//! - 级联操作只沿 "依赖 → 依赖者" 方向嵌套加锁

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::bus::{system_events, EventBus};
use crate::module::binding::ModuleHooks;
use crate::module::capability::CapabilityRegistry;
use crate::module::context::ModuleContext;
use crate::module::dependency::{ActiveSet, DependencyGraph};
use crate::module::loader::ModuleLoader;
use crate::module::manifest::{
    HookPhase, Manifest, ModuleDetails, ModuleHandle, ModuleState, ModuleSummary,
    ResolvedRequirement,
};
use crate::storage::StorageManager;
use crate::utils::{CoreError, ErrorInfo, Result};

/// 生命周期配置
#[derive(Debug, Clone, Default)]
pub struct LifecycleConfig {
    /// 钩子超时；超时按钩子失败处理
    pub hook_timeout: Option<Duration>,
}

/// 可变状态（与转换锁分离，便于随时读取）
#[derive(Debug, Default)]
struct ModuleStatus {
    state: ModuleState,
    last_error: Option<ErrorInfo>,
    /// 失败的根因模块（自身失败时为自身）
    root_cause: Option<String>,
    loaded_at: Option<DateTime<Utc>>,
    enabled_at: Option<DateTime<Utc>>,
    resolved: Vec<ResolvedRequirement>,
}

/// 模块记录：绑定的代码与运行时句柄
#[derive(Default)]
struct ModuleRecord {
    hooks: Option<Box<dyn ModuleHooks>>,
    context: Option<ModuleContext>,
}

/// arena 中的一个槽位
struct ModuleSlot {
    name: String,
    generation: u64,
    manifest: Arc<Manifest>,
    path: PathBuf,
    status: RwLock<ModuleStatus>,
    /// 转换锁
    record: Mutex<ModuleRecord>,
}

impl ModuleSlot {
    async fn state(&self) -> ModuleState {
        self.status.read().await.state
    }

    async fn set_state(&self, state: ModuleState) {
        self.status.write().await.state = state;
        debug!(module = %self.name, state = %state, "模块状态变更");
    }

    fn handle(&self) -> ModuleHandle {
        ModuleHandle {
            name: self.name.clone(),
            generation: self.generation,
        }
    }

    /// 直接依赖：`depends` 加上已解析的能力提供者
    async fn direct_dependencies(&self) -> Vec<String> {
        let mut deps = self.manifest.depends.clone();
        for req in &self.status.read().await.resolved {
            if req.provider != self.name && !deps.contains(&req.provider) {
                deps.push(req.provider.clone());
            }
        }
        deps
    }
}

/// 生命周期管理器
pub struct LifecycleManager {
    /// 模块 arena：模块名 -> 槽位
    slots: RwLock<BTreeMap<String, Arc<ModuleSlot>>>,
    next_generation: AtomicU64,
    loader: Arc<ModuleLoader>,
    bus: EventBus,
    capabilities: CapabilityRegistry,
    storage: StorageManager,
    config: LifecycleConfig,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    /// 创建生命周期管理器
    pub fn new(
        loader: Arc<ModuleLoader>,
        bus: EventBus,
        capabilities: CapabilityRegistry,
        storage: StorageManager,
        config: LifecycleConfig,
    ) -> Self {
        info!(hook_timeout = ?config.hook_timeout, "创建生命周期管理器");
        Self {
            slots: RwLock::new(BTreeMap::new()),
            next_generation: AtomicU64::new(1),
            loader,
            bus,
            capabilities,
            storage,
            config,
        }
    }

    // ==================== 状态转换 ====================

    /// 加载模块
    ///
    /// # 加载流程
    /// 1. 检查名称冲突与 `depends` 是否均已驻留
    /// 2. 绑定模块代码
    /// 3. 解析 `requires_capabilities`
    /// 4. 创建运行时句柄并调用 `on_load`
    /// 5. 注册清单声明的能力，状态变为 `loaded`
    /// 6. `auto_enable` 为真时立即启用
    ///
    /// 任一步失败模块进入 `failed`；`on_load` 失败时回滚其注册的能力与订阅。
    ///
    /// # Returns
    ///
    /// 新模块的句柄；自动启用失败时返回启用错误（模块已处于 `failed`）
    #[instrument(skip(self, manifest, path), fields(module = %manifest.name))]
    pub async fn load(&self, manifest: Manifest, path: PathBuf) -> Result<ModuleHandle> {
        let name = manifest.name.clone();

        if let Some(existing) = self.slot(&name).await {
            if existing.state().await != ModuleState::Failed {
                return Err(CoreError::ModuleAlreadyLoaded(name));
            }
            // 替换失败的旧记录前先清理其残留
            self.teardown_slot(&existing).await;
        }

        let slot = self.insert_slot(manifest, path, ModuleState::Loading).await;
        let mut record = slot.record.lock().await;
        info!(generation = slot.generation, "开始加载模块");

        if let Err(e) = self.check_dependencies(&slot).await {
            return Err(self.fail(&slot, e).await);
        }

        let mut hooks = match self.loader.bind(&slot.manifest, &slot.path) {
            Ok(hooks) => hooks,
            Err(e) => return Err(self.fail(&slot, e).await),
        };

        let mut resolved = Vec::new();
        for constraint in &slot.manifest.requires_capabilities {
            match self.capabilities.resolve(constraint).await {
                Ok(entry) => resolved.push(ResolvedRequirement {
                    constraint: constraint.to_string(),
                    provider: entry.module,
                    version: entry.version,
                }),
                Err(e) => return Err(self.fail(&slot, e).await),
            }
        }
        slot.status.write().await.resolved = resolved.clone();

        let context = ModuleContext::new(
            slot.manifest.clone(),
            slot.path.clone(),
            self.bus.clone(),
            self.storage.scoped(name.clone()),
            self.capabilities.clone(),
            resolved,
        );

        if let Err(e) = self.run_hook(&slot, hooks.as_mut(), &context, HookPhase::Load).await {
            // 回滚 on_load 中的部分注册
            self.capabilities.unregister_all(&name).await;
            self.bus.unsubscribe_all(&name).await;
            context.storage().close();
            return Err(self.fail(&slot, e).await);
        }

        for spec in &slot.manifest.capabilities {
            self.capabilities
                .register(&name, &spec.name, spec.version.clone())
                .await;
        }

        record.hooks = Some(hooks);
        record.context = Some(context);
        {
            let mut status = slot.status.write().await;
            status.state = ModuleState::Loaded;
            status.loaded_at = Some(Utc::now());
        }
        info!("模块加载完成");
        self.announce(system_events::MODULE_LOADED, &slot, None).await;

        if slot.manifest.auto_enable {
            self.enable_locked(&slot, &mut record).await?;
        }
        Ok(slot.handle())
    }

    /// 启用模块
    ///
    /// 只允许从 `loaded` 或 `disabled` 启用。`on_enable` 失败时模块进入
    /// `failed`，其订阅被取消，已启用的依赖者被禁用并标记为依赖失败；
    /// 已注册的能力保持不变。
    ///
    /// # Errors
    ///
    /// - `ModuleNotFound` / `TransitionInProgress` / `InvalidTransition`
    /// - `HookExecution`（携带 `on_enable` 阶段与错误信息）
    #[instrument(skip(self))]
    pub async fn enable(&self, name: &str) -> Result<()> {
        let slot = self.require_slot(name).await?;
        let mut record = slot
            .record
            .try_lock()
            .map_err(|_| CoreError::TransitionInProgress(name.to_string()))?;
        self.enable_locked(&slot, &mut record).await
    }

    /// 禁用模块
    ///
    /// 尽力而为：`on_disable` 出错只记录，模块仍进入 `disabled`，
    /// 其全部订阅总会被取消。钩子错误在清理完成后返回。
    #[instrument(skip(self))]
    pub async fn disable(&self, name: &str) -> Result<()> {
        let slot = self.require_slot(name).await?;
        let mut record = slot
            .record
            .try_lock()
            .map_err(|_| CoreError::TransitionInProgress(name.to_string()))?;
        self.disable_locked(&slot, &mut record).await
    }

    /// 卸载模块
    ///
    /// 已启用的模块先被禁用。随后调用 `on_unload`，注销全部能力、取消订阅、
    /// 关闭存储句柄（数据保留），并从 arena 中移除记录。钩子出错不会阻止
    /// 清理，错误在清理完成后返回。
    #[instrument(skip(self))]
    pub async fn unload(&self, name: &str) -> Result<()> {
        let slot = self.require_slot(name).await?;
        let mut record = slot.record.lock().await;
        self.unload_locked(&slot, &mut record).await
    }

    /// 记录一个无法加载的模块（例如加载计划阶段就失败的模块）
    pub async fn record_failure(
        &self,
        manifest: Manifest,
        path: PathBuf,
        error: CoreError,
    ) -> CoreError {
        if let Some(existing) = self.slot(&manifest.name).await {
            if existing.state().await != ModuleState::Failed {
                return CoreError::ModuleAlreadyLoaded(manifest.name);
            }
            self.teardown_slot(&existing).await;
        }
        let slot = self.insert_slot(manifest, path, ModuleState::Discovered).await;
        self.fail(&slot, error).await
    }

    async fn enable_locked(&self, slot: &Arc<ModuleSlot>, record: &mut ModuleRecord) -> Result<()> {
        let state = slot.state().await;
        if !state.can_enable() {
            return Err(CoreError::InvalidTransition {
                module: slot.name.clone(),
                from: state,
                action: "enable",
            });
        }
        let (Some(hooks), Some(context)) = (record.hooks.as_mut(), record.context.as_ref()) else {
            return Err(CoreError::Internal(format!("模块 '{}' 缺少绑定记录", slot.name)));
        };

        slot.set_state(ModuleState::Enabling).await;
        if let Err(e) = self.run_hook(slot, hooks.as_mut(), context, HookPhase::Enable).await {
            self.bus.unsubscribe_all(&slot.name).await;
            let err = self.fail(slot, e).await;
            self.cascade_failure(&slot.name).await;
            return Err(err);
        }

        {
            let mut status = slot.status.write().await;
            status.state = ModuleState::Enabled;
            status.enabled_at = Some(Utc::now());
        }
        info!(module = %slot.name, "模块已启用");
        self.announce(system_events::MODULE_ENABLED, slot, None).await;
        Ok(())
    }

    async fn disable_locked(&self, slot: &Arc<ModuleSlot>, record: &mut ModuleRecord) -> Result<()> {
        let state = slot.state().await;
        if !state.can_disable() {
            return Err(CoreError::InvalidTransition {
                module: slot.name.clone(),
                from: state,
                action: "disable",
            });
        }

        slot.set_state(ModuleState::Disabling).await;
        let outcome = match (record.hooks.as_mut(), record.context.as_ref()) {
            (Some(hooks), Some(context)) => {
                self.run_hook(slot, hooks.as_mut(), context, HookPhase::Disable).await
            }
            _ => Ok(()),
        };
        let removed = self.bus.unsubscribe_all(&slot.name).await;

        {
            let mut status = slot.status.write().await;
            status.state = ModuleState::Disabled;
            status.enabled_at = None;
            if let Err(e) = &outcome {
                status.last_error = Some(e.to_info());
            }
        }
        match &outcome {
            Ok(()) => info!(module = %slot.name, subscriptions = removed, "模块已禁用"),
            Err(e) => warn!(module = %slot.name, error = %e, "on_disable 执行失败，模块仍被禁用"),
        }
        self.announce(system_events::MODULE_DISABLED, slot, outcome.as_ref().err()).await;
        outcome
    }

    async fn unload_locked(&self, slot: &Arc<ModuleSlot>, record: &mut ModuleRecord) -> Result<()> {
        let mut first_error = None;

        if slot.state().await == ModuleState::Enabled {
            if let Err(e) = self.disable_locked(slot, record).await {
                first_error = Some(e);
            }
        }

        slot.set_state(ModuleState::Unloading).await;
        if let (Some(hooks), Some(context)) = (record.hooks.as_mut(), record.context.as_ref()) {
            if let Err(e) = self.run_hook(slot, hooks.as_mut(), context, HookPhase::Unload).await {
                warn!(module = %slot.name, error = %e, "on_unload 执行失败，继续卸载");
                first_error.get_or_insert(e);
            }
        }

        self.release_resources(slot, record).await;
        slot.set_state(ModuleState::Unloaded).await;
        self.remove_slot(slot).await;
        info!(module = %slot.name, "模块已卸载");
        self.announce(system_events::MODULE_UNLOADED, slot, first_error.as_ref()).await;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 释放模块持有的能力、订阅与存储句柄
    async fn release_resources(&self, slot: &ModuleSlot, record: &mut ModuleRecord) {
        self.capabilities.unregister_all(&slot.name).await;
        self.bus.unsubscribe_all(&slot.name).await;
        if let Some(context) = record.context.take() {
            context.storage().close();
        }
        record.hooks = None;
    }

    /// 清理一个即将被替换的失败槽位
    async fn teardown_slot(&self, slot: &Arc<ModuleSlot>) {
        let mut guard = slot.record.lock().await;
        let record = &mut *guard;
        if let (Some(hooks), Some(context)) = (record.hooks.as_mut(), record.context.as_ref()) {
            if let Err(e) = self.run_hook(slot, hooks.as_mut(), context, HookPhase::Unload).await {
                warn!(module = %slot.name, error = %e, "清理失败模块时 on_unload 出错");
            }
        }
        self.release_resources(slot, record).await;
        self.remove_slot(slot).await;
    }

    /// 启用失败后，已驻留的依赖者被禁用并标记为依赖失败
    async fn cascade_failure(&self, root: &str) {
        let graph = self.dependency_graph().await;
        for dependent in graph.teardown_order(root) {
            if dependent == root {
                continue;
            }
            let Some(slot) = self.slot(&dependent).await else { continue };
            let mut record = slot.record.lock().await;
            let state = slot.state().await;
            if !state.is_resident() {
                continue;
            }
            if state == ModuleState::Enabled {
                if let Err(e) = self.disable_locked(&slot, &mut record).await {
                    warn!(module = %dependent, error = %e, "级联禁用时出错");
                }
            }
            self.bus.unsubscribe_all(&dependent).await;
            self.fail(
                &slot,
                CoreError::DependencyFailed {
                    module: dependent.clone(),
                    root_cause: root.to_string(),
                },
            )
            .await;
        }
    }

    /// 检查 `depends` 中的模块是否都已驻留
    async fn check_dependencies(&self, slot: &ModuleSlot) -> Result<()> {
        for dep in &slot.manifest.depends {
            let Some(dep_slot) = self.slot(dep).await else {
                return Err(CoreError::MissingDependency {
                    module: slot.name.clone(),
                    dependency: dep.clone(),
                });
            };
            let status = dep_slot.status.read().await;
            if status.state == ModuleState::Failed {
                return Err(CoreError::DependencyFailed {
                    module: slot.name.clone(),
                    root_cause: status.root_cause.clone().unwrap_or_else(|| dep.clone()),
                });
            }
            if !status.state.is_resident() {
                return Err(CoreError::MissingDependency {
                    module: slot.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        Ok(())
    }

    /// 调用钩子，统一处理错误、panic 与超时
    async fn run_hook(
        &self,
        slot: &ModuleSlot,
        hooks: &mut dyn ModuleHooks,
        ctx: &ModuleContext,
        phase: HookPhase,
    ) -> Result<()> {
        debug!(module = %slot.name, phase = %phase, "调用钩子");
        let fut = match phase {
            HookPhase::Load => hooks.on_load(ctx),
            HookPhase::Enable => hooks.on_enable(ctx),
            HookPhase::Disable => hooks.on_disable(ctx),
            HookPhase::Unload => hooks.on_unload(ctx),
        };
        let guarded = AssertUnwindSafe(fut).catch_unwind();

        let outcome = match self.config.hook_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(hook_error(slot, phase, format!("执行超时 ({:?})", limit)));
                }
            },
            None => guarded.await,
        };

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(hook_error(slot, phase, format!("{:#}", e))),
            Err(panic) => Err(hook_error(slot, phase, panic_message(panic))),
        }
    }

    /// 标记模块失败，记录并广播错误，原样返回
    async fn fail(&self, slot: &ModuleSlot, err: CoreError) -> CoreError {
        {
            let mut status = slot.status.write().await;
            status.state = ModuleState::Failed;
            status.last_error = Some(err.to_info());
            status.root_cause = Some(match &err {
                CoreError::DependencyFailed { root_cause, .. } => root_cause.clone(),
                _ => slot.name.clone(),
            });
            status.enabled_at = None;
        }
        // 失败模块的能力保留在表中，但不再参与解析
        self.capabilities.suspend(&slot.name).await;
        error!(
            module = %slot.name,
            phase = ?err.hook_phase(),
            error = %err,
            "模块进入 failed 状态"
        );
        self.announce(system_events::MODULE_FAILED, slot, Some(&err)).await;
        err
    }

    async fn announce(&self, topic: &str, slot: &ModuleSlot, err: Option<&CoreError>) {
        let state = slot.state().await;
        let mut payload = json!({
            "module": slot.name,
            "version": slot.manifest.version.to_string(),
            "state": state,
            "generation": slot.generation,
        });
        if let Some(err) = err {
            payload["error"] = json!(err.to_info());
        }
        self.bus.emit(topic, payload).await;
    }

    // ==================== arena 访问 ====================

    async fn insert_slot(&self, manifest: Manifest, path: PathBuf, state: ModuleState) -> Arc<ModuleSlot> {
        let slot = Arc::new(ModuleSlot {
            name: manifest.name.clone(),
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
            manifest: Arc::new(manifest),
            path,
            status: RwLock::new(ModuleStatus {
                state,
                ..Default::default()
            }),
            record: Mutex::new(ModuleRecord::default()),
        });
        self.slots.write().await.insert(slot.name.clone(), slot.clone());
        slot
    }

    async fn remove_slot(&self, slot: &ModuleSlot) {
        let mut slots = self.slots.write().await;
        if slots.get(&slot.name).map(|s| s.generation) == Some(slot.generation) {
            slots.remove(&slot.name);
        }
    }

    async fn slot(&self, name: &str) -> Option<Arc<ModuleSlot>> {
        self.slots.read().await.get(name).cloned()
    }

    async fn require_slot(&self, name: &str) -> Result<Arc<ModuleSlot>> {
        self.slot(name)
            .await
            .ok_or_else(|| CoreError::ModuleNotFound(name.to_string()))
    }

    /// 按加载顺序（generation）列出槽位
    async fn ordered_slots(&self) -> Vec<Arc<ModuleSlot>> {
        let mut slots: Vec<Arc<ModuleSlot>> = self.slots.read().await.values().cloned().collect();
        slots.sort_by_key(|s| s.generation);
        slots
    }

    // ==================== 查询 ====================

    /// 是否存在该模块的记录
    pub async fn contains(&self, name: &str) -> bool {
        self.slots.read().await.contains_key(name)
    }

    /// 模块当前状态
    pub async fn state_of(&self, name: &str) -> Option<ModuleState> {
        match self.slot(name).await {
            Some(slot) => Some(slot.state().await),
            None => None,
        }
    }

    /// 获取模块句柄
    pub async fn handle(&self, name: &str) -> Result<ModuleHandle> {
        Ok(self.require_slot(name).await?.handle())
    }

    /// 校验句柄是否仍指向当前的模块记录
    pub async fn check_handle(&self, handle: &ModuleHandle) -> Result<()> {
        match self.slot(&handle.name).await {
            Some(slot) if slot.generation == handle.generation => Ok(()),
            _ => Err(CoreError::StaleHandle {
                module: handle.name.clone(),
                generation: handle.generation,
            }),
        }
    }

    /// 按句柄获取模块详情
    pub async fn details_by_handle(&self, handle: &ModuleHandle) -> Result<ModuleDetails> {
        self.check_handle(handle).await?;
        self.details(&handle.name).await
    }

    /// 模块摘要列表，按加载顺序
    pub async fn list(&self) -> Vec<ModuleSummary> {
        let mut summaries = Vec::new();
        for slot in self.ordered_slots().await {
            let status = slot.status.read().await;
            summaries.push(ModuleSummary {
                name: slot.name.clone(),
                version: slot.manifest.version.clone(),
                state: status.state,
                capabilities: slot.manifest.capabilities.iter().map(|c| c.to_string()).collect(),
                last_error: status.last_error.as_ref().map(|e| e.message.clone()),
            });
        }
        summaries
    }

    /// 单个模块的完整记录
    pub async fn details(&self, name: &str) -> Result<ModuleDetails> {
        let slot = self.require_slot(name).await?;
        let status = slot.status.read().await;
        Ok(ModuleDetails {
            manifest: (*slot.manifest).clone(),
            state: status.state,
            path: slot.path.clone(),
            generation: slot.generation,
            loaded_at: status.loaded_at,
            enabled_at: status.enabled_at,
            resolved: status.resolved.clone(),
            last_error: status.last_error.clone(),
        })
    }

    /// 模块清单与目录
    pub async fn source_of(&self, name: &str) -> Result<(Manifest, PathBuf)> {
        let slot = self.require_slot(name).await?;
        Ok(((*slot.manifest).clone(), slot.path.clone()))
    }

    /// 按加载顺序列出处于给定状态的模块
    pub async fn names_in_state(&self, predicate: impl Fn(ModuleState) -> bool) -> Vec<String> {
        let mut names = Vec::new();
        for slot in self.ordered_slots().await {
            if predicate(slot.state().await) {
                names.push(slot.name.clone());
            }
        }
        names
    }

    /// 失败模块及其错误
    pub async fn failures(&self) -> Vec<(String, ErrorInfo)> {
        let mut failures = Vec::new();
        for slot in self.ordered_slots().await {
            let status = slot.status.read().await;
            if status.state == ModuleState::Failed {
                if let Some(err) = &status.last_error {
                    failures.push((slot.name.clone(), err.clone()));
                }
            }
        }
        failures
    }

    /// 当前驻留的模块及其已注册能力，供增量规划使用
    pub async fn active_set(&self) -> ActiveSet {
        let mut active = ActiveSet::default();
        for slot in self.ordered_slots().await {
            if slot.state().await.is_resident() {
                active.modules.insert(slot.name.clone());
                active
                    .capabilities
                    .extend(self.capabilities.capabilities_of(&slot.name).await);
            }
        }
        active
    }

    /// 所有记录之间的依赖图（`depends` + 已解析的能力提供者）
    pub async fn dependency_graph(&self) -> DependencyGraph {
        let slots = self.ordered_slots().await;
        let mut graph = DependencyGraph::new();
        for slot in &slots {
            graph.add_module(&slot.name);
        }
        for slot in &slots {
            for dep in slot.direct_dependencies().await {
                if graph.contains_module(&dep) {
                    graph.add_dependency(&slot.name, &dep);
                }
            }
        }
        graph
    }

    /// 失败模块的根因
    pub async fn root_cause(&self, name: &str) -> Option<String> {
        match self.slot(name).await {
            Some(slot) => slot.status.read().await.root_cause.clone(),
            None => None,
        }
    }
}

fn hook_error(slot: &ModuleSlot, phase: HookPhase, message: String) -> CoreError {
    CoreError::HookExecution {
        module: slot.name.clone(),
        phase,
        message,
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}
