//! 能力注册表
//!
//! 记录哪些模块提供了哪些带版本的能力，并对 `requires_capabilities`
//! 约束给出确定性的解析结果：
//!
//! - 在所有满足约束的提供者中选择版本最高者
//! - 版本相同时选择最早注册者
//! - 无满足者时返回 `UnsatisfiedCapability`，并附带最佳可用（但不满足）的版本
//! - 被挂起的提供者（其模块处于 `failed`）保留在表中，但不参与解析

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use semver::Version;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::module::version::{precedence, CapabilityConstraint};
use crate::utils::{CoreError, Result};

/// 能力条目：(能力名, 版本, 提供者模块)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    pub name: String,
    pub version: Version,
    pub module: String,
    /// 注册序号，用于同版本时的稳定排序
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl CapabilityEntry {
    pub fn new(name: impl Into<String>, version: Version, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version,
            module: module.into(),
            seq: 0,
        }
    }

    /// 展示形式：`1.3.0 (module)`
    pub fn describe(&self) -> String {
        format!("{} ({})", self.version, self.module)
    }
}

/// 在候选条目中为约束挑选提供者
///
/// 成功返回最佳匹配；失败时返回同名能力中版本最高的条目（可能为空）。
pub fn select_provider<'a>(
    entries: &'a [CapabilityEntry],
    constraint: &CapabilityConstraint,
) -> std::result::Result<&'a CapabilityEntry, Option<&'a CapabilityEntry>> {
    let better = |a: &CapabilityEntry, b: &CapabilityEntry| {
        precedence(&a.version, &b.version).then_with(|| b.seq.cmp(&a.seq))
    };

    let named = entries.iter().filter(|e| e.name == constraint.name);
    let matching = named
        .clone()
        .filter(|e| constraint.version.matches(&e.version))
        .max_by(|a, b| better(a, b));

    match matching {
        Some(entry) => Ok(entry),
        None => Err(named.max_by(|a, b| better(a, b))),
    }
}

/// 将选择失败转换为错误
pub fn unsatisfied(constraint: &CapabilityConstraint, best: Option<&CapabilityEntry>) -> CoreError {
    CoreError::UnsatisfiedCapability {
        constraint: constraint.to_string(),
        best_available: best.map(CapabilityEntry::describe),
    }
}

/// 能力注册表
///
/// 内部映射由一把读写锁保护：写操作串行，读操作之间可并发。
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    /// 能力名 -> 提供者列表
    entries: Arc<RwLock<BTreeMap<String, Vec<CapabilityEntry>>>>,

    /// 注册序号
    next_seq: Arc<AtomicU64>,

    /// 被挂起的提供者模块
    suspended: Arc<RwLock<BTreeSet<String>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册能力
    ///
    /// 幂等：重复注册同一三元组不产生变化；同一模块以不同版本注册同名能力
    /// 会替换旧条目。
    ///
    /// # Returns
    ///
    /// 注册表是否发生变化
    pub async fn register(&self, module: &str, name: &str, version: Version) -> bool {
        let mut entries = self.entries.write().await;
        let providers = entries.entry(name.to_string()).or_default();

        if let Some(existing) = providers.iter_mut().find(|e| e.module == module) {
            if existing.version == version {
                return false;
            }
            tracing::debug!(
                capability = %name,
                module = %module,
                old = %existing.version,
                new = %version,
                "替换能力版本"
            );
            existing.version = version;
            existing.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            return true;
        }

        tracing::debug!(capability = %name, module = %module, version = %version, "注册能力");
        providers.push(CapabilityEntry {
            name: name.to_string(),
            version,
            module: module.to_string(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
        });
        true
    }

    /// 移除某个模块拥有的全部能力
    ///
    /// # Returns
    ///
    /// 被移除的条目数
    pub async fn unregister_all(&self, module: &str) -> usize {
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        entries.retain(|_, providers| {
            let before = providers.len();
            providers.retain(|e| e.module != module);
            removed += before - providers.len();
            !providers.is_empty()
        });
        self.suspended.write().await.remove(module);
        if removed > 0 {
            tracing::debug!(module = %module, removed, "注销模块能力");
        }
        removed
    }

    /// 挂起某个模块提供的能力
    ///
    /// 条目仍保留在注册表中（快照与 `capabilities_of` 可见），但解析时被跳过，
    /// 直到模块的能力被 [`unregister_all`](Self::unregister_all) 清除。
    pub async fn suspend(&self, module: &str) {
        if self.suspended.write().await.insert(module.to_string()) {
            tracing::debug!(module = %module, "挂起模块能力");
        }
    }

    /// 模块的能力是否被挂起
    pub async fn is_suspended(&self, module: &str) -> bool {
        self.suspended.read().await.contains(module)
    }

    /// 解析能力约束
    ///
    /// # Errors
    ///
    /// 无满足约束的可用提供者时返回 `UnsatisfiedCapability`
    pub async fn resolve(&self, constraint: &CapabilityConstraint) -> Result<CapabilityEntry> {
        let entries = self.entries.read().await;
        let suspended = self.suspended.read().await;
        let providers: Vec<CapabilityEntry> = entries
            .get(&constraint.name)
            .into_iter()
            .flatten()
            .filter(|e| !suspended.contains(&e.module))
            .cloned()
            .collect();
        select_provider(&providers, constraint)
            .map(Clone::clone)
            .map_err(|best| unsatisfied(constraint, best))
    }

    /// 解析字符串形式的约束，如 `"svc>=1.2.0,<2.0.0"`
    pub async fn resolve_str(&self, constraint: &str) -> Result<CapabilityEntry> {
        let constraint = CapabilityConstraint::parse(constraint)?;
        self.resolve(&constraint).await
    }

    /// 某个能力的全部提供者，按版本从高到低
    pub async fn providers(&self, name: &str) -> Vec<CapabilityEntry> {
        let entries = self.entries.read().await;
        let mut providers = entries.get(name).cloned().unwrap_or_default();
        providers.sort_by(|a, b| precedence(&b.version, &a.version).then(a.seq.cmp(&b.seq)));
        providers
    }

    /// 某个模块当前注册的能力
    pub async fn capabilities_of(&self, module: &str) -> Vec<CapabilityEntry> {
        let entries = self.entries.read().await;
        entries
            .values()
            .flatten()
            .filter(|e| e.module == module)
            .cloned()
            .collect()
    }

    /// 能力快照：能力名 -> [`版本 (模块)`]
    pub async fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|(name, providers)| {
                let mut sorted = providers.clone();
                sorted.sort_by(|a, b| precedence(&b.version, &a.version).then(a.seq.cmp(&b.seq)));
                (name.clone(), sorted.iter().map(CapabilityEntry::describe).collect())
            })
            .collect()
    }

    /// 已注册条目总数
    pub async fn len(&self) -> usize {
        self.entries.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
