//! 模块依赖管理
//!
//! 本模块提供模块依赖关系的图结构和加载规划器。
//!
//! # 主要组件
//!
//! - [`DependencyGraph`] - 依赖关系图，支持环检测、拓扑排序和反向依赖查询
//! - [`LoadPlanner`] - 根据清单的 `depends` 与 `requires_capabilities`
//!   计算加载顺序，并把失败隔离到出问题的模块及其下游
//!
//! # 示例
//!
//! ```rust
//! use forge_core::module::dependency::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_dependency("b", "a");
//!
//! assert_eq!(graph.topological_sort().unwrap(), vec!["a", "b"]);
//! assert_eq!(graph.dependents("a"), vec!["b".to_string()]);
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::module::capability::{select_provider, unsatisfied, CapabilityEntry};
use crate::module::manifest::Manifest;
use crate::utils::{CoreError, Result};

/// 模块依赖关系图
///
/// 边的方向为 "模块 -> 其依赖"。内部使用有序映射，保证遍历结果确定。
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 正向边：模块 -> 该模块依赖的模块
    edges: BTreeMap<String, BTreeSet<String>>,
    /// 反向边：模块 -> 依赖该模块的模块
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加模块节点，已存在时忽略
    pub fn add_module(&mut self, module: &str) {
        self.edges.entry(module.to_string()).or_default();
        self.reverse_edges.entry(module.to_string()).or_default();
    }

    /// 添加依赖关系：`module` 依赖 `dependency`
    pub fn add_dependency(&mut self, module: &str, dependency: &str) {
        self.add_module(module);
        self.add_module(dependency);
        self.edges
            .entry(module.to_string())
            .or_default()
            .insert(dependency.to_string());
        self.reverse_edges
            .entry(dependency.to_string())
            .or_default()
            .insert(module.to_string());
    }

    /// 移除模块及其所有边
    pub fn remove_module(&mut self, module: &str) {
        if let Some(deps) = self.edges.remove(module) {
            for dep in deps {
                if let Some(rev) = self.reverse_edges.get_mut(&dep) {
                    rev.remove(module);
                }
            }
        }
        if let Some(dependents) = self.reverse_edges.remove(module) {
            for dependent in dependents {
                if let Some(deps) = self.edges.get_mut(&dependent) {
                    deps.remove(module);
                }
            }
        }
    }

    /// 直接依赖
    pub fn dependencies(&self, module: &str) -> Vec<String> {
        self.edges
            .get(module)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 直接依赖者
    pub fn dependents(&self, module: &str) -> Vec<String> {
        self.reverse_edges
            .get(module)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 传递依赖者（不含自身），按名称排序
    pub fn transitive_dependents(&self, module: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([module]);
        while let Some(current) = queue.pop_front() {
            if let Some(dependents) = self.reverse_edges.get(current) {
                for dependent in dependents {
                    if dependent != module && seen.insert(dependent.clone()) {
                        queue.push_back(dependent);
                    }
                }
            }
        }
        seen.into_iter().collect()
    }

    /// 查找所有环
    ///
    /// 使用 Tarjan 强连通分量算法；每个环以成员名排序后的列表返回，
    /// 自环单独成环。
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut tarjan = Tarjan {
            graph: self,
            index: 0,
            indices: BTreeMap::new(),
            lowlinks: BTreeMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            components: Vec::new(),
        };
        for module in self.edges.keys() {
            if !tarjan.indices.contains_key(module.as_str()) {
                tarjan.visit(module);
            }
        }

        let mut cycles: Vec<Vec<String>> = tarjan
            .components
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self
                        .edges
                        .get(&component[0])
                        .map_or(false, |deps| deps.contains(&component[0]))
            })
            .map(|mut component| {
                component.sort();
                component
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// 是否存在环
    pub fn has_cycle(&self) -> bool {
        !self.find_cycles().is_empty()
    }

    /// 拓扑排序（Kahn 算法）
    ///
    /// 依赖总排在依赖者之前；同时就绪的模块按名称字典序排列。
    ///
    /// # Errors
    ///
    /// 存在环时返回 `CyclicDependency`，携带第一个环的全部成员
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(module, deps)| (module.as_str(), deps.len()))
            .collect();

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(module, _)| *module)
            .collect();

        let mut order = Vec::with_capacity(self.edges.len());
        while let Some(module) = ready.pop_first() {
            remaining.remove(module);
            order.push(module.to_string());

            if let Some(dependents) = self.reverse_edges.get(module) {
                for dependent in dependents {
                    if let Some(count) = remaining.get_mut(dependent.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(dependent.as_str());
                        }
                    }
                }
            }
        }

        if order.len() != self.edges.len() {
            let cycle = self
                .find_cycles()
                .into_iter()
                .next()
                .unwrap_or_else(|| remaining.keys().map(|m| m.to_string()).collect());
            return Err(CoreError::CyclicDependency { cycle });
        }
        Ok(order)
    }

    /// `module` 及其传递依赖者的拆除顺序：依赖者在前
    pub fn teardown_order(&self, module: &str) -> Vec<String> {
        let mut members: BTreeSet<String> = self.transitive_dependents(module).into_iter().collect();
        members.insert(module.to_string());

        let mut sub = DependencyGraph::new();
        for member in &members {
            sub.add_module(member);
            for dep in self.dependencies(member) {
                if members.contains(&dep) {
                    sub.add_dependency(member, &dep);
                }
            }
        }

        match sub.topological_sort() {
            Ok(mut order) => {
                order.reverse();
                order
            }
            // 环只可能出现在未加载的清单之间，此时退化为名称逆序
            Err(_) => members.into_iter().rev().collect(),
        }
    }

    pub fn contains_module(&self, module: &str) -> bool {
        self.edges.contains_key(module)
    }

    pub fn modules(&self) -> Vec<String> {
        self.edges.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn module_count(&self) -> usize {
        self.edges.len()
    }

    /// 转换为 模块 -> 直接依赖 的映射
    pub fn to_map(&self) -> BTreeMap<String, Vec<String>> {
        self.edges
            .iter()
            .map(|(module, deps)| (module.clone(), deps.iter().cloned().collect()))
            .collect()
    }
}

struct Tarjan<'a> {
    graph: &'a DependencyGraph,
    index: usize,
    indices: BTreeMap<&'a str, usize>,
    lowlinks: BTreeMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: BTreeSet<&'a str>,
    components: Vec<Vec<String>>,
}

impl<'a> Tarjan<'a> {
    fn visit(&mut self, module: &'a str) {
        self.indices.insert(module, self.index);
        self.lowlinks.insert(module, self.index);
        self.index += 1;
        self.stack.push(module);
        self.on_stack.insert(module);

        let graph = self.graph;
        if let Some(deps) = graph.edges.get(module) {
            for dep in deps {
                let dep = dep.as_str();
                if !self.indices.contains_key(dep) {
                    self.visit(dep);
                    let low = self.lowlinks[dep].min(self.lowlinks[module]);
                    self.lowlinks.insert(module, low);
                } else if self.on_stack.contains(dep) {
                    let low = self.indices[dep].min(self.lowlinks[module]);
                    self.lowlinks.insert(module, low);
                }
            }
        }

        if self.lowlinks[module] == self.indices[module] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(member);
                component.push(member.to_string());
                if member == module {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

// ==================== 加载规划 ====================

/// 已经处于活动状态的模块集合
///
/// 规划新模块时，这些模块及其已注册的能力视为已满足的依赖。
#[derive(Debug, Clone, Default)]
pub struct ActiveSet {
    pub modules: BTreeSet<String>,
    pub capabilities: Vec<CapabilityEntry>,
}

/// 单个模块的规划失败
#[derive(Debug)]
pub struct PlanFailure {
    pub module: String,
    pub error: CoreError,
}

/// 加载计划
#[derive(Debug, Default)]
pub struct LoadPlan {
    /// 可以加载的模块，按加载顺序
    pub order: Vec<String>,
    /// 无法加载的模块及原因，按模块名排序
    pub failures: Vec<PlanFailure>,
    /// 候选模块之间的依赖图
    pub graph: DependencyGraph,
}

impl LoadPlan {
    /// 以严格模式取结果：有任何失败即返回错误
    ///
    /// 优先报告环，其次缺失依赖，再次其他失败。
    pub fn into_strict(self) -> Result<Vec<String>> {
        if self.failures.is_empty() {
            return Ok(self.order);
        }
        let rank = |error: &CoreError| match error {
            CoreError::CyclicDependency { .. } => 0,
            CoreError::MissingDependency { .. } => 1,
            CoreError::UnsatisfiedCapability { .. } => 2,
            _ => 3,
        };
        let mut failures = self.failures;
        failures.sort_by_key(|f| rank(&f.error));
        match failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Err(CoreError::Internal("空的失败列表".to_string())),
        }
    }

    pub fn failure_of(&self, module: &str) -> Option<&CoreError> {
        self.failures
            .iter()
            .find(|f| f.module == module)
            .map(|f| &f.error)
    }
}

/// 加载规划器
///
/// 依赖图的边来自：
/// - `depends` 中列出的模块
/// - `requires_capabilities` 解析到的提供者（在候选清单与活动模块中取最高满足版本）
///
/// 已经活动的模块视为满足；缺失依赖、无法满足的能力和环只使相关模块失败，
/// 其传递依赖者以 `DependencyFailed` 失败并附带根因模块，其余模块照常排序。
#[derive(Debug, Default)]
pub struct LoadPlanner;

impl LoadPlanner {
    /// 计算加载计划
    pub fn plan(candidates: &[Manifest], active: &ActiveSet) -> LoadPlan {
        let mut failures: BTreeMap<String, CoreError> = BTreeMap::new();

        // 候选模块（同名只保留第一个）
        let mut manifests: BTreeMap<&str, &Manifest> = BTreeMap::new();
        for manifest in candidates {
            if active.modules.contains(&manifest.name) {
                failures.insert(
                    manifest.name.clone(),
                    CoreError::ModuleAlreadyLoaded(manifest.name.clone()),
                );
                continue;
            }
            if manifests.contains_key(manifest.name.as_str()) {
                tracing::warn!(module = %manifest.name, "重复的模块名，忽略后出现的清单");
                continue;
            }
            manifests.insert(manifest.name.as_str(), manifest);
        }

        // 能力池：活动模块的已注册能力在前，候选清单声明的能力在后
        let mut pool: Vec<CapabilityEntry> = active.capabilities.clone();
        let base = pool.len() as u64;
        for (i, entry) in pool.iter_mut().enumerate() {
            entry.seq = i as u64;
        }
        for manifest in manifests.values() {
            for spec in &manifest.capabilities {
                let mut entry =
                    CapabilityEntry::new(spec.name.clone(), spec.version.clone(), manifest.name.clone());
                entry.seq = base + pool.len() as u64;
                pool.push(entry);
            }
        }

        // 建图并记录直接失败
        let mut graph = DependencyGraph::new();
        for (name, manifest) in &manifests {
            graph.add_module(name);

            for dep in &manifest.depends {
                if manifests.contains_key(dep.as_str()) {
                    graph.add_dependency(name, dep);
                } else if !active.modules.contains(dep) {
                    failures.entry(name.to_string()).or_insert(CoreError::MissingDependency {
                        module: name.to_string(),
                        dependency: dep.clone(),
                    });
                }
            }

            let others: Vec<CapabilityEntry> =
                pool.iter().filter(|e| e.module != *name).cloned().collect();
            for constraint in &manifest.requires_capabilities {
                match select_provider(&others, constraint) {
                    Ok(provider) => {
                        if manifests.contains_key(provider.module.as_str()) {
                            graph.add_dependency(name, &provider.module);
                        }
                    }
                    Err(best) => {
                        failures
                            .entry(name.to_string())
                            .or_insert_with(|| unsatisfied(constraint, best));
                    }
                }
            }
        }

        // 环上的每个成员都失败
        for cycle in graph.find_cycles() {
            for member in &cycle {
                failures.insert(
                    member.clone(),
                    CoreError::CyclicDependency {
                        cycle: cycle.clone(),
                    },
                );
            }
        }

        // 失败沿反向边传播
        let roots: Vec<String> = failures
            .keys()
            .filter(|m| graph.contains_module(m))
            .cloned()
            .collect();
        for root in roots {
            for dependent in graph.transitive_dependents(&root) {
                failures
                    .entry(dependent.clone())
                    .or_insert_with(|| CoreError::DependencyFailed {
                        module: dependent.clone(),
                        root_cause: root.clone(),
                    });
            }
        }

        // 剩余模块拓扑排序
        let mut healthy = graph.clone();
        for failed in failures.keys() {
            healthy.remove_module(failed);
        }
        let order = match healthy.topological_sort() {
            Ok(order) => order,
            Err(e) => {
                tracing::error!(error = %e, "移除失败模块后依赖图仍存在环");
                Vec::new()
            }
        };

        for (module, error) in &failures {
            tracing::warn!(module = %module, error = %error, "模块无法加入加载计划");
        }

        LoadPlan {
            order,
            failures: failures
                .into_iter()
                .map(|(module, error)| PlanFailure { module, error })
                .collect(),
            graph,
        }
    }
}
