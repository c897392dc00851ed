//! 模块管理
//!
//! 包含模块系统的核心组件：
//! - 清单定义、解析与版本约束
//! - 能力注册表与依赖图
//! - 模块加载器与代码绑定
//! - 生命周期管理器

pub mod binding;
pub mod capability;
pub mod context;
pub mod dependency;
pub mod lifecycle;
pub mod loader;
pub mod manifest;
pub mod parser;
pub mod version;

// 重导出常用类型
pub use binding::{ModuleBinder, ModuleFactory, ModuleHooks, NoopHooks, StaticBinder};
pub use capability::{CapabilityEntry, CapabilityRegistry};
pub use context::ModuleContext;
pub use dependency::{ActiveSet, DependencyGraph, LoadPlan, LoadPlanner, PlanFailure};
pub use lifecycle::{LifecycleConfig, LifecycleManager};
pub use loader::{Discovery, DiscoveredModule, DiscoveryFailure, ModuleLoader};
pub use manifest::{
    CapabilitySpec, HookPhase, Manifest, ModuleDetails, ModuleHandle, ModuleState, ModuleSummary,
    ResolvedRequirement,
};
pub use parser::{ManifestFormat, ManifestParser};
pub use version::{CapabilityConstraint, VersionConstraint};
