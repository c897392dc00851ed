//! # Forge Core - 进程内插件运行时
//!
//! Forge Core 在单个宿主进程内发现、加载并监管独立开发的模块：
//!
//! - **模块加载**: 扫描模块目录，解析清单，按依赖关系排序并绑定代码
//! - **能力注册表**: 以语义化版本描述模块间的契约，解析版本约束
//! - **生命周期管理**: load → enable → disable → unload 状态机与失败隔离
//! - **事件总线**: 模块间的发布/订阅通信
//! - **存储**: 按模块隔离的持久化键值存储
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use forge_core::{ForgeRuntime, ModuleContext, ModuleHooks, RuntimeConfig, StaticBinder};
//!
//! struct Counter;
//!
//! #[async_trait]
//! impl ModuleHooks for Counter {
//!     async fn on_enable(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
//!         let runs: u64 = ctx.storage().load("runs", 0).await?;
//!         ctx.storage().save("runs", &(runs + 1)).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let binder = StaticBinder::new().register("counter", || Ok(Box::new(Counter)));
//!     let runtime = ForgeRuntime::new(RuntimeConfig::default(), Arc::new(binder));
//!
//!     runtime.start().await?;
//!     runtime.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 清单、版本约束、能力、依赖、加载器与生命周期
//! - `bus` - 事件总线
//! - `storage` - 模块存储
//! - `core` - 运行时配置
//! - `api` - 运行时编排器
//! - `utils` - 错误类型与日志

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod bus;
pub mod core;
pub mod module;
pub mod storage;
pub mod utils;

// 重导出常用类型，方便使用
pub use api::{ForgeRuntime, HealthInfo, LoadReport, RuntimeState, ValidationReport};

pub use bus::{async_handler, handler, system_events, DeliveryReport, Event, EventBus, SubscriptionId};

pub use module::{
    CapabilityConstraint, CapabilityEntry, CapabilityRegistry, CapabilitySpec, HookPhase,
    Manifest, ModuleBinder, ModuleContext, ModuleDetails, ModuleHandle, ModuleHooks, ModuleState,
    ModuleSummary, NoopHooks, StaticBinder,
};

pub use storage::{ScopedStorage, StorageManager};

pub use utils::logger::{LogGuard, Logger, LoggerConfig, RotationStrategy};
pub use utils::{error_code, status_code, CoreError, ErrorInfo, Result};

pub use crate::core::config::{RuntimeConfig, RuntimeConfigBuilder};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
