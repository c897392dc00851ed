//! 模块代码绑定
//!
//! 模块代码以 [`ModuleHooks`] trait 的形式接入：四个生命周期钩子均为可选，
//! 未实现的钩子默认什么也不做。绑定器 [`ModuleBinder`] 在加载时根据清单
//! 的入口标识创建模块实例。
//!
//! # 示例
//!
//! ```rust
//! use async_trait::async_trait;
//! use forge_core::module::{ModuleContext, ModuleHooks, StaticBinder};
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl ModuleHooks for Greeter {
//!     async fn on_enable(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
//!         ctx.emit("greet", serde_json::json!("world")).await;
//!         Ok(())
//!     }
//! }
//!
//! let binder = StaticBinder::new().register("greeter", || Ok(Box::new(Greeter)));
//! assert!(binder.contains("greeter"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::module::context::ModuleContext;
use crate::module::manifest::Manifest;
use crate::utils::{CoreError, Result};

/// 模块生命周期钩子
///
/// 钩子返回错误或 panic 时，生命周期管理器会把模块转入 `failed`
/// （`on_disable` / `on_unload` 的错误只记录日志）。
#[async_trait]
pub trait ModuleHooks: Send + Sync {
    /// 加载时调用，可在此订阅事件、读取存储、注册额外能力
    async fn on_load(&mut self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// 启用时调用
    async fn on_enable(&mut self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// 禁用时调用；返回后该模块的全部订阅会被取消
    async fn on_disable(&mut self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// 卸载时调用
    async fn on_unload(&mut self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 不含任何钩子的模块
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl ModuleHooks for NoopHooks {}

/// 模块绑定器
///
/// 负责把清单映射为可执行的模块实例。
pub trait ModuleBinder: Send + Sync {
    /// 为清单创建模块实例
    ///
    /// # Errors
    ///
    /// 找不到入口或实例化失败时返回 `BindFailed`
    fn bind(&self, manifest: &Manifest, path: &Path) -> Result<Box<dyn ModuleHooks>>;
}

/// 模块工厂
pub type ModuleFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn ModuleHooks>> + Send + Sync>;

/// 静态绑定器
///
/// 在编译期把入口标识（或模块名）登记到工厂函数。查找顺序：
/// 清单的 `entry`，其次模块名。
#[derive(Clone, Default)]
pub struct StaticBinder {
    factories: HashMap<String, ModuleFactory>,
    allow_missing: bool,
}

impl fmt::Debug for StaticBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.factories.keys().collect();
        keys.sort();
        f.debug_struct("StaticBinder")
            .field("entries", &keys)
            .field("allow_missing", &self.allow_missing)
            .finish()
    }
}

impl StaticBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记工厂函数
    pub fn register<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn ModuleHooks>> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
        self
    }

    /// 找不到入口时绑定为无钩子模块，而不是报错
    ///
    /// 用于只需要校验清单和依赖关系的场景（例如命令行工具）。
    pub fn allow_missing(mut self, allow: bool) -> Self {
        self.allow_missing = allow;
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    fn factory_for(&self, manifest: &Manifest) -> Option<&ModuleFactory> {
        manifest
            .entry
            .as_deref()
            .and_then(|entry| self.factories.get(entry))
            .or_else(|| self.factories.get(&manifest.name))
    }
}

impl ModuleBinder for StaticBinder {
    fn bind(&self, manifest: &Manifest, _path: &Path) -> Result<Box<dyn ModuleHooks>> {
        let Some(factory) = self.factory_for(manifest) else {
            if self.allow_missing {
                tracing::warn!(module = %manifest.name, entry = %manifest.binding_key(), "未找到入口，按无钩子模块绑定");
                return Ok(Box::new(NoopHooks));
            }
            return Err(CoreError::BindFailed {
                module: manifest.name.clone(),
                reason: format!("未找到入口 '{}'", manifest.binding_key()),
            });
        };

        match std::panic::catch_unwind(AssertUnwindSafe(|| factory())) {
            Ok(Ok(hooks)) => Ok(hooks),
            Ok(Err(e)) => Err(CoreError::BindFailed {
                module: manifest.name.clone(),
                reason: format!("{:#}", e),
            }),
            Err(_) => Err(CoreError::BindFailed {
                module: manifest.name.clone(),
                reason: "实例化时 panic".to_string(),
            }),
        }
    }
}
