//! 模块清单与状态定义
//!
//! 定义模块清单 (module.json / module.yaml) 解析后的数据结构，
//! 以及模块生命周期状态和对外展示的记录视图。

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::module::version::CapabilityConstraint;
use crate::utils::ErrorInfo;

/// 模块提供的能力声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    /// 能力名称
    pub name: String,

    /// 能力版本
    pub version: Version,

    /// 能力描述
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl CapabilitySpec {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            description: String::new(),
        }
    }

    /// 设置描述
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl fmt::Display for CapabilitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// 模块清单
///
/// 每个模块目录解析一次，解析后不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// 模块名（全局唯一）
    pub name: String,

    /// 模块版本
    pub version: Version,

    /// 模块描述
    #[serde(default)]
    pub description: String,

    /// 入口标识，交给绑定器定位模块代码
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,

    /// 依赖的模块名（有序、去重）
    #[serde(default)]
    pub depends: Vec<String>,

    /// 提供的能力
    #[serde(default)]
    pub capabilities: Vec<CapabilitySpec>,

    /// 需要的能力约束
    #[serde(default)]
    pub requires_capabilities: Vec<CapabilityConstraint>,

    /// 是否允许热插拔
    #[serde(default = "default_true")]
    pub hot_reload: bool,

    /// 加载成功后是否自动启用
    #[serde(default = "default_true")]
    pub auto_enable: bool,

    /// 模块配置的 JSON Schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl Manifest {
    /// 创建最小清单
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            description: String::new(),
            entry: None,
            depends: Vec::new(),
            capabilities: Vec::new(),
            requires_capabilities: Vec::new(),
            hot_reload: true,
            auto_enable: true,
            config_schema: None,
        }
    }

    /// 添加依赖模块
    pub fn depends_on(mut self, module: impl Into<String>) -> Self {
        let module = module.into();
        if !self.depends.contains(&module) {
            self.depends.push(module);
        }
        self
    }

    /// 声明提供的能力
    pub fn provides(mut self, capability: CapabilitySpec) -> Self {
        self.capabilities.retain(|c| c.name != capability.name);
        self.capabilities.push(capability);
        self
    }

    /// 声明需要的能力
    pub fn requires(mut self, constraint: CapabilityConstraint) -> Self {
        self.requires_capabilities.push(constraint);
        self
    }

    /// 设置入口
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    pub fn with_auto_enable(mut self, auto_enable: bool) -> Self {
        self.auto_enable = auto_enable;
        self
    }

    pub fn with_hot_reload(mut self, hot_reload: bool) -> Self {
        self.hot_reload = hot_reload;
        self
    }

    /// 绑定时使用的键：优先入口标识，否则模块名
    pub fn binding_key(&self) -> &str {
        self.entry.as_deref().unwrap_or(&self.name)
    }

    /// 提供的能力名列表
    pub fn capability_names(&self) -> Vec<String> {
        self.capabilities.iter().map(|c| c.name.clone()).collect()
    }
}

/// 模块生命周期状态
///
/// ```text
/// discovered → loading → loaded → enabling → enabled
///                          ↑                    ↓
///                       disabled ← disabling ←──┘
///                          ↓
///                      unloading → unloaded
/// ```
///
/// 任意转换失败都会进入 `failed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Discovered,
    Loading,
    Loaded,
    Enabling,
    Enabled,
    Disabling,
    Disabled,
    Unloading,
    Unloaded,
    Failed,
}

impl Default for ModuleState {
    fn default() -> Self {
        ModuleState::Discovered
    }
}

impl ModuleState {
    /// 是否可以启用
    pub fn can_enable(&self) -> bool {
        matches!(self, ModuleState::Loaded | ModuleState::Disabled)
    }

    /// 是否可以禁用
    pub fn can_disable(&self) -> bool {
        matches!(self, ModuleState::Enabled)
    }

    /// 模块代码是否仍驻留（已加载且未卸载）
    pub fn is_resident(&self) -> bool {
        matches!(
            self,
            ModuleState::Loaded
                | ModuleState::Enabling
                | ModuleState::Enabled
                | ModuleState::Disabling
                | ModuleState::Disabled
        )
    }

    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, ModuleState::Unloaded | ModuleState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleState::Discovered => "discovered",
            ModuleState::Loading => "loading",
            ModuleState::Loaded => "loaded",
            ModuleState::Enabling => "enabling",
            ModuleState::Enabled => "enabled",
            ModuleState::Disabling => "disabling",
            ModuleState::Disabled => "disabled",
            ModuleState::Unloading => "unloading",
            ModuleState::Unloaded => "unloaded",
            ModuleState::Failed => "failed",
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 生命周期钩子阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookPhase {
    #[serde(rename = "on_load")]
    Load,
    #[serde(rename = "on_enable")]
    Enable,
    #[serde(rename = "on_disable")]
    Disable,
    #[serde(rename = "on_unload")]
    Unload,
}

impl HookPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::Load => "on_load",
            HookPhase::Enable => "on_enable",
            HookPhase::Disable => "on_disable",
            HookPhase::Unload => "on_unload",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模块句柄
///
/// 通过 generation 检测模块卸载后仍被持有的过期引用。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleHandle {
    pub name: String,
    pub generation: u64,
}

/// `list_modules()` 返回的模块摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub name: String,
    pub version: Version,
    pub state: ModuleState,
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// 已解析的能力依赖：约束 → 提供者模块
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRequirement {
    pub constraint: String,
    pub provider: String,
    pub version: Version,
}

/// `get_module()` 返回的完整记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDetails {
    pub manifest: Manifest,
    pub state: ModuleState,
    pub path: PathBuf,
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved: Vec<ResolvedRequirement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorInfo>,
}

impl ModuleDetails {
    pub fn handle(&self) -> ModuleHandle {
        ModuleHandle {
            name: self.manifest.name.clone(),
            generation: self.generation,
        }
    }
}
