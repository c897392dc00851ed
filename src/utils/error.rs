//! Forge 运行时错误类型定义
//!
//! 本模块定义了运行时中使用的所有错误类型。

use thiserror::Error;

use crate::module::manifest::{HookPhase, ModuleState};

/// 运行时核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 清单与依赖错误 ====================

    /// 清单文件格式错误或缺少必填字段
    #[error("清单无效: '{path}' - {reason}")]
    Manifest {
        path: String,
        reason: String,
    },

    /// 循环依赖
    #[error("检测到循环依赖: {}", .cycle.join(" -> "))]
    CyclicDependency {
        cycle: Vec<String>,
    },

    /// 依赖模块未找到
    #[error("模块 '{module}' 的依赖 '{dependency}' 未找到")]
    MissingDependency {
        module: String,
        dependency: String,
    },

    /// 能力约束无法满足
    #[error("能力约束 '{constraint}' 无法满足: {}", describe_best(.best_available))]
    UnsatisfiedCapability {
        constraint: String,
        best_available: Option<String>,
    },

    /// 依赖模块失败，本模块被连带标记为失败
    #[error("模块 '{module}' 的依赖失败 (根因模块: '{root_cause}')")]
    DependencyFailed {
        module: String,
        root_cause: String,
    },

    /// 版本约束语法错误
    #[error("无效的版本约束 '{constraint}': {reason}")]
    InvalidConstraint {
        constraint: String,
        reason: String,
    },

    // ==================== 模块生命周期错误 ====================

    /// 模块代码绑定失败
    #[error("模块绑定失败: '{module}' - {reason}")]
    BindFailed {
        module: String,
        reason: String,
    },

    /// 钩子执行失败
    #[error("模块 '{module}' 的 {phase} 钩子执行失败: {message}")]
    HookExecution {
        module: String,
        phase: HookPhase,
        message: String,
    },

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 模块已加载
    #[error("模块已加载: '{0}'")]
    ModuleAlreadyLoaded(String),

    /// 当前状态不允许该操作
    #[error("模块 '{module}' 处于 {from} 状态，不允许执行 {action}")]
    InvalidTransition {
        module: String,
        from: ModuleState,
        action: &'static str,
    },

    /// 模块正在进行另一个状态转换
    #[error("模块 '{0}' 正在进行状态转换")]
    TransitionInProgress(String),

    /// 使用了过期的模块句柄
    #[error("模块句柄已过期: '{module}' (generation {generation})")]
    StaleHandle {
        module: String,
        generation: u64,
    },

    /// 模块未开启热插拔
    #[error("模块 '{0}' 未开启热插拔")]
    HotReloadDisabled(String),

    // ==================== 事件与存储错误 ====================

    /// 订阅未找到
    #[error("订阅未找到: {0}")]
    SubscriptionNotFound(u64),

    /// 存储错误
    #[error("存储错误: {0}")]
    Storage(String),

    /// 存储句柄已关闭
    #[error("模块 '{0}' 的存储句柄已关闭")]
    StorageClosed(String),

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        key: String,
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

    // ==================== 通用错误 ====================

    /// 运行时未启动
    #[error("运行时未启动")]
    RuntimeNotRunning,

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

fn describe_best(best: &Option<String>) -> String {
    match best {
        Some(best) => format!("最佳可用版本 {} 不满足要求", best),
        None => "no provider".to_string(),
    }
}

/// 运行时操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 状态码常量
pub mod status_code {
    /// 成功
    pub const OK: u16 = 200;

    /// 请求格式错误
    pub const BAD_REQUEST: u16 = 400;

    /// 未找到
    pub const NOT_FOUND: u16 = 404;

    /// 冲突
    pub const CONFLICT: u16 = 409;

    /// 语义错误（依赖/能力无法满足）
    pub const UNPROCESSABLE: u16 = 422;

    /// 内部错误
    pub const INTERNAL_ERROR: u16 = 500;

    /// 服务不可用
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// 错误码常量
pub mod error_code {
    // 清单错误 (MANIFEST-xxx)
    pub const MANIFEST_INVALID: &str = "MANIFEST-001";

    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_HOOK_FAILED: &str = "MODULE-002";
    pub const MODULE_BIND_FAILED: &str = "MODULE-003";
    pub const MODULE_ALREADY_LOADED: &str = "MODULE-004";
    pub const MODULE_CIRCULAR_DEPENDENCY: &str = "MODULE-005";
    pub const MODULE_MISSING_DEPENDENCY: &str = "MODULE-006";
    pub const MODULE_DEPENDENCY_FAILED: &str = "MODULE-007";
    pub const MODULE_INVALID_TRANSITION: &str = "MODULE-008";
    pub const MODULE_BUSY: &str = "MODULE-009";
    pub const MODULE_STALE_HANDLE: &str = "MODULE-010";
    pub const MODULE_HOT_RELOAD_DISABLED: &str = "MODULE-011";

    // 能力错误 (CAPABILITY-xxx)
    pub const CAPABILITY_UNSATISFIED: &str = "CAPABILITY-001";
    pub const CAPABILITY_INVALID_CONSTRAINT: &str = "CAPABILITY-002";

    // 事件错误 (EVENT-xxx)
    pub const EVENT_SUBSCRIPTION_NOT_FOUND: &str = "EVENT-001";

    // 存储错误 (STORAGE-xxx)
    pub const STORAGE_FAILED: &str = "STORAGE-001";
    pub const STORAGE_CLOSED: &str = "STORAGE-002";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";

    // 核心错误 (CORE-xxx)
    pub const CORE_NOT_RUNNING: &str = "CORE-001";
    pub const CORE_INIT_FAILED: &str = "CORE-002";
    pub const CORE_INTERNAL: &str = "CORE-003";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Manifest { .. } => error_code::MANIFEST_INVALID,
            CoreError::CyclicDependency { .. } => error_code::MODULE_CIRCULAR_DEPENDENCY,
            CoreError::MissingDependency { .. } => error_code::MODULE_MISSING_DEPENDENCY,
            CoreError::UnsatisfiedCapability { .. } => error_code::CAPABILITY_UNSATISFIED,
            CoreError::DependencyFailed { .. } => error_code::MODULE_DEPENDENCY_FAILED,
            CoreError::InvalidConstraint { .. } => error_code::CAPABILITY_INVALID_CONSTRAINT,
            CoreError::BindFailed { .. } => error_code::MODULE_BIND_FAILED,
            CoreError::HookExecution { .. } => error_code::MODULE_HOOK_FAILED,
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::ModuleAlreadyLoaded(_) => error_code::MODULE_ALREADY_LOADED,
            CoreError::InvalidTransition { .. } => error_code::MODULE_INVALID_TRANSITION,
            CoreError::TransitionInProgress(_) => error_code::MODULE_BUSY,
            CoreError::StaleHandle { .. } => error_code::MODULE_STALE_HANDLE,
            CoreError::HotReloadDisabled(_) => error_code::MODULE_HOT_RELOAD_DISABLED,
            CoreError::SubscriptionNotFound(_) => error_code::EVENT_SUBSCRIPTION_NOT_FOUND,
            CoreError::Storage(_) | CoreError::Io(_) | CoreError::Json(_) => {
                error_code::STORAGE_FAILED
            }
            CoreError::StorageClosed(_) => error_code::STORAGE_CLOSED,
            CoreError::ConfigLoadFailed(_) | CoreError::Yaml(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            CoreError::VersionParse(_) => error_code::MANIFEST_INVALID,
            CoreError::RuntimeNotRunning => error_code::CORE_NOT_RUNNING,
            CoreError::InitFailed(_) => error_code::CORE_INIT_FAILED,
            CoreError::Internal(_) | CoreError::Other(_) => error_code::CORE_INTERNAL,
        }
    }

    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::ModuleNotFound(_) | CoreError::SubscriptionNotFound(_) => {
                status_code::NOT_FOUND
            }
            CoreError::Manifest { .. }
            | CoreError::InvalidConstraint { .. }
            | CoreError::InvalidConfigValue { .. }
            | CoreError::VersionParse(_) => status_code::BAD_REQUEST,
            CoreError::ModuleAlreadyLoaded(_)
            | CoreError::InvalidTransition { .. }
            | CoreError::TransitionInProgress(_)
            | CoreError::StaleHandle { .. }
            | CoreError::HotReloadDisabled(_) => status_code::CONFLICT,
            CoreError::CyclicDependency { .. }
            | CoreError::MissingDependency { .. }
            | CoreError::UnsatisfiedCapability { .. }
            | CoreError::DependencyFailed { .. } => status_code::UNPROCESSABLE,
            CoreError::RuntimeNotRunning => status_code::SERVICE_UNAVAILABLE,
            _ => status_code::INTERNAL_ERROR,
        }
    }

    /// 失败的钩子阶段（仅 `HookExecution` 有值）
    pub fn hook_phase(&self) -> Option<HookPhase> {
        match self {
            CoreError::HookExecution { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// 转换为结构化的错误描述，供管理接口返回
    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.error_code().to_string(),
            status: self.status_code(),
            message: self.to_string(),
            phase: self.hook_phase(),
        }
    }
}

/// 结构化错误信息
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorInfo {
    /// 错误码
    pub code: String,
    /// 状态码
    pub status: u16,
    /// 错误描述
    pub message: String,
    /// 失败的钩子阶段
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<HookPhase>,
}
