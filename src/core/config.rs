//! 运行时配置
//!
//! 定义运行时的配置结构和加载逻辑。配置文件可以是 YAML 或 JSON，
//! 缺省字段取默认值；`FORGE_*` 环境变量可覆盖少量常用项。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::module::loader::DEFAULT_MANIFEST_FILES;
use crate::utils::{CoreError, Result};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "FORGE";

/// 存储目录在模块目录下的默认名称
pub const DEFAULT_STORAGE_DIR_NAME: &str = "_storage";

/// 模块配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// 模块根目录
    #[serde(default = "default_module_dir")]
    pub module_dir: PathBuf,

    /// 是否允许热插拔（`add` / `remove` / `reload`）
    #[serde(default = "default_true")]
    pub hot_reload: bool,

    /// 清单文件名，第一个存在的文件生效
    #[serde(default = "default_manifest_files")]
    pub manifest_files: Vec<String>,
}

fn default_module_dir() -> PathBuf {
    PathBuf::from("./modules")
}

fn default_true() -> bool {
    true
}

fn default_manifest_files() -> Vec<String> {
    DEFAULT_MANIFEST_FILES.iter().map(|s| s.to_string()).collect()
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            module_dir: default_module_dir(),
            hot_reload: true,
            manifest_files: default_manifest_files(),
        }
    }
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 存储目录；未设置时为 `<module_dir>/_storage`
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// 写入后是否 fsync
    #[serde(default = "default_true")]
    pub fsync: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            fsync: true,
        }
    }
}

/// 生命周期配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleSection {
    /// 钩子超时（毫秒），未设置则不限时
    #[serde(default)]
    pub hook_timeout_ms: Option<u64>,
}

/// 事件总线配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBusSection {
    /// 单个处理函数的超时（毫秒）
    #[serde(default)]
    pub handler_timeout_ms: Option<u64>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 日志轮转策略（never / minutely / hourly / daily）
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_output: false,
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// 运行时配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 模块配置
    #[serde(default)]
    pub modules: ModulesConfig,

    /// 存储配置
    #[serde(default)]
    pub storage: StorageConfig,

    /// 生命周期配置
    #[serde(default)]
    pub lifecycle: LifecycleSection,

    /// 事件总线配置
    #[serde(default)]
    pub event_bus: EventBusSection,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 是否为开发模式
    #[serde(default)]
    pub dev_mode: bool,
}

impl RuntimeConfig {
    /// 创建配置构建器
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// 扩展名为 `.json` 时按 JSON 解析，否则按 YAML 解析。
    ///
    /// # Errors
    ///
    /// 文件无法读取或格式错误时返回 `ConfigLoadFailed`
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;

        let mut config = Self::from_str_with_format(&content, is_json(&path))
            .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;
        config.config_path = Some(path);
        config.validate()?;
        Ok(config)
    }

    fn from_str_with_format(content: &str, json: bool) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(if json {
            serde_json::from_str(content)?
        } else {
            serde_yaml::from_str(content)?
        })
    }

    /// 写出配置文件，格式同样由扩展名决定
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)?
        };
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// 应用 `FORGE_*` 环境变量覆盖
    ///
    /// 支持 `FORGE_MODULE_DIR`、`FORGE_STORAGE_DIR`、`FORGE_LOG_LEVEL`、
    /// `FORGE_HOT_RELOAD`、`FORGE_DEV_MODE`。
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(format!("{}_{}", ENV_PREFIX, key)).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup("MODULE_DIR") {
            self.modules.module_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("STORAGE_DIR") {
            self.storage.storage_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(value) = lookup("HOT_RELOAD") {
            self.modules.hot_reload = parse_bool("HOT_RELOAD", &value)?;
        }
        if let Some(value) = lookup("DEV_MODE") {
            self.dev_mode = parse_bool("DEV_MODE", &value)?;
        }
        Ok(())
    }

    /// 校验配置值
    pub fn validate(&self) -> Result<()> {
        if self.modules.manifest_files.iter().any(|f| f.trim().is_empty()) {
            return Err(CoreError::InvalidConfigValue {
                key: "modules.manifest_files".to_string(),
                reason: "文件名不能为空".to_string(),
            });
        }
        if self.lifecycle.hook_timeout_ms == Some(0) {
            return Err(CoreError::InvalidConfigValue {
                key: "lifecycle.hook_timeout_ms".to_string(),
                reason: "超时必须大于 0".to_string(),
            });
        }
        if self.event_bus.handler_timeout_ms == Some(0) {
            return Err(CoreError::InvalidConfigValue {
                key: "event_bus.handler_timeout_ms".to_string(),
                reason: "超时必须大于 0".to_string(),
            });
        }
        if self.logging.file_output && self.logging.log_dir.is_none() {
            return Err(CoreError::InvalidConfigValue {
                key: "logging.log_dir".to_string(),
                reason: "启用文件日志时必须指定目录".to_string(),
            });
        }
        Ok(())
    }

    /// 实际使用的存储目录
    pub fn storage_dir(&self) -> PathBuf {
        self.storage
            .storage_dir
            .clone()
            .unwrap_or_else(|| self.modules.module_dir.join(DEFAULT_STORAGE_DIR_NAME))
    }

    /// 钩子超时
    pub fn hook_timeout(&self) -> Option<Duration> {
        self.lifecycle.hook_timeout_ms.map(Duration::from_millis)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.event_bus.handler_timeout_ms.map(Duration::from_millis)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CoreError::InvalidConfigValue {
            key: format!("{}_{}", ENV_PREFIX, key),
            reason: format!("无法解析为布尔值: '{}'", value),
        }),
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置模块目录
    pub fn module_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.module_dir = dir.into();
        self
    }

    /// 设置存储目录
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage.storage_dir = Some(dir.into());
        self
    }

    pub fn fsync(mut self, enable: bool) -> Self {
        self.config.storage.fsync = enable;
        self
    }

    /// 设置是否允许热插拔
    pub fn hot_reload(mut self, enable: bool) -> Self {
        self.config.modules.hot_reload = enable;
        self
    }

    /// 设置清单文件名
    pub fn manifest_files(mut self, files: Vec<String>) -> Self {
        self.config.modules.manifest_files = files;
        self
    }

    /// 设置钩子超时
    pub fn hook_timeout(mut self, timeout: Duration) -> Self {
        self.config.lifecycle.hook_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// 设置事件处理函数超时
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.event_bus.handler_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用开发模式
    pub fn dev_mode(mut self) -> Self {
        self.config.dev_mode = true;
        self
    }

    /// 构建配置
    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}
