//! 日志系统模块
//!
//! 基于 tracing 生态初始化日志输出：
//!
//! - 级别过滤（`RUST_LOG` 优先于配置）
//! - Pretty 或 JSON 格式
//! - 可选的文件输出（非阻塞写入，按时间轮转）
//!
//! # 示例
//!
//! ```rust,no_run
//! use forge_core::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! let _guard = Logger::init(
//!     LoggerConfig::builder()
//!         .level("debug")
//!         .file_output("./logs")
//!         .rotation(RotationStrategy::Hourly)
//!         .build(),
//! )?;
//!
//! tracing::info!(module = "inventory", "模块已启用");
//! # Ok::<(), forge_core::CoreError>(())
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::core::config::LogConfig;
use crate::utils::{CoreError, Result};

// ============================================================================
// 日志轮转策略
// ============================================================================

/// 日志轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 不轮转（单个日志文件）
    Never,
    /// 每分钟轮转（主要用于测试）
    Minutely,
    /// 每小时轮转
    Hourly,
    /// 每天轮转（默认）
    #[default]
    Daily,
}

impl RotationStrategy {
    fn to_rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Minutely => Rotation::MINUTELY,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }

    /// 解析轮转策略，无法识别时返回 `None`
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "never" | "none" => Some(RotationStrategy::Never),
            "minutely" | "minute" => Some(RotationStrategy::Minutely),
            "hourly" | "hour" => Some(RotationStrategy::Hourly),
            "daily" | "day" => Some(RotationStrategy::Daily),
            _ => None,
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RotationStrategy::Never => "never",
            RotationStrategy::Minutely => "minutely",
            RotationStrategy::Hourly => "hourly",
            RotationStrategy::Daily => "daily",
        };
        f.write_str(s)
    }
}

// ============================================================================
// 日志配置
// ============================================================================

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认日志级别或过滤指令（例如 `"info"`、`"forge_core=debug"`）
    pub level: String,
    /// 是否输出 JSON 格式
    pub json_format: bool,
    /// 是否输出到控制台（stderr）
    pub console_output: bool,
    /// 文件输出目录
    pub file_output: Option<PathBuf>,
    /// 日志文件名前缀
    pub file_prefix: String,
    /// 轮转策略
    pub rotation: RotationStrategy,
    /// 是否显示 target
    pub show_target: bool,
    /// 是否启用 ANSI 颜色（仅控制台）
    pub ansi_colors: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: None,
            file_prefix: "forge".to_string(),
            rotation: RotationStrategy::Daily,
            show_target: true,
            ansi_colors: true,
        }
    }
}

impl LoggerConfig {
    /// 创建配置构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }

    /// 从运行时的日志配置转换
    pub fn from_log_config(log_config: &LogConfig) -> Self {
        let mut builder = Self::builder()
            .level(log_config.level.clone())
            .json_format(log_config.json_format)
            .rotation(RotationStrategy::parse(&log_config.rotation).unwrap_or_default());
        if log_config.file_output {
            if let Some(dir) = &log_config.log_dir {
                builder = builder.file_output(dir.clone());
            }
        }
        builder.build()
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 设置日志级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// 设置是否输出 JSON
    pub fn json_format(mut self, enable: bool) -> Self {
        self.config.json_format = enable;
        self
    }

    /// 设置是否输出到控制台
    pub fn console_output(mut self, enable: bool) -> Self {
        self.config.console_output = enable;
        self
    }

    /// 启用文件输出
    pub fn file_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.file_output = Some(dir.into());
        self
    }

    /// 设置日志文件名前缀
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    /// 设置轮转策略
    pub fn rotation(mut self, strategy: RotationStrategy) -> Self {
        self.config.rotation = strategy;
        self
    }

    /// 设置是否显示 target
    pub fn show_target(mut self, enable: bool) -> Self {
        self.config.show_target = enable;
        self
    }

    /// 设置是否启用 ANSI 颜色
    pub fn ansi_colors(mut self, enable: bool) -> Self {
        self.config.ansi_colors = enable;
        self
    }

    /// 构建配置
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

// ============================================================================
// 日志守卫
// ============================================================================

/// 日志系统守卫
///
/// 持有非阻塞写入器的 WorkerGuard，被丢弃时会等待挂起的日志写入完成。
#[derive(Default)]
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

impl LogGuard {
    /// 是否持有写入器（`try_init` 在重复初始化时返回空守卫）
    pub fn is_active(&self) -> bool {
        !self._guards.is_empty()
    }
}

// ============================================================================
// 日志系统
// ============================================================================

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// 日志系统
pub struct Logger;

impl Logger {
    /// 初始化日志系统
    ///
    /// # Returns
    ///
    /// 返回 `LogGuard`，必须保持存活直到程序退出
    ///
    /// # Errors
    ///
    /// 日志系统已初始化或过滤指令无效时返回 `InitFailed`
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if LOGGER_INITIALIZED.get().is_some() {
            return Err(CoreError::InitFailed("日志系统已初始化".to_string()));
        }

        let filter = Self::env_filter(&config)?;
        let mut guard = LogGuard::default();
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if config.console_output {
            let (writer, worker) = tracing_appender::non_blocking(io::stderr());
            guard._guards.push(worker);
            layers.push(Self::layer(&config, writer, config.ansi_colors));
        }

        if let Some(dir) = &config.file_output {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(
                config.rotation.to_rotation(),
                dir,
                format!("{}.log", config.file_prefix),
            );
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard._guards.push(worker);
            layers.push(Self::layer(&config, writer, false));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(filter)
            .try_init()
            .map_err(|e| CoreError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        let _ = LOGGER_INITIALIZED.set(());
        Ok(guard)
    }

    /// 尝试初始化日志系统，已初始化时返回空守卫
    ///
    /// 适用于测试或多次调用初始化的场景。
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_default()
    }

    /// 使用默认配置初始化
    pub fn init_default() -> Result<LogGuard> {
        Self::init(LoggerConfig::default())
    }

    fn env_filter(config: &LoggerConfig) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&config.level)
            .map_err(|e| CoreError::InitFailed(format!("无效的日志级别 '{}': {}", config.level, e)))
    }

    fn layer<W>(config: &LoggerConfig, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        if config.json_format {
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(config.show_target)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(writer)
                .with_target(config.show_target)
                .with_ansi(ansi)
                .boxed()
        }
    }
}

// ============================================================================
// 结构化日志字段
// ============================================================================

/// 日志中统一使用的字段名
pub mod fields {
    /// 模块名
    pub const MODULE: &str = "module";
    /// 钩子阶段
    pub const PHASE: &str = "phase";
    /// 事件主题
    pub const TOPIC: &str = "topic";
    /// 订阅归属模块
    pub const OWNER: &str = "owner";
    /// 能力约束
    pub const CONSTRAINT: &str = "constraint";
    /// 错误
    pub const ERROR: &str = "error";
}
