//! Forge 命令行入口
//!
//! Forge 运行时的命令行工具，提供启动、校验和调试功能。
//!
//! # 命令概览
//!
//! - `start` - 启动运行时，按 Ctrl+C 停止
//! - `validate` - 扫描模块目录，输出加载顺序与失败原因（不执行模块代码）
//! - `list-modules` - 加载模块并列出状态
//! - `check-config` - 验证配置文件
//! - `storage` - 查看或修改模块存储
//! - `version` - 显示版本信息
//!
//! # 使用示例
//!
//! ```bash
//! forge -c forge.yaml start
//! forge --module-dir ./modules validate
//! forge storage get inventory items
//! forge storage put inventory items '["sword"]'
//! ```
//!
//! 命令行只能绑定无钩子的模块：清单会被完整解析与校验，
//! 但模块代码需要由嵌入运行时的宿主程序通过 `StaticBinder` 提供。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;

use forge_core::api::global;
use forge_core::{
    ForgeRuntime, LogGuard, Logger, LoggerConfig, ModuleState, RuntimeConfig, StaticBinder,
    StorageManager,
};

/// Forge - 进程内插件运行时
#[derive(Parser)]
#[command(name = "forge")]
#[command(version, about = "进程内插件运行时", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "forge.yaml", global = true)]
    config: PathBuf,

    /// 覆盖配置中的模块目录
    #[arg(short, long, global = true)]
    module_dir: Option<PathBuf>,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 以 JSON 输出结果
    #[arg(long, global = true)]
    json: bool,

    /// 开发模式
    #[arg(long, global = true)]
    dev: bool,

    /// 子命令
    #[command(subcommand)]
    command: Option<Commands>,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 启动运行时
    ///
    /// 扫描模块目录并按依赖顺序加载，按 Ctrl+C 逆序停止所有模块。
    Start,

    /// 校验模块目录
    ///
    /// 解析所有清单，计算加载顺序和依赖图，不执行任何模块代码。
    Validate,

    /// 列出模块
    ListModules,

    /// 验证配置文件
    CheckConfig,

    /// 模块存储
    #[command(subcommand)]
    Storage(StorageCommand),

    /// 查看版本信息
    Version,
}

#[derive(Subcommand)]
enum StorageCommand {
    /// 列出模块的全部键
    List {
        /// 模块名
        module: String,
    },
    /// 读取一个键
    Get {
        /// 模块名
        module: String,
        /// 键
        key: String,
    },
    /// 写入一个键（值为 JSON）
    Put {
        /// 模块名
        module: String,
        /// 键
        key: String,
        /// JSON 值
        value: String,
    },
    /// 删除一个键
    Delete {
        /// 模块名
        module: String,
        /// 键
        key: String,
    },
}

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();

    if let Some(Commands::Version) = cli.command {
        print_version();
        return Ok(());
    }

    let config = load_config(&cli).await?;
    if let Some(Commands::CheckConfig) = cli.command {
        return check_config(&cli.config, &config, cli.json);
    }

    let _guard = init_logging(&config);

    match cli.command {
        Some(Commands::Start) | None => run_start(config).await,
        Some(Commands::Validate) => validate(config, cli.json).await,
        Some(Commands::ListModules) => list_modules(config, cli.json).await,
        Some(Commands::Storage(command)) => storage(config, command, cli.json).await,
        Some(Commands::Version) | Some(Commands::CheckConfig) => Ok(()),
    }
}

/// 加载配置文件，文件不存在时使用默认配置
async fn load_config(cli: &Cli) -> CliResult<RuntimeConfig> {
    let mut config = if cli.config.exists() {
        RuntimeConfig::from_file(&cli.config).await?
    } else {
        RuntimeConfig::default()
    };
    config.apply_env()?;
    if let Some(dir) = &cli.module_dir {
        config.modules.module_dir = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.dev {
        config.dev_mode = true;
        if cli.log_level.is_none() {
            config.logging.level = "debug".to_string();
        }
    }
    Ok(config)
}

fn init_logging(config: &RuntimeConfig) -> LogGuard {
    Logger::try_init(LoggerConfig::from_log_config(&config.logging))
}

fn runtime(config: RuntimeConfig) -> Arc<ForgeRuntime> {
    Arc::new(ForgeRuntime::new(
        config,
        Arc::new(StaticBinder::new().allow_missing(true)),
    ))
}

/// 启动运行时
async fn run_start(config: RuntimeConfig) -> CliResult {
    let runtime = global::install(runtime(config))?;
    let report = runtime.start().await?;

    println!();
    println!("Forge 运行时已启动 (v{})", forge_core::VERSION);
    println!("────────────────────────────────────────");
    println!("  模块目录: {}", runtime.config().modules.module_dir.display());
    println!("  已加载:   {}", report.loaded.len());
    for (name, err) in &report.failed {
        println!("  ✗ {}: {}", name, err.message);
    }
    for (path, err) in &report.invalid {
        println!("  ⚠ {}: {}", path.display(), err.message);
    }
    println!("  按 Ctrl+C 停止");
    println!("────────────────────────────────────────");

    signal::ctrl_c().await?;
    println!();
    info!("收到关闭信号，正在停止...");
    runtime.stop().await?;
    Ok(())
}

/// 校验模块目录
async fn validate(config: RuntimeConfig, json: bool) -> CliResult {
    let report = runtime(config).validate().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("加载顺序:");
        for (i, name) in report.order.iter().enumerate() {
            let deps = report.graph.get(name).cloned().unwrap_or_default();
            if deps.is_empty() {
                println!("  {:>2}. {}", i + 1, name);
            } else {
                println!("  {:>2}. {}  (依赖: {})", i + 1, name, deps.join(", "));
            }
        }
        if !report.failures.is_empty() {
            println!();
            println!("无法加载:");
            for (name, err) in &report.failures {
                println!("  ✗ {} [{}] {}", name, err.code, err.message);
            }
        }
        if !report.invalid.is_empty() {
            println!();
            println!("无效目录:");
            for (path, err) in &report.invalid {
                println!("  ⚠ {}: {}", path.display(), err.message);
            }
        }
    }
    if report.is_ok() {
        Ok(())
    } else {
        Err(format!("{} 个模块无法加载", report.failures.len() + report.invalid.len()).into())
    }
}

/// 加载模块并列出状态
async fn list_modules(config: RuntimeConfig, json: bool) -> CliResult {
    let runtime = runtime(config);
    runtime.start().await?;
    let modules = runtime.list_modules().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&modules)?);
    } else {
        println!("{:<24} {:<10} {:<10} 能力", "模块", "版本", "状态");
        println!("────────────────────────────────────────────────────────────");
        for module in &modules {
            println!(
                "{:<24} {:<10} {:<10} {}",
                module.name,
                module.version.to_string(),
                module.state.to_string(),
                module.capabilities.join(", ")
            );
            if module.state == ModuleState::Failed {
                if let Some(err) = &module.last_error {
                    println!("    └─ {}", err);
                }
            }
        }
    }

    runtime.stop().await?;
    Ok(())
}

/// 模块存储操作
async fn storage(config: RuntimeConfig, command: StorageCommand, json: bool) -> CliResult {
    let storage = StorageManager::new(config.storage_dir()).with_fsync(config.storage.fsync);
    match command {
        StorageCommand::List { module } => {
            let keys = storage.list_keys(&module).await?;
            if json {
                println!("{}", serde_json::to_string(&keys)?);
            } else {
                keys.iter().for_each(|key| println!("{}", key));
            }
        }
        StorageCommand::Get { module, key } => {
            match storage.get::<serde_json::Value>(&module, &key).await? {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => return Err(format!("键不存在: {}/{}", module, key).into()),
            }
        }
        StorageCommand::Put { module, key, value } => {
            let value: serde_json::Value = serde_json::from_str(&value)
                .map_err(|e| format!("值不是有效的 JSON: {}", e))?;
            storage.save(&module, &key, &value).await?;
            println!("已写入 {}/{}", module, key);
        }
        StorageCommand::Delete { module, key } => {
            if storage.delete(&module, &key).await? {
                println!("已删除 {}/{}", module, key);
            } else {
                println!("键不存在: {}/{}", module, key);
            }
        }
    }
    Ok(())
}

/// 检查配置文件
fn check_config(path: &Path, config: &RuntimeConfig, json: bool) -> CliResult {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    if path.exists() {
        println!("✅ 配置文件有效: {}", path.display());
    } else {
        println!("⚠️  配置文件不存在 ({})，使用默认配置", path.display());
    }
    let yes_no = |b: bool| if b { "是" } else { "否" };
    println!("────────────────────────────────────────");
    println!("  [模块]");
    println!("    模块目录:   {}", config.modules.module_dir.display());
    println!("    热插拔:     {}", yes_no(config.modules.hot_reload));
    println!("    清单文件:   {}", config.modules.manifest_files.join(", "));
    println!("  [存储]");
    println!("    存储目录:   {}", config.storage_dir().display());
    println!("    fsync:      {}", yes_no(config.storage.fsync));
    println!("  [生命周期]");
    match config.hook_timeout() {
        Some(t) => println!("    钩子超时:   {:?}", t),
        None => println!("    钩子超时:   不限"),
    }
    println!("  [日志]");
    println!("    日志级别:   {}", config.logging.level);
    println!("    JSON 格式:  {}", yes_no(config.logging.json_format));
    println!("    开发模式:   {}", yes_no(config.dev_mode));
    println!("────────────────────────────────────────");
    Ok(())
}

/// 打印版本信息
fn print_version() {
    println!("Forge Core {}", forge_core::VERSION);
    println!("  目标平台: {}-{}", std::env::consts::ARCH, std::env::consts::OS);
}
