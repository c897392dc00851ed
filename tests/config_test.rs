//! 配置集成测试
//!
//! 测试配置文件的加载、校验，以及配置项对运行时行为的影响。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use forge_core::{
    error_code, ForgeRuntime, HookPhase, ModuleContext, ModuleHooks, ModuleState, RuntimeConfig,
    StaticBinder,
};

/// 测试从 YAML 加载完整配置
#[tokio::test]
async fn test_load_yaml_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("forge.yaml");
    tokio::fs::write(
        &path,
        r#"
modules:
  module_dir: /srv/forge/modules
  hot_reload: false
  manifest_files: [plugin.yaml]
storage:
  storage_dir: /var/lib/forge
  fsync: false
lifecycle:
  hook_timeout_ms: 2500
event_bus:
  handler_timeout_ms: 100
logging:
  level: debug
  json_format: true
dev_mode: true
"#,
    )
    .await
    .unwrap();

    let config = RuntimeConfig::from_file(&path).await.unwrap();
    assert_eq!(config.modules.module_dir.to_str(), Some("/srv/forge/modules"));
    assert!(!config.modules.hot_reload);
    assert_eq!(config.modules.manifest_files, vec!["plugin.yaml"]);
    assert_eq!(config.storage_dir().to_str(), Some("/var/lib/forge"));
    assert!(!config.storage.fsync);
    assert_eq!(config.hook_timeout(), Some(Duration::from_millis(2500)));
    assert_eq!(config.handler_timeout(), Some(Duration::from_millis(100)));
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json_format);
    assert!(config.dev_mode);
    assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
}

/// 测试 JSON 配置与默认值
#[tokio::test]
async fn test_load_json_config_with_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("forge.json");
    tokio::fs::write(&path, r#"{ "modules": { "module_dir": "plugins" } }"#)
        .await
        .unwrap();

    let config = RuntimeConfig::from_file(&path).await.unwrap();
    assert_eq!(config.modules.module_dir.to_str(), Some("plugins"));
    assert!(config.modules.hot_reload);
    assert_eq!(config.storage_dir(), config.modules.module_dir.join("_storage"));
    assert_eq!(config.hook_timeout(), None);
    assert_eq!(config.logging.level, "info");
}

/// 测试空文件得到默认配置
#[tokio::test]
async fn test_empty_file_is_default() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("forge.yaml");
    tokio::fs::write(&path, "").await.unwrap();

    let config = RuntimeConfig::from_file(&path).await.unwrap();
    assert_eq!(config.modules.module_dir.to_str(), Some("./modules"));
}

/// 测试保存后重新加载
#[tokio::test]
async fn test_save_and_reload() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("saved.yaml");

    let config = RuntimeConfig::builder()
        .module_dir("/opt/modules")
        .hook_timeout(Duration::from_secs(3))
        .log_level("warn")
        .build();
    config.save_to_file(&path).await.unwrap();

    let loaded = RuntimeConfig::from_file(&path).await.unwrap();
    assert_eq!(loaded.modules.module_dir, config.modules.module_dir);
    assert_eq!(loaded.hook_timeout(), Some(Duration::from_secs(3)));
    assert_eq!(loaded.logging.level, "warn");
}

/// 测试错误的配置文件
#[tokio::test]
async fn test_invalid_config_files() {
    let temp_dir = TempDir::new().unwrap();

    let missing = RuntimeConfig::from_file(temp_dir.path().join("missing.yaml"))
        .await
        .unwrap_err();
    assert_eq!(missing.error_code(), error_code::CONFIG_LOAD_FAILED);

    let malformed = temp_dir.path().join("bad.json");
    tokio::fs::write(&malformed, "{ not json").await.unwrap();
    let err = RuntimeConfig::from_file(&malformed).await.unwrap_err();
    assert_eq!(err.error_code(), error_code::CONFIG_LOAD_FAILED);

    let zero = temp_dir.path().join("zero.yaml");
    tokio::fs::write(&zero, "lifecycle:\n  hook_timeout_ms: 0\n")
        .await
        .unwrap();
    let err = RuntimeConfig::from_file(&zero).await.unwrap_err();
    assert_eq!(err.error_code(), error_code::CONFIG_INVALID_VALUE);
    assert!(err.to_string().contains("hook_timeout_ms"));
}

// ============================================================================
// 配置对运行时的影响
// ============================================================================

struct Sleepy;

#[async_trait]
impl ModuleHooks for Sleepy {
    async fn on_load(&mut self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(())
    }
}

/// 测试钩子超时与自定义清单文件名
#[tokio::test]
async fn test_runtime_honours_config() {
    let temp_dir = TempDir::new().unwrap();
    let modules = temp_dir.path().join("modules");
    for name in ["sleepy", "quick"] {
        std::fs::create_dir_all(modules.join(name)).unwrap();
        std::fs::write(
            modules.join(name).join("plugin.yaml"),
            format!("name: {}\nversion: 1.0.0\n", name),
        )
        .unwrap();
    }
    // 默认清单文件名不会被识别
    std::fs::create_dir_all(modules.join("ignored")).unwrap();
    std::fs::write(
        modules.join("ignored").join("module.json"),
        r#"{"name": "ignored", "version": "1.0.0"}"#,
    )
    .unwrap();

    let config = RuntimeConfig::builder()
        .module_dir(&modules)
        .storage_dir(temp_dir.path().join("data"))
        .manifest_files(vec!["plugin.yaml".to_string()])
        .hook_timeout(Duration::from_millis(50))
        .fsync(false)
        .build();
    let binder = StaticBinder::new()
        .allow_missing(true)
        .register("sleepy", || Ok(Box::new(Sleepy)));
    let runtime = ForgeRuntime::new(config, Arc::new(binder));

    let report = runtime.start().await.unwrap();
    assert_eq!(report.loaded.len(), 1);
    assert_eq!(report.loaded[0].name, "quick");

    let failure = report.failure_of("sleepy").unwrap();
    assert_eq!(failure.code, error_code::MODULE_HOOK_FAILED);
    assert_eq!(failure.phase, Some(HookPhase::Load));
    assert_eq!(
        runtime.get_module("sleepy").await.unwrap().state,
        ModuleState::Failed
    );
    assert!(runtime.get_module("ignored").await.is_err());
}
