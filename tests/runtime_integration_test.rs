//! # 运行时集成测试
//!
//! 通过模块目录驱动完整的运行时流程：
//! - 扫描 → 规划 → 绑定 → 启用 → 停止
//! - 能力解析与版本选择
//! - 拆除顺序（依赖者先禁用、卸载）
//! - 失败隔离（钩子错误、事件处理函数错误、循环依赖）
//! - 存储隔离

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use forge_core::{
    error_code, handler, CoreError, ForgeRuntime, ModuleContext, ModuleHooks, ModuleState,
    RuntimeConfig, StaticBinder,
};

// ============================================================================
// 测试辅助结构
// ============================================================================

type Log = Arc<Mutex<Vec<String>>>;

/// 记录钩子调用的模块
struct Probe {
    name: String,
    log: Log,
    fail_unload: bool,
}

impl Probe {
    fn record(&self, phase: &str) {
        self.log.lock().unwrap().push(format!("{}:{}", self.name, phase));
    }
}

#[async_trait]
impl ModuleHooks for Probe {
    async fn on_load(&mut self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.record("on_load");
        Ok(())
    }

    async fn on_enable(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        self.record("on_enable");
        ctx.storage().save("owner", &self.name).await?;
        Ok(())
    }

    async fn on_disable(&mut self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.record("on_disable");
        Ok(())
    }

    async fn on_unload(&mut self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.record("on_unload");
        if self.fail_unload {
            anyhow::bail!("资源释放失败");
        }
        Ok(())
    }
}

/// 临时模块目录 + 钩子日志
struct Harness {
    dir: TempDir,
    log: Log,
    binder: StaticBinder,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            log: Arc::new(Mutex::new(Vec::new())),
            binder: StaticBinder::new().allow_missing(true),
        }
    }

    fn module(self, name: &str, manifest: serde_json::Value) -> Self {
        self.write(name, &manifest);
        self.probe(name, false)
    }

    fn probe(mut self, name: &str, fail_unload: bool) -> Self {
        let log = self.log.clone();
        let owned = name.to_string();
        self.binder = self.binder.register(name, move || {
            Ok(Box::new(Probe {
                name: owned.clone(),
                log: log.clone(),
                fail_unload,
            }))
        });
        self
    }

    fn write(&self, dir: &str, manifest: &serde_json::Value) -> PathBuf {
        let path = self.dir.path().join("modules").join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("module.json"), manifest.to_string()).unwrap();
        path
    }

    fn runtime(&self) -> ForgeRuntime {
        let config = RuntimeConfig::builder()
            .module_dir(self.dir.path().join("modules"))
            .fsync(false)
            .build();
        ForgeRuntime::new(config, Arc::new(self.binder.clone()))
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

// ============================================================================
// 加载顺序与能力
// ============================================================================

#[tokio::test]
async fn test_provider_loads_before_consumer() {
    let harness = Harness::new()
        .module(
            "b",
            json!({
                "name": "b",
                "version": "1.0.0",
                "depends": ["a"],
                "requires": ["svc>=1.0.0"]
            }),
        )
        .module(
            "a",
            json!({ "name": "a", "version": "1.0.0", "provides": ["svc@1.0.0"] }),
        );
    let runtime = harness.runtime();

    let report = runtime.start().await.unwrap();
    let loaded: Vec<_> = report.loaded.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(loaded, vec!["a", "b"]);
    assert!(report.failed.is_empty());

    assert_eq!(
        harness.entries(),
        vec!["a:on_load", "a:on_enable", "b:on_load", "b:on_enable"]
    );

    let details = runtime.get_module("b").await.unwrap();
    assert_eq!(details.state, ModuleState::Enabled);
    assert_eq!(details.resolved.len(), 1);
    assert_eq!(details.resolved[0].provider, "a");

    assert_eq!(runtime.dependency_graph().await["b"], vec!["a".to_string()]);
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_resolve_picks_highest_matching_version() {
    let harness = Harness::new()
        .module("p1", json!({ "name": "p1", "version": "1.0.0", "provides": ["svc@1.1.0"] }))
        .module("p2", json!({ "name": "p2", "version": "1.0.0", "provides": ["svc@2.0.0"] }))
        .module("p3", json!({ "name": "p3", "version": "1.0.0", "provides": ["svc@1.3.0"] }))
        .module(
            "consumer",
            json!({ "name": "consumer", "version": "1.0.0", "requires": ["svc@^1.0"] }),
        );
    let runtime = harness.runtime();
    runtime.start().await.unwrap();

    let entry = runtime.resolve("svc@^1.0").await.unwrap();
    assert_eq!(entry.version, semver::Version::new(1, 3, 0));
    assert_eq!(entry.module, "p3");

    let consumer = runtime.get_module("consumer").await.unwrap();
    assert_eq!(consumer.resolved[0].provider, "p3");

    let err = runtime.resolve("svc>=3.0.0").await.unwrap_err();
    assert_eq!(err.error_code(), error_code::CAPABILITY_UNSATISFIED);
    assert!(err.to_string().contains("2.0.0"));
}

#[tokio::test]
async fn test_unsatisfied_requirement_fails_only_consumer() {
    let harness = Harness::new()
        .module("a", json!({ "name": "a", "version": "1.0.0", "provides": ["svc@1.0.0"] }))
        .module("b", json!({ "name": "b", "version": "1.0.0", "requires": ["svc>=2.0.0"] }))
        .module("c", json!({ "name": "c", "version": "1.0.0", "depends": ["b"] }));
    let runtime = harness.runtime();
    let report = runtime.start().await.unwrap();

    assert_eq!(report.loaded.len(), 1);
    assert_eq!(
        report.failure_of("b").unwrap().code,
        error_code::CAPABILITY_UNSATISFIED
    );
    let c = report.failure_of("c").unwrap();
    assert_eq!(c.code, error_code::MODULE_DEPENDENCY_FAILED);
    assert!(c.message.contains("'b'"));

    assert_eq!(runtime.get_module("a").await.unwrap().state, ModuleState::Enabled);
    assert_eq!(runtime.get_module("c").await.unwrap().state, ModuleState::Failed);
}

#[tokio::test]
async fn test_cycle_reports_every_member() {
    let harness = Harness::new()
        .module("x", json!({ "name": "x", "version": "1.0.0", "depends": ["y"] }))
        .module("y", json!({ "name": "y", "version": "1.0.0", "depends": ["z"] }))
        .module("z", json!({ "name": "z", "version": "1.0.0", "depends": ["x"] }))
        .module("solo", json!({ "name": "solo", "version": "1.0.0" }));
    let runtime = harness.runtime();
    let report = runtime.start().await.unwrap();

    assert_eq!(report.loaded.len(), 1);
    assert_eq!(report.loaded[0].name, "solo");
    for member in ["x", "y", "z"] {
        let failure = report.failure_of(member).unwrap();
        assert_eq!(failure.code, error_code::MODULE_CIRCULAR_DEPENDENCY);
        for name in ["x", "y", "z"] {
            assert!(failure.message.contains(name), "{}", failure.message);
        }
    }
    assert!(harness.entries().iter().all(|e| e.starts_with("solo:")));
}

#[tokio::test]
async fn test_validate_runs_no_module_code() {
    let harness = Harness::new()
        .module("a", json!({ "name": "a", "version": "1.0.0" }))
        .module("b", json!({ "name": "b", "version": "1.0.0", "depends": ["a", "ghost"] }));
    std::fs::create_dir_all(harness.dir.path().join("modules/broken")).unwrap();
    std::fs::write(
        harness.dir.path().join("modules/broken/module.json"),
        r#"{"name": "broken"}"#,
    )
    .unwrap();
    let runtime = harness.runtime();

    let report = runtime.validate().await.unwrap();
    assert_eq!(report.order, vec!["a"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].1.code, error_code::MODULE_MISSING_DEPENDENCY);
    assert_eq!(report.invalid.len(), 1);
    assert!(!report.is_ok());
    assert!(harness.entries().is_empty());
}

// ============================================================================
// 拆除与停止
// ============================================================================

#[tokio::test]
async fn test_remove_tears_down_dependents_first() {
    let harness = Harness::new()
        .module("a", json!({ "name": "a", "version": "1.0.0", "provides": ["svc@1.0.0"] }))
        .module(
            "b",
            json!({ "name": "b", "version": "1.0.0", "depends": ["a"], "requires": ["svc>=1.0.0"] }),
        );
    let runtime = harness.runtime();
    runtime.start().await.unwrap();
    harness.log.lock().unwrap().clear();

    let removed = runtime.remove("a").await.unwrap();
    assert_eq!(removed, vec!["b", "a"]);
    assert_eq!(
        harness.entries(),
        vec!["b:on_disable", "b:on_unload", "a:on_disable", "a:on_unload"]
    );
    assert!(runtime.list_modules().await.is_empty());
    assert!(runtime.capabilities().await.is_empty());
    assert!(matches!(
        runtime.get_module("a").await,
        Err(CoreError::ModuleNotFound(_))
    ));
}

#[tokio::test]
async fn test_unload_completes_when_hook_fails() {
    let harness = Harness::new()
        .module("a", json!({ "name": "a", "version": "1.0.0", "provides": ["svc@1.0.0"] }))
        .probe("a", true);
    let runtime = harness.runtime();
    runtime.start().await.unwrap();
    runtime.bus().subscribe("a", "some.topic", handler(|_| Ok(()))).await;

    runtime.remove("a").await.unwrap();
    assert!(harness.entries().contains(&"a:on_unload".to_string()));
    assert!(runtime.list_modules().await.is_empty());
    assert!(runtime.capabilities().await.is_empty());
    assert!(!runtime.bus().has_subscribers("some.topic").await);
}

#[tokio::test]
async fn test_stop_in_reverse_order() {
    let harness = Harness::new()
        .module("a", json!({ "name": "a", "version": "1.0.0" }))
        .module("b", json!({ "name": "b", "version": "1.0.0", "depends": ["a"] }))
        .module("c", json!({ "name": "c", "version": "1.0.0", "depends": ["b"] }));
    let runtime = harness.runtime();
    runtime.start().await.unwrap();
    harness.log.lock().unwrap().clear();

    runtime.stop().await.unwrap();
    assert_eq!(
        harness.entries(),
        vec![
            "c:on_disable",
            "b:on_disable",
            "a:on_disable",
            "c:on_unload",
            "b:on_unload",
            "a:on_unload",
        ]
    );
    assert!(runtime.list_modules().await.is_empty());
}

// ============================================================================
// 事件与存储
// ============================================================================

#[tokio::test]
async fn test_failing_handler_is_isolated() {
    let harness = Harness::new();
    let runtime = harness.runtime();
    let received = Arc::new(Mutex::new(Vec::new()));

    runtime
        .bus()
        .subscribe("broken", "chat.message", handler(|_| anyhow::bail!("处理失败")))
        .await;
    runtime
        .bus()
        .subscribe("panicky", "chat.*", handler(|_| panic!("处理函数崩溃")))
        .await;
    let sink = received.clone();
    runtime
        .bus()
        .subscribe(
            "listener",
            "chat.message",
            handler(move |event| {
                sink.lock().unwrap().push(event.payload);
                Ok(())
            }),
        )
        .await;

    let report = runtime.publish("chat.message", json!({ "text": "hi" })).await;
    assert_eq!(report.matched, 3);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(*received.lock().unwrap(), vec![json!({ "text": "hi" })]);

    let stats = runtime.bus().stats().await;
    assert_eq!(stats.failed, 2);
}

#[tokio::test]
async fn test_emit_without_subscribers() {
    let harness = Harness::new();
    let runtime = harness.runtime();
    let report = runtime.publish("nobody.listens", json!(null)).await;
    assert_eq!(report.matched, 0);
    assert_eq!(report.delivered, 0);
    assert_eq!(runtime.bus().stats().await.published, 1);
}

#[tokio::test]
async fn test_storage_isolated_per_module() {
    let harness = Harness::new()
        .module("a", json!({ "name": "a", "version": "1.0.0" }))
        .module("b", json!({ "name": "b", "version": "1.0.0" }));
    let runtime = harness.runtime();
    runtime.start().await.unwrap();

    assert_eq!(runtime.storage_get("a", "owner").await.unwrap(), Some(json!("a")));
    assert_eq!(runtime.storage_get("b", "owner").await.unwrap(), Some(json!("b")));

    let scoped = runtime.storage().scoped("a");
    assert!(scoped.save("../b/owner", &"intruder").await.is_err());
    assert_eq!(runtime.storage_get("b", "owner").await.unwrap(), Some(json!("b")));

    // 存储在模块卸载后仍然保留
    runtime.stop().await.unwrap();
    assert_eq!(runtime.storage_get("a", "owner").await.unwrap(), Some(json!("a")));
}
