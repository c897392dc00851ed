//! 基本使用示例
//!
//! 嵌入 Forge 运行时并接入两个模块：
//!
//! - `basic_module` 提供 `basic.service@1.0.0`，统计收到的问候
//! - `rpg_inventory` 依赖 `basic.service@^1.0`，把物品保存在自己的存储里
//!
//! 演示启动、事件发布、存储隔离、热插拔移除（依赖者先被拆除）与停止。
//!
//! # 运行示例
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use forge_core::{
    async_handler, handler, ForgeRuntime, Logger, LoggerConfig, ModuleContext, ModuleHooks,
    RuntimeConfig, StaticBinder,
};

/// 提供基础服务的模块
struct BasicModule;

#[async_trait]
impl ModuleHooks for BasicModule {
    async fn on_load(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        let storage = ctx.storage().clone();
        ctx.subscribe(
            "demo.greet",
            async_handler(move |event| {
                let storage = storage.clone();
                async move {
                    let count: u64 = storage.load("greetings", 0).await?;
                    storage.save("greetings", &(count + 1)).await?;
                    println!("   [basic_module] 收到问候: {}", event.payload);
                    Ok::<(), anyhow::Error>(())
                }
            }),
        )
        .await;
        Ok(())
    }
}

/// 依赖基础服务的背包模块
struct RpgInventory;

#[async_trait]
impl ModuleHooks for RpgInventory {
    async fn on_load(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        let provider = ctx.resolve("basic.service@^1.0").await?;
        println!(
            "   [rpg_inventory] 使用 {} 提供的 basic.service {}",
            provider.module, provider.version
        );
        Ok(())
    }

    async fn on_enable(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        let mut items: Vec<String> = ctx.storage().load("items", Vec::new()).await?;
        items.push("wooden sword".to_string());
        ctx.storage().save("items", &items).await?;
        ctx.emit("demo.greet", json!({ "from": ctx.name(), "items": items.len() })).await;
        Ok(())
    }

    async fn on_disable(&mut self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        println!("   [rpg_inventory] 背包已收起");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = Logger::try_init(LoggerConfig::builder().level("warn").build());
    println!("=== Forge 运行时基本使用示例 ===\n");

    // -------------------------------------------------------------------------
    // 1. 准备模块目录
    // -------------------------------------------------------------------------
    let workspace = TempDir::new()?;
    let module_dir = workspace.path().join("modules");
    for (dir, manifest) in [
        (
            "basic_module",
            json!({ "name": "basic_module", "version": "1.0.0", "provides": ["basic.service@1.0.0"] }),
        ),
        (
            "rpg_inventory",
            json!({
                "name": "rpg_inventory",
                "version": "0.3.0",
                "depends": ["basic_module"],
                "requires": ["basic.service@^1.0"]
            }),
        ),
    ] {
        std::fs::create_dir_all(module_dir.join(dir))?;
        std::fs::write(
            module_dir.join(dir).join("module.json"),
            serde_json::to_string_pretty(&manifest)?,
        )?;
    }
    println!("1. 模块目录: {}\n", module_dir.display());

    // -------------------------------------------------------------------------
    // 2. 创建并启动运行时
    // -------------------------------------------------------------------------
    let binder = StaticBinder::new()
        .register("basic_module", || Ok(Box::new(BasicModule)))
        .register("rpg_inventory", || Ok(Box::new(RpgInventory)));
    let config = RuntimeConfig::builder().module_dir(&module_dir).build();
    let runtime = Arc::new(ForgeRuntime::new(config, Arc::new(binder)));

    runtime
        .bus()
        .subscribe(
            "demo.observer",
            "forge.module.*",
            handler(|event| {
                println!("   [事件] {} -> {}", event.topic, event.payload["module"]);
                Ok(())
            }),
        )
        .await;

    println!("2. 启动运行时...");
    let report = runtime.start().await?;
    println!("   ✅ 已加载 {} 个模块\n", report.loaded.len());

    // -------------------------------------------------------------------------
    // 3. 查询状态
    // -------------------------------------------------------------------------
    println!("3. 模块列表:");
    for module in runtime.list_modules().await {
        println!(
            "   - {} {} [{}] {:?}",
            module.name, module.version, module.state, module.capabilities
        );
    }
    println!("   依赖图: {:?}\n", runtime.dependency_graph().await);

    // -------------------------------------------------------------------------
    // 4. 发布事件与存储
    // -------------------------------------------------------------------------
    println!("4. 发布事件...");
    let delivery = runtime.publish("demo.greet", json!("hello from admin")).await;
    println!("   投递 {} 个处理函数", delivery.delivered);
    println!(
        "   basic_module/greetings = {:?}",
        runtime.storage_get("basic_module", "greetings").await?
    );
    println!(
        "   rpg_inventory/items = {:?}",
        runtime.storage_get("rpg_inventory", "items").await?
    );
    println!(
        "   basic_module/items = {:?} (存储按模块隔离)\n",
        runtime.storage_get("basic_module", "items").await?
    );

    // -------------------------------------------------------------------------
    // 5. 热插拔移除：依赖者先被禁用和卸载
    // -------------------------------------------------------------------------
    println!("5. 移除 basic_module...");
    let removed = runtime.remove("basic_module").await?;
    println!("   移除顺序: {:?}\n", removed);

    // -------------------------------------------------------------------------
    // 6. 停止
    // -------------------------------------------------------------------------
    println!("6. 停止运行时...");
    runtime.stop().await?;
    println!("   ✅ 运行时已停止");

    Ok(())
}
