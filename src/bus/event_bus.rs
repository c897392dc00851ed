//! 事件总线
//!
//! 提供模块间的松耦合通信机制。
//!
//! # 主要功能
//!
//! - **事件订阅**: 按主题订阅，支持 `*` 与 `prefix.*` 通配符
//! - **顺序投递**: 在调用方任务上按订阅顺序逐个投递，每个订阅者收到独立副本
//! - **订阅者隔离**: 单个订阅者返回错误、panic 或超时不影响后续订阅者
//! - **按模块清理**: 模块禁用时一次性移除其全部订阅
//!
//! # 并发约定
//!
//! 投递前在读锁下复制匹配的订阅快照，随即释放锁。订阅者在处理过程中
//! 订阅或取消订阅不会影响本次投递，也不会造成死锁。
//!
//! # 使用示例
//!
//! ```ignore
//! use forge_core::bus::{handler, EventBus};
//!
//! let bus = EventBus::new();
//! let id = bus
//!     .subscribe("my_module", "user.*", handler(|event| {
//!         println!("收到事件: {}", event.topic);
//!         Ok(())
//!     }))
//!     .await;
//!
//! bus.emit("user.login", serde_json::json!({"user_id": "123"})).await;
//! bus.unsubscribe(id).await?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::bus::event::{system_events, topic_matches, Event};
use crate::utils::{CoreError, Result};

/// 事件处理函数类型
///
/// 处理函数接收事件副本，返回的 future 在发布方任务上被依次等待。
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 将同步闭包包装为处理函数
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(Event) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(move |event| future::ready(f(event)).boxed())
}

/// 将异步闭包包装为处理函数
pub fn async_handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| f(event).boxed())
}

/// 订阅句柄
///
/// 全局单调递增，数值顺序即订阅顺序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// 内部订阅条目
#[derive(Clone)]
struct SubscriptionEntry {
    /// 订阅者模块名
    owner: String,

    /// 订阅的主题模式
    pattern: String,

    handler: EventHandler,

    #[allow(dead_code)]
    subscribed_at: DateTime<Utc>,
}

/// 订阅信息（对外展示）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub owner: String,
    pub pattern: String,
}

/// 分发统计信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    /// 发布的事件数
    pub published: u64,

    /// 成功投递次数
    pub delivered: u64,

    /// 处理失败次数（错误或 panic）
    pub failed: u64,

    /// 超时次数
    pub timeouts: u64,

    /// 最后分发时间
    pub last_dispatch_at: Option<DateTime<Utc>>,
}

/// 单次发布的投递结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// 匹配的订阅数
    pub matched: usize,
    /// 成功处理数
    pub delivered: usize,
    /// 失败数
    pub failed: usize,
    /// 超时数
    pub timed_out: usize,
}

/// 事件总线配置
#[derive(Debug, Clone, Default)]
pub struct EventBusConfig {
    /// 单个订阅者的处理超时；`None` 表示不限时
    pub handler_timeout: Option<Duration>,
}

enum DispatchResult {
    Success,
    Failed(String),
    Timeout,
}

/// 事件总线
///
/// 使用 `Arc<RwLock>` 保证线程安全，克隆后共享同一组订阅。
#[derive(Clone)]
pub struct EventBus {
    /// 订阅表：订阅 ID -> 条目（BTreeMap 保证按订阅顺序遍历）
    subscriptions: Arc<RwLock<BTreeMap<SubscriptionId, SubscriptionEntry>>>,

    next_id: Arc<AtomicU64>,

    /// 分发统计
    stats: Arc<RwLock<DispatchStats>>,

    config: EventBusConfig,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// 创建新的事件总线
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// 使用自定义配置创建事件总线
    ///
    /// # 参数
    ///
    /// * `config` - 事件总线配置
    pub fn with_config(config: EventBusConfig) -> Self {
        debug!(timeout = ?config.handler_timeout, "创建事件总线");
        Self {
            subscriptions: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            stats: Arc::new(RwLock::new(DispatchStats::default())),
            config,
        }
    }

    /// 订阅主题
    ///
    /// # 参数
    ///
    /// * `owner` - 订阅者模块名，用于按模块批量取消
    /// * `pattern` - 主题或通配模式（`*`、`prefix.*`）
    /// * `handler` - 处理函数
    ///
    /// # 返回
    ///
    /// 订阅句柄，用于后续取消订阅
    pub async fn subscribe(
        &self,
        owner: impl Into<String>,
        pattern: impl Into<String>,
        handler: EventHandler,
    ) -> SubscriptionId {
        let owner = owner.into();
        let pattern = pattern.into();
        let mut subscriptions = self.subscriptions.write().await;
        // 在写锁内分配编号，保证编号顺序与插入顺序一致
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));

        debug!(subscription = %id, owner = %owner, pattern = %pattern, "事件订阅成功");
        subscriptions.insert(
            id,
            SubscriptionEntry {
                owner,
                pattern,
                handler,
                subscribed_at: Utc::now(),
            },
        );
        id
    }

    /// 取消单个订阅
    ///
    /// # 错误
    ///
    /// 订阅不存在时返回 `CoreError::SubscriptionNotFound`
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let removed = self.subscriptions.write().await.remove(&id);
        match removed {
            Some(entry) => {
                debug!(subscription = %id, owner = %entry.owner, pattern = %entry.pattern, "取消订阅成功");
                Ok(())
            }
            None => Err(CoreError::SubscriptionNotFound(id.0)),
        }
    }

    /// 取消某个模块的全部订阅
    ///
    /// # 返回
    ///
    /// 取消的订阅数量
    pub async fn unsubscribe_all(&self, owner: &str) -> usize {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|_, entry| entry.owner != owner);
        let removed = before - subscriptions.len();
        if removed > 0 {
            debug!(owner = %owner, removed, "取消模块所有订阅");
        }
        removed
    }

    /// 以运行时身份发布事件
    pub async fn emit(&self, topic: impl Into<String>, payload: Value) -> DeliveryReport {
        self.publish(Event::new(topic, system_events::SENDER, payload)).await
    }

    /// 发布事件
    ///
    /// 在调用方任务上按订阅顺序依次投递。处理函数的错误、panic 与超时都会被
    /// 记录（带主题与订阅者模块名），随后继续投递给剩余订阅者。
    /// 没有订阅者时直接返回空报告。
    pub async fn publish(&self, event: Event) -> DeliveryReport {
        let snapshot: Vec<(SubscriptionId, SubscriptionEntry)> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .iter()
                .filter(|(_, entry)| topic_matches(&entry.pattern, &event.topic))
                .map(|(id, entry)| (*id, entry.clone()))
                .collect()
        };

        let mut report = DeliveryReport {
            matched: snapshot.len(),
            ..Default::default()
        };

        if snapshot.is_empty() {
            trace!(topic = %event.topic, sender = %event.sender, "没有匹配的订阅者");
            self.record(&report).await;
            return report;
        }

        trace!(
            event_id = %event.event_id,
            topic = %event.topic,
            sender = %event.sender,
            subscribers = snapshot.len(),
            "发布事件"
        );

        for (id, entry) in snapshot {
            match self.invoke(&entry.handler, event.clone()).await {
                DispatchResult::Success => report.delivered += 1,
                DispatchResult::Failed(message) => {
                    report.failed += 1;
                    error!(
                        topic = %event.topic,
                        owner = %entry.owner,
                        subscription = %id,
                        error = %message,
                        "事件处理失败"
                    );
                }
                DispatchResult::Timeout => {
                    report.timed_out += 1;
                    warn!(
                        topic = %event.topic,
                        owner = %entry.owner,
                        subscription = %id,
                        "事件处理超时"
                    );
                }
            }
        }

        self.record(&report).await;
        report
    }

    /// 调用处理函数，捕获错误、panic 与超时
    async fn invoke(&self, handler: &EventHandler, event: Event) -> DispatchResult {
        // 处理函数本身在构造 future 时也可能 panic
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(fut) => fut,
            Err(panic) => return DispatchResult::Failed(panic_message(panic)),
        };
        let guarded = AssertUnwindSafe(fut).catch_unwind();

        let outcome = match self.config.handler_timeout {
            Some(limit) => match timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => return DispatchResult::Timeout,
            },
            None => guarded.await,
        };

        match outcome {
            Ok(Ok(())) => DispatchResult::Success,
            Ok(Err(e)) => DispatchResult::Failed(format!("{:#}", e)),
            Err(panic) => DispatchResult::Failed(panic_message(panic)),
        }
    }

    async fn record(&self, report: &DeliveryReport) {
        let mut stats = self.stats.write().await;
        stats.published += 1;
        stats.delivered += report.delivered as u64;
        stats.failed += report.failed as u64;
        stats.timeouts += report.timed_out as u64;
        stats.last_dispatch_at = Some(Utc::now());
    }

    /// 当前订阅总数
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// 某个模块持有的订阅
    pub async fn subscriptions_of(&self, owner: &str) -> Vec<SubscriptionInfo> {
        self.subscriptions
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.owner == owner)
            .map(|(id, entry)| SubscriptionInfo {
                id: *id,
                owner: entry.owner.clone(),
                pattern: entry.pattern.clone(),
            })
            .collect()
    }

    /// 是否有订阅者会收到该主题
    pub async fn has_subscribers(&self, topic: &str) -> bool {
        self.subscriptions
            .read()
            .await
            .values()
            .any(|entry| topic_matches(&entry.pattern, topic))
    }

    /// 获取分发统计信息副本
    pub async fn stats(&self) -> DispatchStats {
        self.stats.read().await.clone()
    }

    /// 重置统计信息
    pub async fn reset_stats(&self) {
        *self.stats.write().await = DispatchStats::default();
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("处理函数 panic: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("处理函数 panic: {}", s)
    } else {
        "处理函数 panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> EventHandler {
        let log = log.clone();
        let tag = tag.to_string();
        handler(move |event| {
            log.lock().unwrap().push(format!("{}:{}", tag, event.topic));
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::new();
        let report = bus.emit("nobody.listens", json!(null)).await;
        assert_eq!(report, DeliveryReport::default());
        assert_eq!(bus.stats().await.published, 1);
    }

    #[tokio::test]
    async fn test_delivery_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("m1", "greet", recorder(&log, "first")).await;
        bus.subscribe("m2", "*", recorder(&log, "second")).await;
        bus.subscribe("m3", "greet", recorder(&log, "third")).await;

        let report = bus.emit("greet", json!("world")).await;
        assert_eq!(report.delivered, 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:greet", "second:greet", "third:greet"]
        );
    }

    #[tokio::test]
    async fn test_failing_and_panicking_handlers_are_isolated() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("bad", "t", handler(|_| anyhow::bail!("boom"))).await;
        bus.subscribe("worse", "t", handler(|_| panic!("kaboom"))).await;
        bus.subscribe("good", "t", recorder(&log, "good")).await;

        let report = bus.emit("t", json!({})).await;
        assert_eq!(report.matched, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(*log.lock().unwrap(), vec!["good:t"]);
        assert_eq!(bus.stats().await.failed, 2);
    }

    #[tokio::test]
    async fn test_each_subscriber_gets_a_copy() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(
            "mutator",
            "t",
            handler(|mut event| {
                event.payload["count"] = json!(999);
                Ok(())
            }),
        )
        .await;
        let seen_clone = seen.clone();
        bus.subscribe(
            "reader",
            "t",
            handler(move |event| {
                seen_clone.lock().unwrap().push(event.payload["count"].clone());
                Ok(())
            }),
        )
        .await;

        bus.emit("t", json!({"count": 1})).await;
        assert_eq!(*seen.lock().unwrap(), vec![json!(1)]);
    }

    #[tokio::test]
    async fn test_handler_can_unsubscribe_during_delivery() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let target: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let bus_clone = bus.clone();
        let target_clone = target.clone();
        let first = bus
            .subscribe(
                "m",
                "t",
                async_handler(move |_| {
                    let bus = bus_clone.clone();
                    let victim = target_clone.lock().unwrap().take();
                    async move {
                        if let Some(id) = victim {
                            bus.unsubscribe(id).await?;
                        }
                        bus.subscribe("m", "t", handler(|_| Ok(()))).await;
                        Ok::<(), anyhow::Error>(())
                    }
                }),
            )
            .await;
        let later = bus.subscribe("m", "t", recorder(&log, "later")).await;
        *target.lock().unwrap() = Some(later);

        // later 在快照中，即使已被取消，本次仍会收到；新订阅不在快照中
        let report = bus.emit("t", json!(1)).await;
        assert_eq!(report.matched, 2);
        assert_eq!(log.lock().unwrap().len(), 1);

        bus.unsubscribe(first).await.unwrap();
        let report = bus.emit("t", json!(2)).await;
        assert_eq!(report.matched, 1);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_all_and_unknown_id() {
        let bus = EventBus::new();
        bus.subscribe("a", "x", handler(|_| Ok(()))).await;
        bus.subscribe("a", "y.*", handler(|_| Ok(()))).await;
        let keep = bus.subscribe("b", "x", handler(|_| Ok(()))).await;

        assert_eq!(bus.subscriptions_of("a").await.len(), 2);
        assert_eq!(bus.unsubscribe_all("a").await, 2);
        assert_eq!(bus.subscription_count().await, 1);
        assert!(!bus.has_subscribers("y.z").await);

        bus.unsubscribe(keep).await.unwrap();
        assert!(matches!(
            bus.unsubscribe(keep).await,
            Err(CoreError::SubscriptionNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_emit_with_subscription_churn() {
        const EMITTERS: u64 = 4;
        const EVENTS: u64 = 50;

        let bus = EventBus::new();
        let counter = Arc::new(AtomicU64::new(0));
        let seen = counter.clone();
        bus.subscribe(
            "counter",
            "tick",
            handler(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .await;

        // 处理过程中自行订阅再取消
        let inner = bus.clone();
        bus.subscribe(
            "reentrant",
            "tick",
            async_handler(move |_| {
                let bus = inner.clone();
                async move {
                    let id = bus.subscribe("reentrant", "tock", handler(|_| Ok(()))).await;
                    bus.unsubscribe(id).await?;
                    Ok::<(), anyhow::Error>(())
                }
            }),
        )
        .await;

        let mut tasks = Vec::new();
        for _ in 0..EMITTERS {
            let bus = bus.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..EVENTS {
                    let report = bus.emit("tick", json!(i)).await;
                    assert_eq!(report.failed, 0);
                }
            }));
        }
        let churn = {
            let bus = bus.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    let id = bus.subscribe("churn", "tick", handler(|_| Ok(()))).await;
                    tokio::task::yield_now().await;
                    bus.unsubscribe(id).await.unwrap();
                }
            })
        };

        for task in tasks {
            task.await.unwrap();
        }
        churn.await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), EMITTERS * EVENTS);
        assert_eq!(bus.subscription_count().await, 2);
        assert!(bus.subscriptions_of("churn").await.is_empty());
        assert_eq!(bus.stats().await.published, EMITTERS * EVENTS);
    }

    #[tokio::test]
    async fn test_handler_timeout() {
        let bus = EventBus::with_config(EventBusConfig {
            handler_timeout: Some(Duration::from_millis(20)),
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(
            "slow",
            "t",
            async_handler(|_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), anyhow::Error>(())
            }),
        )
        .await;
        bus.subscribe("fast", "t", recorder(&log, "fast")).await;

        let report = bus.emit("t", json!(null)).await;
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(bus.stats().await.timeouts, 1);
    }
}
