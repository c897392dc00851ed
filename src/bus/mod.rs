//! 事件总线模块
//!
//! 包含模块间消息通信的核心组件：
//! - 事件信封与系统主题
//! - 发布/订阅事件总线

pub mod event;
pub mod event_bus;

// 重导出常用类型
pub use event::{system_events, topic_matches, Event};
pub use event_bus::{
    async_handler, handler, DeliveryReport, DispatchStats, EventBus, EventBusConfig, EventHandler,
    SubscriptionId, SubscriptionInfo,
};
