//! 事件数据结构
//!
//! 事件信封在发布时创建，向每个订阅者投递的都是独立副本，
//! 订阅者之间不会共享可变数据。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 事件信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// 事件唯一标识
    pub event_id: String,

    /// 主题（推荐 `domain.name` 格式，如 `forge.module.loaded`）
    pub topic: String,

    /// 发布方（模块名，运行时自身为 `forge`）
    pub sender: String,

    /// 事件负载
    #[serde(default)]
    pub payload: Value,

    /// 发布时间
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// 创建新事件
    pub fn new(topic: impl Into<String>, sender: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            sender: sender.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// 主题模式匹配
///
/// - `*` 匹配所有主题
/// - `prefix.*` 匹配以 `prefix.` 开头的主题（不含 `prefix` 本身）
/// - 其他情况精确匹配
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return topic.len() > prefix.len() + 1
            && topic.starts_with(prefix)
            && topic.as_bytes()[prefix.len()] == b'.';
    }
    pattern == topic
}

/// 运行时发布的系统事件主题
pub mod system_events {
    /// 运行时自身作为发布方时使用的名字
    pub const SENDER: &str = "forge";

    /// 模块加载完成
    pub const MODULE_LOADED: &str = "forge.module.loaded";
    /// 模块已启用
    pub const MODULE_ENABLED: &str = "forge.module.enabled";
    /// 模块已禁用
    pub const MODULE_DISABLED: &str = "forge.module.disabled";
    /// 模块已卸载
    pub const MODULE_UNLOADED: &str = "forge.module.unloaded";
    /// 模块进入 failed 状态
    pub const MODULE_FAILED: &str = "forge.module.failed";
    /// 运行时启动完成
    pub const RUNTIME_STARTED: &str = "forge.runtime.started";
    /// 运行时已停止
    pub const RUNTIME_STOPPED: &str = "forge.runtime.stopped";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_creation() {
        let event = Event::new("greet", "basic_module", json!("world"));
        assert!(!event.event_id.is_empty());
        assert_eq!(event.topic, "greet");
        assert_eq!(event.payload, json!("world"));

        let other = Event::new("greet", "basic_module", json!("world"));
        assert_ne!(event.event_id, other.event_id);
    }

    #[test]
    fn test_topic_patterns() {
        assert!(topic_matches("*", "anything.at.all"));
        assert!(topic_matches("forge.*", "forge.module.loaded"));
        assert!(!topic_matches("forge.*", "forge"));
        assert!(!topic_matches("forge.*", "forgery.x"));
        assert!(topic_matches("greet", "greet"));
        assert!(!topic_matches("greet", "greeting"));
    }
}
