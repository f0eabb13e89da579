use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 协议客户端产出的标准化事件，交由事件路由消费
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NormalizedEvent {
    ChatMessage(ChatMessageEvent),
    GiftSubscription(GiftSubscriptionEvent),
    Heartbeat,
}

/// 聊天消息（只保留路由所需字段，不落库）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageEvent {
    pub username: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// 礼物订阅事件
/// event_id 缺失时由客户端合成（uuid），合成 id 不参与去重
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftSubscriptionEvent {
    pub gifter_username: String,
    pub recipient_count: i32,
    pub event_id: String,
}

/// 带租户标记的事件信封，经有界队列送往路由任务
#[derive(Debug, Clone)]
pub struct TenantEvent {
    pub guild_id: i64,
    pub event: NormalizedEvent,
}
