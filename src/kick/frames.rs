//! Wire-frame parsing and classification for the Kick pub/sub socket.
//!
//! 上游平台的事件类型标注并不一致：有的礼物事件带显式 type 标签，
//! 有的只能靠载荷字段推断。`classify` 按固定优先级处理：
//! 1. 协议层事件（conn:established / ping）
//! 2. 显式事件类型标签
//! 3. 礼物字段集启发式（gifter_username / gift_count / months / usernames）
//! 未识别的帧归为 Unknown，由调用方计数丢弃，绝不中断连接。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{ChatMessageEvent, GiftSubscriptionEvent};

/// 原始帧信封；data 可能是对象，也可能是需要二次解码的 JSON 字符串
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// data 字段统一展开为对象（字符串载荷做第二次解码）
    pub fn data_object(&self) -> Option<Value> {
        match &self.data {
            Value::String(s) => serde_json::from_str(s).ok(),
            Value::Object(_) => Some(self.data.clone()),
            _ => None,
        }
    }
}

/// 分类结果
#[derive(Debug, Clone)]
pub enum Frame {
    ConnEstablished { socket_id: String },
    Ping,
    Chat(ChatMessageEvent),
    Gift(GiftSubscriptionEvent),
    Unknown,
}

/// 显式礼物/订阅事件标签
const GIFT_EVENT_TAGS: &[&str] = &["GiftedSubscriptionsEvent", "SubscriptionEvent"];

/// 启发式识别用的礼物字段集
const GIFT_HINT_FIELDS: &[&str] = &["gifter_username", "gift_count", "months", "usernames"];

pub fn classify(envelope: &Envelope, now: DateTime<Utc>) -> Frame {
    // 协议层事件优先
    if envelope.event == "conn:established" {
        let socket_id = envelope
            .data_object()
            .and_then(|d| d.get("socket_id").and_then(|v| v.as_str().map(String::from)))
            .unwrap_or_default();
        return Frame::ConnEstablished { socket_id };
    }
    if envelope.event == "ping" {
        return Frame::Ping;
    }

    let data = match envelope.data_object() {
        Some(d) => d,
        None => return Frame::Unknown,
    };

    if envelope.event.ends_with("ChatMessageEvent") {
        return match parse_chat(&data, now) {
            Some(chat) => Frame::Chat(chat),
            None => Frame::Unknown,
        };
    }

    // 显式标签其次，字段集启发式兜底
    let tagged = GIFT_EVENT_TAGS.iter().any(|t| envelope.event.ends_with(t));
    let hinted = GIFT_HINT_FIELDS.iter().any(|f| data.get(*f).is_some());
    if tagged || hinted {
        return match parse_gift(&data) {
            Some(gift) => Frame::Gift(gift),
            None => Frame::Unknown,
        };
    }

    Frame::Unknown
}

fn parse_chat(data: &Value, now: DateTime<Utc>) -> Option<ChatMessageEvent> {
    let username = data
        .get("sender")
        .and_then(|s| s.get("username"))
        .and_then(|v| v.as_str())?
        .to_string();
    let content = data.get("content").and_then(|v| v.as_str())?.to_string();
    let at = data
        .get("created_at")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        .unwrap_or(now);
    Some(ChatMessageEvent { username, content, at })
}

fn parse_gift(data: &Value) -> Option<GiftSubscriptionEvent> {
    let gifter_username = data
        .get("gifter_username")
        .or_else(|| data.get("username"))
        .and_then(|v| v.as_str())?
        .to_string();

    // 接收人数: gift_count 优先，其次 usernames 列表长度，再退化为 1
    let recipient_count = data
        .get("gift_count")
        .and_then(|v| v.as_i64())
        .or_else(|| {
            data.get("usernames")
                .and_then(|v| v.as_array())
                .map(|a| a.len() as i64)
        })
        .unwrap_or(1)
        .max(1) as i32;

    // 上游可能不带事件 id；缺失时合成一个随机 id。
    // 合成 id 每次都不同，等于放弃对这类事件的去重（见 DESIGN.md 的取舍记录）。
    let event_id = data
        .get("id")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| format!("synthetic-{}", Uuid::new_v4()));

    Some(GiftSubscriptionEvent {
        gifter_username,
        recipient_count,
        event_id,
    })
}

// ---------- 出站帧 ----------

#[derive(Debug, Serialize)]
struct SubscribeData<'a> {
    auth: &'a str,
    channel: &'a str,
}

#[derive(Debug, Serialize)]
struct OutboundFrame<T> {
    event: &'static str,
    data: T,
}

pub fn subscribe_frame(channel: &str) -> String {
    serde_json::to_string(&OutboundFrame {
        event: "subscribe",
        data: SubscribeData { auth: "", channel },
    })
    .expect("static frame serializes")
}

pub fn chatroom_channel(chatroom_id: i64) -> String {
    format!("room.{chatroom_id}.v2")
}

pub fn platform_channel(channel_id: i64) -> String {
    format!("channel.{channel_id}")
}

pub fn ping_frame() -> String {
    "{\"event\":\"ping\"}".to_string()
}

pub fn pong_frame() -> String {
    "{\"event\":\"pong\"}".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_conn_established_extracts_socket_id() {
        let raw = r#"{"event":"conn:established","data":"{\"socket_id\":\"123.456\"}"}"#;
        let env = Envelope::parse(raw).unwrap();
        match classify(&env, now()) {
            Frame::ConnEstablished { socket_id } => assert_eq!(socket_id, "123.456"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_ping_frame_classified() {
        let env = Envelope::parse(r#"{"event":"ping"}"#).unwrap();
        assert!(matches!(classify(&env, now()), Frame::Ping));
    }

    #[test]
    fn test_chat_message_double_decode() {
        let raw = r#"{"event":"App\\Events\\ChatMessageEvent","data":"{\"sender\":{\"username\":\"alice\"},\"content\":\"hello\"}"}"#;
        let env = Envelope::parse(raw).unwrap();
        match classify(&env, now()) {
            Frame::Chat(chat) => {
                assert_eq!(chat.username, "alice");
                assert_eq!(chat.content, "hello");
                assert_eq!(chat.at, now());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_gift_by_explicit_tag() {
        let raw = r#"{"event":"App\\Events\\GiftedSubscriptionsEvent","data":"{\"gifter_username\":\"bob\",\"gift_count\":5,\"id\":\"evt-1\"}"}"#;
        let env = Envelope::parse(raw).unwrap();
        match classify(&env, now()) {
            Frame::Gift(gift) => {
                assert_eq!(gift.gifter_username, "bob");
                assert_eq!(gift.recipient_count, 5);
                assert_eq!(gift.event_id, "evt-1");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_gift_by_field_heuristic_with_unknown_tag() {
        // 标签未知但载荷带 usernames 字段，按礼物处理
        let raw = r#"{"event":"App\\Events\\WeirdNewEvent","data":{"username":"carol","usernames":["x","y","z"]}}"#;
        let env = Envelope::parse(raw).unwrap();
        match classify(&env, now()) {
            Frame::Gift(gift) => {
                assert_eq!(gift.gifter_username, "carol");
                assert_eq!(gift.recipient_count, 3);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_missing_event_id_synthesized_unique() {
        let raw = r#"{"event":"App\\Events\\SubscriptionEvent","data":{"username":"dave","months":3}}"#;
        let env = Envelope::parse(raw).unwrap();
        let a = match classify(&env, now()) {
            Frame::Gift(g) => g.event_id,
            other => panic!("unexpected frame: {other:?}"),
        };
        let b = match classify(&env, now()) {
            Frame::Gift(g) => g.event_id,
            other => panic!("unexpected frame: {other:?}"),
        };
        assert!(a.starts_with("synthetic-"));
        // 合成 id 互不相同，因此不会彼此去重
        assert_ne!(a, b);
    }

    #[test]
    fn test_unrecognized_event_is_unknown() {
        let raw = r#"{"event":"App\\Events\\PollUpdateEvent","data":{"title":"?"}}"#;
        let env = Envelope::parse(raw).unwrap();
        assert!(matches!(classify(&env, now()), Frame::Unknown));
    }

    #[test]
    fn test_subscribe_frame_shape() {
        let frame = subscribe_frame(&chatroom_channel(99));
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["event"], "subscribe");
        assert_eq!(v["data"]["auth"], "");
        assert_eq!(v["data"]["channel"], "room.99.v2");
    }
}
