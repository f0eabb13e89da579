//! Per-tenant in-memory session state and the stream liveness heuristic.
//!
//! One `TenantSession` exists per connected guild, created when the chat
//! client establishes its socket and discarded on disconnect. Nothing here
//! is persisted; the ledger is the durable record.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::LivenessConfig;

/// 单个租户的会话状态
#[derive(Debug, Clone, Default)]
pub struct TenantSession {
    /// 当前活跃观众: 用户名 -> 最后活动时间
    pub active_viewers: HashMap<String, DateTime<Utc>>,
    /// 近期发言人滚动窗口（活跃判定用）
    pub recent_chatters: HashMap<String, DateTime<Utc>>,
    /// 最后一次聊天活动时间
    pub last_activity_at: Option<DateTime<Utc>>,
    /// 人工强制视为直播中（外部运营操作设置）
    pub force_live: bool,
}

/// 活跃判定（纯函数）: 双因子启发式
/// 1. last_activity_at 距 now 不超过 window
/// 2. 窗口内不同发言人数 >= min_unique_chatters
/// 两者同时满足才算直播中；force_live 直接短路
/// 单个发言者（包括机器人操作者自己）无法在停播时刷取奖励
pub fn is_live_verdict(
    session: &TenantSession,
    now: DateTime<Utc>,
    window: Duration,
    min_unique_chatters: usize,
) -> bool {
    if session.force_live {
        return true;
    }
    let recent_activity = match session.last_activity_at {
        Some(at) => now.signed_duration_since(at) <= window,
        None => false,
    };
    if !recent_activity {
        return false;
    }
    let cutoff = now - window;
    let unique = session
        .recent_chatters
        .values()
        .filter(|at| **at >= cutoff)
        .count();
    unique >= min_unique_chatters
}

/// 租户会话注册表: guild_id -> TenantSession
/// 所有访问都通过 guild key，没有任何全局回退路径
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<i64, TenantSession>>>,
    liveness: Arc<LivenessConfig>,
}

impl SessionStore {
    pub fn new(liveness: LivenessConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            liveness: Arc::new(liveness),
        }
    }

    /// 连接建立时创建会话（若已存在则保留 force_live，其余清空）
    pub async fn open_session(&self, guild_id: i64) {
        let mut map = self.inner.write().await;
        let force_live = map.get(&guild_id).map(|s| s.force_live).unwrap_or(false);
        map.insert(
            guild_id,
            TenantSession {
                force_live,
                ..Default::default()
            },
        );
    }

    /// 断开时丢弃会话
    pub async fn close_session(&self, guild_id: i64) {
        self.inner.write().await.remove(&guild_id);
    }

    /// 记录一次聊天活动；last_activity_at 只向前推进
    pub async fn record_chat_activity(&self, guild_id: i64, username: &str, at: DateTime<Utc>) {
        let mut map = self.inner.write().await;
        let session = map.entry(guild_id).or_default();
        session
            .active_viewers
            .entry(username.to_string())
            .and_modify(|t| {
                if at > *t {
                    *t = at;
                }
            })
            .or_insert(at);
        session
            .recent_chatters
            .entry(username.to_string())
            .and_modify(|t| {
                if at > *t {
                    *t = at;
                }
            })
            .or_insert(at);
        match session.last_activity_at {
            Some(prev) if prev >= at => {}
            _ => session.last_activity_at = Some(at),
        }
    }

    /// 当前租户是否直播中（配置的窗口与人数阈值）
    pub async fn is_live(&self, guild_id: i64, now: DateTime<Utc>) -> bool {
        let map = self.inner.read().await;
        match map.get(&guild_id) {
            Some(session) => is_live_verdict(
                session,
                now,
                Duration::minutes(self.liveness.window_minutes),
                self.liveness.min_unique_chatters,
            ),
            None => false,
        }
    }

    pub async fn set_force_live(&self, guild_id: i64, value: bool) {
        let mut map = self.inner.write().await;
        map.entry(guild_id).or_default().force_live = value;
    }

    pub async fn force_live(&self, guild_id: i64) -> bool {
        self.inner
            .read()
            .await
            .get(&guild_id)
            .map(|s| s.force_live)
            .unwrap_or(false)
    }

    /// 取窗口内仍活跃的观众（观看时长结算用）
    pub async fn viewers_active_since(
        &self,
        guild_id: i64,
        since: DateTime<Utc>,
    ) -> Vec<String> {
        let map = self.inner.read().await;
        match map.get(&guild_id) {
            Some(session) => session
                .active_viewers
                .iter()
                .filter(|(_, at)| **at >= since)
                .map(|(name, _)| name.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// 已建立会话的租户列表
    pub async fn connected_guilds(&self) -> Vec<i64> {
        self.inner.read().await.keys().copied().collect()
    }

    /// 维护操作: 清理超过 2 倍窗口的发言人记录，限制内存占用
    pub async fn prune(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(self.liveness.window_minutes * 2);
        let mut map = self.inner.write().await;
        for session in map.values_mut() {
            session.recent_chatters.retain(|_, at| *at >= cutoff);
            session.active_viewers.retain(|_, at| *at >= cutoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, second).unwrap()
    }

    fn session_with(chatters: &[(&str, DateTime<Utc>)], last: Option<DateTime<Utc>>) -> TenantSession {
        TenantSession {
            recent_chatters: chatters
                .iter()
                .map(|(n, t)| (n.to_string(), *t))
                .collect(),
            last_activity_at: last,
            ..Default::default()
        }
    }

    #[test]
    fn test_live_requires_both_factors() {
        let now = at(10, 0);
        let window = Duration::minutes(5);

        // 两个发言人 + 近期活动 => 直播中
        let s = session_with(&[("a", at(8, 0)), ("b", at(9, 0))], Some(at(9, 0)));
        assert!(is_live_verdict(&s, now, window, 2));

        // 只有一个发言人 => 不算直播（单人无法刷奖励）
        let s = session_with(&[("a", at(9, 0))], Some(at(9, 0)));
        assert!(!is_live_verdict(&s, now, window, 2));

        // 发言人足够但活动过旧 => 不算直播
        let s = session_with(&[("a", at(1, 0)), ("b", at(2, 0))], Some(at(2, 0)));
        assert!(!is_live_verdict(&s, now, window, 2));
    }

    #[test]
    fn test_stale_chatters_outside_window_do_not_count() {
        let now = at(10, 0);
        let window = Duration::minutes(5);
        // b 的发言在窗口外，只剩 a 一人有效
        let s = session_with(&[("a", at(9, 0)), ("b", at(3, 0))], Some(at(9, 0)));
        assert!(!is_live_verdict(&s, now, window, 2));
    }

    #[test]
    fn test_force_live_overrides_heuristic() {
        let now = at(10, 0);
        let mut s = session_with(&[], None);
        s.force_live = true;
        assert!(is_live_verdict(&s, now, Duration::minutes(5), 2));
    }

    #[tokio::test]
    async fn test_last_activity_only_advances() {
        let store = SessionStore::new(LivenessConfig::default());
        store.open_session(42).await;
        store.record_chat_activity(42, "a", at(9, 0)).await;
        // 乱序到达的旧时间戳不应回退 last_activity_at
        store.record_chat_activity(42, "b", at(8, 0)).await;

        let map = store.inner.read().await;
        assert_eq!(map.get(&42).unwrap().last_activity_at, Some(at(9, 0)));
    }

    #[tokio::test]
    async fn test_prune_evicts_old_entries() {
        let store = SessionStore::new(LivenessConfig::default());
        store.open_session(1).await;
        store.record_chat_activity(1, "old", at(0, 0)).await;
        store.record_chat_activity(1, "new", at(12, 0)).await;
        // 窗口 5 分钟，清理阈值 2 倍窗口 = 10 分钟
        store.prune(at(15, 0)).await;

        let map = store.inner.read().await;
        let s = map.get(&1).unwrap();
        assert!(!s.recent_chatters.contains_key("old"));
        assert!(s.recent_chatters.contains_key("new"));
    }
}
