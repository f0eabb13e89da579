//! Classification and dispatch of normalized chat-stream events.
//!
//! 礼物事件带三层幂等/分支保护：事件日志唯一键（重放）、账号绑定
//! （未绑定记录但零发放）、活跃周期（无周期不发放）。三者都是正常
//! 业务结果，用 GiftOutcome 标签返回，调用方按状态分支而不是捕获异常。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::config::RewardsConfig;
use crate::entities::{linked_account_entity as links, TicketSource};
use crate::error::AppResult;
use crate::models::{ChatMessageEvent, GiftSubscriptionEvent, GiftOutcome, NormalizedEvent, TenantEvent};
use crate::services::{PeriodService, TicketService};

/// 聊天回发能力；由宿主注入，核心与测试都不依赖真实网络
#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send_chat(&self, guild_id: i64, message: &str) -> AppResult<()>;
}

/// 丢弃所有消息的空实现（测试 / 未配置回发时）
pub struct NullChatSender;

#[async_trait]
impl ChatSender for NullChatSender {
    async fn send_chat(&self, _guild_id: i64, _message: &str) -> AppResult<()> {
        Ok(())
    }
}

/// 每 (guild, user) 的冷却闸门；允许通过时推进冷却时钟
#[derive(Default)]
pub struct CooldownGate {
    last_allowed: Mutex<HashMap<(i64, String), DateTime<Utc>>>,
}

impl CooldownGate {
    pub async fn allow(
        &self,
        guild_id: i64,
        username: &str,
        cooldown_seconds: i64,
        now: DateTime<Utc>,
    ) -> bool {
        let mut map = self.last_allowed.lock().await;
        let key = (guild_id, username.to_string());
        match map.get(&key) {
            Some(last) if now.signed_duration_since(*last) < Duration::seconds(cooldown_seconds) => {
                false
            }
            _ => {
                map.insert(key, now);
                true
            }
        }
    }
}

#[derive(Clone)]
pub struct EventRouter {
    pool: DatabaseConnection,
    tickets: TicketService,
    periods: PeriodService,
    sender: Arc<dyn ChatSender>,
    cooldowns: Arc<CooldownGate>,
    rewards: RewardsConfig,
}

impl EventRouter {
    pub fn new(
        pool: DatabaseConnection,
        tickets: TicketService,
        periods: PeriodService,
        sender: Arc<dyn ChatSender>,
        rewards: RewardsConfig,
    ) -> Self {
        Self {
            pool,
            tickets,
            periods,
            sender,
            cooldowns: Arc::new(CooldownGate::default()),
            rewards,
        }
    }

    /// 路由消费循环：吃掉有界队列里的事件直到所有生产者退出
    pub async fn run(self, mut rx: mpsc::Receiver<TenantEvent>) {
        while let Some(TenantEvent { guild_id, event }) = rx.recv().await {
            match event {
                NormalizedEvent::ChatMessage(chat) => {
                    self.handle_chat(guild_id, chat).await;
                }
                NormalizedEvent::GiftSubscription(gift) => {
                    match self.handle_gift(guild_id, &gift).await {
                        Ok(outcome) => log_gift_outcome(guild_id, &gift, &outcome),
                        Err(e) => {
                            // 单个事件失败不影响循环
                            log::error!("[guild {guild_id}] gift routing failed: {e}");
                        }
                    }
                }
                NormalizedEvent::Heartbeat => {}
            }
        }
        log::info!("event router stopped");
    }

    /// 礼物订阅处理
    ///
    /// 逻辑:
    /// 1. 查赠礼人绑定与活跃周期
    /// 2. 写事件日志占住幂等键（实发张数先记 0）；
    ///    (guild, event_id) 冲突 => 重放，直接返回 Duplicate
    /// 3. 未绑定 / 无周期时日志留痕但零发放
    /// 4. 正常路径经账本发放 source=gift 的奖券，落账后把实发
    ///    张数回写进事件日志，再在聊天里答谢。发放失败时日志
    ///    保持 0 张，审计不会虚报。
    pub async fn handle_gift(
        &self,
        guild_id: i64,
        gift: &GiftSubscriptionEvent,
    ) -> AppResult<GiftOutcome> {
        let link = links::Entity::find()
            .filter(links::Column::GuildId.eq(guild_id))
            .filter(links::Column::KickUsername.eq(gift.gifter_username.clone()))
            .one(&self.pool)
            .await?;
        let period = self.periods.active_period(guild_id).await?;
        let linked = link.is_some();

        // 幂等闸门: 事件日志的唯一键插入失败即为重放
        let inserted = self
            .tickets
            .record_gift_event(
                guild_id,
                &gift.event_id,
                &gift.gifter_username,
                gift.recipient_count,
                linked,
                period.as_ref().map(|p| p.id),
            )
            .await?;
        if let Some(outcome) = gift_gate(inserted, linked, period.is_some()) {
            return Ok(outcome);
        }
        let period = match period {
            Some(p) => p,
            None => return Ok(GiftOutcome::NoActivePeriod),
        };

        let tickets = i64::from(gift.recipient_count) * self.rewards.tickets_per_gift;
        self.tickets
            .award(
                period.id,
                &gift.gifter_username,
                tickets,
                TicketSource::Gift,
                Some(format!(
                    "gifted {} subscription(s), event {}",
                    gift.recipient_count, gift.event_id
                )),
            )
            .await?;
        if let Err(e) = self
            .tickets
            .mark_gift_awarded(guild_id, &gift.event_id, tickets)
            .await
        {
            // 发放已落账且有流水；回写失败只影响事件日志的张数字段
            log::warn!(
                "[guild {guild_id}] failed to record awarded tickets on gift event {}: {e}",
                gift.event_id
            );
        }

        let thanks = format!(
            "{} gifted {} sub(s) and earned {} raffle tickets!",
            gift.gifter_username, gift.recipient_count, tickets
        );
        if let Err(e) = self.sender.send_chat(guild_id, &thanks).await {
            log::warn!("[guild {guild_id}] failed to send gift acknowledgement: {e}");
        }

        Ok(GiftOutcome::Awarded { tickets })
    }

    /// 聊天消息: 会话状态已在摄入层更新，这里只做下游请求的冷却闸门。
    /// 以 '!' 开头的消息视为下游请求（点播类），冷却内的直接丢弃。
    async fn handle_chat(&self, guild_id: i64, chat: ChatMessageEvent) {
        if !chat.content.starts_with('!') {
            return;
        }
        let allowed = self
            .cooldowns
            .allow(
                guild_id,
                &chat.username,
                self.rewards.chat_cooldown_seconds,
                Utc::now(),
            )
            .await;
        if allowed {
            log::debug!(
                "[guild {guild_id}] forwarding request from {}: {}",
                chat.username,
                chat.content
            );
        } else {
            log::debug!(
                "[guild {guild_id}] request from {} suppressed by cooldown",
                chat.username
            );
        }
    }
}

/// 事件日志闸门之后的礼物分支；None 表示继续走发放路径。
/// 重放优先于一切：重放事件绝不发放，也不重复留痕
fn gift_gate(inserted: bool, linked: bool, has_period: bool) -> Option<GiftOutcome> {
    if !inserted {
        return Some(GiftOutcome::Duplicate);
    }
    if !linked {
        return Some(GiftOutcome::NotLinked);
    }
    if !has_period {
        return Some(GiftOutcome::NoActivePeriod);
    }
    None
}

fn log_gift_outcome(guild_id: i64, gift: &GiftSubscriptionEvent, outcome: &GiftOutcome) {
    match outcome {
        GiftOutcome::Awarded { tickets } => log::info!(
            "[guild {guild_id}] {} awarded {tickets} tickets for {} gifted sub(s)",
            gift.gifter_username,
            gift.recipient_count
        ),
        GiftOutcome::Duplicate => log::info!(
            "[guild {guild_id}] duplicate gift event {} ignored",
            gift.event_id
        ),
        GiftOutcome::NotLinked => log::info!(
            "[guild {guild_id}] gifter {} is not linked, gift logged without award",
            gift.gifter_username
        ),
        GiftOutcome::NoActivePeriod => log::info!(
            "[guild {guild_id}] no active raffle period, gift logged without award"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, second).unwrap()
    }

    #[test]
    fn test_gift_gate_replay_always_wins() {
        // 重放判定不受绑定/周期状态影响
        assert_eq!(gift_gate(false, true, true), Some(GiftOutcome::Duplicate));
        assert_eq!(gift_gate(false, false, true), Some(GiftOutcome::Duplicate));
        assert_eq!(gift_gate(false, true, false), Some(GiftOutcome::Duplicate));
        assert_eq!(gift_gate(false, false, false), Some(GiftOutcome::Duplicate));
    }

    #[test]
    fn test_gift_gate_zero_award_branches() {
        assert_eq!(gift_gate(true, false, true), Some(GiftOutcome::NotLinked));
        assert_eq!(gift_gate(true, false, false), Some(GiftOutcome::NotLinked));
        assert_eq!(
            gift_gate(true, true, false),
            Some(GiftOutcome::NoActivePeriod)
        );
    }

    #[test]
    fn test_gift_gate_passes_through_to_award() {
        assert_eq!(gift_gate(true, true, true), None);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_within_window() {
        let gate = CooldownGate::default();
        assert!(gate.allow(1, "alice", 30, at(0)).await);
        assert!(!gate.allow(1, "alice", 30, at(10)).await);
        assert!(gate.allow(1, "alice", 30, at(30)).await);
    }

    #[tokio::test]
    async fn test_cooldown_is_per_guild_and_user() {
        let gate = CooldownGate::default();
        assert!(gate.allow(1, "alice", 30, at(0)).await);
        // 其它用户与其它 guild 不受影响
        assert!(gate.allow(1, "bob", 30, at(1)).await);
        assert!(gate.allow(2, "alice", 30, at(1)).await);
    }

    #[tokio::test]
    async fn test_cooldown_advances_only_on_allowed_calls() {
        let gate = CooldownGate::default();
        assert!(gate.allow(1, "alice", 30, at(0)).await);
        // 被拒绝的调用不能顺延冷却窗口
        assert!(!gate.allow(1, "alice", 30, at(29)).await);
        assert!(gate.allow(1, "alice", 30, at(31)).await);
    }
}
