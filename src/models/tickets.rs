use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::ticket_balance_entity as balance_entity;

/// 单用户奖券余额明细
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketBreakdown {
    pub kick_username: String,
    pub watchtime_tickets: i64,
    pub gift_tickets: i64,
    pub wager_tickets: i64,
    pub bonus_tickets: i64,
    pub total_tickets: i64,
}

impl From<balance_entity::Model> for TicketBreakdown {
    fn from(m: balance_entity::Model) -> Self {
        TicketBreakdown {
            kick_username: m.kick_username,
            watchtime_tickets: m.watchtime_tickets,
            gift_tickets: m.gift_tickets,
            wager_tickets: m.wager_tickets,
            bonus_tickets: m.bonus_tickets,
            total_tickets: m.total_tickets,
        }
    }
}

/// 排行榜条目（按 total 降序，并列按入榜先后稳定排序）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub kick_username: String,
    pub total_tickets: i64,
}

/// 礼物事件路由结果
/// duplicate / not_linked / no_active_period 都是正常业务分支，不是错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum GiftOutcome {
    Awarded { tickets: i64 },
    Duplicate,
    NotLinked,
    NoActivePeriod,
}

/// 开奖结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawResult {
    pub period_id: i64,
    pub total_tickets: i64,
    pub total_participants: i64,
    pub winner_username: String,
    pub winner_discord_id: Option<i64>,
    pub winning_ticket: i64,
    pub win_probability: f64,
    pub drawn_at: DateTime<Utc>,
}

/// 开奖结局：无人持券的周期返回 NoParticipants（上报而非报错）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DrawOutcome {
    Winner(DrawResult),
    NoParticipants,
}
