//! Proportional raffle draw over the ticket ledger.
//!
//! 区间构造按余额行 id 稳定排序，可复现；中奖号码用操作系统熵源
//! （OsRng，CSPRNG）均匀抽取，不可预测、不可播种。

use crate::entities::{
    linked_account_entity as links, raffle_draw_entity as draws,
    raffle_period_entity as periods, ticket_balance_entity as balances, PeriodStatus,
};
use crate::error::{AppError, AppResult};
use crate::models::{DrawOutcome, DrawResult};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, Order,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};

/// 单个参与者占据的连续票号区间 [start, end]（含两端）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRange {
    pub kick_username: String,
    pub start: i64,
    pub end: i64,
}

/// 构造连续无缝的票号区间: 参与者 i 占据 [cum+1, cum+tickets_i]
pub fn build_ranges(participants: &[(String, i64)]) -> Vec<TicketRange> {
    let mut ranges = Vec::with_capacity(participants.len());
    let mut cumulative = 0i64;
    for (username, tickets) in participants {
        debug_assert!(*tickets > 0);
        ranges.push(TicketRange {
            kick_username: username.clone(),
            start: cumulative + 1,
            end: cumulative + tickets,
        });
        cumulative += tickets;
    }
    ranges
}

/// 定位中奖号码落在哪个区间
pub fn locate_winner(ranges: &[TicketRange], winning_ticket: i64) -> Option<&TicketRange> {
    ranges
        .iter()
        .find(|r| r.start <= winning_ticket && winning_ticket <= r.end)
}

/// 从 [1, total] 均匀抽取中奖号码（OsRng = 密码学安全随机源）
pub fn draw_winning_ticket(total_tickets: i64) -> i64 {
    debug_assert!(total_tickets > 0);
    OsRng.gen_range(1..=total_tickets)
}

#[derive(Clone)]
pub struct DrawService {
    pool: DatabaseConnection,
}

impl DrawService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    /// 开奖
    ///
    /// 逻辑:
    /// 1. 周期必须存在且未开过奖（Ended + 已有结果为终态）
    /// 2. 事务内读取 total > 0 的余额行（按行 id 稳定排序）构造区间
    /// 3. OsRng 抽取中奖号码并定位中奖者
    /// 4. 写入开奖结果并终结周期（唯一不可逆终结周期的写路径）
    /// 5. 无参与者返回 NoParticipants（业务结果，不是错误）
    pub async fn draw(
        &self,
        period_id: i64,
        drawn_by: Option<i64>,
        prize: Option<String>,
    ) -> AppResult<DrawOutcome> {
        let txn = self.pool.begin().await?;

        let period = periods::Entity::find_by_id(period_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("raffle period {period_id}")))?;

        if draws::Entity::find()
            .filter(draws::Column::PeriodId.eq(period_id))
            .one(&txn)
            .await?
            .is_some()
        {
            return Err(AppError::ValidationError(format!(
                "raffle period {period_id} has already been drawn"
            )));
        }

        let participants: Vec<(String, i64)> = balances::Entity::find()
            .filter(balances::Column::PeriodId.eq(period_id))
            .filter(balances::Column::TotalTickets.gt(0))
            .order_by(balances::Column::Id, Order::Asc)
            .all(&txn)
            .await?
            .into_iter()
            .map(|m| (m.kick_username, m.total_tickets))
            .collect();

        if participants.is_empty() {
            return Ok(DrawOutcome::NoParticipants);
        }

        let ranges = build_ranges(&participants);
        let total_tickets: i64 = participants.iter().map(|(_, t)| t).sum();
        let winning_ticket = draw_winning_ticket(total_tickets);
        let winner = locate_winner(&ranges, winning_ticket).ok_or_else(|| {
            // 区间连续无缝，走到这里说明构造逻辑被破坏
            AppError::InternalError(format!(
                "winning ticket {winning_ticket} outside built ranges (total {total_tickets})"
            ))
        })?;

        let winner_tickets = winner.end - winner.start + 1;
        let win_probability = winner_tickets as f64 / total_tickets as f64;

        let winner_discord_id = links::Entity::find()
            .filter(links::Column::GuildId.eq(period.guild_id))
            .filter(links::Column::KickUsername.eq(winner.kick_username.clone()))
            .one(&txn)
            .await?
            .map(|l| l.discord_user_id);

        let now = Utc::now();
        draws::ActiveModel {
            period_id: Set(period_id),
            total_tickets: Set(total_tickets),
            total_participants: Set(participants.len() as i64),
            winner_username: Set(winner.kick_username.clone()),
            winner_discord_id: Set(winner_discord_id),
            winning_ticket: Set(winning_ticket),
            win_probability: Set(win_probability),
            prize: Set(prize),
            drawn_by: Set(drawn_by),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        // 周期随开奖进入终态
        if period.status != PeriodStatus::Ended {
            let mut am = period.into_active_model();
            am.status = Set(PeriodStatus::Ended);
            am.ends_at = Set(Some(now));
            am.updated_at = Set(Some(now));
            am.update(&txn).await?;
        }

        txn.commit().await?;

        let result = DrawResult {
            period_id,
            total_tickets,
            total_participants: participants.len() as i64,
            winner_username: winner.kick_username.clone(),
            winner_discord_id,
            winning_ticket,
            win_probability,
            drawn_at: now,
        };
        log::info!(
            "[period {period_id}] draw complete: {} wins with ticket {winning_ticket}/{total_tickets}",
            result.winner_username
        );
        Ok(DrawOutcome::Winner(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn fixture() -> Vec<(String, i64)> {
        vec![
            ("a".to_string(), 10),
            ("b".to_string(), 25),
            ("c".to_string(), 65),
        ]
    }

    #[test]
    fn test_ranges_are_contiguous_and_gapless() {
        let ranges = build_ranges(&fixture());
        assert_eq!(ranges[0].start, 1);
        for pair in ranges.windows(2) {
            assert_eq!(pair[1].start, pair[0].end + 1);
        }
        assert_eq!(ranges.last().unwrap().end, 100);
    }

    #[test]
    fn test_winner_location_at_boundaries() {
        let ranges = build_ranges(&fixture());
        // a: [1,10], b: [11,35], c: [36,100]
        assert_eq!(locate_winner(&ranges, 10).unwrap().kick_username, "a");
        assert_eq!(locate_winner(&ranges, 11).unwrap().kick_username, "b");
        assert_eq!(locate_winner(&ranges, 42).unwrap().kick_username, "c");
        assert_eq!(locate_winner(&ranges, 1).unwrap().kick_username, "a");
        assert_eq!(locate_winner(&ranges, 100).unwrap().kick_username, "c");
        assert!(locate_winner(&ranges, 0).is_none());
        assert!(locate_winner(&ranges, 101).is_none());
    }

    #[test]
    fn test_single_participant_always_wins() {
        let ranges = build_ranges(&[("solo".to_string(), 7)]);
        for _ in 0..50 {
            let t = draw_winning_ticket(7);
            assert_eq!(locate_winner(&ranges, t).unwrap().kick_username, "solo");
        }
    }

    #[test]
    fn test_draw_distribution_is_proportional() {
        // 10 万次真实 CSPRNG 抽取，各参与者实际中奖率与票数占比偏差 < 2%
        let participants = fixture();
        let ranges = build_ranges(&participants);
        let total: i64 = participants.iter().map(|(_, t)| t).sum();
        let iterations = 100_000;

        let mut wins: HashMap<String, i64> = HashMap::new();
        for _ in 0..iterations {
            let t = draw_winning_ticket(total);
            let w = locate_winner(&ranges, t).unwrap();
            *wins.entry(w.kick_username.clone()).or_insert(0) += 1;
        }

        for (username, tickets) in &participants {
            let expected = *tickets as f64 / total as f64;
            let actual = *wins.get(username).unwrap_or(&0) as f64 / iterations as f64;
            assert!(
                (actual - expected).abs() < 0.02,
                "{username}: expected {expected:.3}, got {actual:.3}"
            );
        }
    }
}
