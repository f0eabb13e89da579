//! Presence-time accrual: converts watched minutes into raffle tickets.
//!
//! 结算任务按固定节拍跑全部租户。活跃判定不通过（且无人工覆盖）的
//! 租户整体跳过，停播时没有任何时长累计或发奖。

use crate::config::RewardsConfig;
use crate::entities::{watchtime_total_entity as watchtime, TicketSource};
use crate::error::AppResult;
use crate::services::{period_service::ticket_units, PeriodService, TicketService};
use crate::sessions::SessionStore;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set,
};

/// 本次应兑换的单位数与张数（纯函数，基线快照的正确性在此）
/// 返回 (当前累计单位, 应发张数)；current <= last_basis 时发 0
pub fn tickets_due(total_minutes: i64, minutes_per_ticket: i64, last_basis: i64) -> (i64, i64) {
    let units = ticket_units(total_minutes, minutes_per_ticket);
    (units, (units - last_basis).max(0))
}

#[derive(Clone)]
pub struct WatchtimeService {
    pool: DatabaseConnection,
    tickets: TicketService,
    periods: PeriodService,
    sessions: SessionStore,
    rewards: RewardsConfig,
}

impl WatchtimeService {
    pub fn new(
        pool: DatabaseConnection,
        tickets: TicketService,
        periods: PeriodService,
        sessions: SessionStore,
        rewards: RewardsConfig,
    ) -> Self {
        Self {
            pool,
            tickets,
            periods,
            sessions,
            rewards,
        }
    }

    /// 一次结算节拍，跑所有已连接租户；单租户失败不影响其它租户
    pub async fn run_accrual_tick(&self, now: DateTime<Utc>) {
        for guild_id in self.sessions.connected_guilds().await {
            if let Err(e) = self.accrue_guild(guild_id, now).await {
                log::error!("[guild {guild_id}] watchtime accrual failed: {e}");
            }
        }
    }

    /// 单租户结算
    ///
    /// 逻辑:
    /// 1. 活跃判定不通过则整体跳过（记日志，不发奖）
    /// 2. 给节拍窗口内活跃的每个观众累加在场分钟数
    /// 3. 求当前累计兑换单位，和已兑换基数取差
    /// 4. 幂等记录插入成功才发奖；单用户失败隔离，批次继续
    pub async fn accrue_guild(&self, guild_id: i64, now: DateTime<Utc>) -> AppResult<()> {
        if !self.sessions.is_live(guild_id, now).await {
            log::debug!("[guild {guild_id}] stream not live, skipping accrual");
            return Ok(());
        }

        let interval = self.rewards.accrual_interval_minutes as i64;
        let viewers = self
            .sessions
            .viewers_active_since(guild_id, now - Duration::minutes(interval))
            .await;
        if viewers.is_empty() {
            return Ok(());
        }

        let period = self.periods.active_period(guild_id).await?;

        for username in viewers {
            if let Err(e) = self
                .accrue_viewer(guild_id, &username, interval, period.as_ref().map(|p| p.id))
                .await
            {
                // 单个观众的失败不中断整批结算
                log::error!("[guild {guild_id}] accrual for {username} failed: {e}");
            }
        }
        Ok(())
    }

    async fn accrue_viewer(
        &self,
        guild_id: i64,
        username: &str,
        minutes: i64,
        period_id: Option<i64>,
    ) -> AppResult<()> {
        let total_minutes = self.add_minutes(guild_id, username, minutes).await?;

        let period_id = match period_id {
            Some(id) => id,
            // 没有活跃周期时只累计时长，不兑换
            None => return Ok(()),
        };

        let last_basis = self.tickets.last_converted_basis(period_id, username).await?;
        let (units, due) = tickets_due(total_minutes, self.rewards.minutes_per_ticket, last_basis);
        if due <= 0 {
            return Ok(());
        }

        // 幂等键 (period, user, basis)；插入失败说明这段时长已经兑换过
        let inserted = self
            .tickets
            .record_conversion(period_id, username, units, due)
            .await?;
        if !inserted {
            log::debug!(
                "[guild {guild_id}] conversion basis {units} for {username} already recorded"
            );
            return Ok(());
        }

        self.tickets
            .award(
                period_id,
                username,
                due,
                TicketSource::Watchtime,
                Some(format!("watchtime conversion up to {units} unit(s)")),
            )
            .await?;
        log::info!("[guild {guild_id}] {username} earned {due} ticket(s) from watchtime");
        Ok(())
    }

    /// 累加在场分钟数并返回最新累计值
    async fn add_minutes(&self, guild_id: i64, username: &str, minutes: i64) -> AppResult<i64> {
        let existing = watchtime::Entity::find()
            .filter(watchtime::Column::GuildId.eq(guild_id))
            .filter(watchtime::Column::KickUsername.eq(username))
            .one(&self.pool)
            .await?;

        match existing {
            Some(model) => {
                let new_total = model.total_minutes + minutes;
                let mut am = model.into_active_model();
                am.total_minutes = Set(new_total);
                am.updated_at = Set(Some(Utc::now()));
                am.update(&self.pool).await?;
                Ok(new_total)
            }
            None => {
                watchtime::ActiveModel {
                    guild_id: Set(guild_id),
                    kick_username: Set(username.to_string()),
                    total_minutes: Set(minutes),
                    ..Default::default()
                }
                .insert(&self.pool)
                .await?;
                Ok(minutes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tickets_due_basic() {
        // 95 分钟 / 10 分钟一张 = 9 单位；已兑换 4 => 发 5 张
        assert_eq!(tickets_due(95, 10, 4), (9, 5));
        assert_eq!(tickets_due(95, 10, 9), (9, 0));
    }

    #[test]
    fn test_baseline_snapshot_blocks_pre_period_time() {
        // 周期开始时基线 = 12 单位（120 分钟攒在周期前）
        // 紧接着的结算里累计仍是 120 分钟 => 0 张
        assert_eq!(tickets_due(120, 10, 12), (12, 0));
        // 周期内又看了 25 分钟 => 只有周期内的整单位发奖
        assert_eq!(tickets_due(145, 10, 12), (14, 2));
    }

    #[test]
    fn test_tickets_due_never_negative() {
        // 基数高于当前单位（比如配置调大）也不能发负数
        assert_eq!(tickets_due(50, 10, 99).1, 0);
    }
}
