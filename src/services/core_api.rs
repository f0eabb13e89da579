//! Narrow facade consumed by the external collaborators
//! (command front end, linking flow, admin dispatch).
//!
//! 这些是核心对外暴露的全部入口：发奖、记活动、查直播、开奖、查余额。
//! 外协模块不直接碰账本内部，也不共享任何内存锁。

use chrono::Utc;

use crate::entities::TicketSource;
use crate::error::{AppError, AppResult};
use crate::models::{DrawOutcome, TicketBreakdown};
use crate::services::{DrawService, PeriodService, TicketService};
use crate::sessions::SessionStore;

/// 租户隔离检查: 周期必须属于发起操作的 guild
fn ensure_period_owner(
    period: &crate::entities::raffle_period_entity::Model,
    guild_id: i64,
) -> AppResult<()> {
    if period.guild_id != guild_id {
        return Err(AppError::ValidationError(format!(
            "raffle period {} does not belong to guild {guild_id}",
            period.id
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CoreApi {
    tickets: TicketService,
    periods: PeriodService,
    draws: DrawService,
    sessions: SessionStore,
}

impl CoreApi {
    pub fn new(
        tickets: TicketService,
        periods: PeriodService,
        draws: DrawService,
        sessions: SessionStore,
    ) -> Self {
        Self {
            tickets,
            periods,
            draws,
            sessions,
        }
    }

    /// 给某租户当前活跃周期内的用户发奖券（手动加成 / 对外押注等来源）
    pub async fn award_tickets(
        &self,
        guild_id: i64,
        kick_username: &str,
        amount: i64,
        source: TicketSource,
        description: Option<String>,
    ) -> AppResult<TicketBreakdown> {
        let period = self
            .periods
            .active_period(guild_id)
            .await?
            .ok_or_else(|| {
                AppError::ValidationError(format!("guild {guild_id} has no active raffle period"))
            })?;
        self.tickets
            .award(period.id, kick_username, amount, source, description)
            .await
    }

    /// 记录一次聊天活动（外部命令面也能喂活跃信号）
    pub async fn record_chat_activity(&self, guild_id: i64, kick_username: &str) {
        self.sessions
            .record_chat_activity(guild_id, kick_username, Utc::now())
            .await;
    }

    pub async fn is_live(&self, guild_id: i64) -> bool {
        self.sessions.is_live(guild_id, Utc::now()).await
    }

    /// 管理操作: 开启新周期（自动结束旧周期并做基线快照）
    pub async fn start_new_period(
        &self,
        guild_id: i64,
        created_by: Option<i64>,
        ends_at: Option<chrono::DateTime<Utc>>,
    ) -> AppResult<crate::entities::raffle_period_entity::Model> {
        self.periods
            .start_new_period(guild_id, created_by, ends_at)
            .await
    }

    /// 管理操作: 提前结束周期（不开奖）。同样做周期归属检查。
    pub async fn end_period(
        &self,
        guild_id: i64,
        period_id: i64,
    ) -> AppResult<crate::entities::raffle_period_entity::Model> {
        let period = self
            .periods
            .get(period_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("raffle period {period_id}")))?;
        ensure_period_owner(&period, guild_id)?;
        self.periods.end_period(period_id).await
    }

    /// 开奖（不可逆终结周期）。周期归属必须匹配调用方租户，
    /// 跨租户的周期号一律拒绝。
    pub async fn run_draw(
        &self,
        guild_id: i64,
        period_id: i64,
        drawn_by: Option<i64>,
        prize: Option<String>,
    ) -> AppResult<DrawOutcome> {
        let period = self
            .periods
            .get(period_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("raffle period {period_id}")))?;
        ensure_period_owner(&period, guild_id)?;
        self.draws.draw(period_id, drawn_by, prize).await
    }

    /// 活跃周期排行榜（命令前端展示用）
    pub async fn leaderboard(
        &self,
        guild_id: i64,
        limit: u64,
    ) -> AppResult<Vec<crate::models::LeaderboardEntry>> {
        let period = match self.periods.active_period(guild_id).await? {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };
        self.tickets.leaderboard(period.id, limit).await
    }

    /// 查询用户在活跃周期的余额明细；无活跃周期或无记录返回 None
    pub async fn get_balance(
        &self,
        guild_id: i64,
        kick_username: &str,
    ) -> AppResult<Option<TicketBreakdown>> {
        let period = match self.periods.active_period(guild_id).await? {
            Some(p) => p,
            None => return Ok(None),
        };
        self.tickets.get_balance(period.id, kick_username).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::raffle_period_entity as periods;
    use crate::entities::PeriodStatus;

    fn period_of(guild_id: i64) -> periods::Model {
        periods::Model {
            id: 42,
            guild_id,
            starts_at: Utc::now(),
            ends_at: None,
            status: PeriodStatus::Active,
            created_by: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_period_owner_check_accepts_own_period() {
        assert!(ensure_period_owner(&period_of(1), 1).is_ok());
    }

    #[test]
    fn test_period_owner_check_rejects_foreign_period() {
        // 别的租户拿周期号也不能开奖 / 结束周期
        let err = ensure_period_owner(&period_of(1), 2).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }
}
