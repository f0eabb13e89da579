use crate::entities::{
    raffle_period_entity as periods, watchtime_conversion_entity as conversions,
    watchtime_total_entity as watchtime, PeriodStatus,
};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set, TransactionTrait,
};

/// 累计分钟数换算出的整数兑换单位（向下取整）
pub fn ticket_units(total_minutes: i64, minutes_per_ticket: i64) -> i64 {
    if minutes_per_ticket <= 0 {
        return 0;
    }
    total_minutes / minutes_per_ticket
}

/// 抽奖周期生命周期管理
/// 状态机: Active -> Ended（写入开奖结果后为终态）
/// 每个 guild 至多一条 Active（库层部分唯一索引 + 事务双保险）
#[derive(Clone)]
pub struct PeriodService {
    pool: DatabaseConnection,
    minutes_per_ticket: i64,
}

impl PeriodService {
    pub fn new(pool: DatabaseConnection, minutes_per_ticket: i64) -> Self {
        Self {
            pool,
            minutes_per_ticket,
        }
    }

    pub async fn active_period(&self, guild_id: i64) -> AppResult<Option<periods::Model>> {
        let model = periods::Entity::find()
            .filter(periods::Column::GuildId.eq(guild_id))
            .filter(periods::Column::Status.eq(PeriodStatus::Active))
            .one(&self.pool)
            .await?;
        Ok(model)
    }

    pub async fn get(&self, period_id: i64) -> AppResult<Option<periods::Model>> {
        Ok(periods::Entity::find_by_id(period_id).one(&self.pool).await?)
    }

    /// 开启新周期
    ///
    /// 逻辑:
    /// 1. 结束当前 Active 周期（若有）
    /// 2. 插入新的 Active 周期
    /// 3. 把每个用户当前的累计观看兑换单位快照成 0 张奖券的基线兑换记录，
    ///    周期开始前攒下的时长因此永远不会在新周期发奖
    pub async fn start_new_period(
        &self,
        guild_id: i64,
        created_by: Option<i64>,
        ends_at: Option<DateTime<Utc>>,
    ) -> AppResult<periods::Model> {
        let now = Utc::now();
        let txn = self.pool.begin().await?;

        if let Some(current) = periods::Entity::find()
            .filter(periods::Column::GuildId.eq(guild_id))
            .filter(periods::Column::Status.eq(PeriodStatus::Active))
            .one(&txn)
            .await?
        {
            let mut am = current.into_active_model();
            am.status = Set(PeriodStatus::Ended);
            am.ends_at = Set(Some(now));
            am.updated_at = Set(Some(now));
            am.update(&txn).await?;
        }

        let period = periods::ActiveModel {
            guild_id: Set(guild_id),
            starts_at: Set(now),
            ends_at: Set(ends_at),
            status: Set(PeriodStatus::Active),
            created_by: Set(created_by),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        // 基线快照: 现有累计时长全部标记为已兑换（0 张奖券）
        let totals = watchtime::Entity::find()
            .filter(watchtime::Column::GuildId.eq(guild_id))
            .all(&txn)
            .await?;
        let baselines: Vec<conversions::ActiveModel> = totals
            .into_iter()
            .filter_map(|t| {
                let units = ticket_units(t.total_minutes, self.minutes_per_ticket);
                if units <= 0 {
                    return None;
                }
                Some(conversions::ActiveModel {
                    period_id: Set(period.id),
                    kick_username: Set(t.kick_username),
                    basis_units: Set(units),
                    tickets_awarded: Set(0),
                    ..Default::default()
                })
            })
            .collect();
        if !baselines.is_empty() {
            conversions::Entity::insert_many(baselines)
                .on_conflict(
                    OnConflict::columns([
                        conversions::Column::PeriodId,
                        conversions::Column::KickUsername,
                        conversions::Column::BasisUnits,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;
        log::info!("[guild {guild_id}] started raffle period {}", period.id);
        Ok(period)
    }

    /// 结束某个周期（不开奖，仅停止累计）；开奖自身也会终结周期
    pub async fn end_period(&self, period_id: i64) -> AppResult<periods::Model> {
        let model = periods::Entity::find_by_id(period_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("raffle period {period_id}")))?;
        if model.status == PeriodStatus::Ended {
            return Ok(model);
        }
        let now = Utc::now();
        let mut am = model.into_active_model();
        am.status = Set(PeriodStatus::Ended);
        am.ends_at = Set(Some(now));
        am.updated_at = Set(Some(now));
        Ok(am.update(&self.pool).await?)
    }

    /// 定时巡检: 把 ends_at 已过的 Active 周期置为 Ended
    pub async fn end_expired_periods(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let expired = periods::Entity::find()
            .filter(periods::Column::Status.eq(PeriodStatus::Active))
            .filter(periods::Column::EndsAt.lte(now))
            .all(&self.pool)
            .await?;
        let count = expired.len();
        for model in expired {
            let id = model.id;
            let mut am = model.into_active_model();
            am.status = Set(PeriodStatus::Ended);
            am.updated_at = Set(Some(now));
            am.update(&self.pool).await?;
            log::info!("raffle period {id} expired and was closed");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_units_floors() {
        assert_eq!(ticket_units(0, 10), 0);
        assert_eq!(ticket_units(9, 10), 0);
        assert_eq!(ticket_units(10, 10), 1);
        assert_eq!(ticket_units(95, 10), 9);
    }

    #[test]
    fn test_ticket_units_guards_bad_config() {
        assert_eq!(ticket_units(100, 0), 0);
        assert_eq!(ticket_units(100, -5), 0);
    }
}
