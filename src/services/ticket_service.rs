use crate::entities::{
    gift_event_entity as gifts, ticket_balance_entity as balances,
    ticket_transaction_entity as transactions, watchtime_conversion_entity as conversions,
    TicketSource,
};
use crate::error::{AppError, AppResult};
use crate::models::{LeaderboardEntry, TicketBreakdown};
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    IntoActiveModel, Order, QueryFilter, QueryOrder, QuerySelect, Select, Set, TransactionTrait,
    UpdateMany,
};

/// 按比例缩放各来源桶，使缩放后总和恰为 new_total
/// 整数除法的余数按桶的小数余量大小补齐（最大余数法），
/// 保证 total == sum(sources) 不变式在移除后依然成立
pub fn scale_buckets(buckets: [i64; 4], old_total: i64, new_total: i64) -> [i64; 4] {
    debug_assert!(old_total > 0 && new_total >= 0 && new_total <= old_total);
    if new_total == 0 {
        return [0; 4];
    }
    let mut scaled = [0i64; 4];
    let mut remainders: Vec<(usize, i64)> = Vec::with_capacity(4);
    let mut assigned = 0i64;
    for (i, b) in buckets.iter().enumerate() {
        let product = b * new_total;
        scaled[i] = product / old_total;
        remainders.push((i, product % old_total));
        assigned += scaled[i];
    }
    // 剩余的张数分给余数最大的桶（稳定: 余数相同按桶序）
    remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut leftover = new_total - assigned;
    let mut idx = 0;
    while leftover > 0 {
        let (i, _) = remainders[idx % remainders.len()];
        scaled[i] += 1;
        leftover -= 1;
        idx += 1;
    }
    scaled
}

fn bucket_column(source: TicketSource) -> balances::Column {
    match source {
        TicketSource::Watchtime => balances::Column::WatchtimeTickets,
        TicketSource::Gift => balances::Column::GiftTickets,
        TicketSource::Wager => balances::Column::WagerTickets,
        TicketSource::Bonus => balances::Column::BonusTickets,
    }
}

/// 余额行查询；加 FOR UPDATE 行锁，读-改-写必须走这条路
fn balance_for_update(period_id: i64, kick_username: &str) -> Select<balances::Entity> {
    balances::Entity::find()
        .filter(balances::Column::PeriodId.eq(period_id))
        .filter(balances::Column::KickUsername.eq(kick_username))
        .lock_exclusive()
}

/// 发放的原子累加语句: 桶与 total 同加一个增量，
/// 并发发放互不覆盖（行级递增，没有读-改-写窗口）
fn award_update(
    period_id: i64,
    kick_username: &str,
    source: TicketSource,
    amount: i64,
) -> UpdateMany<balances::Entity> {
    let bucket = bucket_column(source);
    balances::Entity::update_many()
        .col_expr(bucket, Expr::col(bucket).add(amount))
        .col_expr(
            balances::Column::TotalTickets,
            Expr::col(balances::Column::TotalTickets).add(amount),
        )
        .col_expr(balances::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(balances::Column::PeriodId.eq(period_id))
        .filter(balances::Column::KickUsername.eq(kick_username))
}

/// 奖券账本: 余额、流水与幂等记录的唯一事实来源
/// 所有变更都在单个事务内完成，total == sum(sources) 不可能被观察到违反
#[derive(Clone)]
pub struct TicketService {
    pool: DatabaseConnection,
}

impl TicketService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    /// 发放奖券
    ///
    /// 逻辑:
    /// 1. 校验 amount > 0
    /// 2. 事务内补建余额行（唯一键冲突视为已存在），
    ///    再用原子递增累加来源桶与 total；并发发放逐行排队，互不覆盖
    /// 3. 追加一条流水（审计日志）
    /// 4. 提交前校验 total 不变式，违反则回滚并上报内部错误
    ///
    /// 注意: 本方法不做任何内容去重；幂等性由调用方的
    /// 幂等键（礼物 event_id / 观看时长 basis）保证。
    pub async fn award(
        &self,
        period_id: i64,
        kick_username: &str,
        amount: i64,
        source: TicketSource,
        description: Option<String>,
    ) -> AppResult<TicketBreakdown> {
        if amount <= 0 {
            return Err(AppError::ValidationError(
                "Ticket amount to award must be positive".into(),
            ));
        }

        let txn = self.pool.begin().await?;
        self.ensure_balance_row(&txn, period_id, kick_username).await?;

        award_update(period_id, kick_username, source, amount)
            .exec(&txn)
            .await?;
        let updated = balances::Entity::find()
            .filter(balances::Column::PeriodId.eq(period_id))
            .filter(balances::Column::KickUsername.eq(kick_username))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                AppError::InternalError(format!(
                    "balance row vanished for (period {period_id}, user {kick_username})"
                ))
            })?;

        if updated.total_tickets != updated.source_sum() {
            // 不变式被破坏说明出现了并发写坏数据，回滚并当内部错误上报
            txn.rollback().await?;
            return Err(AppError::InternalError(format!(
                "ticket total invariant violated for (period {period_id}, user {kick_username})"
            )));
        }

        transactions::ActiveModel {
            period_id: Set(period_id),
            kick_username: Set(kick_username.to_string()),
            delta: Set(amount),
            source: Set(source),
            description: Set(description),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(updated.into())
    }

    /// 移除奖券；超出余额时收敛到 0（绝不为负），
    /// 各来源桶按 new_total/old_total 等比缩放以保持总和不变式。
    /// 缩放基于读到的整行，读取带 FOR UPDATE 锁以排队并发发放。
    pub async fn remove(
        &self,
        period_id: i64,
        kick_username: &str,
        amount: i64,
        reason: Option<String>,
    ) -> AppResult<Option<TicketBreakdown>> {
        if amount <= 0 {
            return Err(AppError::ValidationError(
                "Ticket amount to remove must be positive".into(),
            ));
        }

        let txn = self.pool.begin().await?;
        let model = match balance_for_update(period_id, kick_username).one(&txn).await? {
            Some(m) => m,
            None => return Ok(None),
        };

        let old_total = model.total_tickets;
        if old_total == 0 {
            return Ok(Some(model.into()));
        }
        let new_total = (old_total - amount).max(0);
        let removed = old_total - new_total;
        let scaled = scale_buckets(
            [
                model.watchtime_tickets,
                model.gift_tickets,
                model.wager_tickets,
                model.bonus_tickets,
            ],
            old_total,
            new_total,
        );

        let mut am = model.clone().into_active_model();
        am.watchtime_tickets = Set(scaled[0]);
        am.gift_tickets = Set(scaled[1]);
        am.wager_tickets = Set(scaled[2]);
        am.bonus_tickets = Set(scaled[3]);
        am.total_tickets = Set(new_total);
        am.updated_at = Set(Some(Utc::now()));
        let updated = am.update(&txn).await?;

        transactions::ActiveModel {
            period_id: Set(period_id),
            kick_username: Set(kick_username.to_string()),
            delta: Set(-removed),
            source: Set(TicketSource::Bonus),
            description: Set(reason),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(Some(updated.into()))
    }

    pub async fn get_balance(
        &self,
        period_id: i64,
        kick_username: &str,
    ) -> AppResult<Option<TicketBreakdown>> {
        let model = balances::Entity::find()
            .filter(balances::Column::PeriodId.eq(period_id))
            .filter(balances::Column::KickUsername.eq(kick_username))
            .one(&self.pool)
            .await?;
        Ok(model.map(Into::into))
    }

    /// 排行榜: total 降序，并列按行 id（入榜先后）稳定排序
    pub async fn leaderboard(
        &self,
        period_id: i64,
        limit: u64,
    ) -> AppResult<Vec<LeaderboardEntry>> {
        let rows = balances::Entity::find()
            .filter(balances::Column::PeriodId.eq(period_id))
            .filter(balances::Column::TotalTickets.gt(0))
            .order_by(balances::Column::TotalTickets, Order::Desc)
            .order_by(balances::Column::Id, Order::Asc)
            .limit(limit)
            .all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, m)| LeaderboardEntry {
                rank: i + 1,
                kick_username: m.kick_username,
                total_tickets: m.total_tickets,
            })
            .collect())
    }

    /// 开奖参与者: total > 0，按行 id 稳定排序（区间构造的可复现基准）
    pub async fn participants(&self, period_id: i64) -> AppResult<Vec<(String, i64)>> {
        let rows = balances::Entity::find()
            .filter(balances::Column::PeriodId.eq(period_id))
            .filter(balances::Column::TotalTickets.gt(0))
            .order_by(balances::Column::Id, Order::Asc)
            .all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|m| (m.kick_username, m.total_tickets))
            .collect())
    }

    // -----------------------------
    // 幂等记录
    // -----------------------------

    /// 礼物事件日志写入；(guild_id, kick_event_id) 冲突返回 false（重放）。
    /// 实发张数固定先记 0，发放落账后由 mark_gift_awarded 回写
    pub async fn record_gift_event(
        &self,
        guild_id: i64,
        event_id: &str,
        gifter_username: &str,
        recipient_count: i32,
        linked: bool,
        period_id: Option<i64>,
    ) -> AppResult<bool> {
        let am = gifts::ActiveModel {
            guild_id: Set(guild_id),
            kick_event_id: Set(event_id.to_string()),
            gifter_username: Set(gifter_username.to_string()),
            recipient_count: Set(recipient_count),
            linked: Set(linked),
            tickets_awarded: Set(0),
            period_id: Set(period_id),
            ..Default::default()
        };
        let insert = gifts::Entity::insert(am)
            .on_conflict(
                OnConflict::columns([gifts::Column::GuildId, gifts::Column::KickEventId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&self.pool)
            .await;
        match insert {
            Ok(_) => Ok(true),
            Err(DbErr::RecordNotInserted) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// 发放落账后把实发张数回写进礼物事件日志。
    /// 日志先以 0 张入库占住幂等键，发放失败时记录保持真实。
    pub async fn mark_gift_awarded(
        &self,
        guild_id: i64,
        event_id: &str,
        tickets_awarded: i64,
    ) -> AppResult<()> {
        gifts::Entity::update_many()
            .col_expr(
                gifts::Column::TicketsAwarded,
                Expr::value(tickets_awarded),
            )
            .filter(gifts::Column::GuildId.eq(guild_id))
            .filter(gifts::Column::KickEventId.eq(event_id))
            .exec(&self.pool)
            .await?;
        Ok(())
    }

    /// 观看时长兑换记录；唯一键冲突返回 false，这是结算任务唯一的防重闸门
    pub async fn record_conversion(
        &self,
        period_id: i64,
        kick_username: &str,
        basis_units: i64,
        tickets_awarded: i64,
    ) -> AppResult<bool> {
        let am = conversions::ActiveModel {
            period_id: Set(period_id),
            kick_username: Set(kick_username.to_string()),
            basis_units: Set(basis_units),
            tickets_awarded: Set(tickets_awarded),
            ..Default::default()
        };
        let insert = conversions::Entity::insert(am)
            .on_conflict(
                OnConflict::columns([
                    conversions::Column::PeriodId,
                    conversions::Column::KickUsername,
                    conversions::Column::BasisUnits,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec(&self.pool)
            .await;
        match insert {
            Ok(_) => Ok(true),
            Err(DbErr::RecordNotInserted) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// 某用户在周期内已兑换到的最大基数（无记录视为 0）
    pub async fn last_converted_basis(
        &self,
        period_id: i64,
        kick_username: &str,
    ) -> AppResult<i64> {
        let latest = conversions::Entity::find()
            .filter(conversions::Column::PeriodId.eq(period_id))
            .filter(conversions::Column::KickUsername.eq(kick_username))
            .order_by(conversions::Column::BasisUnits, Order::Desc)
            .one(&self.pool)
            .await?;
        Ok(latest.map(|m| m.basis_units).unwrap_or(0))
    }

    /// 补建零余额行；(period, user) 唯一键冲突说明行已存在，并发补建安全
    async fn ensure_balance_row(
        &self,
        txn: &DatabaseTransaction,
        period_id: i64,
        kick_username: &str,
    ) -> Result<(), DbErr> {
        let am = balances::ActiveModel {
            period_id: Set(period_id),
            kick_username: Set(kick_username.to_string()),
            watchtime_tickets: Set(0),
            gift_tickets: Set(0),
            wager_tickets: Set(0),
            bonus_tickets: Set(0),
            total_tickets: Set(0),
            ..Default::default()
        };
        let insert = balances::Entity::insert(am)
            .on_conflict(
                OnConflict::columns([
                    balances::Column::PeriodId,
                    balances::Column::KickUsername,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec(txn)
            .await;
        match insert {
            Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use sea_orm::{DbBackend, QueryTrait};

    #[test]
    fn test_award_update_is_atomic_increment() {
        // 并发发放依赖数据库端的列自增，语句里不允许出现绝对值赋值
        let stmt = award_update(7, "alice", TicketSource::Gift, 3).build(DbBackend::Postgres);
        assert!(stmt.sql.contains(r#""gift_tickets" = "gift_tickets" +"#));
        assert!(stmt.sql.contains(r#""total_tickets" = "total_tickets" +"#));
    }

    #[test]
    fn test_award_update_targets_selected_bucket() {
        let stmt =
            award_update(7, "alice", TicketSource::Watchtime, 5).build(DbBackend::Postgres);
        assert!(stmt.sql.contains(r#""watchtime_tickets" = "watchtime_tickets" +"#));
        assert!(!stmt.sql.contains(r#""gift_tickets""#));
    }

    #[test]
    fn test_balance_read_for_removal_takes_row_lock() {
        let stmt = balance_for_update(7, "alice").build(DbBackend::Postgres);
        assert!(stmt.sql.ends_with("FOR UPDATE"));
    }

    #[test]
    fn test_scale_buckets_preserves_sum() {
        let scaled = scale_buckets([10, 25, 65, 0], 100, 40);
        assert_eq!(scaled.iter().sum::<i64>(), 40);
    }

    #[test]
    fn test_scale_buckets_to_zero() {
        let scaled = scale_buckets([3, 7, 1, 9], 20, 0);
        assert_eq!(scaled, [0, 0, 0, 0]);
    }

    #[test]
    fn test_scale_buckets_identity() {
        let scaled = scale_buckets([3, 7, 1, 9], 20, 20);
        assert_eq!(scaled, [3, 7, 1, 9]);
    }

    #[test]
    fn test_scale_buckets_random_sequences_hold_invariant() {
        // 随机移除序列下 total == sum(sources) 始终成立
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let mut buckets = [
                rng.gen_range(0..500i64),
                rng.gen_range(0..500i64),
                rng.gen_range(0..500i64),
                rng.gen_range(0..500i64),
            ];
            let mut total: i64 = buckets.iter().sum();
            if total == 0 {
                continue;
            }
            while total > 0 {
                let removed = rng.gen_range(1..=total.max(1));
                let new_total = (total - removed).max(0);
                buckets = scale_buckets(buckets, total, new_total);
                assert_eq!(buckets.iter().sum::<i64>(), new_total);
                assert!(buckets.iter().all(|b| *b >= 0));
                total = new_total;
            }
            assert_eq!(buckets, [0, 0, 0, 0]);
        }
    }
}
