use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 奖券余额表，按 (period_id, kick_username) 唯一
/// 不变式: total_tickets == 各来源列之和，任何变更都在同一事务内维护
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "ticket_balances")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub period_id: i64,
    pub kick_username: String,
    pub watchtime_tickets: i64,
    pub gift_tickets: i64,
    pub wager_tickets: i64,
    pub bonus_tickets: i64,
    pub total_tickets: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    /// 各来源之和，用于校验 total 不变式
    pub fn source_sum(&self) -> i64 {
        self.watchtime_tickets + self.gift_tickets + self.wager_tickets + self.bonus_tickets
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
