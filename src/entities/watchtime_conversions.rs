use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 观看时长兑换记录（幂等表）
/// 说明:
/// - basis_units 为累计观看换算出的整数单位数（分钟 / minutes_per_ticket 向下取整）
/// - (period_id, kick_username, basis_units) 唯一，重复兑换同一基数是无操作
/// - 周期开始时写入 tickets_awarded = 0 的基线行，周期前的时长不发奖
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "watchtime_conversions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub period_id: i64,
    pub kick_username: String,
    pub basis_units: i64,
    pub tickets_awarded: i64,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
