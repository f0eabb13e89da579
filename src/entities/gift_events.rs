use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 礼物订阅事件日志
/// 说明:
/// - (guild_id, kick_event_id) 唯一，事件重放不会重复发奖
/// - 未绑定账号的赠礼人也记录（审计用），linked = false 且 tickets_awarded = 0
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "gift_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub guild_id: i64,
    pub kick_event_id: String,
    pub gifter_username: String,
    pub recipient_count: i32,
    pub linked: bool,
    pub tickets_awarded: i64,
    pub period_id: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
