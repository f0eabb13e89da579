use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 开奖结果表，每个周期至多一条（period_id 唯一）
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "raffle_draws")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub period_id: i64,
    pub total_tickets: i64,
    pub total_participants: i64,
    pub winner_username: String,
    pub winner_discord_id: Option<i64>,
    pub winning_ticket: i64,
    pub win_probability: f64,
    pub prize: Option<String>,
    pub drawn_by: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
