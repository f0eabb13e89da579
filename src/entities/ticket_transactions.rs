use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};

/// 奖券来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, DeriveActiveEnum, EnumIter)]
#[sea_orm(rs_type = "String", db_type = "String(None)")]
#[serde(rename_all = "snake_case")]
pub enum TicketSource {
    #[sea_orm(string_value = "watchtime")]
    Watchtime,
    #[sea_orm(string_value = "gift")]
    Gift,
    #[sea_orm(string_value = "wager")]
    Wager,
    #[sea_orm(string_value = "bonus")]
    Bonus,
}

impl std::fmt::Display for TicketSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketSource::Watchtime => write!(f, "watchtime"),
            TicketSource::Gift => write!(f, "gift"),
            TicketSource::Wager => write!(f, "wager"),
            TicketSource::Bonus => write!(f, "bonus"),
        }
    }
}

/// 奖券流水（只追加的审计日志，delta 带符号）
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "ticket_transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub period_id: i64,
    pub kick_username: String,
    pub delta: i64,
    pub source: TicketSource,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
