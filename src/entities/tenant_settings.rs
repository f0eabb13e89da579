use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 租户（Discord 服务器）与 Kick 频道的绑定配置
/// 说明:
/// - 本表由外部的设置管理端写入，核心只读
/// - revision 每次修改自增，聊天客户端据此检测热更新
/// - chatroom_id / channel_id 为解析缓存，缺失时通过 Kick API 补齐
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "tenant_settings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub guild_id: i64,
    pub kick_channel_slug: String,
    pub chatroom_id: Option<i64>,
    pub channel_id: Option<i64>,
    pub revision: i64,
    pub force_live: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
