use crate::entities::tenant_setting_entity as settings;
use crate::error::AppResult;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};

/// 租户配置读取服务
/// 配置由外部管理端写入；核心只读，外加一个解析缓存回写
#[derive(Clone)]
pub struct SettingsService {
    pool: DatabaseConnection,
}

impl SettingsService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    pub async fn get_by_guild(&self, guild_id: i64) -> AppResult<Option<settings::Model>> {
        let model = settings::Entity::find()
            .filter(settings::Column::GuildId.eq(guild_id))
            .one(&self.pool)
            .await?;
        Ok(model)
    }

    /// 已配置 Kick 频道的全部租户（启动时为每个租户拉起一条摄入任务）
    pub async fn list_configured(&self) -> AppResult<Vec<settings::Model>> {
        let list = settings::Entity::find()
            .order_by_asc(settings::Column::GuildId)
            .all(&self.pool)
            .await?;
        Ok(list)
    }

    /// 回写通过 Kick API 解析出的 chatroom / channel id，避免每次重连都打外部接口
    /// 注意: 不碰 revision，回写缓存不应触发其它租户或自身的热更新
    pub async fn cache_resolved_ids(
        &self,
        model: settings::Model,
        chatroom_id: i64,
        channel_id: Option<i64>,
    ) -> AppResult<()> {
        let mut am = model.into_active_model();
        am.chatroom_id = Set(Some(chatroom_id));
        if let Some(id) = channel_id {
            am.channel_id = Set(Some(id));
        }
        am.updated_at = Set(Some(Utc::now()));
        am.update(&self.pool).await?;
        Ok(())
    }
}
