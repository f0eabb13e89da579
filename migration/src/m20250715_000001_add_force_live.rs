use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum TenantSettings {
    Table,
    ForceLive,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

/// 运营人工覆盖: force_live = true 时跳过活跃启发式判定
#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(TenantSettings::Table)
                    .add_column(
                        ColumnDef::new(TenantSettings::ForceLive)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(TenantSettings::Table)
                    .drop_column(TenantSettings::ForceLive)
                    .to_owned(),
            )
            .await
    }
}
