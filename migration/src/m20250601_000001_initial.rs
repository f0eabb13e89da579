use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

/// Tenant Settings (租户与 Kick 频道绑定，外部管理端写入)
#[derive(DeriveIden)]
enum TenantSettings {
    Table,
    Id,
    GuildId,
    KickChannelSlug,
    ChatroomId,
    ChannelId,
    Revision,
    CreatedAt,
    UpdatedAt,
}

/// Linked Accounts (Kick 用户名与 Discord 账号绑定)
#[derive(DeriveIden)]
enum LinkedAccounts {
    Table,
    Id,
    GuildId,
    KickUsername,
    DiscordUserId,
    CreatedAt,
}

/// Raffle Periods (抽奖周期)
#[derive(DeriveIden)]
enum RafflePeriods {
    Table,
    Id,
    GuildId,
    StartsAt,
    EndsAt,
    Status,
    CreatedBy,
    CreatedAt,
    UpdatedAt,
}

/// Ticket Balances (奖券余额，按周期+用户唯一)
#[derive(DeriveIden)]
enum TicketBalances {
    Table,
    Id,
    PeriodId,
    KickUsername,
    WatchtimeTickets,
    GiftTickets,
    WagerTickets,
    BonusTickets,
    TotalTickets,
    CreatedAt,
    UpdatedAt,
}

/// Ticket Transactions (奖券流水，只追加)
#[derive(DeriveIden)]
enum TicketTransactions {
    Table,
    Id,
    PeriodId,
    KickUsername,
    Delta,
    Source,
    Description,
    CreatedAt,
}

/// Watchtime Totals (累计观看时长)
#[derive(DeriveIden)]
enum WatchtimeTotals {
    Table,
    Id,
    GuildId,
    KickUsername,
    TotalMinutes,
    UpdatedAt,
}

/// Watchtime Conversions (观看时长兑换幂等记录)
#[derive(DeriveIden)]
enum WatchtimeConversions {
    Table,
    Id,
    PeriodId,
    KickUsername,
    BasisUnits,
    TicketsAwarded,
    CreatedAt,
}

/// Gift Events (礼物事件日志，重放去重)
#[derive(DeriveIden)]
enum GiftEvents {
    Table,
    Id,
    GuildId,
    KickEventId,
    GifterUsername,
    RecipientCount,
    Linked,
    TicketsAwarded,
    PeriodId,
    CreatedAt,
}

/// Raffle Draws (开奖结果，每周期至多一条)
#[derive(DeriveIden)]
enum RaffleDraws {
    Table,
    Id,
    PeriodId,
    TotalTickets,
    TotalParticipants,
    WinnerUsername,
    WinnerDiscordId,
    WinningTicket,
    WinProbability,
    Prize,
    DrawnBy,
    CreatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 租户配置表
        manager
            .create_table(
                Table::create()
                    .table(TenantSettings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TenantSettings::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TenantSettings::GuildId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TenantSettings::KickChannelSlug)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TenantSettings::ChatroomId).big_integer())
                    .col(ColumnDef::new(TenantSettings::ChannelId).big_integer())
                    .col(
                        ColumnDef::new(TenantSettings::Revision)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TenantSettings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .col(
                        ColumnDef::new(TenantSettings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tenant_settings_guild_unique")
                    .table(TenantSettings::Table)
                    .col(TenantSettings::GuildId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 账号绑定表
        manager
            .create_table(
                Table::create()
                    .table(LinkedAccounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LinkedAccounts::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(LinkedAccounts::GuildId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LinkedAccounts::KickUsername)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LinkedAccounts::DiscordUserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LinkedAccounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_linked_accounts_guild_username_unique")
                    .table(LinkedAccounts::Table)
                    .col(LinkedAccounts::GuildId)
                    .col(LinkedAccounts::KickUsername)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 抽奖周期表
        manager
            .create_table(
                Table::create()
                    .table(RafflePeriods::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RafflePeriods::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RafflePeriods::GuildId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RafflePeriods::StartsAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RafflePeriods::EndsAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(RafflePeriods::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(RafflePeriods::CreatedBy).big_integer())
                    .col(
                        ColumnDef::new(RafflePeriods::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .col(
                        ColumnDef::new(RafflePeriods::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .to_owned(),
            )
            .await?;

        // 每个 guild 至多一条 active 周期（部分唯一索引）
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_raffle_periods_one_active_per_guild \
                 ON raffle_periods (guild_id) WHERE status = 'active'"
                    .to_owned(),
            ))
            .await?;

        // 奖券余额表
        manager
            .create_table(
                Table::create()
                    .table(TicketBalances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TicketBalances::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TicketBalances::PeriodId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TicketBalances::KickUsername)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TicketBalances::WatchtimeTickets)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TicketBalances::GiftTickets)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TicketBalances::WagerTickets)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TicketBalances::BonusTickets)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TicketBalances::TotalTickets)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TicketBalances::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .col(
                        ColumnDef::new(TicketBalances::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_ticket_balances_period_user_unique")
                    .table(TicketBalances::Table)
                    .col(TicketBalances::PeriodId)
                    .col(TicketBalances::KickUsername)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 奖券流水表
        manager
            .create_table(
                Table::create()
                    .table(TicketTransactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TicketTransactions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TicketTransactions::PeriodId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TicketTransactions::KickUsername)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TicketTransactions::Delta)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TicketTransactions::Source).string().not_null())
                    .col(ColumnDef::new(TicketTransactions::Description).string())
                    .col(
                        ColumnDef::new(TicketTransactions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_ticket_transactions_period_user")
                    .table(TicketTransactions::Table)
                    .col(TicketTransactions::PeriodId)
                    .col(TicketTransactions::KickUsername)
                    .to_owned(),
            )
            .await?;

        // 累计观看时长表
        manager
            .create_table(
                Table::create()
                    .table(WatchtimeTotals::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WatchtimeTotals::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WatchtimeTotals::GuildId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WatchtimeTotals::KickUsername)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WatchtimeTotals::TotalMinutes)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WatchtimeTotals::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_watchtime_totals_guild_user_unique")
                    .table(WatchtimeTotals::Table)
                    .col(WatchtimeTotals::GuildId)
                    .col(WatchtimeTotals::KickUsername)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 观看时长兑换记录表
        manager
            .create_table(
                Table::create()
                    .table(WatchtimeConversions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WatchtimeConversions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WatchtimeConversions::PeriodId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WatchtimeConversions::KickUsername)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WatchtimeConversions::BasisUnits)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WatchtimeConversions::TicketsAwarded)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WatchtimeConversions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .to_owned(),
            )
            .await?;

        // 幂等键: 同一基数只能兑换一次
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_watchtime_conversions_basis_unique")
                    .table(WatchtimeConversions::Table)
                    .col(WatchtimeConversions::PeriodId)
                    .col(WatchtimeConversions::KickUsername)
                    .col(WatchtimeConversions::BasisUnits)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 礼物事件日志表
        manager
            .create_table(
                Table::create()
                    .table(GiftEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GiftEvents::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(GiftEvents::GuildId).big_integer().not_null())
                    .col(ColumnDef::new(GiftEvents::KickEventId).string().not_null())
                    .col(
                        ColumnDef::new(GiftEvents::GifterUsername)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GiftEvents::RecipientCount)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(GiftEvents::Linked)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(GiftEvents::TicketsAwarded)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(GiftEvents::PeriodId).big_integer())
                    .col(
                        ColumnDef::new(GiftEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .to_owned(),
            )
            .await?;

        // 幂等键: 事件重放不产生第二条记录
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_gift_events_guild_event_unique")
                    .table(GiftEvents::Table)
                    .col(GiftEvents::GuildId)
                    .col(GiftEvents::KickEventId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 开奖结果表
        manager
            .create_table(
                Table::create()
                    .table(RaffleDraws::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RaffleDraws::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RaffleDraws::PeriodId).big_integer().not_null())
                    .col(
                        ColumnDef::new(RaffleDraws::TotalTickets)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RaffleDraws::TotalParticipants)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RaffleDraws::WinnerUsername)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RaffleDraws::WinnerDiscordId).big_integer())
                    .col(
                        ColumnDef::new(RaffleDraws::WinningTicket)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RaffleDraws::WinProbability).double().not_null())
                    .col(ColumnDef::new(RaffleDraws::Prize).string())
                    .col(ColumnDef::new(RaffleDraws::DrawnBy).big_integer())
                    .col(
                        ColumnDef::new(RaffleDraws::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_raffle_draws_period_unique")
                    .table(RaffleDraws::Table)
                    .col(RaffleDraws::PeriodId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RaffleDraws::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(GiftEvents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WatchtimeConversions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WatchtimeTotals::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TicketTransactions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TicketBalances::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RafflePeriods::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LinkedAccounts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TenantSettings::Table).to_owned())
            .await?;
        Ok(())
    }
}
