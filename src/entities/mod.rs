pub mod gift_events;
pub mod linked_accounts;
pub mod raffle_draws;
pub mod raffle_periods;
pub mod tenant_settings;
pub mod ticket_balances;
pub mod ticket_transactions;
pub mod watchtime_conversions;
pub mod watchtime_totals;

pub use gift_events as gift_event_entity;
pub use linked_accounts as linked_account_entity;
pub use raffle_draws as raffle_draw_entity;
pub use raffle_periods as raffle_period_entity;
pub use tenant_settings as tenant_setting_entity;
pub use ticket_balances as ticket_balance_entity;
pub use ticket_transactions as ticket_transaction_entity;
pub use watchtime_conversions as watchtime_conversion_entity;
pub use watchtime_totals as watchtime_total_entity;

pub use raffle_periods::PeriodStatus;
pub use ticket_transactions::TicketSource;
