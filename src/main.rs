use chrono::Local;
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use kicket_core::{
    config::Config,
    database::{create_pool, run_migrations},
    kick::{ChatClient, KickApi},
    services::{
        EventRouter, NullChatSender, PeriodService, SettingsService, TicketService,
        WatchtimeService,
    },
    sessions::SessionStore,
    tasks,
};

/// 事件队列容量；放不下时摄入层丢弃而不是阻塞保活
const EVENT_QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    // 加载配置
    let config = Config::from_toml()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    // 创建数据库连接池并跑迁移
    let pool = create_pool(&config.database).await?;
    run_migrations(&pool).await?;

    // 会话注册表与各服务
    let sessions = SessionStore::new(config.liveness.clone());
    let settings_service = SettingsService::new(pool.clone());
    let ticket_service = TicketService::new(pool.clone());
    let period_service = PeriodService::new(pool.clone(), config.rewards.minutes_per_ticket);
    let watchtime_service = WatchtimeService::new(
        pool.clone(),
        ticket_service.clone(),
        period_service.clone(),
        sessions.clone(),
        config.rewards.clone(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

    // 事件路由消费任务（ChatSender 由宿主注入；独立运行时用空实现）
    let router = EventRouter::new(
        pool.clone(),
        ticket_service.clone(),
        period_service.clone(),
        Arc::new(NullChatSender),
        config.rewards.clone(),
    );
    tokio::spawn(router.run(event_rx));

    // 每个已配置租户一条独立摄入任务；缺配置的租户不启动，互不影响
    let api = KickApi::new(config.kick.clone());
    let tenants = settings_service.list_configured().await?;
    if tenants.is_empty() {
        log::warn!("No tenants configured, chat ingestion idle");
    }
    for tenant in tenants {
        let client = ChatClient::new(
            api.clone(),
            sessions.clone(),
            settings_service.clone(),
            event_tx.clone(),
        );
        let guild_id = tenant.guild_id;
        let rx = shutdown_rx.clone();
        log::info!(
            "[guild {guild_id}] starting ingestion for Kick channel '{}'",
            tenant.kick_channel_slug
        );
        tokio::spawn(client.run(guild_id, rx));
    }
    drop(event_tx);

    // 定时任务: 观看时长结算、周期巡检、会话清理
    tasks::spawn_all(
        watchtime_service,
        period_service,
        sessions,
        config.rewards.accrual_interval_minutes,
        shutdown_rx,
    );

    log::info!("kicket-core started");
    tokio::signal::ctrl_c().await?;
    log::info!("shutdown signal received, stopping tasks");
    let _ = shutdown_tx.send(true);
    // 给各任务一点时间关干净套接字
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    Ok(())
}
