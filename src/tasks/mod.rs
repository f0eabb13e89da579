//! Background scheduled tasks for the application.
//!
//! This module centralizes the recurring jobs (watchtime accrual, period
//! expiry checks, session pruning). Call `spawn_all` once during startup to
//! launch them; per-tenant ingestion tasks are spawned separately in main.

use chrono::Utc;
use tokio::sync::watch;

use crate::services::{PeriodService, WatchtimeService};
use crate::sessions::SessionStore;

/// Spawn all background tasks.
///
/// Notes
/// - Each task observes the shutdown signal and exits cleanly.
/// - This function detaches tasks via `tokio::spawn`; it does not block.
pub fn spawn_all(
    watchtime_service: WatchtimeService,
    period_service: PeriodService,
    sessions: SessionStore,
    accrual_interval_minutes: u64,
    shutdown: watch::Receiver<bool>,
) {
    // 观看时长结算（按配置节拍，默认每 5 分钟）
    {
        let svc = watchtime_service.clone();
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let interval = std::time::Duration::from_secs(accrual_interval_minutes * 60);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        svc.run_accrual_tick(Utc::now()).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { break; }
                    }
                }
            }
        });
    }

    // 周期到期巡检（每分钟）
    {
        let svc = period_service.clone();
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(60)) => {
                        match svc.end_expired_periods(Utc::now()).await {
                            Ok(n) if n > 0 => log::info!("Expired raffle periods closed: {n}"),
                            Ok(_) => {}
                            Err(e) => log::error!("Failed to close expired periods: {e:?}"),
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { break; }
                    }
                }
            }
        });
    }

    // 会话清理（每 5 分钟，控制发言人窗口的内存占用）
    {
        let sessions = sessions.clone();
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(300)) => {
                        sessions.prune(Utc::now()).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { break; }
                    }
                }
            }
        });
    }
}
