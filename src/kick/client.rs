//! Long-lived per-tenant chat ingestion client.
//!
//! 每个租户一条独立任务跑 `ChatClient::run`，互不影响：
//! - 传输层错误走带抖动的指数退避后无限重连
//! - 配置热更新（revision / chatroom 变化）走"干净关断旧套接字再重连"，
//!   不取消任务本身，也绝不触碰其它租户
//! - 解析失败只记日志跳过，单条坏帧不会断开连接

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::entities::tenant_setting_entity as settings;
use crate::error::{AppError, AppResult};
use crate::kick::frames::{self, Frame};
use crate::kick::KickApi;
use crate::models::{NormalizedEvent, TenantEvent};
use crate::services::SettingsService;
use crate::sessions::SessionStore;

/// 空闲超时: 既是保活 ping 的节奏，也是热更新的轮询间隔
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// 退避参数（秒）
const BACKOFF_BASE_SECS: u64 = 2;
const BACKOFF_MAX_SECS: u64 = 60;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 当前套接字订阅的目标，热更新检测以此为基准
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedTarget {
    pub revision: i64,
    pub chatroom_id: i64,
    pub channel_id: Option<i64>,
}

/// 配置变化时需要重连；revision 或解析出的聊天室变了都算
pub fn needs_reload(current: &ConnectedTarget, latest: &settings::Model) -> bool {
    if latest.revision != current.revision {
        return true;
    }
    match latest.chatroom_id {
        Some(id) => id != current.chatroom_id,
        // 聊天室尚未解析时以 revision 为准
        None => false,
    }
}

/// 指数退避（不含抖动的纯部分，便于测试）
pub fn backoff_delay_secs(attempt: u32) -> u64 {
    BACKOFF_BASE_SECS
        .saturating_mul(1u64 << attempt.min(6))
        .min(BACKOFF_MAX_SECS)
}

enum ConnectionExit {
    /// 配置热更新，立即用新配置重连
    Reload,
    /// 收到全局停机信号
    Shutdown,
}

#[derive(Clone)]
pub struct ChatClient {
    api: KickApi,
    sessions: SessionStore,
    settings: SettingsService,
    events: mpsc::Sender<TenantEvent>,
}

impl ChatClient {
    pub fn new(
        api: KickApi,
        sessions: SessionStore,
        settings: SettingsService,
        events: mpsc::Sender<TenantEvent>,
    ) -> Self {
        Self {
            api,
            sessions,
            settings,
            events,
        }
    }

    /// 租户摄入主循环；只因停机信号退出
    pub async fn run(self, guild_id: i64, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect_once(guild_id, &mut shutdown).await {
                Ok(ConnectionExit::Shutdown) => break,
                Ok(ConnectionExit::Reload) => {
                    log::info!("[guild {guild_id}] config changed, reconnecting with new target");
                    attempt = 0;
                    continue;
                }
                Err(e) => {
                    self.sessions.close_session(guild_id).await;
                    let delay = jittered(backoff_delay_secs(attempt));
                    attempt = attempt.saturating_add(1);
                    // 瞬态错误是常态（网络抖动），非瞬态错误提级记录便于排查配置问题
                    if e.is_transient() {
                        log::warn!(
                            "[guild {guild_id}] transient connection error ({e}), retrying in {delay:?}"
                        );
                    } else {
                        log::error!(
                            "[guild {guild_id}] connection error ({e}), retrying in {delay:?}"
                        );
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        self.sessions.close_session(guild_id).await;
        log::info!("[guild {guild_id}] ingestion task stopped");
    }

    /// 建立一次连接并跑接收循环，直到出错 / 热更新 / 停机
    async fn connect_once(
        &self,
        guild_id: i64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> AppResult<ConnectionExit> {
        // 每次迭代都重读配置，热更新由此生效
        let setting = self
            .settings
            .get_by_guild(guild_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("tenant settings for guild {guild_id}")))?;

        let target = self.resolve_target(&setting).await?;

        let (mut ws, _) = connect_async(self.api.ws_url()).await?;
        self.handshake(guild_id, &mut ws, &target).await?;
        self.sessions.open_session(guild_id).await;
        self.sessions
            .set_force_live(guild_id, setting.force_live)
            .await;
        log::info!(
            "[guild {guild_id}] subscribed to chatroom {} (revision {})",
            target.chatroom_id,
            target.revision
        );

        let exit = self.receive_loop(guild_id, &mut ws, &target, shutdown).await;
        // 无论哪种退出路径都先关干净旧套接字，再考虑重连
        let _ = ws.close(None).await;
        self.sessions.close_session(guild_id).await;
        exit
    }

    /// 解析订阅目标；settings 里的缓存优先，缺失时查 Kick API 并回写
    async fn resolve_target(&self, setting: &settings::Model) -> AppResult<ConnectedTarget> {
        if let Some(chatroom_id) = setting.chatroom_id {
            return Ok(ConnectedTarget {
                revision: setting.revision,
                chatroom_id,
                channel_id: setting.channel_id,
            });
        }

        let info = self.api.get_channel(&setting.kick_channel_slug).await?;
        let target = ConnectedTarget {
            revision: setting.revision,
            chatroom_id: info.chatroom.id,
            channel_id: Some(info.id),
        };
        if let Err(e) = self
            .settings
            .cache_resolved_ids(setting.clone(), info.chatroom.id, Some(info.id))
            .await
        {
            // 缓存回写失败不致命，下次重连再查一次
            log::warn!(
                "[guild {}] failed to cache resolved chatroom id: {e}",
                setting.guild_id
            );
        }
        Ok(target)
    }

    /// 握手: 等待 conn:established 拿 socket_id，然后发订阅帧
    async fn handshake(
        &self,
        guild_id: i64,
        ws: &mut WsStream,
        target: &ConnectedTarget,
    ) -> AppResult<()> {
        let established = timeout(IDLE_TIMEOUT, ws.next())
            .await
            .map_err(|_| AppError::ExternalApiError("handshake timed out".into()))?
            .ok_or_else(|| AppError::ExternalApiError("socket closed during handshake".into()))??;

        let raw = match established {
            Message::Text(raw) => raw,
            other => {
                return Err(AppError::ExternalApiError(format!(
                    "unexpected handshake frame: {other:?}"
                )));
            }
        };
        match frames::Envelope::parse(&raw).map(|env| frames::classify(&env, Utc::now())) {
            Ok(Frame::ConnEstablished { socket_id }) => {
                // socket_id 仅作诊断信息
                log::debug!("[guild {guild_id}] connection established, socket_id={socket_id}");
            }
            _ => {
                return Err(AppError::ExternalApiError(
                    "expected conn:established frame".into(),
                ));
            }
        }

        ws.send(Message::Text(frames::subscribe_frame(
            &frames::chatroom_channel(target.chatroom_id),
        )))
        .await?;
        // 平台级事件频道（订阅/礼物）只在 channel id 可解析时订阅
        if let Some(channel_id) = target.channel_id {
            ws.send(Message::Text(frames::subscribe_frame(
                &frames::platform_channel(channel_id),
            )))
            .await?;
        }
        Ok(())
    }

    async fn receive_loop(
        &self,
        guild_id: i64,
        ws: &mut WsStream,
        target: &ConnectedTarget,
        shutdown: &mut watch::Receiver<bool>,
    ) -> AppResult<ConnectionExit> {
        let mut dropped_events: u64 = 0;
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(ConnectionExit::Shutdown);
                    }
                }
                received = timeout(IDLE_TIMEOUT, ws.next()) => match received {
                    // 空闲: 先查热更新，否则发保活 ping
                    Err(_) => {
                        if let Some(latest) = self.settings.get_by_guild(guild_id).await? {
                            if needs_reload(target, &latest) {
                                return Ok(ConnectionExit::Reload);
                            }
                        }
                        ws.send(Message::Text(frames::ping_frame())).await?;
                    }
                    Ok(None) => {
                        return Err(AppError::ExternalApiError("socket closed by peer".into()));
                    }
                    Ok(Some(Err(e))) => return Err(e.into()),
                    Ok(Some(Ok(Message::Text(raw)))) => {
                        self.handle_raw_frame(guild_id, ws, &raw, &mut dropped_events).await?;
                    }
                    Ok(Some(Ok(Message::Ping(payload)))) => {
                        ws.send(Message::Pong(payload)).await?;
                    }
                    Ok(Some(Ok(Message::Close(_)))) => {
                        return Err(AppError::ExternalApiError("close frame from peer".into()));
                    }
                    Ok(Some(Ok(_))) => {}
                },
            }
        }
    }

    /// 单帧处理；解析失败只记日志，连接继续
    async fn handle_raw_frame(
        &self,
        guild_id: i64,
        ws: &mut WsStream,
        raw: &str,
        dropped_events: &mut u64,
    ) -> AppResult<()> {
        let envelope = match frames::Envelope::parse(raw) {
            Ok(env) => env,
            Err(e) => {
                log::warn!("[guild {guild_id}] skipping malformed frame: {e}");
                return Ok(());
            }
        };

        match frames::classify(&envelope, Utc::now()) {
            Frame::Ping => {
                // 对端协议层 ping 立即回 pong
                ws.send(Message::Text(frames::pong_frame())).await?;
            }
            Frame::Chat(chat) => {
                let now = Utc::now();
                self.sessions
                    .record_chat_activity(guild_id, &chat.username, now)
                    .await;
                self.forward(
                    guild_id,
                    NormalizedEvent::ChatMessage(chat),
                    dropped_events,
                );
            }
            Frame::Gift(gift) => {
                self.forward(
                    guild_id,
                    NormalizedEvent::GiftSubscription(gift),
                    dropped_events,
                );
            }
            Frame::ConnEstablished { .. } | Frame::Unknown => {
                log::debug!(
                    "[guild {guild_id}] dropping unhandled frame: {}",
                    envelope.event
                );
            }
        }
        Ok(())
    }

    /// 异步递交事件；队列满就丢弃计数，绝不阻塞保活节奏
    fn forward(&self, guild_id: i64, event: NormalizedEvent, dropped_events: &mut u64) {
        if self
            .events
            .try_send(TenantEvent { guild_id, event })
            .is_err()
        {
            *dropped_events += 1;
            if *dropped_events % 100 == 1 {
                log::warn!(
                    "[guild {guild_id}] event queue full, {dropped_events} events dropped so far"
                );
            }
        }
    }
}

fn jittered(base_secs: u64) -> Duration {
    // 抖动取 [base/2, base]，避免多租户齐步重连
    let base_ms = base_secs * 1000;
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 2);
    Duration::from_millis(base_ms - jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setting(revision: i64, chatroom_id: Option<i64>) -> settings::Model {
        settings::Model {
            id: 1,
            guild_id: 100,
            kick_channel_slug: "somechannel".into(),
            chatroom_id,
            channel_id: None,
            revision,
            force_live: false,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_reload_on_revision_bump() {
        let current = ConnectedTarget {
            revision: 3,
            chatroom_id: 55,
            channel_id: None,
        };
        assert!(!needs_reload(&current, &setting(3, Some(55))));
        assert!(needs_reload(&current, &setting(4, Some(55))));
    }

    #[test]
    fn test_reload_on_chatroom_change() {
        let current = ConnectedTarget {
            revision: 3,
            chatroom_id: 55,
            channel_id: None,
        };
        assert!(needs_reload(&current, &setting(3, Some(77))));
        // 未解析的 chatroom 不触发重连
        assert!(!needs_reload(&current, &setting(3, None)));
    }

    #[test]
    fn test_backoff_is_bounded_and_monotonic() {
        assert_eq!(backoff_delay_secs(0), 2);
        assert_eq!(backoff_delay_secs(1), 4);
        assert_eq!(backoff_delay_secs(2), 8);
        for attempt in 0..64 {
            let d = backoff_delay_secs(attempt);
            assert!(d >= 2 && d <= 60);
            assert!(backoff_delay_secs(attempt + 1) >= d);
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        for _ in 0..1000 {
            let d = jittered(60);
            assert!(d >= Duration::from_secs(30) && d <= Duration::from_secs(60));
        }
    }
}
