use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::KickConfig;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct ChannelInfo {
    pub id: i64,
    pub chatroom: ChatroomInfo,
}

#[derive(Debug, Deserialize)]
pub struct ChatroomInfo {
    pub id: i64,
}

/// Kick 频道信息查询客户端（chatroom id 解析用）
/// 超时固定 10 秒；不在此处重试，由外层连接循环的退避兜底
#[derive(Clone)]
pub struct KickApi {
    client: Client,
    config: KickConfig,
}

impl KickApi {
    pub fn new(config: KickConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    /// 按频道 slug 查询频道与聊天室 id
    pub async fn get_channel(&self, slug: &str) -> AppResult<ChannelInfo> {
        let url = format!("{}/channels/{}", self.config.api_base_url, slug);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Kick channel lookup failed for '{}': HTTP {}",
                slug,
                response.status()
            )));
        }

        let info: ChannelInfo = response.json().await?;
        Ok(info)
    }

    pub fn ws_url(&self) -> &str {
        &self.config.ws_url
    }
}
