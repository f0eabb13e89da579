use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub kick: KickConfig,
    #[serde(default)]
    pub rewards: RewardsConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KickConfig {
    /// Pusher 风格的 websocket 入口
    pub ws_url: String,
    /// 频道信息查询 API（解析 chatroom id 用）
    pub api_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardsConfig {
    /// 每份礼物订阅发放的奖券数
    pub tickets_per_gift: i64,
    /// 多少分钟观看时长兑换 1 张奖券
    pub minutes_per_ticket: i64,
    /// 观看时长结算周期（分钟）
    pub accrual_interval_minutes: u64,
    /// 聊天指令的每用户冷却（秒）
    pub chat_cooldown_seconds: i64,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            tickets_per_gift: 20,
            minutes_per_ticket: 10,
            accrual_interval_minutes: 5,
            chat_cooldown_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// 判定直播活跃的时间窗口（分钟）
    pub window_minutes: i64,
    /// 窗口内至少需要的不同发言人数
    pub min_unique_chatters: usize,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            window_minutes: 5,
            min_unique_chatters: 2,
        }
    }
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // 尝试读取配置文件，如果不存在则完全依赖环境变量
        let config_result = std::fs::read_to_string(&config_path);

        let mut config: Config = match config_result {
            Ok(config_str) => {
                // 有配置文件：先解析再用环境变量覆盖
                toml::from_str(&config_str).map_err(|e| format!("解析配置文件失败: {e}"))?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // 无配置文件：使用环境变量与默认值构建
                fn get_env(name: &str) -> Option<String> {
                    env::var(name).ok()
                }
                fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
                    env::var(name)
                        .ok()
                        .and_then(|v| v.parse::<T>().ok())
                        .unwrap_or(default)
                }

                // 数据库 URL 在无配置文件时必须提供
                let database_url = get_env("DATABASE_URL")
                    .ok_or("缺少 DATABASE_URL 环境变量，且未找到配置文件 config.toml")?;

                Config {
                    database: DatabaseConfig {
                        url: database_url,
                        max_connections: get_env_parse("DB_MAX_CONNECTIONS", 10u32),
                    },
                    kick: KickConfig {
                        ws_url: get_env("KICK_WS_URL").unwrap_or_else(|| {
                            "wss://ws-us2.pusher.com/app/32cbd69e4b950bf97679?protocol=7&client=js&version=7.6.0&flash=false".to_string()
                        }),
                        api_base_url: get_env("KICK_API_BASE_URL")
                            .unwrap_or_else(|| "https://kick.com/api/v2".to_string()),
                    },
                    rewards: RewardsConfig {
                        tickets_per_gift: get_env_parse("REWARDS_TICKETS_PER_GIFT", 20i64),
                        minutes_per_ticket: get_env_parse("REWARDS_MINUTES_PER_TICKET", 10i64),
                        accrual_interval_minutes: get_env_parse(
                            "REWARDS_ACCRUAL_INTERVAL_MINUTES",
                            5u64,
                        ),
                        chat_cooldown_seconds: get_env_parse("REWARDS_CHAT_COOLDOWN_SECONDS", 30i64),
                    },
                    liveness: LivenessConfig {
                        window_minutes: get_env_parse("LIVENESS_WINDOW_MINUTES", 5i64),
                        min_unique_chatters: get_env_parse("LIVENESS_MIN_UNIQUE_CHATTERS", 2usize),
                    },
                }
            }
            Err(e) => {
                return Err(format!("无法读取配置文件 {config_path}: {e}").into());
            }
        };

        // 环境变量覆盖（即便文件存在时也覆盖）
        if let Ok(v) = env::var("DATABASE_URL") {
            config.database.url = v;
        }
        if let Ok(v) = env::var("DB_MAX_CONNECTIONS") {
            if let Ok(mc) = v.parse() {
                config.database.max_connections = mc;
            }
        }
        if let Ok(v) = env::var("KICK_WS_URL") {
            config.kick.ws_url = v;
        }
        if let Ok(v) = env::var("KICK_API_BASE_URL") {
            config.kick.api_base_url = v;
        }
        if let Ok(v) = env::var("REWARDS_TICKETS_PER_GIFT") {
            if let Ok(n) = v.parse() {
                config.rewards.tickets_per_gift = n;
            }
        }
        if let Ok(v) = env::var("REWARDS_MINUTES_PER_TICKET") {
            if let Ok(n) = v.parse() {
                config.rewards.minutes_per_ticket = n;
            }
        }
        if let Ok(v) = env::var("REWARDS_ACCRUAL_INTERVAL_MINUTES") {
            if let Ok(n) = v.parse() {
                config.rewards.accrual_interval_minutes = n;
            }
        }
        if let Ok(v) = env::var("REWARDS_CHAT_COOLDOWN_SECONDS") {
            if let Ok(n) = v.parse() {
                config.rewards.chat_cooldown_seconds = n;
            }
        }
        if let Ok(v) = env::var("LIVENESS_WINDOW_MINUTES") {
            if let Ok(n) = v.parse() {
                config.liveness.window_minutes = n;
            }
        }
        if let Ok(v) = env::var("LIVENESS_MIN_UNIQUE_CHATTERS") {
            if let Ok(n) = v.parse() {
                config.liveness.min_unique_chatters = n;
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewards_defaults() {
        let cfg = RewardsConfig::default();
        assert_eq!(cfg.tickets_per_gift, 20);
        assert_eq!(cfg.minutes_per_ticket, 10);
        assert_eq!(cfg.accrual_interval_minutes, 5);
        assert_eq!(cfg.chat_cooldown_seconds, 30);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            [database]
            url = "postgres://localhost/kicket"
            max_connections = 5

            [kick]
            ws_url = "wss://example.test/app/key"
            api_base_url = "https://example.test/api/v2"
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.database.max_connections, 5);
        // rewards/liveness 缺省时使用默认值
        assert_eq!(cfg.rewards.tickets_per_gift, 20);
        assert_eq!(cfg.liveness.min_unique_chatters, 2);
    }
}
