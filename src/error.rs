use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("External API error: {0}")]
    ExternalApiError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("Websocket error: {0}")]
    WebsocketError(#[from] tokio_tungstenite::tungstenite::Error),
}

impl AppError {
    /// 瞬态错误（网络/套接字抖动）预期会在退避重试后自愈；
    /// 其余错误多半是配置或数据问题，重试前值得提级记录
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::ReqwestError(_) | AppError::WebsocketError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::WebsocketError(tungstenite::Error::ConnectionClosed).is_transient());
        assert!(!AppError::ValidationError("x".into()).is_transient());
        assert!(!AppError::NotFound("x".into()).is_transient());
        assert!(!AppError::ConfigError("x".into()).is_transient());
        assert!(!AppError::InternalError("x".into()).is_transient());
    }
}
