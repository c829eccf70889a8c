use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Cache transport failure (not a miss). The scheduler logs and skips the
    /// tick rather than letting a flaky cache poison the pipeline.
    #[error("Cache unavailable: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vendor error (HTTP {status}): {message}")]
    Vendor { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sport {0} is already registered")]
    DuplicateSport(String),

    #[error("Invalid quote: {0}")]
    InvalidQuote(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// 4xx vendor responses other than 429 are not worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Vendor { status, .. } => {
                !(400..500).contains(status) || *status == 429
            }
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_not_retryable() {
        let err = AppError::Vendor { status: 401, message: "bad key".into() };
        assert!(!err.is_retryable());

        let err = AppError::Vendor { status: 404, message: "no such sport".into() };
        assert!(!err.is_retryable());
    }

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        let err = AppError::Vendor { status: 429, message: "slow down".into() };
        assert!(err.is_retryable());

        let err = AppError::Vendor { status: 503, message: "unavailable".into() };
        assert!(err.is_retryable());
    }
}
