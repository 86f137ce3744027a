use thiserror::Error;

/// Raised while loading or validating `AppConfig`. Always fatal at startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate(_))
    }
}

/// Failure reported by an email transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// The request never got a response (DNS, TLS, connection reset, timeout).
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rejected by provider (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl DeliveryError {
    /// Transport failures, 5xx and 429 are worth another attempt; other 4xx are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Transport(_) => true,
            DeliveryError::Rejected { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        let rejected = |status| DeliveryError::Rejected {
            status,
            message: String::new(),
        };
        assert!(DeliveryError::Transport("reset".into()).is_retryable());
        assert!(rejected(429).is_retryable());
        assert!(rejected(503).is_retryable());
        assert!(!rejected(400).is_retryable());
        assert!(!rejected(401).is_retryable());
    }
}
