use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrevoError>;

#[derive(Debug, Error)]
pub enum BrevoError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl BrevoError {
    /// HTTP status of an API rejection, if the request reached Brevo.
    pub fn status(&self) -> Option<u16> {
        match self {
            BrevoError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BrevoError {
    fn from(err: reqwest::Error) -> Self {
        BrevoError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for BrevoError {
    fn from(err: serde_json::Error) -> Self {
        BrevoError::Parse(err.to_string())
    }
}
