use reqwest::StatusCode;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Network failure, timeout or server-side outage.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The host environment does not provide this capability.
    #[error("Unsupported capability: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("A submission is already in flight")]
    SubmissionInFlight,
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Unavailable(_))
    }

    pub fn from_status(status: StatusCode, message: String) -> Self {
        match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(message),
            StatusCode::FORBIDDEN => ClientError::Forbidden(message),
            StatusCode::CONFLICT => ClientError::Conflict(message),
            StatusCode::TOO_MANY_REQUESTS => ClientError::Unavailable(message),
            s if s.is_server_error() => ClientError::Unavailable(message),
            s => ClientError::Rejected {
                status: s.as_u16(),
                message,
            },
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Unavailable(err.to_string())
    }
}

impl From<crate::error::Error> for ClientError {
    fn from(err: crate::error::Error) -> Self {
        use crate::error::Error;
        match err {
            Error::NotFound(msg) => ClientError::NotFound(msg),
            Error::Forbidden(msg) => ClientError::Forbidden(msg),
            Error::Conflict(msg) => ClientError::Conflict(msg),
            Error::Unavailable(msg) => ClientError::Unavailable(msg),
            Error::Json(err) => ClientError::Serialization(err),
            other => {
                let status = if matches!(other, Error::BadRequest(_) | Error::Validation(_)) {
                    400
                } else {
                    500
                };
                ClientError::Rejected {
                    status,
                    message: other.to_string(),
                }
            }
        }
    }
}
