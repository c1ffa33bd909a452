use thiserror::Error;

/// Failure taxonomy for a sync run.
///
/// Fatal variants (`Auth`, `Validation`) abort the run before or during
/// pre-flight; everything else is handled per record so one bad record
/// cannot sink the batch.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration invalid: {0}")]
    Validation(String),

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("{0}")]
    Unknown(String),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::RateLimited { .. } => true,
            SyncError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Auth(_) | SyncError::Validation(_))
    }

    /// Classify an HTTP status that was not a success.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => SyncError::Auth(message),
            404 => SyncError::NotFound(message),
            429 => SyncError::RateLimited {
                retry_after_secs: None,
            },
            _ => SyncError::Api { status, message },
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            return SyncError::Network(err.to_string());
        }
        if let Some(status) = err.status() {
            return SyncError::from_status(status.as_u16(), err.to_string());
        }
        SyncError::Unknown(err.to_string())
    }
}
