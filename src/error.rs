use std::time::Duration;

/// Error taxonomy surfaced by the analytics engine.
///
/// Provider-facing kinds map one-to-one onto how the fetch coordinator treats
/// a source: retry in place, skip to the next source in the fallback chain,
/// or give up on the call entirely.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    /// Source returned a retryable failure (5xx, connection reset, timeout).
    #[error("source temporarily unavailable: {0}")]
    TransientUnavailable(String),

    /// Source signalled throttling. May carry a server-suggested delay that
    /// overrides the computed backoff.
    #[error("rate limited by source: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Required credential for this source is absent. The source is skipped
    /// without retries.
    #[error("missing credential for source {0}")]
    AuthMissing(String),

    /// Source does not support this call kind. Skipped silently.
    #[error("call not supported by source {0}")]
    NotSupported(String),

    /// Response violated the source contract after normalization.
    #[error("response schema violation: {0}")]
    PermanentSchema(String),

    /// Caller input is invalid. Never retried.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Deadline exceeded or caller cancelled the operation.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Snapshot store backend failure.
    #[error("snapshot store error: {0}")]
    StorageIO(String),

    /// Invariant violation inside the engine itself.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl AnalyticsError {
    /// Whether the fetch coordinator may retry the same source after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalyticsError::TransientUnavailable(_) | AnalyticsError::RateLimited { .. }
        )
    }

    /// Whether the fetch coordinator should abandon this source and advance
    /// along the fallback chain without further attempts.
    pub fn skips_source(&self) -> bool {
        matches!(
            self,
            AnalyticsError::AuthMissing(_)
                | AnalyticsError::NotSupported(_)
                | AnalyticsError::PermanentSchema(_)
        )
    }

    /// Whether the error must stop the whole operation immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AnalyticsError::Validation(_) | AnalyticsError::Cancelled(_)
        )
    }

    /// Exit code reported by the CLI for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            AnalyticsError::Validation(_) => 2,
            AnalyticsError::Cancelled(_) => 4,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for AnalyticsError {
    fn from(error: std::io::Error) -> Self {
        AnalyticsError::StorageIO(error.to_string())
    }
}

impl From<reqwest::Error> for AnalyticsError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            AnalyticsError::Cancelled(format!("http timeout: {error}"))
        } else if error.is_status() {
            match error.status() {
                Some(status) if status.as_u16() == 429 => AnalyticsError::RateLimited {
                    message: error.to_string(),
                    retry_after: None,
                },
                Some(status) if status.is_server_error() => {
                    AnalyticsError::TransientUnavailable(error.to_string())
                }
                _ => AnalyticsError::PermanentSchema(error.to_string()),
            }
        } else {
            AnalyticsError::TransientUnavailable(error.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for AnalyticsError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AnalyticsError::Cancelled("deadline exceeded".to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(AnalyticsError::TransientUnavailable("503".into()).is_retryable());
        assert!(AnalyticsError::RateLimited { message: "slow down".into(), retry_after: None }
            .is_retryable());
        assert!(!AnalyticsError::AuthMissing("etherscan".into()).is_retryable());
        assert!(!AnalyticsError::Validation("bad protocol".into()).is_retryable());
    }

    #[test]
    fn test_skip_classification() {
        assert!(AnalyticsError::AuthMissing("graph".into()).skips_source());
        assert!(AnalyticsError::NotSupported("ethplorer".into()).skips_source());
        assert!(AnalyticsError::PermanentSchema("missing field".into()).skips_source());
        assert!(!AnalyticsError::TransientUnavailable("503".into()).skips_source());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(AnalyticsError::Validation("x".into()).exit_code(), 2);
        assert_eq!(AnalyticsError::Cancelled("x".into()).exit_code(), 4);
        assert_eq!(AnalyticsError::Internal("x".into()).exit_code(), 1);
        assert_eq!(AnalyticsError::StorageIO("x".into()).exit_code(), 1);
    }
}
