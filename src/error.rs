// error.rs

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Sensor directory unavailable: {message} (status: {status:?})")]
    DirectoryUnavailable {
        message: String,
        status: Option<u16>,
    },

    #[error("Sensor {sensor_index} metadata incomplete: {message}")]
    SensorMetadataIncomplete { sensor_index: i64, message: String },

    #[error("Transient fetch failure: {message} (context: {context})")]
    TransientFetch { message: String, context: String },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Duration,
    },

    #[error("Server error: {message} (status: {status})")]
    Server {
        message: String,
        status: u16,
        body: Option<String>,
    },

    #[error("Malformed reading: {value} matches no AQI category")]
    MalformedReading { value: f64 },

    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        context: String,
        validation_errors: Vec<String>,
    },

    #[error("Metadata artifact error: {message} ({path:?})")]
    Metadata { message: String, path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

impl PipelineError {
    /// Returns true if the error is likely transient and the request can be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientFetch { .. } => true,
            Self::RateLimited { .. } => true,
            Self::Server { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            Self::Reqwest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Returns a suggested retry delay if applicable
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Errors that abort a whole run rather than a single fetch unit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DirectoryUnavailable { .. }
                | Self::MalformedReading { .. }
                | Self::InvalidRequest { .. }
                | Self::Metadata { .. }
        )
    }

    pub fn transient<T: Into<String>, C: Into<String>>(message: T, context: C) -> Self {
        Self::TransientFetch {
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn invalid_request<T: Into<String>, C: Into<String>>(
        message: T,
        context: C,
        validation_errors: Vec<String>,
    ) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            context: context.into(),
            validation_errors,
        }
    }

    pub fn metadata<T: Into<String>>(message: T, path: impl Into<PathBuf>) -> Self {
        Self::Metadata {
            message: message.into(),
            path: path.into(),
        }
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::RateLimited {
            message: format!(
                "{}, cooling down for {:?}",
                crate::constants::ERRORS.rate_limit,
                retry_after
            ),
            retry_after,
        }
    }
}

/// Result type alias for PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retryable() {
        let err = PipelineError::transient("connection reset", "sensor 42");
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
        assert!(err.retry_after().is_none());
    }

    #[test]
    fn test_rate_limit_carries_cooldown() {
        let err = PipelineError::rate_limited(Duration::from_secs(60));
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_server_status_classification() {
        let busy = PipelineError::Server {
            message: "unavailable".into(),
            status: 503,
            body: None,
        };
        assert!(busy.is_retryable());

        let missing = PipelineError::Server {
            message: "not found".into(),
            status: 404,
            body: None,
        };
        assert!(!missing.is_retryable());
        assert!(!missing.is_fatal());
    }

    #[test]
    fn test_directory_and_aqi_failures_are_fatal() {
        let err = PipelineError::DirectoryUnavailable {
            message: "HTTP 500".into(),
            status: Some(500),
        };
        assert!(err.is_fatal());
        assert!(PipelineError::MalformedReading { value: f64::INFINITY }.is_fatal());
    }
}
