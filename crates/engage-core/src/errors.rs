use std::time::Duration;

/// Outcome classification for a failed activity delivery.
///
/// The pipeline never retries; the classification exists so sinks and
/// their callers can log, count, and decide for themselves.
#[derive(Clone, Debug, thiserror::Error)]
pub enum DeliveryError {
    // Retryable by a caller that chooses to
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    // Permanent
    #[error("rejected {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(String),

    #[error("cancelled")]
    Cancelled,
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::Server { .. } | Self::RateLimited { .. }
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Server { .. } => "server",
            Self::RateLimited { .. } => "rate_limited",
            Self::Rejected { .. } => "rejected",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::Server { status, body },
            _ => Self::Rejected { status, body },
        }
    }
}

impl From<serde_json::Error> for DeliveryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Errors constructing the pipeline. Admission operations never return these.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Errors that can occur when loading or parsing settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A settings value was invalid (e.g., out of range).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(DeliveryError::Network("reset".into()).is_retryable());
        assert!(DeliveryError::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(DeliveryError::Server { status: 503, body: String::new() }.is_retryable());
        assert!(DeliveryError::RateLimited { retry_after: None }.is_retryable());
    }

    #[test]
    fn permanent_classification() {
        assert!(!DeliveryError::Rejected { status: 400, body: "bad".into() }.is_retryable());
        assert!(!DeliveryError::Serialization("eof".into()).is_retryable());
        assert!(!DeliveryError::Cancelled.is_retryable());
    }

    #[test]
    fn from_status_mapping() {
        assert!(matches!(
            DeliveryError::from_status(429, String::new()),
            DeliveryError::RateLimited { .. }
        ));
        assert!(matches!(
            DeliveryError::from_status(502, "bad gateway".into()),
            DeliveryError::Server { status: 502, .. }
        ));
        assert!(matches!(
            DeliveryError::from_status(401, "nope".into()),
            DeliveryError::Rejected { status: 401, .. }
        ));
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(DeliveryError::Cancelled.error_kind(), "cancelled");
        assert_eq!(DeliveryError::from_status(500, String::new()).error_kind(), "server");
        assert_eq!(
            DeliveryError::RateLimited { retry_after: None }.error_kind(),
            "rate_limited"
        );
    }

    #[test]
    fn settings_invalid_value_display() {
        let err = SettingsError::InvalidValue("debounce out of range".to_string());
        assert_eq!(err.to_string(), "invalid settings value: debounce out of range");
    }

    #[test]
    fn settings_json_error_from_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: SettingsError = json_err.into();
        assert!(matches!(err, SettingsError::Json(_)));
    }
}
