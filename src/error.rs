use reqwest::StatusCode;
use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

/// Classification shared by every layer of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimited,
    NetworkUnavailable,
    ClientRejected,
    ServerFailure,
    InvalidData,
    Configuration,
    Other,
}

/// Pipeline error. Cloneable so a settled failure can be handed to every
/// waiter of a shared in-flight request.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("rate limited by upstream API")]
    RateLimited,
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("request rejected with status {status}")]
    ClientRejected { status: u16 },
    #[error("upstream failure: {detail}")]
    ServerFailure { status: Option<u16>, detail: String },
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("{0}")]
    Message(String),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }

    pub fn invalid_data<T: Into<String>>(msg: T) -> Self {
        AppError::InvalidData(msg.into())
    }

    pub fn configuration<T: Into<String>>(msg: T) -> Self {
        AppError::Configuration(msg.into())
    }

    pub fn server_failure<T: Into<String>>(status: Option<u16>, detail: T) -> Self {
        AppError::ServerFailure {
            status,
            detail: detail.into(),
        }
    }

    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: StatusCode) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            AppError::RateLimited
        } else if status.is_client_error() {
            AppError::ClientRejected {
                status: status.as_u16(),
            }
        } else {
            AppError::server_failure(
                Some(status.as_u16()),
                status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            )
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::RateLimited => ErrorKind::RateLimited,
            AppError::NetworkUnavailable(_) => ErrorKind::NetworkUnavailable,
            AppError::ClientRejected { .. } => ErrorKind::ClientRejected,
            AppError::ServerFailure { .. } => ErrorKind::ServerFailure,
            AppError::InvalidData(_) => ErrorKind::InvalidData,
            AppError::Configuration(_) => ErrorKind::Configuration,
            AppError::Message(_) => ErrorKind::Other,
        }
    }

    /// HTTP status associated with the failure, when one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AppError::RateLimited => Some(429),
            AppError::ClientRejected { status } => Some(*status),
            AppError::ServerFailure { status, .. } => *status,
            _ => None,
        }
    }

    /// Only transient transport conditions are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimited | ErrorKind::NetworkUnavailable | ErrorKind::ServerFailure
        )
    }

    /// Fixed, non-sensitive text suitable for display.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::RateLimited => "Too many requests. Please wait a moment and try again.",
            ErrorKind::NetworkUnavailable => "Network unavailable. Check your connection.",
            ErrorKind::ClientRejected => "The request could not be processed.",
            ErrorKind::ServerFailure => "The market data service is having trouble. Try again later.",
            ErrorKind::InvalidData => "Received data could not be displayed.",
            ErrorKind::Configuration => "Unsupported selection.",
            ErrorKind::Other => "Something went wrong.",
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return AppError::from_status(status);
        }
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return AppError::NetworkUnavailable(err.to_string());
        }
        if err.is_decode() || err.is_body() {
            return AppError::server_failure(None, err.to_string());
        }
        AppError::NetworkUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::server_failure(None, format!("malformed body: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Message(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<AppError>() {
            Ok(app) => app,
            Err(other) => AppError::Message(format!("{other:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_statuses() {
        assert!(matches!(
            AppError::from_status(StatusCode::TOO_MANY_REQUESTS),
            AppError::RateLimited
        ));
        assert!(matches!(
            AppError::from_status(StatusCode::NOT_FOUND),
            AppError::ClientRejected { status: 404 }
        ));
        let err = AppError::from_status(StatusCode::BAD_GATEWAY);
        assert_eq!(err.kind(), ErrorKind::ServerFailure);
        assert_eq!(err.status_code(), Some(502));
    }

    #[test]
    fn retryability_follows_kind() {
        assert!(AppError::RateLimited.is_retryable());
        assert!(AppError::NetworkUnavailable("down".into()).is_retryable());
        assert!(AppError::server_failure(Some(500), "boom").is_retryable());
        assert!(!AppError::ClientRejected { status: 400 }.is_retryable());
        assert!(!AppError::invalid_data("empty").is_retryable());
        assert!(!AppError::configuration("5m").is_retryable());
    }

    #[test]
    fn user_message_hides_details() {
        let err = AppError::server_failure(Some(500), "https://internal/path exploded");
        assert!(!err.user_message().contains("internal"));
    }

    #[test]
    fn anyhow_context_preserves_classification() {
        let wrapped = anyhow::Error::new(AppError::RateLimited).context("listing");
        let converted: AppError = wrapped.into();
        assert_eq!(converted.kind(), ErrorKind::RateLimited);

        let plain: AppError = anyhow::anyhow!("disk full").into();
        assert_eq!(plain.kind(), ErrorKind::Other);
    }
}
