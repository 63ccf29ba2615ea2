//! MFP Client Error Types
//!
//! Error handling for the gateway session client. Every failure maps onto one
//! of the five gateway error classifications reported to callers.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Classification reported to delegates and futures.
///
/// The numeric values are stable and match the codes the gateway SDKs use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// Programming or state misuse (no endpoint, bad header, cancelled call)
    InternalError = 1,

    /// The host could not be reached or refused the connection
    UnresponsiveHost = 2,

    /// The configured request timeout elapsed
    RequestTimeout = 3,

    /// The gateway answered with a failure status
    ServerError = 4,

    /// Challenge handling ended without resolving
    AuthenticationFailure = 5,
}

impl ErrorCode {
    /// Numeric value of the classification
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::InternalError => "internal error",
            ErrorCode::UnresponsiveHost => "unresponsive host",
            ErrorCode::RequestTimeout => "request timeout",
            ErrorCode::ServerError => "server error",
            ErrorCode::AuthenticationFailure => "authentication failure",
        };
        f.write_str(name)
    }
}

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum MfpError {
    /// Configuration errors (invalid JSON, bad values, unreadable files)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Certificate could not be read or parsed for pinning
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// A request was issued before the server URL was configured
    #[error("Server URL is not configured. Call set_server_url before sending requests")]
    NotConfigured,

    /// The request could not be built (bad path, header or body)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Connection to the gateway failed
    #[error("Host unreachable: {0}")]
    UnresponsiveHost(String),

    /// The presented certificate did not match the pinned public key
    #[error("Certificate pin rejected the connection to '{host}'")]
    PinRejected { host: String },

    /// Configured timeout elapsed
    #[error("Request timeout after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// Gateway returned a failure status or an unsuccessful payload
    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },

    /// Gateway refused the request and no challenge handler could resolve it
    #[error("Authentication failed (status {status}): {message}")]
    Authentication { status: u16, message: String },

    /// The caller cancelled the operation
    #[error("Operation cancelled by caller")]
    Cancelled,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MfpError {
    /// Classification of this error
    pub fn code(&self) -> ErrorCode {
        match self {
            MfpError::Config(_)
            | MfpError::Certificate(_)
            | MfpError::NotConfigured
            | MfpError::InvalidRequest(_)
            | MfpError::Cancelled
            | MfpError::Internal(_) => ErrorCode::InternalError,
            MfpError::UnresponsiveHost(_) | MfpError::PinRejected { .. } => {
                ErrorCode::UnresponsiveHost
            }
            MfpError::Timeout(_) => ErrorCode::RequestTimeout,
            MfpError::Server { .. } => ErrorCode::ServerError,
            MfpError::Authentication { .. } => ErrorCode::AuthenticationFailure,
        }
    }
}

impl From<reqwest::Error> for MfpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            MfpError::UnresponsiveHost(err.to_string())
        } else if err.is_builder() {
            MfpError::InvalidRequest(err.to_string())
        } else {
            MfpError::Internal(err.to_string())
        }
    }
}

impl From<serde_json::Error> for MfpError {
    fn from(err: serde_json::Error) -> Self {
        MfpError::Internal(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for MfpError {
    fn from(err: std::io::Error) -> Self {
        MfpError::Config(format!("IO error: {}", err))
    }
}

impl From<url::ParseError> for MfpError {
    fn from(err: url::ParseError) -> Self {
        MfpError::InvalidRequest(format!("Invalid URL: {}", err))
    }
}

/// A failed invocation as seen by a delegate.
///
/// Carries the caller's invocation context back so concurrent calls can be
/// told apart.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Failure {
    /// What went wrong
    #[source]
    pub error: MfpError,

    /// Context supplied with the invocation options, returned verbatim
    pub invocation_context: Option<Value>,
}

impl Failure {
    /// Wrap an error with an invocation context
    pub fn new(error: MfpError, invocation_context: Option<Value>) -> Self {
        Self {
            error,
            invocation_context,
        }
    }

    /// Classification of the underlying error
    pub fn code(&self) -> ErrorCode {
        self.error.code()
    }

    /// HTTP status that caused the failure, when there was one
    pub fn status(&self) -> Option<u16> {
        match &self.error {
            MfpError::Server { status, .. } | MfpError::Authentication { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

impl From<MfpError> for Failure {
    fn from(error: MfpError) -> Self {
        Failure::new(error, None)
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, MfpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ErrorCode::InternalError.as_u8(), 1);
        assert_eq!(ErrorCode::UnresponsiveHost.as_u8(), 2);
        assert_eq!(ErrorCode::RequestTimeout.as_u8(), 3);
        assert_eq!(ErrorCode::ServerError.as_u8(), 4);
        assert_eq!(ErrorCode::AuthenticationFailure.as_u8(), 5);
    }

    #[test]
    fn test_classification() {
        assert_eq!(MfpError::NotConfigured.code(), ErrorCode::InternalError);
        assert_eq!(MfpError::Cancelled.code(), ErrorCode::InternalError);
        assert_eq!(
            MfpError::PinRejected {
                host: "gateway.example.com".to_string()
            }
            .code(),
            ErrorCode::UnresponsiveHost
        );
        assert_eq!(
            MfpError::Timeout(Duration::from_secs(10)).code(),
            ErrorCode::RequestTimeout
        );
        assert_eq!(
            MfpError::Server {
                status: 500,
                message: "boom".to_string()
            }
            .code(),
            ErrorCode::ServerError
        );
    }

    #[test]
    fn test_failure_keeps_context_and_status() {
        let failure = Failure::new(
            MfpError::Authentication {
                status: 401,
                message: "denied".to_string(),
            },
            Some(serde_json::json!({"call": 7})),
        );

        assert_eq!(failure.code(), ErrorCode::AuthenticationFailure);
        assert_eq!(failure.status(), Some(401));
        assert_eq!(failure.invocation_context.unwrap()["call"], 7);
    }

    #[test]
    fn test_timeout_message() {
        let err = MfpError::Timeout(Duration::from_millis(2500));
        assert_eq!(err.to_string(), "Request timeout after 2500 ms");
    }
}
