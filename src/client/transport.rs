//! Transport Abstraction
//!
//! The facade never talks to the network directly; it hands fully prepared
//! requests to a `Transport`. The default implementation lives in
//! [`crate::client::http`].

use crate::error::MfpError;
use crate::security::PublicKeyPin;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// A request ready to be put on the wire
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: Url,

    /// Header snapshot taken at dispatch time
    pub headers: BTreeMap<String, String>,

    pub body: Option<Bytes>,

    /// Pin in force when the request was dispatched
    pub pin: Option<Arc<PublicKeyPin>>,
}

impl OutgoingRequest {
    /// Whether the request goes over TLS
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// Host name of the target, empty when the URL has none
    pub fn host(&self) -> String {
        self.url.host_str().unwrap_or_default().to_string()
    }
}

/// A response as received from the gateway, whatever its status
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RawResponse {
    /// Create a response with a status and body
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Add a response header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header with this name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body as (lossy) UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Error describing a failure status; 401 and 403 are authentication
    /// failures, everything else is a server error
    pub fn status_error(&self) -> MfpError {
        let message = truncate(&self.text());
        match self.status {
            401 | 403 => MfpError::Authentication {
                status: self.status,
                message,
            },
            status => MfpError::Server { status, message },
        }
    }

    /// Body parsed as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, MfpError> {
        serde_json::from_slice(&self.body).map_err(MfpError::from)
    }
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(500) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Errors raised below the HTTP layer
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection could not be established or was dropped
    #[error("{0}")]
    Unreachable(String),

    /// TLS handshake refused by the pinning verifier
    #[error("certificate pin rejected '{host}'")]
    PinRejected { host: String },

    /// The request could not be encoded
    #[error("{0}")]
    InvalidRequest(String),

    /// The transport itself could not be set up
    #[error("{0}")]
    Setup(String),
}

impl TransportError {
    /// Whether retrying on a fresh connection could help
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Unreachable(_))
    }
}

impl From<TransportError> for MfpError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unreachable(msg) => MfpError::UnresponsiveHost(msg),
            TransportError::PinRejected { host } => MfpError::PinRejected { host },
            TransportError::InvalidRequest(msg) => MfpError::InvalidRequest(msg),
            TransportError::Setup(msg) => MfpError::Internal(msg),
        }
    }
}

/// Network layer used by the client
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the response, whatever its status
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, TransportError>;

    /// Drop cookies, pooled connections and other per-endpoint state
    fn reset(&self);

    /// `Cookie` header value the transport would send to `url`
    fn cookie_header(&self, _url: &Url) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_helpers() {
        let response = RawResponse::new(201, r#"{"ok":true}"#).with_header("Content-Type", "application/json");

        assert!(response.is_success());
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("x-missing"), None);

        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["ok"], true);
    }

    #[test]
    fn test_status_error() {
        let denied = RawResponse::new(403, "forbidden").status_error();
        assert!(matches!(denied, MfpError::Authentication { status: 403, .. }));

        let long = RawResponse::new(502, "x".repeat(800)).status_error();
        match long {
            MfpError::Server { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message.len(), 503);
                assert!(message.ends_with("..."));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_transport_error_classification() {
        assert!(TransportError::Unreachable("refused".to_string()).is_retryable());
        assert!(!TransportError::PinRejected {
            host: "h".to_string()
        }
        .is_retryable());

        let err: MfpError = TransportError::PinRejected {
            host: "gateway.example.com".to_string(),
        }
        .into();
        assert_eq!(err.code(), crate::error::ErrorCode::UnresponsiveHost);
    }
}
