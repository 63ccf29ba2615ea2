//! Procedure Invocation API
//!
//! Types for calling adapter procedures on the gateway.

use crate::client::RawResponse;
use crate::error::{MfpError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Procedure to invoke and its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureInvocationData {
    /// Adapter hosting the procedure
    pub adapter: String,

    /// Procedure name
    pub procedure: String,

    /// Positional parameters, sent as a JSON array
    #[serde(default)]
    pub parameters: Vec<Value>,
}

impl ProcedureInvocationData {
    /// Create invocation data without parameters
    pub fn new(adapter: impl Into<String>, procedure: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            procedure: procedure.into(),
            parameters: Vec::new(),
        }
    }

    /// Parse a target in the format "adapter/procedure"
    pub fn parse(target: &str) -> Result<Self> {
        match target.split('/').collect::<Vec<_>>().as_slice() {
            [adapter, procedure] if !adapter.is_empty() && !procedure.is_empty() => {
                Ok(Self::new(*adapter, *procedure))
            }
            _ => Err(MfpError::InvalidRequest(format!(
                "Invalid procedure '{}'. Expected 'adapter/procedure'",
                target
            ))),
        }
    }

    /// Replace the parameters
    pub fn with_parameters(mut self, parameters: Vec<Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Append one parameter
    pub fn parameter(mut self, value: impl Into<Value>) -> Self {
        self.parameters.push(value.into());
        self
    }

    /// URL-encoded form body: `params=<JSON array>`
    pub fn form_body(&self) -> Result<String> {
        let params = serde_json::to_string(&self.parameters)?;
        Ok(url::form_urlencoded::Serializer::new(String::new())
            .append_pair("params", &params)
            .finish())
    }
}

impl fmt::Display for ProcedureInvocationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.adapter, self.procedure)
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct InvocationOptions {
    /// Timeout in milliseconds; `Some(0)` disables, `None` uses the client default
    pub timeout_ms: Option<u64>,

    /// Opaque value handed back with the result
    pub invocation_context: Option<Value>,

    /// Cancels the call when triggered
    pub cancellation: Option<CancellationToken>,
}

impl InvocationOptions {
    /// Options using the client defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout_millis(timeout));
        self
    }

    /// Set the timeout in milliseconds; 0 disables it
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Never time out
    pub fn without_timeout(self) -> Self {
        self.with_timeout_ms(0)
    }

    /// Attach an invocation context
    pub fn with_context(mut self, context: impl Into<Value>) -> Self {
        self.invocation_context = Some(context.into());
        self
    }

    /// Attach a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Timeout to apply given the client default
    pub fn effective_timeout(&self, default: Option<Duration>) -> Option<Duration> {
        match self.timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => default,
        }
    }
}

/// Milliseconds for a timeout setting. Only a zero duration maps to 0;
/// anything shorter than a millisecond becomes 1 ms.
pub(crate) fn timeout_millis(timeout: Duration) -> u64 {
    if timeout.is_zero() {
        return 0;
    }
    u64::try_from(timeout.as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

/// Successful procedure result
#[derive(Debug, Clone)]
pub struct ProcedureResponse {
    /// HTTP status
    pub status: u16,

    /// Response body as JSON; non-JSON bodies become a string
    pub payload: Value,

    /// Response headers
    pub headers: Vec<(String, String)>,

    /// Context supplied with the invocation options
    pub invocation_context: Option<Value>,
}

impl ProcedureResponse {
    /// Interpret a gateway response.
    ///
    /// 401 and 403 are authentication failures. Other failure statuses and
    /// payloads reporting `"isSuccessful": false` are server errors.
    pub fn from_raw(raw: RawResponse, invocation_context: Option<Value>) -> Result<Self> {
        if !raw.is_success() {
            return Err(raw.status_error());
        }

        let payload = serde_json::from_slice::<Value>(&raw.body)
            .unwrap_or_else(|_| Value::String(raw.text()));

        if payload.get("isSuccessful").and_then(Value::as_bool) == Some(false) {
            return Err(MfpError::Server {
                status: raw.status,
                message: procedure_errors(&payload),
            });
        }

        Ok(Self {
            status: raw.status,
            payload,
            headers: raw.headers,
            invocation_context,
        })
    }

    /// Deserialize the payload into a typed value
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(MfpError::from)
    }
}

/// Error text from an unsuccessful procedure payload
fn procedure_errors(payload: &Value) -> String {
    match payload.get("errors") {
        Some(Value::Array(errors)) if !errors.is_empty() => errors
            .iter()
            .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
            .collect::<Vec<_>>()
            .join("; "),
        Some(Value::String(error)) => error.clone(),
        _ => "procedure reported an unsuccessful result".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_target() {
        let data = ProcedureInvocationData::parse("Accounts/getBalance").unwrap();
        assert_eq!(data.adapter, "Accounts");
        assert_eq!(data.procedure, "getBalance");
        assert_eq!(data.to_string(), "Accounts/getBalance");
    }

    #[test]
    fn test_parse_invalid_target() {
        assert!(ProcedureInvocationData::parse("justAProcedure").is_err());
        assert!(ProcedureInvocationData::parse("a/b/c").is_err());
        assert!(ProcedureInvocationData::parse("/getBalance").is_err());
    }

    #[test]
    fn test_form_body() {
        let data = ProcedureInvocationData::new("Accounts", "transfer")
            .parameter("ACC-1")
            .parameter(25);
        assert_eq!(
            data.form_body().unwrap(),
            "params=%5B%22ACC-1%22%2C25%5D"
        );
    }

    #[test]
    fn test_effective_timeout() {
        let default = Some(Duration::from_secs(10));

        assert_eq!(InvocationOptions::new().effective_timeout(default), default);
        assert_eq!(
            InvocationOptions::new()
                .with_timeout(Duration::from_millis(1500))
                .effective_timeout(default),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            InvocationOptions::new().without_timeout().effective_timeout(default),
            None
        );
    }

    #[test]
    fn test_sub_millisecond_timeout_stays_bounded() {
        let options = InvocationOptions::new().with_timeout(Duration::from_micros(500));
        assert_eq!(options.timeout_ms, Some(1));
        assert_eq!(options.effective_timeout(None), Some(Duration::from_millis(1)));

        assert_eq!(timeout_millis(Duration::ZERO), 0);
        assert_eq!(timeout_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(timeout_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_response_from_json() {
        let raw = RawResponse::new(200, r#"{"isSuccessful":true,"balance":120}"#);
        let response = ProcedureResponse::from_raw(raw, Some(json!("ctx"))).unwrap();

        assert_eq!(response.payload["balance"], 120);
        assert_eq!(response.invocation_context, Some(json!("ctx")));
    }

    #[test]
    fn test_response_from_text() {
        let response = ProcedureResponse::from_raw(RawResponse::new(200, "plain"), None).unwrap();
        assert_eq!(response.payload, json!("plain"));
    }

    #[test]
    fn test_unsuccessful_payload_is_server_error() {
        let raw = RawResponse::new(
            200,
            r#"{"isSuccessful":false,"errors":["Runtime: backend down","retry later"]}"#,
        );
        match ProcedureResponse::from_raw(raw, None) {
            Err(MfpError::Server { status, message }) => {
                assert_eq!(status, 200);
                assert_eq!(message, "Runtime: backend down; retry later");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_failure_status_is_server_error() {
        let err = ProcedureResponse::from_raw(RawResponse::new(503, "unavailable"), None).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ServerError);

        let err = ProcedureResponse::from_raw(RawResponse::new(401, "login"), None).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::AuthenticationFailure);
    }

    #[test]
    fn test_payload_as() {
        #[derive(Deserialize)]
        struct Balance {
            balance: u32,
        }

        let response =
            ProcedureResponse::from_raw(RawResponse::new(200, r#"{"balance":7}"#), None).unwrap();
        let balance: Balance = response.payload_as().unwrap();
        assert_eq!(balance.balance, 7);
    }
}
