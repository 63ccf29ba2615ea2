//! Raw Gateway Requests
//!
//! Arbitrary HTTP requests sent through the session's transport, cookie jar,
//! global headers and challenge handling.

use crate::error::{MfpError, Result};
use bytes::Bytes;
use reqwest::Method;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// A raw request to the gateway
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,

    /// Path relative to the server URL, or an absolute http(s) URL
    pub target: String,

    /// Request-specific headers; these override global headers
    pub headers: BTreeMap<String, String>,

    pub body: Option<Bytes>,

    /// Timeout for this request; `None` uses the client default
    pub timeout: Option<Duration>,
}

impl GatewayRequest {
    /// Create a request
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// GET request
    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    /// POST request
    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set a raw body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body and content type
    pub fn json<T: Serialize>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self.header("Content-Type", "application/json").body(body))
    }

    /// Set the timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolve the target against the server URL
    pub fn resolve(&self, base: Option<&Url>) -> Result<Url> {
        if let Ok(url) = Url::parse(&self.target) {
            if matches!(url.scheme(), "http" | "https") {
                return Ok(url);
            }
        }

        let base = base.ok_or(MfpError::NotConfigured)?;
        resolve_path(base, &self.target)
    }
}

/// Append a relative path (with optional query) to the server URL, keeping
/// the server's context path.
pub fn resolve_path(base: &Url, path: &str) -> Result<Url> {
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };

    let mut url = base.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            MfpError::InvalidRequest(format!("Server URL '{}' cannot be a base", base))
        })?;
        segments.pop_if_empty();
        segments.extend(path.split('/').filter(|segment| !segment.is_empty()));
    }
    url.set_query(query);
    url.set_fragment(None);
    Ok(url)
}
