//! HTTP Transport
//!
//! Default transport on reqwest with a shared cookie jar and public key
//! pinning. One reqwest client is cached per pin; a request carrying a
//! different pin than the cached client gets a freshly built client, so a
//! request is never sent under a pin other than the one it was dispatched
//! with.

use crate::client::transport::{OutgoingRequest, RawResponse, Transport, TransportError};
use crate::config::ClientConfig;
use crate::security::{pinned_tls_config, PublicKeyPin, PIN_MISMATCH_MARKER};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// reqwest client built for one pin
struct CachedClient {
    pin: Option<[u8; 32]>,
    client: Client,
}

/// HTTP transport backed by reqwest
pub struct ReqwestTransport {
    connect_timeout: Duration,
    user_agent: String,

    /// Cookie jar shared by every cached client; replaced on reset
    jar: RwLock<Arc<Jar>>,

    cached: RwLock<Option<CachedClient>>,
}

impl ReqwestTransport {
    /// Create a new transport. The reqwest client is built on first use.
    pub fn new(connect_timeout: Duration, user_agent: impl Into<String>) -> Self {
        Self {
            connect_timeout,
            user_agent: user_agent.into(),
            jar: RwLock::new(Arc::new(Jar::default())),
            cached: RwLock::new(None),
        }
    }

    /// Create a transport from client settings
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.connect_timeout(), config.user_agent.clone())
    }

    /// Get (or build) the client for a pin
    fn client_for(&self, pin: Option<&Arc<PublicKeyPin>>) -> Result<Client, TransportError> {
        let wanted = pin.map(|p| p.fingerprint());

        if let Some(cached) = self.cached.read().as_ref() {
            if cached.pin == wanted {
                return Ok(cached.client.clone());
            }
        }

        let mut guard = self.cached.write();
        if let Some(cached) = guard.as_ref() {
            if cached.pin == wanted {
                return Ok(cached.client.clone());
            }
        }

        let client = self.build_client(pin)?;
        tracing::debug!(
            pinned = wanted.is_some(),
            "built HTTP client for gateway transport"
        );
        *guard = Some(CachedClient {
            pin: wanted,
            client: client.clone(),
        });
        Ok(client)
    }

    fn build_client(&self, pin: Option<&Arc<PublicKeyPin>>) -> Result<Client, TransportError> {
        // No overall timeout here: request lifetime is bounded by the caller
        let mut builder = Client::builder()
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(10)
            .user_agent(self.user_agent.clone())
            .cookie_provider(self.jar.read().clone());

        if let Some(pin) = pin {
            let tls = pinned_tls_config(pin.clone())
                .map_err(|e| TransportError::Setup(e.to_string()))?;
            builder = builder.use_preconfigured_tls(tls);
        }

        builder
            .build()
            .map_err(|e| TransportError::Setup(format!("Failed to create HTTP client: {}", e)))
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, TransportError> {
        // Plain http has no handshake to pin
        let pin = request.pin.as_ref().filter(|_| request.is_secure());
        let client = self.client_for(pin)?;
        let host = request.host();

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let header_name = HeaderName::try_from(name.as_str()).map_err(|e| {
                TransportError::InvalidRequest(format!("Invalid header name '{}': {}", name, e))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                TransportError::InvalidRequest(format!("Invalid value for header '{}': {}", name, e))
            })?;
            headers.insert(header_name, header_value);
        }

        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_send_error(e, &host))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(|e| {
            TransportError::Unreachable(format!("Failed to read response body: {}", e))
        })?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    fn reset(&self) {
        *self.jar.write() = Arc::new(Jar::default());
        *self.cached.write() = None;
        tracing::debug!("gateway transport context cleared");
    }

    fn cookie_header(&self, url: &Url) -> Option<String> {
        self.jar
            .read()
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }
}

/// Map a reqwest send error onto a transport error
fn classify_send_error(err: reqwest::Error, host: &str) -> TransportError {
    if mentions_pin_mismatch(&err) {
        return TransportError::PinRejected {
            host: host.to_string(),
        };
    }

    if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else if err.is_connect() || err.is_timeout() {
        TransportError::Unreachable(format!("Connection to '{}' failed: {}", host, err))
    } else {
        TransportError::Unreachable(err.to_string())
    }
}

/// Walk an error chain looking for the pin verifier's rejection
fn mentions_pin_mismatch(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.to_string().contains(PIN_MISMATCH_MARKER) {
            return true;
        }
        current = e.source();
    }
    false
}
