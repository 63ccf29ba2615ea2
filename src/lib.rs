//! MFP Client - session client for mobile backend gateways
//!
//! One `MfpClient` is one logical session with a gateway: it owns the server
//! URL, the global headers sent with every request, the challenge handlers
//! that resolve authentication challenges, the heartbeat that keeps the
//! session alive and the certificate pin that secured requests must satisfy.
//! Network I/O goes through an injected [`Transport`].
//!
//! ```no_run
//! use mfp_client::{InvocationOptions, MfpClient, ProcedureInvocationData};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = MfpClient::shared();
//! client.set_server_url("https://gateway.example.com/mfp".parse()?);
//! client.add_global_header("X-App-Version", "2.4.0");
//!
//! let data = ProcedureInvocationData::parse("Accounts/getBalance")?.parameter("ACC-1");
//! let response = client
//!     .invoke_procedure(&data, InvocationOptions::new().with_context("balance"))
//!     .await?;
//! println!("{}", response.payload);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::Method;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod security;

pub use api::{
    GatewayRequest, InvocationDelegate, InvocationOptions, ProcedureInvocationData,
    ProcedureResponse, ResponseHandler,
};
pub use client::{OutgoingRequest, RawResponse, ReqwestTransport, Transport, TransportError};
pub use config::{ClientConfig, ConfigLoader, GatewayPaths};
pub use error::{ErrorCode, Failure, MfpError, Result};
pub use security::{Challenge, ChallengeAnswer, ChallengeHandler, PublicKeyPin};

use api::resolve_path;
use client::{GlobalHeaders, Heartbeat, Pulse};
use security::{parse_challenges, ChallengeRegistry};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static SHARED: OnceLock<MfpClient> = OnceLock::new();

/// Gateway session client
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct MfpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    server_url: RwLock<Option<Url>>,
    default_timeout_ms: AtomicU64,

    /// Bumped every time the endpoint changes
    session_epoch: AtomicU64,

    headers: GlobalHeaders,
    challenges: ChallengeRegistry,
    pin: RwLock<Option<Arc<PublicKeyPin>>>,
    transport: Arc<dyn Transport>,
    heartbeat: Heartbeat,
}

impl MfpClient {
    /// The process-wide client, created from the default configuration
    /// sources on first access.
    ///
    /// Never fails: unreadable configuration or pin files are logged and
    /// replaced by defaults.
    pub fn shared() -> MfpClient {
        SHARED
            .get_or_init(|| {
                let config = ConfigLoader::new()
                    .and_then(ConfigLoader::into_config)
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "falling back to default client configuration");
                        ClientConfig::default()
                    });

                let pin = load_configured_pin(&config).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "ignoring configured certificate pin");
                    None
                });

                let transport = Arc::new(ReqwestTransport::from_config(&config));
                Self::assemble(config, transport, pin)
            })
            .clone()
    }

    /// Create a client with the default reqwest transport
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::from_config(&config));
        Self::with_transport(config, transport)
    }

    /// Create a client from the default configuration sources
    pub fn from_default_config() -> Result<Self> {
        Self::new(ConfigLoader::new()?.into_config()?)
    }

    /// Create a client with a custom transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let pin = load_configured_pin(&config)?;
        Ok(Self::assemble(config, transport, pin))
    }

    fn assemble(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        pin: Option<Arc<PublicKeyPin>>,
    ) -> Self {
        let inner = Arc::new(ClientInner {
            server_url: RwLock::new(config.server_url.clone()),
            default_timeout_ms: AtomicU64::new(config.default_timeout_ms),
            session_epoch: AtomicU64::new(0),
            headers: GlobalHeaders::with_headers(config.global_headers.clone()),
            challenges: ChallengeRegistry::new(),
            pin: RwLock::new(pin),
            transport,
            heartbeat: Heartbeat::new(config.heartbeat_interval_secs),
            config,
        });

        if inner.current_server_url().is_some() {
            inner.heartbeat.rearm(Arc::downgrade(&inner));
        }

        Self { inner }
    }

    // -------------------------------------------------------------------------
    // Endpoint
    // -------------------------------------------------------------------------

    /// Point the session at a new server URL (protocol, host, port, context).
    ///
    /// The URL is not validated. Cookies, pooled connections and cached TLS
    /// clients of the previous endpoint are discarded, so the application is
    /// no longer logged in anywhere.
    pub fn set_server_url(&self, url: Url) {
        let previous = self.inner.server_url.write().replace(url.clone());
        self.inner.transport.reset();
        let epoch = self.inner.session_epoch.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::info!(
            server_url = %url,
            previous = previous.as_ref().map(Url::as_str).unwrap_or("<unset>"),
            epoch,
            "server URL changed, session context cleared"
        );

        self.inner.heartbeat.rearm(Arc::downgrade(&self.inner));
    }

    /// Current server URL, if configured
    pub fn server_url(&self) -> Option<Url> {
        self.inner.current_server_url()
    }

    /// Number of endpoint changes so far
    pub fn session_epoch(&self) -> u64 {
        self.inner.session_epoch.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Global headers
    // -------------------------------------------------------------------------

    /// Add a header sent with every subsequent request
    pub fn add_global_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.headers.add(name, value);
    }

    /// Stop sending a global header
    pub fn remove_global_header(&self, name: &str) -> Option<String> {
        self.inner.headers.remove(name)
    }

    /// Current global headers
    pub fn global_headers(&self) -> BTreeMap<String, String> {
        self.inner.headers.snapshot()
    }

    // -------------------------------------------------------------------------
    // Challenge handlers
    // -------------------------------------------------------------------------

    /// Register a challenge handler under its security check, replacing any
    /// previous handler for that check
    pub fn register_challenge_handler(&self, handler: Arc<dyn ChallengeHandler>) {
        self.inner.challenges.register(handler);
    }

    /// Handler registered for a security check
    pub fn challenge_handler(&self, security_check: &str) -> Option<Arc<dyn ChallengeHandler>> {
        self.inner.challenges.get(security_check)
    }

    /// All registered handlers
    pub fn challenge_handlers(&self) -> HashMap<String, Arc<dyn ChallengeHandler>> {
        self.inner.challenges.all()
    }

    // -------------------------------------------------------------------------
    // Heartbeat and application lifecycle
    // -------------------------------------------------------------------------

    /// Set the heartbeat interval in seconds; zero or negative disables it.
    ///
    /// Heartbeats are only sent while the application is in the foreground.
    pub fn set_heartbeat_interval(&self, interval_secs: i64) {
        self.inner
            .heartbeat
            .set_interval(interval_secs, Arc::downgrade(&self.inner));
    }

    /// Heartbeat interval in seconds
    pub fn heartbeat_interval(&self) -> i64 {
        self.inner.heartbeat.interval_secs()
    }

    /// Host application moved to the foreground; heartbeat resumes
    pub fn on_foreground(&self) {
        tracing::debug!("application entered foreground");
        self.inner
            .heartbeat
            .set_foreground(true, Arc::downgrade(&self.inner));
    }

    /// Host application moved to the background; heartbeat stops
    pub fn on_background(&self) {
        tracing::debug!("application entered background");
        self.inner
            .heartbeat
            .set_foreground(false, Arc::downgrade(&self.inner));
    }

    /// Whether the host application is in the foreground
    pub fn is_foreground(&self) -> bool {
        self.inner.heartbeat.is_foreground()
    }

    /// Time of the last successful heartbeat
    pub fn last_heartbeat(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.inner.heartbeat.last_beat()
    }

    // -------------------------------------------------------------------------
    // Certificate pinning
    // -------------------------------------------------------------------------

    /// Pin the public key of the certificate in `certificate_file` (DER or
    /// PEM). Secured requests to servers presenting any other key are
    /// rejected during the handshake. A second call replaces the pin.
    pub fn pin_trusted_certificate_public_key(&self, certificate_file: impl AsRef<Path>) -> Result<()> {
        let pin = PublicKeyPin::from_certificate_file(certificate_file)?;
        self.pin_public_key(pin);
        Ok(())
    }

    /// Install an already loaded pin
    pub fn pin_public_key(&self, pin: PublicKeyPin) {
        tracing::info!(
            fingerprint = %pin.fingerprint_hex(),
            source = ?pin.source(),
            "certificate public key pinned"
        );
        *self.inner.pin.write() = Some(Arc::new(pin));
    }

    /// Currently pinned key
    pub fn pinned_public_key(&self) -> Option<Arc<PublicKeyPin>> {
        self.inner.current_pin()
    }

    // -------------------------------------------------------------------------
    // Defaults and session state
    // -------------------------------------------------------------------------

    /// Set the timeout used when invocation options carry none; zero disables
    pub fn set_default_timeout(&self, timeout: Duration) {
        self.inner
            .default_timeout_ms
            .store(api::timeout_millis(timeout), Ordering::SeqCst);
    }

    /// Default request timeout, `None` when disabled
    pub fn default_timeout(&self) -> Option<Duration> {
        self.inner.default_timeout()
    }

    /// `Cookie` header the session would send to `url`
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        self.inner.transport.cookie_header(url)
    }

    /// Settings the client was created with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------

    /// Send a raw request through the session and await the response.
    ///
    /// Any HTTP status is a response; only dispatch failures are errors.
    pub async fn execute(&self, request: GatewayRequest) -> Result<RawResponse> {
        let url = request.resolve(self.inner.current_server_url().as_ref())?;
        let timeout = match request.timeout {
            Some(limit) if limit.is_zero() => None,
            Some(limit) => Some(limit),
            None => self.inner.default_timeout(),
        };

        let outgoing = self
            .inner
            .prepare(request.method, url, &request.headers, request.body);
        bounded(self.inner.dispatch(outgoing), timeout, None).await
    }

    /// Send a raw request without waiting; the outcome goes to `handler`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn send_request(
        &self,
        request: GatewayRequest,
        handler: Arc<dyn ResponseHandler>,
    ) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            match client.execute(request).await {
                Ok(response) => handler.on_response(response),
                Err(e) => handler.on_failure(Failure::from(e)),
            }
        })
    }

    /// Invoke an adapter procedure.
    ///
    /// The invocation context from `options` comes back with the response or
    /// the failure.
    pub async fn invoke_procedure(
        &self,
        data: &ProcedureInvocationData,
        options: InvocationOptions,
    ) -> std::result::Result<ProcedureResponse, Failure> {
        let context = options.invocation_context.clone();
        let timeout = options.effective_timeout(self.inner.default_timeout());

        let outcome = bounded(
            self.inner.invoke(data),
            timeout,
            options.cancellation.as_ref(),
        )
        .await
        .and_then(|raw| ProcedureResponse::from_raw(raw, context.clone()));

        outcome.map_err(|error| {
            tracing::debug!(procedure = %data, code = %error.code(), error = %error, "procedure failed");
            Failure::new(error, context)
        })
    }

    /// Invoke an adapter procedure without waiting; the outcome goes to
    /// `delegate`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn invoke_procedure_with_delegate(
        &self,
        data: ProcedureInvocationData,
        delegate: Arc<dyn InvocationDelegate>,
        options: InvocationOptions,
    ) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            match client.invoke_procedure(&data, options).await {
                Ok(response) => delegate.on_success(response),
                Err(failure) => delegate.on_failure(failure),
            }
        })
    }

    // -------------------------------------------------------------------------
    // Device registration
    // -------------------------------------------------------------------------

    /// Update this device's display name on the gateway
    pub async fn set_device_display_name(&self, display_name: &str) -> Result<()> {
        let body = serde_json::json!({ "device": { "displayName": display_name } });
        let request =
            GatewayRequest::new(Method::PUT, self.inner.config.paths.registration.clone())
                .json(&body)?;

        let response = self.execute(request).await?;
        if !response.is_success() {
            return Err(response.status_error());
        }

        tracing::info!(display_name, "device display name updated");
        Ok(())
    }

    /// Read this device's display name from the gateway
    pub async fn device_display_name(&self) -> Result<String> {
        let request = GatewayRequest::get(self.inner.config.paths.registration.clone());
        let response = self.execute(request).await?;
        if !response.is_success() {
            return Err(response.status_error());
        }

        let value: Value = response.json()?;
        value
            .pointer("/device/displayName")
            .or_else(|| value.get("displayName"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| MfpError::Server {
                status: response.status,
                message: "registration response carries no display name".to_string(),
            })
    }
}

impl std::fmt::Debug for MfpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MfpClient")
            .field("server_url", &self.inner.current_server_url().map(String::from))
            .field("global_headers", &self.inner.headers.len())
            .field("challenges", &self.inner.challenges)
            .field("heartbeat_interval", &self.inner.heartbeat.interval_secs())
            .field("pinned", &self.inner.current_pin().is_some())
            .finish()
    }
}

impl ClientInner {
    fn current_server_url(&self) -> Option<Url> {
        self.server_url.read().clone()
    }

    fn current_pin(&self) -> Option<Arc<PublicKeyPin>> {
        self.pin.read().clone()
    }

    fn default_timeout(&self) -> Option<Duration> {
        let ms = self.default_timeout_ms.load(Ordering::SeqCst);
        (ms > 0).then(|| Duration::from_millis(ms))
    }

    /// Snapshot headers and pin into a request; request headers win
    fn prepare(
        &self,
        method: Method,
        url: Url,
        extra_headers: &BTreeMap<String, String>,
        body: Option<Bytes>,
    ) -> OutgoingRequest {
        let mut headers = self.headers.snapshot();
        headers.extend(extra_headers.iter().map(|(k, v)| (k.clone(), v.clone())));

        OutgoingRequest {
            method,
            url,
            headers,
            body,
            pin: self.current_pin(),
        }
    }

    async fn invoke(&self, data: &ProcedureInvocationData) -> Result<RawResponse> {
        let base = self.current_server_url().ok_or(MfpError::NotConfigured)?;

        let mut url = resolve_path(&base, &self.config.paths.adapters)?;
        url.path_segments_mut()
            .map_err(|_| MfpError::InvalidRequest(format!("Server URL '{}' cannot be a base", base)))?
            .push(&data.adapter)
            .push(&data.procedure);

        let mut headers = BTreeMap::new();
        headers.insert(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        let body = Bytes::from(data.form_body()?);

        tracing::debug!(procedure = %data, url = %url, "invoking procedure");
        let request = self.prepare(Method::POST, url, &headers, Some(body));
        self.dispatch(request).await
    }

    /// Send a request, resolving authentication challenges and retrying the
    /// original request with the handlers' answers.
    async fn dispatch(&self, mut request: OutgoingRequest) -> Result<RawResponse> {
        let mut answered: Vec<(String, Arc<dyn ChallengeHandler>)> = Vec::new();
        let mut rounds = 0u32;

        loop {
            let response = self.send_with_retry(&request).await?;

            let Some(challenges) = parse_challenges(response.status, &response.body) else {
                if response.is_success() {
                    for (security_check, handler) in &answered {
                        handler.handle_success(security_check);
                    }
                }
                return Ok(response);
            };

            if rounds >= self.config.max_challenge_rounds {
                let checks: Vec<&str> = challenges
                    .iter()
                    .map(|c| c.security_check.as_str())
                    .collect();
                tracing::warn!(rounds, checks = ?checks, "challenge handling exhausted");
                return Err(MfpError::Authentication {
                    status: response.status,
                    message: format!(
                        "challenges for {} still unresolved after {} rounds",
                        checks.join(", "),
                        rounds
                    ),
                });
            }
            rounds += 1;

            let mut answer = ChallengeAnswer::new();
            for challenge in &challenges {
                let Some(handler) = self.challenges.get(&challenge.security_check) else {
                    tracing::warn!(
                        security_check = %challenge.security_check,
                        "no challenge handler registered"
                    );
                    return Err(response.status_error());
                };

                tracing::debug!(security_check = %challenge.security_check, round = rounds, "handling challenge");
                match handler.handle_challenge(challenge).await {
                    Ok(partial) => {
                        answer.merge(partial);
                        answered.push((challenge.security_check.clone(), handler));
                    }
                    Err(e) => {
                        tracing::warn!(
                            security_check = %challenge.security_check,
                            error = %e,
                            "challenge handler failed"
                        );
                        handler.handle_failure(challenge, &e);
                        return Err(response.status_error());
                    }
                }
            }

            request.headers.extend(
                answer
                    .headers()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
    }

    /// Send once, retrying connection failures with exponential backoff
    async fn send_with_retry(&self, request: &OutgoingRequest) -> Result<RawResponse> {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();

        let mut attempt = 0u32;
        loop {
            match self.transport.send(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.connect_retries => {
                    attempt += 1;
                    let wait = backoff.next_backoff().unwrap_or(backoff.max_interval);
                    tracing::debug!(
                        url = %request.url,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "gateway unreachable, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl Pulse for ClientInner {
    async fn beat(&self) -> Result<()> {
        let Some(base) = self.current_server_url() else {
            tracing::debug!("no server URL configured, skipping heartbeat");
            return Ok(());
        };

        let url = resolve_path(&base, &self.config.paths.heartbeat)?;
        let request = self.prepare(Method::POST, url, &BTreeMap::new(), None);
        let response = bounded(self.dispatch(request), self.default_timeout(), None).await?;

        if response.is_success() {
            tracing::trace!("heartbeat acknowledged");
            Ok(())
        } else {
            Err(response.status_error())
        }
    }
}

/// Load the pin named in the configuration, if any
fn load_configured_pin(config: &ClientConfig) -> Result<Option<Arc<PublicKeyPin>>> {
    config
        .pinned_certificate
        .as_ref()
        .map(|path| PublicKeyPin::from_certificate_file(path).map(Arc::new))
        .transpose()
}

/// Run `operation` under an optional timeout and cancellation token
async fn bounded<T, F>(
    operation: F,
    timeout: Option<Duration>,
    cancellation: Option<&CancellationToken>,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let limited = async move {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, operation).await {
                Ok(result) => result,
                Err(_) => Err(MfpError::Timeout(limit)),
            },
            None => operation.await,
        }
    };

    match cancellation {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(MfpError::Cancelled),
                result = limited => result,
            }
        }
        None => limited.await,
    }
}
