//! Scripted transport for unit tests.

use crate::client::transport::{OutgoingRequest, RawResponse, Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What the mock does with one request
pub(crate) enum Reply {
    Respond(RawResponse),
    Delayed(Duration, RawResponse),
    Fail(TransportError),
}

type Responder = Box<dyn Fn(&OutgoingRequest) -> Reply + Send + Sync>;

/// Transport answering through a closure and recording what was transmitted
pub(crate) struct MockTransport {
    responder: Responder,
    sent: Mutex<Vec<OutgoingRequest>>,
    resets: AtomicUsize,
    presented_certificate: Option<Vec<u8>>,
}

impl MockTransport {
    pub(crate) fn new(responder: impl Fn(&OutgoingRequest) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            sent: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
            presented_certificate: None,
        }
    }

    /// Always answer 200 with `body`
    pub(crate) fn ok(body: &'static str) -> Self {
        Self::new(move |_| Reply::Respond(RawResponse::new(200, body)))
    }

    /// Certificate the simulated TLS server presents on https requests
    pub(crate) fn presenting(mut self, der: Vec<u8>) -> Self {
        self.presented_certificate = Some(der);
        self
    }

    /// Requests that made it onto the wire
    pub(crate) fn sent(&self) -> Vec<OutgoingRequest> {
        self.sent.lock().clone()
    }

    pub(crate) fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, TransportError> {
        // The handshake happens before anything is transmitted
        if request.is_secure() {
            if let (Some(pin), Some(cert)) = (&request.pin, &self.presented_certificate) {
                if !pin.matches_certificate(cert) {
                    return Err(TransportError::PinRejected {
                        host: request.host(),
                    });
                }
            }
        }

        let reply = (self.responder)(&request);
        self.sent.lock().push(request);

        match reply {
            Reply::Respond(response) => Ok(response),
            Reply::Delayed(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Reply::Fail(err) => Err(err),
        }
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}
