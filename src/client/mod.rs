//! Client Module
//!
//! Transport, global headers and heartbeat plumbing behind the facade.

pub mod headers;
pub mod heartbeat;
pub mod http;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use headers::GlobalHeaders;
pub use heartbeat::{Heartbeat, Pulse};
pub use http::ReqwestTransport;
pub use transport::{OutgoingRequest, RawResponse, Transport, TransportError};
