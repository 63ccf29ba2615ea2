//! API Module
//!
//! Procedure invocation, raw request types and completion delegates.

pub mod delegate;
pub mod procedure;
pub mod request;

pub use delegate::{InvocationDelegate, ResponseHandler};
pub(crate) use procedure::timeout_millis;
pub use procedure::{InvocationOptions, ProcedureInvocationData, ProcedureResponse};
pub use request::{resolve_path, GatewayRequest};
