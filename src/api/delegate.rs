//! Completion Delegates
//!
//! Callback objects for the spawn-and-forget forms of request dispatch and
//! procedure invocation. Callbacks run on a runtime worker; no ordering is
//! guaranteed between concurrent calls.

use crate::api::procedure::ProcedureResponse;
use crate::client::RawResponse;
use crate::error::Failure;

/// Receives the outcome of a procedure invocation
pub trait InvocationDelegate: Send + Sync {
    fn on_success(&self, response: ProcedureResponse);

    fn on_failure(&self, failure: Failure);
}

/// Receives the outcome of a raw request
pub trait ResponseHandler: Send + Sync {
    /// Any HTTP response, including failure statuses
    fn on_response(&self, response: RawResponse);

    /// The request could not complete
    fn on_failure(&self, failure: Failure);
}
