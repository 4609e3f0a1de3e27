//! Transport abstraction.

use std::future::Future;

use serde_json::Value;

use crate::error::TransportError;

/// Invokes named procedures on one controller.
///
/// A transport performs exactly one attempt per call; retries, deadlines
/// and classification belong to the [`Executor`](crate::Executor).
pub trait Transport: Send + Sync {
    /// `host:port` of the controller, for diagnostics.
    fn peer(&self) -> String;

    /// Invoke `procedure` with positional `args`, authenticated by `secret`.
    fn call(
        &self,
        procedure: &str,
        args: &[Value],
        secret: &str,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;
}
