//! Call descriptors and outcomes.

use std::time::Duration;

use crate::error::{ClientError, ClientResult};

/// Default deadline for controller calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for calls that make the controller do real work.
pub const LONGER_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline applied to a single attempt of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTimeout {
    Bounded(Duration),
    /// No deadline. For calls known to run for a long time.
    Unbounded,
}

/// Per-call-site policy for one remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallDescriptor {
    /// Operation name, for diagnostics only.
    pub operation: &'static str,
    pub timeout: CallTimeout,
    /// Retry failures the policy does not recognize instead of treating them as fatal.
    pub retry_on_unclassified: bool,
    /// Hand back [`CallOutcome::Tolerated`] instead of failing on timeouts
    /// and exhausted connection retries.
    pub tolerate_failure: bool,
}

impl CallDescriptor {
    /// A strict descriptor with the default timeout.
    pub const fn new(operation: &'static str) -> Self {
        Self {
            operation,
            timeout: CallTimeout::Bounded(DEFAULT_TIMEOUT),
            retry_on_unclassified: false,
            tolerate_failure: false,
        }
    }

    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: CallTimeout::Bounded(timeout),
            ..self
        }
    }

    pub const fn unbounded(self) -> Self {
        Self {
            timeout: CallTimeout::Unbounded,
            ..self
        }
    }

    pub const fn retry_on_unclassified(self) -> Self {
        Self {
            retry_on_unclassified: true,
            ..self
        }
    }

    pub const fn tolerate_failure(self) -> Self {
        Self {
            tolerate_failure: true,
            ..self
        }
    }
}

/// Result of a call that did not end fatally.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum CallOutcome<T> {
    Success(T),
    /// The call failed and its descriptor opted to tolerate that.
    Tolerated,
}

impl<T> CallOutcome<T> {
    pub fn is_tolerated(&self) -> bool {
        matches!(self, CallOutcome::Tolerated)
    }

    /// The success value, if any.
    pub fn success(self) -> Option<T> {
        match self {
            CallOutcome::Success(value) => Some(value),
            CallOutcome::Tolerated => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallOutcome<U> {
        match self {
            CallOutcome::Success(value) => CallOutcome::Success(f(value)),
            CallOutcome::Tolerated => CallOutcome::Tolerated,
        }
    }

    /// Unwrap a success, turning a tolerated failure into an error.
    pub fn require(self, operation: &'static str) -> ClientResult<T> {
        match self {
            CallOutcome::Success(value) => Ok(value),
            CallOutcome::Tolerated => Err(ClientError::Tolerated { operation }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_flags() {
        const DESC: CallDescriptor = CallDescriptor::new("receive_server_message")
            .unbounded()
            .retry_on_unclassified()
            .tolerate_failure();

        assert_eq!(DESC.timeout, CallTimeout::Unbounded);
        assert!(DESC.retry_on_unclassified);
        assert!(DESC.tolerate_failure);
    }

    #[test]
    fn new_descriptor_is_strict() {
        let desc = CallDescriptor::new("get_status");
        assert_eq!(desc.timeout, CallTimeout::Bounded(DEFAULT_TIMEOUT));
        assert!(!desc.retry_on_unclassified);
        assert!(!desc.tolerate_failure);

        let longer = desc.with_timeout(LONGER_TIMEOUT);
        assert_eq!(longer.timeout, CallTimeout::Bounded(Duration::from_secs(30)));
    }

    #[test]
    fn require_rejects_tolerated() {
        assert_eq!(CallOutcome::Success(3).require("op").unwrap(), 3);

        let err = CallOutcome::<u32>::Tolerated.require("op").unwrap_err();
        assert!(matches!(err, ClientError::Tolerated { operation: "op" }));
    }

    #[test]
    fn map_preserves_tolerated() {
        assert_eq!(CallOutcome::Success(2).map(|v| v * 2), CallOutcome::Success(4));
        assert!(CallOutcome::<u32>::Tolerated.map(|v| v * 2).is_tolerated());
        assert_eq!(CallOutcome::<u32>::Tolerated.success(), None);
    }
}
