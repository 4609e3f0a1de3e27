//! gridctl-client — resilient RPC client for the cluster controller.
//!
//! Forwards status queries, role assignment, load-balancer registration
//! and application lifecycle operations to the controller, authenticated
//! by a shared secret. Every call runs under one retry/timeout policy.
//!
//! # Architecture
//!
//! ```text
//! ControllerClient (address + secret, immutable)
//!   ├── Poller
//!   │   ├── wait_for_value()  → poll status until a value is published
//!   │   └── wait_for_roles()  → poll status until all roles are present
//!   └── Executor
//!       ├── deadline per attempt (or unbounded)
//!       ├── classify TransportError → retry / tolerate / fatal
//!       └── FatalSink for unrecoverable outcomes
//!           └── Transport (HttpTransport: JSON over HTTP/1.1, optional TLS)
//! ```
//!
//! # Failure handling
//!
//! Retryable failures are absorbed by the executor. Callers see a value,
//! [`CallOutcome::Tolerated`] for calls that opted into it, or a fatal
//! [`ClientError`]. An optional shutdown signal bounds otherwise
//! unbounded retry and poll loops.

pub mod call;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod http_transport;
pub mod poller;
pub mod status;
pub mod tls;
pub mod transport;

pub use call::{CallDescriptor, CallOutcome, CallTimeout};
pub use client::ControllerClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult, FailureKind, TransportError};
pub use executor::{ExitOnFatal, Executor, FatalSink, LogFatal, ResiliencePolicy};
pub use http_transport::HttpTransport;
pub use poller::Poller;
pub use transport::Transport;
