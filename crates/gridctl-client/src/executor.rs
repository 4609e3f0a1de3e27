//! Resilient call executor.
//!
//! Wraps one remote invocation with a deadline and a classified retry
//! policy. Transient failures are absorbed here; callers only ever see a
//! success, a tolerated failure, or a fatal [`ClientError`].
//!
//! | Failure | Disposition |
//! |---|---|
//! | connection refused / host unreachable | pause, retry up to `max_connect_retries`, then fatal or tolerated |
//! | deadline exceeded | tolerated immediately, or retried forever |
//! | handshake / pipe / reset / unimplemented / empty | retried forever |
//! | anything else | retried forever if the descriptor asks for it, else fatal |

use std::backtrace::Backtrace;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::call::{CallDescriptor, CallOutcome, CallTimeout};
use crate::error::{ClientError, ClientResult, FailureKind, TransportError};

/// Connection retries allowed before a controller is declared unreachable.
pub const MAX_CONNECT_RETRIES: u32 = 5;

/// Pause before each connection retry.
pub const CONNECT_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Pause between polls while waiting for a status value to appear.
pub const VALUE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Pause before asking a not-ready controller to add routing again.
pub const ROUTING_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Tunable constants of the retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResiliencePolicy {
    pub max_connect_retries: u32,
    pub connect_retry_pause: Duration,
    pub value_poll_interval: Duration,
    pub routing_retry_interval: Duration,
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self {
            max_connect_retries: MAX_CONNECT_RETRIES,
            connect_retry_pause: CONNECT_RETRY_PAUSE,
            value_poll_interval: VALUE_POLL_INTERVAL,
            routing_retry_interval: ROUTING_RETRY_INTERVAL,
        }
    }
}

/// Receives every fatal outcome exactly once, before it is returned.
pub trait FatalSink: Send + Sync {
    fn report(&self, operation: &str, target: &str, error: &ClientError);
}

/// Logs fatal outcomes with their source chain and a captured backtrace.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFatal;

impl FatalSink for LogFatal {
    fn report(&self, operation: &str, target: &str, error: &ClientError) {
        let mut chain = Vec::new();
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = std::error::Error::source(cause);
        }
        let backtrace = Backtrace::force_capture();

        error!(
            operation,
            controller = target,
            error = %error,
            kind = ?error,
            causes = ?chain,
            %backtrace,
            "fatal controller call failure"
        );
    }
}

/// Logs like [`LogFatal`], then terminates the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExitOnFatal;

impl FatalSink for ExitOnFatal {
    fn report(&self, operation: &str, target: &str, error: &ClientError) {
        LogFatal.report(operation, target, error);
        std::process::exit(1);
    }
}

/// Executes remote calls against one controller under the retry policy.
#[derive(Clone)]
pub struct Executor {
    target: String,
    policy: ResiliencePolicy,
    sink: Arc<dyn FatalSink>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("target", &self.target)
            .field("policy", &self.policy)
            .field("cancellable", &self.shutdown.is_some())
            .finish()
    }
}

impl Executor {
    /// Create an executor for the controller at `target` with the default policy.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            policy: ResiliencePolicy::default(),
            sink: Arc::new(LogFatal),
            shutdown: None,
        }
    }

    pub fn with_policy(mut self, policy: ResiliencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fatal_sink(mut self, sink: Arc<dyn FatalSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Abandon in-flight attempts, retry pauses and poll sleeps once
    /// `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    /// Run `action` until it succeeds or the policy gives up.
    ///
    /// `action` is invoked once per attempt and must start a fresh remote
    /// call each time.
    pub async fn execute<T, F, Fut>(
        &self,
        descriptor: &CallDescriptor,
        mut action: F,
    ) -> ClientResult<CallOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let operation = descriptor.operation;
        let mut connect_failures: u32 = 0;
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;

            let call = action();
            let result = self
                .until_shutdown(operation, async {
                    match descriptor.timeout {
                        CallTimeout::Bounded(limit) => tokio::time::timeout(limit, call)
                            .await
                            .unwrap_or(Err(TransportError::DeadlineExceeded(limit))),
                        CallTimeout::Unbounded => call.await,
                    }
                })
                .await?;

            let failure = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, controller = %self.target, "call succeeded after retry");
                    }
                    return Ok(CallOutcome::Success(value));
                }
                Err(failure) => failure,
            };

            match failure.kind() {
                FailureKind::Unreachable => {
                    connect_failures += 1;
                    if connect_failures > self.policy.max_connect_retries {
                        if descriptor.tolerate_failure {
                            warn!(
                                operation,
                                controller = %self.target,
                                attempts = connect_failures,
                                "controller unreachable, tolerating failure"
                            );
                            return Ok(CallOutcome::Tolerated);
                        }
                        return Err(self.fatal(
                            operation,
                            ClientError::NodeUnreachable {
                                operation,
                                target: self.target.clone(),
                                attempts: connect_failures,
                            },
                        ));
                    }
                    warn!(
                        operation,
                        controller = %self.target,
                        attempt = connect_failures,
                        max = self.policy.max_connect_retries,
                        error = %failure,
                        "controller not reachable, retrying"
                    );
                    self.sleep(operation, self.policy.connect_retry_pause).await?;
                }
                FailureKind::DeadlineExceeded => {
                    if descriptor.tolerate_failure {
                        debug!(operation, controller = %self.target, "call timed out, tolerating failure");
                        return Ok(CallOutcome::Tolerated);
                    }
                    warn!(operation, controller = %self.target, attempt, error = %failure, "call timed out, retrying");
                }
                FailureKind::TransportTransient => {
                    warn!(operation, controller = %self.target, attempt, error = %failure, "transient transport failure, retrying");
                    tokio::task::yield_now().await;
                }
                FailureKind::Unclassified => {
                    if !descriptor.retry_on_unclassified {
                        return Err(self.fatal(
                            operation,
                            ClientError::Fatal {
                                operation,
                                target: self.target.clone(),
                                source: failure,
                            },
                        ));
                    }
                    warn!(operation, controller = %self.target, attempt, error = %failure, "unexpected failure, retrying");
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Route a fatal error through the sink and hand it back.
    pub(crate) fn fatal(&self, operation: &str, err: ClientError) -> ClientError {
        self.sink.report(operation, &self.target, &err);
        err
    }

    /// Sleep for `duration` unless shutdown is signalled first.
    pub(crate) async fn sleep(&self, operation: &'static str, duration: Duration) -> ClientResult<()> {
        self.until_shutdown(operation, tokio::time::sleep(duration)).await
    }

    async fn until_shutdown<O>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = O>,
    ) -> ClientResult<O> {
        let Some(mut shutdown) = self.shutdown.clone() else {
            return Ok(fut.await);
        };

        tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown) => {
                debug!(operation, controller = %self.target, "shutdown signalled, abandoning call");
                Err(ClientError::Cancelled { operation })
            }
            out = fut => Ok(out),
        }
    }
}

/// Resolves once the watch value is `true`. Never resolves if the sender is gone.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
