//! Convergence polling over controller status reports.
//!
//! Both loops fetch a status snapshot, check it, and go again. They have no
//! iteration bound and return only on success, a fatal error, or shutdown.

use std::future::Future;

use tracing::{debug, info};

use crate::error::{ClientError, ClientResult};
use crate::executor::Executor;
use crate::status;

/// Polls a status source through an [`Executor`] until a condition holds.
#[derive(Debug, Clone, Copy)]
pub struct Poller<'a> {
    executor: &'a Executor,
}

impl<'a> Poller<'a> {
    pub fn new(executor: &'a Executor) -> Self {
        Self { executor }
    }

    /// Poll until `extract` finds a value in the status text.
    ///
    /// Sleeps the policy's value-poll interval between polls. A bad-secret
    /// answer aborts immediately with [`ClientError::AuthenticationFailed`].
    pub async fn wait_for_value<F, Fut, X>(
        &self,
        operation: &'static str,
        mut fetch: F,
        extract: X,
    ) -> ClientResult<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<String>>,
        X: Fn(&str) -> Option<String>,
    {
        let interval = self.executor.policy().value_poll_interval;
        let mut last_state: Option<String> = None;
        let mut polls: u64 = 0;

        loop {
            polls += 1;
            let snapshot = fetch().await?;
            self.check_secret(operation, &snapshot)?;

            if let Some(state) = status::current_state(&snapshot) {
                if last_state.as_deref() != Some(state.as_str()) {
                    info!(operation, controller = %self.executor.target(), %state, "controller state");
                    last_state = Some(state);
                }
            }

            if let Some(value) = extract(&snapshot) {
                info!(operation, controller = %self.executor.target(), %value, polls, "value published");
                return Ok(value);
            }

            debug!(operation, polls, ?interval, "value not published yet");
            self.executor.sleep(operation, interval).await?;
        }
    }

    /// Poll until every role in `roles` appears in one status snapshot.
    ///
    /// There is no pause between polls. Returns the satisfying snapshot.
    pub async fn wait_for_roles<F, Fut, S>(
        &self,
        operation: &'static str,
        mut fetch: F,
        roles: &[S],
    ) -> ClientResult<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<String>>,
        S: AsRef<str>,
    {
        let mut polls: u64 = 0;
        let mut last_missing = usize::MAX;

        loop {
            polls += 1;
            let snapshot = fetch().await?;
            self.check_secret(operation, &snapshot)?;

            let missing = status::missing_roles(&snapshot, roles);
            if missing.is_empty() {
                info!(operation, controller = %self.executor.target(), polls, "node has all requested roles");
                return Ok(snapshot);
            }
            if missing.len() != last_missing {
                debug!(operation, ?missing, polls, "waiting on roles");
                last_missing = missing.len();
            }

            tokio::task::yield_now().await;
        }
    }

    fn check_secret(&self, operation: &'static str, snapshot: &str) -> ClientResult<()> {
        if status::is_bad_secret(snapshot) {
            return Err(self.executor.fatal(
                operation,
                ClientError::AuthenticationFailed {
                    target: self.executor.target().to_string(),
                },
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::watch;

    use crate::executor::FatalSink;

    #[derive(Default)]
    struct CountingSink {
        count: AtomicU32,
    }

    impl FatalSink for CountingSink {
        fn report(&self, _operation: &str, _target: &str, _error: &ClientError) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Hands out scripted status strings, repeating the last one forever.
    struct Script {
        statuses: Mutex<VecDeque<&'static str>>,
        polls: AtomicU32,
    }

    impl Script {
        fn new(statuses: &[&'static str]) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                polls: AtomicU32::new(0),
            }
        }

        async fn next(&self) -> ClientResult<String> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.pop_front().unwrap()
            } else {
                statuses[0]
            };
            Ok(status.to_string())
        }

        fn polls(&self) -> u32 {
            self.polls.load(Ordering::SeqCst)
        }
    }

    fn executor() -> (Executor, Arc<CountingSink>) {
        let sink = Arc::new(CountingSink::default());
        (Executor::new("10.0.0.1:17443").with_fatal_sink(sink.clone()), sink)
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_value_returns_published_address() {
        let (exec, sink) = executor();
        let script = Script::new(&[
            "Current State: Starting\nDatabase is at not-up-yet",
            "Current State: Starting\nDatabase is at not-up-yet",
            "Current State: Running\nDatabase is at 10.0.0.3",
            "Database is at 10.0.0.99",
        ]);

        let started = tokio::time::Instant::now();
        let host = Poller::new(&exec)
            .wait_for_value("wait_for_database_host", || script.next(), status::database_host)
            .await
            .unwrap();

        assert_eq!(host, "10.0.0.3");
        assert_eq!(script.polls(), 3);
        // Two sleeps of the value-poll interval before the third poll.
        assert!(started.elapsed() >= Duration::from_secs(20));
        assert_eq!(sink.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_value_aborts_on_bad_secret() {
        let (exec, sink) = executor();
        let script = Script::new(&[
            "Database is at not-up-yet",
            status::BAD_SECRET,
            "Database is at 10.0.0.3",
        ]);

        let err = Poller::new(&exec)
            .wait_for_value("wait_for_database_host", || script.next(), status::database_host)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::AuthenticationFailed { .. }));
        assert_eq!(script.polls(), 2);
        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_value_propagates_fetch_errors() {
        let (exec, _sink) = executor();
        let err = Poller::new(&exec)
            .wait_for_value(
                "wait_for_database_host",
                || async {
                    Err(ClientError::NodeUnreachable {
                        operation: "get_status",
                        target: "10.0.0.1:17443".into(),
                        attempts: 6,
                    })
                },
                status::database_host,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::NodeUnreachable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_value_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let (exec, _sink) = executor();
        let exec = exec.with_shutdown(rx);
        tx.send(true).unwrap();

        let script = Script::new(&["Database is at not-up-yet"]);
        let err = Poller::new(&exec)
            .wait_for_value("wait_for_database_host", || script.next(), status::database_host)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Cancelled { .. }));
        assert_eq!(script.polls(), 1);
    }

    #[tokio::test]
    async fn wait_for_roles_returns_on_third_poll() {
        let (exec, _sink) = executor();
        let script = Script::new(&[
            "Is currently: A",
            "Is currently: A, C",
            "Is currently: A, B, C",
            "Is currently: A",
        ]);

        let snapshot = Poller::new(&exec)
            .wait_for_roles("wait_for_roles", || script.next(), &["A", "B"])
            .await
            .unwrap();

        assert_eq!(snapshot, "Is currently: A, B, C");
        assert_eq!(script.polls(), 3);
    }

    #[tokio::test]
    async fn wait_for_roles_needs_roles_in_the_same_snapshot() {
        let (exec, _sink) = executor();
        let script = Script::new(&[
            "Is currently: A",
            "Is currently: B",
            "Is currently: B",
            "Is currently: A and B",
        ]);

        Poller::new(&exec)
            .wait_for_roles("wait_for_roles", || script.next(), &["A", "B"])
            .await
            .unwrap();

        assert_eq!(script.polls(), 4);
    }

    #[tokio::test]
    async fn wait_for_roles_aborts_on_bad_secret() {
        let (exec, sink) = executor();
        let script = Script::new(&[status::BAD_SECRET]);

        let err = Poller::new(&exec)
            .wait_for_roles("wait_for_roles", || script.next(), &["shadow"])
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::AuthenticationFailed { .. }));
        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
    }
}
