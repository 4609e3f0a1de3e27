//! Controller client — the fixed menu of remote operations.
//!
//! Every method builds its positional arguments, invokes one remote
//! procedure through the [`Executor`] under that method's
//! [`CallDescriptor`], and decodes the answer. Methods whose descriptor
//! tolerates failure return [`CallOutcome`]; the rest return the value.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::call::{CallDescriptor, CallOutcome, LONGER_TIMEOUT};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::executor::{Executor, FatalSink, ResiliencePolicy};
use crate::http_transport::HttpTransport;
use crate::poller::Poller;
use crate::status;
use crate::tls;
use crate::transport::Transport;

const GET_STATUS: CallDescriptor = CallDescriptor::new("get_status");
const IS_INITIALIZED: CallDescriptor = CallDescriptor::new("is_initialized");
const GET_ROLE_INFO: CallDescriptor = CallDescriptor::new("get_role_info");
const GET_ALL_PUBLIC_IPS: CallDescriptor = CallDescriptor::new("get_all_public_ips");
const GET_ALL_PRIVATE_IPS: CallDescriptor = CallDescriptor::new("get_all_private_ips");
const GET_CLUSTER_STATS: CallDescriptor = CallDescriptor::new("get_cluster_stats");
const SET_PARAMETERS: CallDescriptor = CallDescriptor::new("set_parameters");
const START_ROLES_ON_NODES: CallDescriptor = CallDescriptor::new("start_roles_on_nodes");
const ADD_ROUTING: CallDescriptor = CallDescriptor::new("add_routing_for_appserver");
const REMOVE_ROUTING: CallDescriptor = CallDescriptor::new("remove_appserver_from_routing");
const UPLOAD_APP: CallDescriptor = CallDescriptor::new("upload_app").unbounded();
const GET_APP_UPLOAD_STATUS: CallDescriptor = CallDescriptor::new("get_app_upload_status");
const RELOCATE_VERSION: CallDescriptor =
    CallDescriptor::new("relocate_version").with_timeout(LONGER_TIMEOUT);
const STOP_APP: CallDescriptor = CallDescriptor::new("stop_app").with_timeout(LONGER_TIMEOUT);
const GET_APP_INFO_MAP: CallDescriptor = CallDescriptor::new("get_app_info_map");
const GET_PROPERTY: CallDescriptor = CallDescriptor::new("get_property");
const SET_PROPERTY: CallDescriptor = CallDescriptor::new("set_property");
const GET_DEPLOYMENT_ID: CallDescriptor = CallDescriptor::new("get_deployment_id");
const SET_DEPLOYMENT_ID: CallDescriptor = CallDescriptor::new("set_deployment_id");
const DEPLOYMENT_ID_EXISTS: CallDescriptor = CallDescriptor::new("deployment_id_exists");
const RUN_GROOMER: CallDescriptor = CallDescriptor::new("run_groomer")
    .with_timeout(LONGER_TIMEOUT)
    .retry_on_unclassified();
const PRIMARY_DB_IS_UP: CallDescriptor = CallDescriptor::new("primary_db_is_up")
    .retry_on_unclassified()
    .tolerate_failure();
const RECEIVE_SERVER_MESSAGE: CallDescriptor = CallDescriptor::new("receive_server_message")
    .unbounded()
    .retry_on_unclassified()
    .tolerate_failure();

/// Client for one controller, holding its address and shared secret.
pub struct ControllerClient<T: Transport = HttpTransport> {
    transport: T,
    secret: String,
    executor: Executor,
}

impl<T: Transport> std::fmt::Debug for ControllerClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerClient")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl ControllerClient<HttpTransport> {
    /// Build an HTTP client from configuration.
    ///
    /// Reads the secret file and the CA file if configured.
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let secret = config.resolve_secret()?;
        let policy = config.resilience_policy()?;

        let mut transport = HttpTransport::new(&config.controller.host, config.controller.port);
        if config.tls.enabled {
            let ca_file = config.tls.ca_file.as_deref().ok_or_else(|| {
                ClientError::Tls("tls.enabled requires tls.ca_file".to_string())
            })?;
            let connector = tls::connector_from_file(ca_file)?;
            let server_name = tls::server_name(config.tls_server_name())?;
            transport = transport.with_tls(connector, server_name);
        }

        info!(
            controller = %config.target(),
            tls = config.tls.enabled,
            "controller client configured"
        );

        Ok(Self::new(transport, secret).with_policy(policy))
    }
}

impl<T: Transport> ControllerClient<T> {
    pub fn new(transport: T, secret: impl Into<String>) -> Self {
        let executor = Executor::new(transport.peer());
        Self {
            transport,
            secret: secret.into(),
            executor,
        }
    }

    pub fn with_policy(mut self, policy: ResiliencePolicy) -> Self {
        self.executor = self.executor.with_policy(policy);
        self
    }

    pub fn with_fatal_sink(mut self, sink: Arc<dyn FatalSink>) -> Self {
        self.executor = self.executor.with_fatal_sink(sink);
        self
    }

    /// Stop retry loops and waits once `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.executor = self.executor.with_shutdown(shutdown);
        self
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// `host:port` of the controller.
    pub fn target(&self) -> &str {
        self.executor.target()
    }

    async fn invoke(
        &self,
        descriptor: &CallDescriptor,
        procedure: &'static str,
        args: Vec<Value>,
    ) -> ClientResult<CallOutcome<Value>> {
        debug!(operation = descriptor.operation, procedure, "invoking controller");
        self.executor
            .execute(descriptor, || {
                self.transport.call(procedure, &args, &self.secret)
            })
            .await
    }

    async fn invoke_strict(
        &self,
        descriptor: &CallDescriptor,
        procedure: &'static str,
        args: Vec<Value>,
    ) -> ClientResult<Value> {
        self.invoke(descriptor, procedure, args)
            .await?
            .require(descriptor.operation)
    }

    // ── Status ─────────────────────────────────────────────────

    /// The node's free-form status report.
    pub async fn get_status(&self) -> ClientResult<String> {
        let value = self.invoke_strict(&GET_STATUS, "status", vec![]).await?;
        as_string(&self.executor, GET_STATUS.operation, value)
    }

    /// Whether the controller has finished starting its roles.
    pub async fn is_initialized(&self) -> ClientResult<bool> {
        let value = self
            .invoke_strict(&IS_INITIALIZED, "is_done_initializing", vec![])
            .await?;
        as_bool(&self.executor, IS_INITIALIZED.operation, value)
    }

    /// Roles and addresses of every node the controller knows about.
    pub async fn get_role_info(&self) -> ClientResult<Value> {
        let value = self.invoke_strict(&GET_ROLE_INFO, "get_role_info", vec![]).await?;
        decode_json(&self.executor, GET_ROLE_INFO.operation, value)
    }

    pub async fn get_all_public_ips(&self) -> ClientResult<Vec<String>> {
        let value = self
            .invoke_strict(&GET_ALL_PUBLIC_IPS, "get_all_public_ips", vec![])
            .await?;
        decode_json(&self.executor, GET_ALL_PUBLIC_IPS.operation, value)
    }

    pub async fn get_all_private_ips(&self) -> ClientResult<Vec<String>> {
        let value = self
            .invoke_strict(&GET_ALL_PRIVATE_IPS, "get_all_private_ips", vec![])
            .await?;
        decode_json(&self.executor, GET_ALL_PRIVATE_IPS.operation, value)
    }

    /// Per-node resource statistics.
    pub async fn get_cluster_stats(&self) -> ClientResult<Value> {
        let value = self
            .invoke_strict(&GET_CLUSTER_STATS, "get_cluster_stats_json", vec![])
            .await?;
        decode_json(&self.executor, GET_CLUSTER_STATS.operation, value)
    }

    // ── Roles ──────────────────────────────────────────────────

    /// Hand the controller the cluster layout and deployment options.
    pub async fn set_parameters(&self, layout: &Value, options: &Value) -> ClientResult<String> {
        let args = vec![Value::String(layout.to_string()), Value::String(options.to_string())];
        let value = self.invoke_strict(&SET_PARAMETERS, "set_parameters", args).await?;
        as_string(&self.executor, SET_PARAMETERS.operation, value)
    }

    /// Ask the controller to start `roles` on new nodes.
    pub async fn start_roles_on_nodes(&self, roles: &Value) -> ClientResult<String> {
        let args = vec![Value::String(roles.to_string())];
        let value = self
            .invoke_strict(&START_ROLES_ON_NODES, "start_roles_on_nodes", args)
            .await?;
        as_string(&self.executor, START_ROLES_ON_NODES.operation, value)
    }

    // ── Routing ────────────────────────────────────────────────

    /// Register an application server with the load balancer.
    ///
    /// May answer [`status::NOT_READY`]; see [`Self::add_routing_until_ready`].
    pub async fn add_routing_for_appserver(
        &self,
        version_key: &str,
        ip: &str,
        port: u16,
    ) -> ClientResult<String> {
        let args = vec![json!(version_key), json!(ip), json!(port)];
        let value = self
            .invoke_strict(&ADD_ROUTING, "add_routing_for_appserver", args)
            .await?;
        as_string(&self.executor, ADD_ROUTING.operation, value)
    }

    /// Register an application server, retrying while the controller is not ready.
    pub async fn add_routing_until_ready(
        &self,
        version_key: &str,
        ip: &str,
        port: u16,
    ) -> ClientResult<String> {
        let interval = self.executor.policy().routing_retry_interval;
        loop {
            let answer = self.add_routing_for_appserver(version_key, ip, port).await?;
            if !status::is_not_ready(&answer) {
                info!(version_key, ip, port, "routing established");
                return Ok(answer);
            }
            info!(version_key, ?interval, "controller not yet ready to add routing");
            self.executor.sleep(ADD_ROUTING.operation, interval).await?;
        }
    }

    /// Remove an application server from the load balancer.
    pub async fn remove_appserver_from_routing(
        &self,
        version_key: &str,
        ip: &str,
        port: u16,
    ) -> ClientResult<String> {
        let args = vec![json!(version_key), json!(ip), json!(port)];
        let value = self
            .invoke_strict(&REMOVE_ROUTING, "remove_appserver_from_haproxy", args)
            .await?;
        as_string(&self.executor, REMOVE_ROUTING.operation, value)
    }

    // ── Applications ───────────────────────────────────────────

    /// Upload an application archive already present on the controller host.
    ///
    /// Returns a reservation id for [`Self::get_app_upload_status`].
    pub async fn upload_app(&self, archive_path: &str, file_suffix: &str) -> ClientResult<String> {
        let args = vec![json!(archive_path), json!(file_suffix)];
        let value = self.invoke_strict(&UPLOAD_APP, "upload_app", args).await?;
        as_string(&self.executor, UPLOAD_APP.operation, value)
    }

    pub async fn get_app_upload_status(&self, reservation_id: &str) -> ClientResult<String> {
        let value = self
            .invoke_strict(&GET_APP_UPLOAD_STATUS, "get_app_upload_status", vec![json!(reservation_id)])
            .await?;
        as_string(&self.executor, GET_APP_UPLOAD_STATUS.operation, value)
    }

    /// Move a version to new HTTP and HTTPS ports.
    pub async fn relocate_version(
        &self,
        version_key: &str,
        http_port: u16,
        https_port: u16,
    ) -> ClientResult<String> {
        let args = vec![json!(version_key), json!(http_port), json!(https_port)];
        let value = self
            .invoke_strict(&RELOCATE_VERSION, "relocate_version", args)
            .await?;
        as_string(&self.executor, RELOCATE_VERSION.operation, value)
    }

    pub async fn stop_app(&self, app_id: &str) -> ClientResult<String> {
        let value = self
            .invoke_strict(&STOP_APP, "stop_app", vec![json!(app_id)])
            .await?;
        as_string(&self.executor, STOP_APP.operation, value)
    }

    /// Ports and placement of every running application.
    pub async fn get_app_info_map(&self) -> ClientResult<Value> {
        let value = self
            .invoke_strict(&GET_APP_INFO_MAP, "get_app_info_map", vec![])
            .await?;
        decode_json(&self.executor, GET_APP_INFO_MAP.operation, value)
    }

    // ── Properties & deployment ────────────────────────────────

    /// Controller properties whose names match `regex`.
    pub async fn get_property(&self, regex: &str) -> ClientResult<Value> {
        let value = self
            .invoke_strict(&GET_PROPERTY, "get_property", vec![json!(regex)])
            .await?;
        decode_json(&self.executor, GET_PROPERTY.operation, value)
    }

    pub async fn set_property(&self, name: &str, value: &str) -> ClientResult<String> {
        let answer = self
            .invoke_strict(&SET_PROPERTY, "set_property", vec![json!(name), json!(value)])
            .await?;
        as_string(&self.executor, SET_PROPERTY.operation, answer)
    }

    pub async fn get_deployment_id(&self) -> ClientResult<String> {
        let value = self
            .invoke_strict(&GET_DEPLOYMENT_ID, "get_deployment_id", vec![])
            .await?;
        as_string(&self.executor, GET_DEPLOYMENT_ID.operation, value)
    }

    pub async fn set_deployment_id(&self, id: &str) -> ClientResult<String> {
        let value = self
            .invoke_strict(&SET_DEPLOYMENT_ID, "set_deployment_id", vec![json!(id)])
            .await?;
        as_string(&self.executor, SET_DEPLOYMENT_ID.operation, value)
    }

    pub async fn deployment_id_exists(&self) -> ClientResult<bool> {
        let value = self
            .invoke_strict(&DEPLOYMENT_ID_EXISTS, "deployment_id_exists", vec![])
            .await?;
        as_bool(&self.executor, DEPLOYMENT_ID_EXISTS.operation, value)
    }

    // ── Maintenance ────────────────────────────────────────────

    /// Trigger a datastore groomer run.
    pub async fn run_groomer(&self) -> ClientResult<String> {
        let value = self.invoke_strict(&RUN_GROOMER, "run_groomer", vec![]).await?;
        as_string(&self.executor, RUN_GROOMER.operation, value)
    }

    /// Whether the primary database is up. Tolerates an unreachable controller.
    pub async fn primary_db_is_up(&self) -> ClientResult<CallOutcome<bool>> {
        match self.invoke(&PRIMARY_DB_IS_UP, "primary_db_is_up", vec![]).await? {
            CallOutcome::Success(value) => {
                as_bool(&self.executor, PRIMARY_DB_IS_UP.operation, value).map(CallOutcome::Success)
            }
            CallOutcome::Tolerated => Ok(CallOutcome::Tolerated),
        }
    }

    /// Long-poll for the next message the controller has for us.
    pub async fn receive_server_message(&self) -> ClientResult<CallOutcome<String>> {
        match self
            .invoke(&RECEIVE_SERVER_MESSAGE, "receive_server_message", vec![])
            .await?
        {
            CallOutcome::Success(value) => {
                as_string(&self.executor, RECEIVE_SERVER_MESSAGE.operation, value).map(CallOutcome::Success)
            }
            CallOutcome::Tolerated => Ok(CallOutcome::Tolerated),
        }
    }

    // ── Convergence ────────────────────────────────────────────

    /// Block until the controller publishes the database host.
    pub async fn wait_for_database_host(&self) -> ClientResult<String> {
        Poller::new(&self.executor)
            .wait_for_value("wait_for_database_host", || self.get_status(), status::database_host)
            .await
    }

    /// Block until the node reports every role in `roles`.
    pub async fn wait_for_roles<S: AsRef<str>>(&self, roles: &[S]) -> ClientResult<String> {
        Poller::new(&self.executor)
            .wait_for_roles("wait_for_roles", || self.get_status(), roles)
            .await
    }
}

fn as_string(executor: &Executor, operation: &'static str, value: Value) -> ClientResult<String> {
    match value {
        Value::String(s) => Ok(s),
        // Procedures with nothing to report answer `null`.
        Value::Null => Ok(String::new()),
        other => Err(decode_failure(
            executor,
            operation,
            format!("expected a string, got {other}"),
        )),
    }
}

fn as_bool(executor: &Executor, operation: &'static str, value: Value) -> ClientResult<bool> {
    match &value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        _ => Err(decode_failure(
            executor,
            operation,
            format!("expected a boolean, got {value}"),
        )),
    }
}

/// Decode a JSON answer. The controller sends some as JSON-encoded strings.
fn decode_json<D: DeserializeOwned>(
    executor: &Executor,
    operation: &'static str,
    value: Value,
) -> ClientResult<D> {
    let decoded = match value {
        Value::String(s) => serde_json::from_str(&s),
        other => serde_json::from_value(other),
    };
    decoded.map_err(|e| decode_failure(executor, operation, e.to_string()))
}

/// An answer of the wrong shape is a protocol mismatch and therefore fatal.
fn decode_failure(executor: &Executor, operation: &'static str, message: String) -> ClientError {
    executor.fatal(operation, ClientError::Decode { operation, message })
}
