//! gridctl — command-line access to the cluster controller.
//!
//! # Usage
//!
//! ```text
//! gridctl --host 10.0.0.1 --secret-file /etc/gridctl/secret.key status
//! gridctl --config /etc/gridctl/gridctl.toml wait-roles shadow database
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use gridctl_client::{ClientConfig, ControllerClient, ExitOnFatal};
use tokio::sync::watch;
use tracing::info;

mod commands;

#[derive(Parser)]
#[command(
    name = "gridctl",
    about = "Query and drive the cluster controller",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to gridctl.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Controller host. Overrides the config file.
    #[arg(long, global = true)]
    host: Option<String>,

    /// Controller port. Overrides the config file.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// File holding the shared secret. Overrides the config file.
    #[arg(long, global = true)]
    secret_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the node's status report.
    Status,
    /// Print roles and addresses of every node.
    Roles,
    /// List public IPs of all nodes.
    PublicIps,
    /// List private IPs of all nodes.
    PrivateIps,
    /// Print per-node resource statistics.
    Stats,
    /// Print ports and placement of running applications.
    AppMap,
    /// Print controller properties matching a regex.
    GetProperty { regex: String },
    /// Set a controller property.
    SetProperty { name: String, value: String },
    /// Print the deployment id.
    DeploymentId,
    /// Block until the controller publishes the database host.
    WaitDb,
    /// Block until the node reports every listed role.
    WaitRoles {
        #[arg(required = true)]
        roles: Vec<String>,
    },
    /// Register an application server with the load balancer.
    AddRouting { app: String, ip: String, port: u16 },
    /// Remove an application server from the load balancer.
    RemoveRouting { app: String, ip: String, port: u16 },
    /// Stop an application.
    StopApp { app: String },
    /// Trigger a datastore groomer run.
    RunGroomer,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,gridctl=debug,gridctl_client=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // Fatal controller failures log their diagnostics and end the process.
    let client = ControllerClient::from_config(&config)
        .with_context(|| format!("failed to set up client for {}", config.target()))?
        .with_fatal_sink(Arc::new(ExitOnFatal))
        .with_shutdown(shutdown_rx);

    commands::run(&client, cli.command).await
}

/// Build the client config from `--config` and the flag overrides.
fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match (&cli.config, &cli.host) {
        (Some(path), _) => ClientConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        (None, Some(host)) => ClientConfig::for_host(host.clone()),
        (None, None) => bail!("either --config or --host is required"),
    };

    if let Some(host) = &cli.host {
        config.controller.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.controller.port = port;
    }
    if let Some(secret_file) = &cli.secret_file {
        config.controller.secret = None;
        config.controller.secret_file = Some(secret_file.clone());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn host_flag_alone_builds_config() {
        let cli = Cli::parse_from(["gridctl", "--host", "10.0.0.1", "--port", "18443", "status"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.target(), "10.0.0.1:18443");
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn config_or_host_is_required() {
        let cli = Cli::parse_from(["gridctl", "status"]);
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[controller]\nhost = \"head\"\nsecret = \"inline\"\n").unwrap();

        let config_path = file.path().to_str().unwrap().to_string();
        let cli = Cli::parse_from([
            "gridctl",
            "--config",
            config_path.as_str(),
            "--secret-file",
            "/etc/gridctl/secret.key",
            "wait-roles",
            "shadow",
            "database",
        ]);
        let config = load_config(&cli).unwrap();

        assert_eq!(config.controller.host, "head");
        assert_eq!(config.controller.secret, None);
        assert_eq!(
            config.controller.secret_file,
            Some(PathBuf::from("/etc/gridctl/secret.key"))
        );
        match cli.command {
            Command::WaitRoles { roles } => assert_eq!(roles, vec!["shadow", "database"]),
            _ => panic!("expected wait-roles"),
        }
    }

    #[test]
    fn routing_port_must_be_numeric() {
        let parsed = Cli::try_parse_from(["gridctl", "--host", "h", "add-routing", "app", "10.0.0.5", "http"]);
        assert!(parsed.is_err());
    }
}
