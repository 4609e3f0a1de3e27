//! gridctl.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::ResiliencePolicy;
use crate::http_transport::DEFAULT_CONTROLLER_PORT;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub controller: ControllerConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub secret: Option<String>,
    pub secret_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    pub ca_file: Option<PathBuf>,
    /// Name to verify the controller certificate against. Defaults to the host.
    pub server_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub max_connect_retries: Option<u32>,
    pub connect_retry_pause: Option<String>,
    pub value_poll_interval: Option<String>,
    pub routing_retry_interval: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_CONTROLLER_PORT
}

impl ClientConfig {
    /// Minimal config for a controller at `host` on the default port.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            controller: ControllerConfig {
                host: host.into(),
                port: DEFAULT_CONTROLLER_PORT,
                secret: None,
                secret_file: None,
            },
            tls: TlsConfig::default(),
            policy: PolicyConfig::default(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        if config.controller.host.trim().is_empty() {
            return Err(ConfigError::Invalid("controller.host must not be empty".to_string()));
        }
        Ok(config)
    }

    /// `host:port` of the controller.
    pub fn target(&self) -> String {
        format!("{}:{}", self.controller.host, self.controller.port)
    }

    /// The shared secret, read from `secret_file` when no inline secret is set.
    pub fn resolve_secret(&self) -> Result<String, ConfigError> {
        if let Some(secret) = &self.controller.secret {
            return Ok(secret.clone());
        }

        let path = self.controller.secret_file.as_ref().ok_or_else(|| {
            ConfigError::Invalid("one of controller.secret or controller.secret_file is required".to_string())
        })?;
        let secret = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        let secret = secret.trim();
        if secret.is_empty() {
            return Err(ConfigError::Invalid(format!("secret file {} is empty", path.display())));
        }
        Ok(secret.to_string())
    }

    /// Name used to verify the controller's TLS certificate.
    pub fn tls_server_name(&self) -> &str {
        self.tls
            .server_name
            .as_deref()
            .unwrap_or(&self.controller.host)
    }

    /// The retry policy, with unset keys left at their defaults.
    pub fn resilience_policy(&self) -> Result<ResiliencePolicy, ConfigError> {
        let mut policy = ResiliencePolicy::default();
        let p = &self.policy;

        if let Some(retries) = p.max_connect_retries {
            policy.max_connect_retries = retries;
        }
        if let Some(s) = &p.connect_retry_pause {
            policy.connect_retry_pause = duration_field("connect_retry_pause", s)?;
        }
        if let Some(s) = &p.value_poll_interval {
            policy.value_poll_interval = duration_field("value_poll_interval", s)?;
        }
        if let Some(s) = &p.routing_retry_interval {
            policy.routing_retry_interval = duration_field("routing_retry_interval", s)?;
        }
        Ok(policy)
    }
}

fn duration_field(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value)
        .ok_or_else(|| ConfigError::Invalid(format!("policy.{key}: invalid duration {value:?}")))
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
