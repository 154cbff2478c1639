// src/utils/config.rs
//! Proxy configuration
//!
//! Loaded through the `config` crate from an optional file, then overridden by
//! `COI_PROXY__`-prefixed environment variables, e.g.
//! `COI_PROXY__UPSTREAM__ORIGIN=http://127.0.0.1:4000`.

use crate::interception::suffix_allow_list::DEFAULT_SUFFIXES;
use crate::utils::errors::{ProxyError, Result};
use config::{Config, Environment, File};
use hyper::Uri;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::debug;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "COI_PROXY_CONFIG";

/// Config file looked up when `COI_PROXY_CONFIG` is unset (any supported extension)
pub const DEFAULT_CONFIG_NAME: &str = "coi-proxy";

const ENV_PREFIX: &str = "COI_PROXY";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub isolation: IsolationConfig,
    pub lifecycle: LifecycleConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Origin the proxy forwards to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Plain HTTP origin, e.g. `http://127.0.0.1:8000`
    pub origin: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:8000".to_string(),
        }
    }
}

/// Resources that receive the isolation headers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    pub suffixes: Vec<String>,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            suffixes: DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Take control of connections opened before activation
    pub claim_clients: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            claim_clients: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

/// Prometheus exporter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}

impl ProxyConfig {
    /// Load from `$COI_PROXY_CONFIG` (or `coi-proxy.*` if present) plus environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        let file = match path.as_deref() {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let config: Self = Config::builder()
            .add_source(file)
            .add_source(environment())
            .build()?
            .try_deserialize()?;

        config.validate()?;
        let source = path.as_deref().unwrap_or(DEFAULT_CONFIG_NAME);
        debug!("Loaded configuration from {}", source);
        Ok(config)
    }

    /// Load from an explicit file, without environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from(path.as_ref()).required(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the proxy cannot run with
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        self.upstream_uri()?;

        if self.isolation.suffixes.iter().any(|s| s.is_empty()) {
            return Err(ProxyError::ConfigError(
                "isolation.suffixes must not contain empty entries".to_string(),
            ));
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(ProxyError::ConfigError(
                    "metrics.port must be non-zero when metrics are enabled".to_string(),
                ));
            }
            self.metrics_addr()?;
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.server.host, self.server.port)
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.metrics.host, self.metrics.port)
    }

    /// Upstream origin as a URI, scheme and authority only
    pub fn upstream_uri(&self) -> Result<Uri> {
        let origin = self.upstream.origin.trim_end_matches('/');
        let uri: Uri = origin.parse()?;

        if uri.scheme_str() != Some("http") {
            return Err(ProxyError::ConfigError(format!(
                "upstream.origin must use the http scheme: {}",
                self.upstream.origin
            )));
        }
        if uri.authority().is_none() {
            return Err(ProxyError::ConfigError(format!(
                "upstream.origin has no host: {}",
                self.upstream.origin
            )));
        }
        if !matches!(uri.path(), "" | "/") {
            return Err(ProxyError::ConfigError(format!(
                "upstream.origin must not contain a path: {}",
                self.upstream.origin
            )));
        }

        Ok(uri)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("isolation.suffixes")
        .try_parsing(true)
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{}:{}", host, port)
        .parse()
        .map_err(|e| ProxyError::ConfigError(format!("Invalid address {}:{}: {}", host, port, e)))
}
