// src/observability/mod.rs
//! Logging and metrics setup
//!
//! - **Tracing**: `tracing-subscriber` fmt layer filtered by `RUST_LOG`
//! - **Metrics**: optional Prometheus scrape endpoint
//!
//! Counters recorded by the interceptor:
//!
//! - `coi_proxy_responses_total{outcome}`: `isolated`, `passthrough`, `bypassed`
//! - `coi_proxy_upstream_errors_total`
//! - `coi_proxy_connections_total`

use crate::utils::config::{LoggingConfig, MetricsConfig};
use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,coi_proxy=debug";

/// Install the global tracing subscriber
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = if config.json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

/// Install the Prometheus recorder and its HTTP listener when enabled
///
/// Returns the scrape address, or `None` when metrics are disabled. Without a
/// recorder the `metrics` macros are no-ops.
pub fn init_metrics(config: &MetricsConfig) -> Result<Option<SocketAddr>> {
    if !config.enabled {
        return Ok(None);
    }

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid metrics address {}:{}", config.host, config.port))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics exporter listening on {}", addr);
    Ok(Some(addr))
}
