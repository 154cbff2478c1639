// src/main.rs
//! Cross-Origin Isolation Proxy
//!
//! Serves an upstream static origin and injects cross-origin isolation
//! headers into allow-listed responses.

use anyhow::{Context, Result};
use coi_proxy::interception::{HttpInterceptor, InterceptorConfig, Lifecycle, SuffixAllowList};
use coi_proxy::observability::{init_metrics, init_tracing};
use coi_proxy::utils::config::ProxyConfig;
use coi_proxy::BuildInfo;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = ProxyConfig::load().context("Failed to load configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    let build = BuildInfo::current();
    info!(
        "Starting coi-proxy v{} ({}, {})",
        build.version, build.git_hash, build.rustc_version
    );
    info!("Configuration loaded: {:?}", config);

    let allow_list = Arc::new(SuffixAllowList::new(config.isolation.suffixes.clone())?);

    let lifecycle = Arc::new(Lifecycle::new(config.lifecycle.claim_clients));
    lifecycle.start()?;

    let interceptor = Arc::new(HttpInterceptor::new(
        InterceptorConfig::from_config(&config)?,
        allow_list,
        lifecycle,
    ));

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    match interceptor.start(shutdown_signal).await {
        Ok(()) => {
            info!("Proxy stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Proxy error: {}", e);
            Err(e.into())
        }
    }
}
