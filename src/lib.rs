// src/lib.rs
//! Cross-Origin Isolation Proxy
//!
//! A reverse proxy that adds `Cross-Origin-Embedder-Policy: require-corp` and
//! `Cross-Origin-Opener-Policy: same-origin` to a fixed set of resources so
//! pages served from a plain static origin become cross-origin isolated.
//!
//! # Architecture
//!
//! - **interception**: fetch hook, lifecycle, allow-list, header mutation
//! - **observability**: tracing and Prometheus metrics setup
//! - **utils**: configuration and error types

pub mod interception;
pub mod observability;
pub mod utils;

// Re-export commonly used types
pub use interception::{HttpInterceptor, InterceptorConfig, Lifecycle, SuffixAllowList};
pub use utils::config::ProxyConfig;
pub use utils::errors::{ProxyError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Proxy build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}
