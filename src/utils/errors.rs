// src/utils/errors.rs
//! Error types for the proxy

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors raised by the proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Configuration source failed to load or deserialize
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    /// Listener or connection setup failed
    #[error("Interception failed: {0}")]
    InterceptionFailed(String),

    /// Upstream origin could not be reached or answered with a broken response
    #[error("Upstream request to {uri} failed: {reason}")]
    Upstream { uri: String, reason: String },

    /// Lifecycle step called out of order
    #[error("Lifecycle error: cannot {step} while {phase}")]
    Lifecycle { step: &'static str, phase: String },

    #[error("Invalid URI: {0}")]
    InvalidUri(#[from] hyper::http::uri::InvalidUri),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    pub fn upstream(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::Upstream {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error originated from the upstream origin
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }
}
