// src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use config::ProxyConfig;
pub use errors::{ProxyError, Result};
