// src/interception/mod.rs
//! Response interception layer
//!
//! - **HTTP Interceptor**: reverse proxy running the fetch hook
//! - **Lifecycle**: install/activate phases and client claiming
//! - **Suffix Allow-List**: which response URLs get isolated
//! - **Isolation Headers**: COEP/COOP header mutation
//!
//! # Architecture
//!
//! ```text
//! Browser ─▶ HTTP Interceptor ─▶ Upstream Origin
//!                 │
//!                 ├─ controlled? (Lifecycle)
//!                 ├─ URL allow-listed? (Suffix Allow-List)
//!                 │     yes ─▶ Isolation Headers
//!                 └─ otherwise unmodified
//! ```

pub mod http_interceptor;
pub mod isolation_headers;
pub mod lifecycle;
pub mod suffix_allow_list;

// Re-export commonly used types
pub use http_interceptor::{HttpInterceptor, InterceptorConfig, Outcome};
pub use isolation_headers::{apply_isolation_headers, isolate};
pub use lifecycle::{Lifecycle, Phase};
pub use suffix_allow_list::SuffixAllowList;
