// src/interception/isolation_headers.rs
//! Cross-origin isolation header mutation
//!
//! Pure functions: no I/O, no logging, no shared state.

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::Response;

pub const CROSS_ORIGIN_EMBEDDER_POLICY: &str = "cross-origin-embedder-policy";
pub const CROSS_ORIGIN_OPENER_POLICY: &str = "cross-origin-opener-policy";

pub const REQUIRE_CORP: &str = "require-corp";
pub const SAME_ORIGIN: &str = "same-origin";

/// Set COEP `require-corp` and COOP `same-origin`, replacing any upstream values
pub fn apply_isolation_headers(headers: &mut HeaderMap) {
    headers.insert(
        HeaderName::from_static(CROSS_ORIGIN_EMBEDDER_POLICY),
        HeaderValue::from_static(REQUIRE_CORP),
    );
    headers.insert(
        HeaderName::from_static(CROSS_ORIGIN_OPENER_POLICY),
        HeaderValue::from_static(SAME_ORIGIN),
    );
}

/// Rebuild `response` with isolation headers; status, extensions and body are kept
pub fn isolate<B>(response: Response<B>) -> Response<B> {
    let (mut parts, body) = response.into_parts();
    apply_isolation_headers(&mut parts.headers);
    Response::from_parts(parts, body)
}

/// Whether both isolation headers carry the required values
pub fn is_isolated(headers: &HeaderMap) -> bool {
    let has = |name: &str, value: &str| headers.get(name).is_some_and(|v| v == value);
    has(CROSS_ORIGIN_EMBEDDER_POLICY, REQUIRE_CORP)
        && has(CROSS_ORIGIN_OPENER_POLICY, SAME_ORIGIN)
}
