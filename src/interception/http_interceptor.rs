// src/interception/http_interceptor.rs
//! Fetch interceptor hosted in a hyper reverse proxy
//!
//! Every request is forwarded to the upstream origin. Responses whose URL is
//! on the allow-list get the cross-origin isolation headers; everything else
//! is returned as the origin sent it. Bodies are streamed, never buffered.

use crate::interception::isolation_headers::isolate;
use crate::interception::lifecycle::Lifecycle;
use crate::interception::suffix_allow_list::SuffixAllowList;
use crate::utils::config::ProxyConfig;
use crate::utils::errors::{ProxyError, Result};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderName, CACHE_CONTROL, CONNECTION, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, info_span, Instrument};
use ulid::Ulid;

/// Body type returned to clients
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Callback invoked when the upstream fetch fails
pub type ErrorCallback = Arc<dyn Fn(&ProxyError) + Send + Sync>;

const SEC_FETCH_MODE: &str = "sec-fetch-mode";

/// Connection-scoped headers that must not be forwarded
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Configuration for HTTP interceptor
#[derive(Debug, Clone)]
pub struct InterceptorConfig {
    /// Proxy listen address
    pub listen_addr: SocketAddr,

    /// Upstream origin, `scheme://authority` without trailing slash
    pub upstream_origin: String,

    /// Enable request logging
    pub log_requests: bool,

    /// Enable response logging
    pub log_responses: bool,
}

impl InterceptorConfig {
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let upstream = config.upstream_uri()?;
        let scheme = upstream.scheme_str().unwrap_or("http");
        let authority = upstream
            .authority()
            .ok_or_else(|| ProxyError::ConfigError("upstream.origin has no host".to_string()))?;

        Ok(Self {
            listen_addr: config.listen_addr()?,
            upstream_origin: format!("{}://{}", scheme, authority),
            log_requests: true,
            log_responses: true,
        })
    }
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            upstream_origin: "http://127.0.0.1:8000".to_string(),
            log_requests: true,
            log_responses: true,
        }
    }
}

/// How a response left the interceptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Isolation headers applied
    Isolated,
    /// Returned unmodified
    Passthrough,
    /// Request skipped by the cache-only rule, returned unmodified
    Bypassed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Isolated => "isolated",
            Outcome::Passthrough => "passthrough",
            Outcome::Bypassed => "bypassed",
        }
    }
}

/// Process-wide fetch interceptor
pub struct HttpInterceptor {
    config: InterceptorConfig,
    allow_list: Arc<SuffixAllowList>,
    lifecycle: Arc<Lifecycle>,
    on_error: ErrorCallback,
    http_client: Client<HttpConnector, Incoming>,
}

impl HttpInterceptor {
    /// Create a new HTTP interceptor
    pub fn new(
        config: InterceptorConfig,
        allow_list: Arc<SuffixAllowList>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        let http_client = Client::builder(TokioExecutor::new()).build_http();

        Self {
            config,
            allow_list,
            lifecycle,
            on_error: Arc::new(|e: &ProxyError| error!("Fetch failed: {}", e)),
            http_client,
        }
    }

    /// Replace the logging callback run on upstream failures
    pub fn with_error_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProxyError) + Send + Sync + 'static,
    {
        self.on_error = Arc::new(callback);
        self
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    /// Bind the proxy listener
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.config.listen_addr).await.map_err(|e| {
            ProxyError::InterceptionFailed(format!(
                "Failed to bind proxy on {}: {}",
                self.config.listen_addr, e
            ))
        })
    }

    /// Bind and serve until `shutdown` resolves
    pub async fn start<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on `listener` until `shutdown` resolves
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        info!(
            "Proxy listening on {} -> {}",
            local_addr, self.config.upstream_origin
        );

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Proxy on {} shutting down", local_addr);
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let interceptor = Arc::clone(&self);
                            let active_at_accept = self.lifecycle.is_active();
                            metrics::counter!("coi_proxy_connections_total").increment(1);

                            tokio::spawn(async move {
                                debug!(
                                    "Accepted connection from {} (active: {})",
                                    addr, active_at_accept
                                );

                                let io = TokioIo::new(stream);

                                let service = service_fn(move |req| {
                                    let interceptor = Arc::clone(&interceptor);
                                    async move {
                                        interceptor.handle_request(req, active_at_accept).await
                                    }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    error!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Handle a single fetch
    async fn handle_request(
        &self,
        req: Request<Incoming>,
        active_at_accept: bool,
    ) -> Result<Response<ProxyBody>> {
        let span = info_span!(
            "fetch",
            id = %Ulid::new(),
            method = %req.method(),
            path = %req.uri().path(),
        );

        async move {
            if self.config.log_requests {
                self.log_request(req.method(), req.uri(), req.headers());
            }

            let bypass = is_cache_only_cross_mode(req.headers());

            let upstream_uri = match self.upstream_uri(req.uri()) {
                Ok(uri) => uri,
                Err(e) => {
                    debug!("Rejecting request: {}", e);
                    return Ok(error_response(StatusCode::BAD_REQUEST, "Invalid request target"));
                }
            };
            let response_url = upstream_uri.to_string();

            match self.forward(req, upstream_uri).await {
                Ok(response) => {
                    let outcome = self.classify(bypass, active_at_accept, &response_url);
                    metrics::counter!("coi_proxy_responses_total", "outcome" => outcome.as_str())
                        .increment(1);

                    let response = match outcome {
                        Outcome::Isolated => isolate(response),
                        Outcome::Passthrough | Outcome::Bypassed => response,
                    };

                    if self.config.log_responses {
                        self.log_response(&response, outcome);
                    }

                    Ok(response.map(|body| body.boxed()))
                }
                Err(e) => {
                    metrics::counter!("coi_proxy_upstream_errors_total").increment(1);
                    (self.on_error)(&e);
                    Ok(error_response(
                        StatusCode::BAD_GATEWAY,
                        "Failed to reach upstream origin",
                    ))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Decide what happens to a response fetched from `response_url`
    pub fn classify(&self, bypass: bool, active_at_accept: bool, response_url: &str) -> Outcome {
        if bypass {
            Outcome::Bypassed
        } else if self.lifecycle.controls(active_at_accept)
            && self.allow_list.matches(response_url)
        {
            Outcome::Isolated
        } else {
            Outcome::Passthrough
        }
    }

    /// Map the client's request target onto the upstream origin
    fn upstream_uri(&self, uri: &Uri) -> Result<Uri> {
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        Ok(format!("{}{}", self.config.upstream_origin, path_and_query).parse()?)
    }

    /// Forward request to the upstream origin
    async fn forward(&self, req: Request<Incoming>, uri: Uri) -> Result<Response<Incoming>> {
        let (mut parts, body) = req.into_parts();

        parts.uri = uri.clone();
        parts.version = Version::HTTP_11;
        parts.headers.remove(HOST);
        strip_hop_by_hop(&mut parts.headers);

        let response = self
            .http_client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|e| ProxyError::upstream(uri.to_string(), e))?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        Ok(Response::from_parts(parts, body))
    }

    /// Log HTTP request
    fn log_request(&self, method: &Method, uri: &Uri, headers: &HeaderMap) {
        debug!("Request: {} {}", method, uri);
        for (name, value) in headers {
            if let Ok(val_str) = value.to_str() {
                debug!("  {}: {}", name, val_str);
            }
        }
    }

    /// Log HTTP response
    fn log_response<B>(&self, response: &Response<B>, outcome: Outcome) {
        debug!("Response: {} ({})", response.status(), outcome.as_str());
        for (name, value) in response.headers() {
            if let Ok(val_str) = value.to_str() {
                debug!("  {}: {}", name, val_str);
            }
        }
    }
}

/// `only-if-cached` requests outside same-origin mode are left alone
pub fn is_cache_only_cross_mode(headers: &HeaderMap) -> bool {
    let only_if_cached = headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("only-if-cached"));

    let same_origin = headers
        .get(SEC_FETCH_MODE)
        .and_then(|value| value.to_str().ok())
        .map(|mode| mode.trim().eq_ignore_ascii_case("same-origin"))
        .unwrap_or(false);

    only_if_cached && !same_origin
}

/// Remove hop-by-hop headers, including any the `Connection` header names
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Create error response
fn error_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from_static(message.as_bytes()))
        .map_err(|never| match never {})
        .boxed();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::isolation_headers::{is_isolated, CROSS_ORIGIN_EMBEDDER_POLICY};
    use http_body_util::Empty;
    use hyper::ext::ReasonPhrase;
    use hyper::header::{HeaderValue, CONTENT_TYPE, LOCATION};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    /// Static origin echoing the request target
    async fn spawn_upstream() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let service = service_fn(|req: Request<Incoming>| async move {
                        let path = req.uri().path().to_string();
                        let host = req
                            .headers()
                            .get(HOST)
                            .and_then(|h| h.to_str().ok())
                            .unwrap_or_default()
                            .to_string();

                        let saw_secret = req.headers().contains_key("x-secret");

                        let mut builder = Response::builder()
                            .header(CONTENT_TYPE, "text/plain")
                            .header("x-upstream-host", host)
                            .header("x-saw-secret", saw_secret.to_string());

                        if path.starts_with("/missing/") {
                            builder = builder.status(StatusCode::NOT_FOUND);
                        }
                        if path == "/redirect" {
                            builder = builder
                                .status(StatusCode::FOUND)
                                .header(LOCATION, "/lisp.worker.js");
                        }
                        if path == "/scoped/lisp.worker.js" {
                            builder = builder
                                .header(CONNECTION, "x-internal")
                                .header("x-internal", "1");
                        }
                        if path == "/custom-reason/lisp.worker.js" {
                            builder = builder.extension(ReasonPhrase::from_static(b"Totally Fine"));
                        }
                        if path == "/legacy/4th.worker.js" {
                            builder = builder.header(CROSS_ORIGIN_EMBEDDER_POLICY, "unsafe-none");
                        }

                        let body = Full::new(Bytes::from(format!("upstream:{}", req.uri())));
                        Ok::<_, Infallible>(builder.body(body).unwrap())
                    });

                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        addr
    }

    fn interceptor_for(upstream: SocketAddr, lifecycle: Arc<Lifecycle>) -> HttpInterceptor {
        let config = InterceptorConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            upstream_origin: format!("http://{}", upstream),
            ..InterceptorConfig::default()
        };
        HttpInterceptor::new(config, Arc::new(SuffixAllowList::default()), lifecycle)
    }

    async fn spawn_proxy(interceptor: HttpInterceptor) -> (SocketAddr, oneshot::Sender<()>) {
        let interceptor = Arc::new(interceptor);
        let listener = interceptor.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(interceptor.serve(listener, async {
            let _ = rx.await;
        }));

        (addr, tx)
    }

    async fn active_proxy(upstream: SocketAddr) -> (SocketAddr, oneshot::Sender<()>) {
        let lifecycle = Arc::new(Lifecycle::default());
        lifecycle.start().unwrap();
        spawn_proxy(interceptor_for(upstream, lifecycle)).await
    }

    async fn get(
        proxy: SocketAddr,
        path: &str,
        headers: &[(&'static str, &'static str)],
    ) -> (StatusCode, HeaderMap, String) {
        let client = Client::builder(TokioExecutor::new()).build_http::<Empty<Bytes>>();

        let mut builder = Request::builder().uri(format!("http://{}{}", proxy, path));
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let response = client.request(builder.body(Empty::new()).unwrap()).await.unwrap();
        let (parts, body) = response.into_parts();
        let body = body.collect().await.unwrap().to_bytes();

        (parts.status, parts.headers, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_config_default() {
        let config = InterceptorConfig::default();
        assert_eq!(config.listen_addr.port(), 8080);
        assert!(config.log_requests);
    }

    #[test]
    fn test_config_from_proxy_config() {
        let mut proxy = ProxyConfig::default();
        proxy.upstream.origin = "http://localhost:4000/".to_string();
        proxy.server.port = 3000;

        let config = InterceptorConfig::from_config(&proxy).unwrap();
        assert_eq!(config.upstream_origin, "http://localhost:4000");
        assert_eq!(config.listen_addr.port(), 3000);
    }

    #[test]
    fn test_cache_only_rule() {
        let mut headers = HeaderMap::new();
        assert!(!is_cache_only_cross_mode(&headers));

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0, only-if-cached"));
        assert!(is_cache_only_cross_mode(&headers));

        headers.insert(SEC_FETCH_MODE, HeaderValue::from_static("no-cors"));
        assert!(is_cache_only_cross_mode(&headers));

        headers.insert(SEC_FETCH_MODE, HeaderValue::from_static("same-origin"));
        assert!(!is_cache_only_cross_mode(&headers));
    }

    #[tokio::test]
    async fn test_classify() {
        let lifecycle = Arc::new(Lifecycle::new(false));
        let interceptor = interceptor_for(SocketAddr::from(([127, 0, 0, 1], 1)), lifecycle.clone());
        let url = "http://127.0.0.1:1/lisp.worker.js";

        // Not yet active
        assert_eq!(interceptor.classify(false, false, url), Outcome::Passthrough);

        lifecycle.start().unwrap();
        assert_eq!(interceptor.classify(false, true, url), Outcome::Isolated);
        assert_eq!(interceptor.classify(false, false, url), Outcome::Passthrough);
        assert_eq!(interceptor.classify(true, true, url), Outcome::Bypassed);
        assert_eq!(
            interceptor.classify(false, true, "http://127.0.0.1:1/index.html"),
            Outcome::Passthrough
        );
    }

    #[tokio::test]
    async fn test_isolates_allow_listed_resource() {
        let upstream = spawn_upstream().await;
        let (proxy, _shutdown) = active_proxy(upstream).await;

        let (status, headers, body) = get(proxy, "/js/lisp.worker.js", &[]).await;

        assert_eq!(status, StatusCode::OK);
        assert!(is_isolated(&headers));
        assert_eq!(headers[CONTENT_TYPE], "text/plain");
        assert_eq!(body, "upstream:/js/lisp.worker.js");
    }

    #[tokio::test]
    async fn test_passes_through_other_resources() {
        let upstream = spawn_upstream().await;
        let (proxy, _shutdown) = active_proxy(upstream).await;

        let (status, headers, body) = get(proxy, "/index.html", &[]).await;

        assert_eq!(status, StatusCode::OK);
        assert!(headers.get("cross-origin-embedder-policy").is_none());
        assert!(headers.get("cross-origin-opener-policy").is_none());
        assert_eq!(body, "upstream:/index.html");
    }

    #[tokio::test]
    async fn test_query_string_is_part_of_response_url() {
        let upstream = spawn_upstream().await;
        let (proxy, _shutdown) = active_proxy(upstream).await;

        let (_, headers, body) = get(proxy, "/4th.worker.js?v=2", &[]).await;

        assert!(!is_isolated(&headers));
        assert_eq!(body, "upstream:/4th.worker.js?v=2");
    }

    #[tokio::test]
    async fn test_replaces_upstream_policy() {
        let upstream = spawn_upstream().await;
        let (proxy, _shutdown) = active_proxy(upstream).await;

        let (_, headers, _) = get(proxy, "/legacy/4th.worker.js", &[]).await;

        assert_eq!(headers.get_all("cross-origin-embedder-policy").iter().count(), 1);
        assert!(is_isolated(&headers));
    }

    #[tokio::test]
    async fn test_preserves_error_status() {
        let upstream = spawn_upstream().await;
        let (proxy, _shutdown) = active_proxy(upstream).await;

        let (status, headers, _) = get(proxy, "/missing/what-forth-again.html", &[]).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(is_isolated(&headers));
    }

    #[tokio::test]
    async fn test_redirect_is_not_followed() {
        let upstream = spawn_upstream().await;
        let (proxy, _shutdown) = active_proxy(upstream).await;

        let (status, headers, _) = get(proxy, "/redirect", &[]).await;

        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(headers[LOCATION], "/lisp.worker.js");
        assert!(!is_isolated(&headers));
    }

    #[tokio::test]
    async fn test_rewrites_host_header() {
        let upstream = spawn_upstream().await;
        let (proxy, _shutdown) = active_proxy(upstream).await;

        let (_, headers, _) = get(proxy, "/index.html", &[]).await;

        assert_eq!(headers["x-upstream-host"], upstream.to_string().as_str());
    }

    #[test]
    fn test_strip_connection_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, X-Secret"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-secret", HeaderValue::from_static("1"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get("x-secret").is_none());
        assert!(headers.get(CONNECTION).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert_eq!(headers[CONTENT_TYPE], "text/plain");
    }

    #[tokio::test]
    async fn test_connection_scoped_request_header_not_forwarded() {
        let upstream = spawn_upstream().await;
        let (proxy, _shutdown) = active_proxy(upstream).await;

        let (status, headers, _) = get(
            proxy,
            "/index.html",
            &[("connection", "x-secret"), ("x-secret", "1")],
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-saw-secret"], "false");

        let (_, headers, _) = get(proxy, "/index.html", &[("x-secret", "1")]).await;
        assert_eq!(headers["x-saw-secret"], "true");
    }

    #[tokio::test]
    async fn test_connection_scoped_response_header_not_returned() {
        let upstream = spawn_upstream().await;
        let (proxy, _shutdown) = active_proxy(upstream).await;

        let (status, headers, _) = get(proxy, "/scoped/lisp.worker.js", &[]).await;

        assert_eq!(status, StatusCode::OK);
        assert!(headers.get("x-internal").is_none());
        assert!(is_isolated(&headers));
    }

    #[tokio::test]
    async fn test_custom_reason_phrase_survives_isolation() {
        let upstream = spawn_upstream().await;
        let (proxy, _shutdown) = active_proxy(upstream).await;

        let client = Client::builder(TokioExecutor::new()).build_http::<Empty<Bytes>>();
        let request = Request::builder()
            .uri(format!("http://{}/custom-reason/lisp.worker.js", proxy))
            .body(Empty::new())
            .unwrap();
        let response = client.request(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(is_isolated(response.headers()));
        let reason = response.extensions().get::<ReasonPhrase>().unwrap();
        assert_eq!(reason.as_bytes(), b"Totally Fine");
    }

    #[tokio::test]
    async fn test_cache_only_cross_mode_bypasses() {
        let upstream = spawn_upstream().await;
        let (proxy, _shutdown) = active_proxy(upstream).await;

        let (status, headers, _) = get(
            proxy,
            "/lisp.worker.js",
            &[("cache-control", "only-if-cached"), ("sec-fetch-mode", "no-cors")],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!is_isolated(&headers));

        let (_, headers, _) = get(
            proxy,
            "/lisp.worker.js",
            &[("cache-control", "only-if-cached"), ("sec-fetch-mode", "same-origin")],
        )
        .await;
        assert!(is_isolated(&headers));
    }

    #[tokio::test]
    async fn test_upstream_failure_invokes_callback() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_upstream = closed.local_addr().unwrap();
        drop(closed);

        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);

        let lifecycle = Arc::new(Lifecycle::default());
        lifecycle.start().unwrap();
        let interceptor = interceptor_for(dead_upstream, lifecycle).with_error_callback(move |e| {
            assert!(e.is_upstream());
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let (proxy, _shutdown) = spawn_proxy(interceptor).await;

        let (status, headers, _) = get(proxy, "/lisp.worker.js", &[]).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!is_isolated(&headers));
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    async fn open_connection(
        proxy: SocketAddr,
    ) -> hyper::client::conn::http1::SendRequest<Empty<Bytes>> {
        let stream = TcpStream::connect(proxy).await.unwrap();
        let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .unwrap();
        tokio::spawn(conn);
        sender
    }

    async fn send_on(
        sender: &mut hyper::client::conn::http1::SendRequest<Empty<Bytes>>,
        path: &str,
    ) -> HeaderMap {
        sender.ready().await.unwrap();
        let request = Request::builder()
            .uri(path)
            .header(HOST, "localhost")
            .body(Empty::new())
            .unwrap();
        let response = sender.send_request(request).await.unwrap();
        let (parts, body) = response.into_parts();
        body.collect().await.unwrap();
        parts.headers
    }

    #[tokio::test]
    async fn test_early_connection_without_claim_stays_uncontrolled() {
        let upstream = spawn_upstream().await;
        let lifecycle = Arc::new(Lifecycle::new(false));
        let (proxy, _shutdown) = spawn_proxy(interceptor_for(upstream, lifecycle.clone())).await;

        let mut early = open_connection(proxy).await;
        assert!(!is_isolated(&send_on(&mut early, "/lisp.worker.js").await));

        lifecycle.start().unwrap();

        assert!(!is_isolated(&send_on(&mut early, "/lisp.worker.js").await));

        let mut late = open_connection(proxy).await;
        assert!(is_isolated(&send_on(&mut late, "/lisp.worker.js").await));
    }

    #[tokio::test]
    async fn test_early_connection_with_claim_becomes_controlled() {
        let upstream = spawn_upstream().await;
        let lifecycle = Arc::new(Lifecycle::new(true));
        let (proxy, _shutdown) = spawn_proxy(interceptor_for(upstream, lifecycle.clone())).await;

        let mut early = open_connection(proxy).await;
        assert!(!is_isolated(&send_on(&mut early, "/lisp.worker.js").await));

        lifecycle.start().unwrap();

        assert!(is_isolated(&send_on(&mut early, "/lisp.worker.js").await));
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let upstream = spawn_upstream().await;
        let lifecycle = Arc::new(Lifecycle::default());
        let interceptor = Arc::new(interceptor_for(upstream, lifecycle));
        let listener = interceptor.bind().await.unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(interceptor.serve(listener, async {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
