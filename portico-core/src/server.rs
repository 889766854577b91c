//! HTTP server: per-request pipeline and connection serving.
//!
//! Each accepted connection is served on its own task. The request
//! pipeline attaches the per-request context, gives the TLS subsystem a
//! chance to intercept ACME HTTP-01 challenges, compiles and executes the
//! route chain with bounded rehandling, and falls back to error routes
//! when the chain errors.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use portico_tls::{ConnectionPolicy, TlsApp, TlsInfo};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::watch;
use tokio::time::Sleep;
use tokio_rustls::TlsAcceptor;

use crate::autohttps::AutoHttpsConfig;
use crate::context::RequestCtx;
use crate::error::{HandlerError, Result};
use crate::handler::Next;
use crate::handlers::subroute::ErrorRoutes;
use crate::listeners::{NetworkAddress, SharedListener};
use crate::module::Registry;
use crate::response::{ResponseBuffer, ResponseWriter};
use crate::routes::RouteList;
use crate::util::duration_opt;
use crate::Body;

/// Default bound on rehandle cycles per request.
pub const DEFAULT_MAX_REHANDLES: usize = 3;

fn default_max_rehandles() -> usize {
    DEFAULT_MAX_REHANDLES
}

fn is_default_max_rehandles(n: &usize) -> bool {
    *n == DEFAULT_MAX_REHANDLES
}

fn is_false(b: &bool) -> bool {
    !b
}

/// Logging hints for a server.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ServerLogs {
    /// Hostnames whose requests are not access-logged.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_hosts: Vec<String>,
}

/// One named server: listeners, routes, error routes, timeouts, TLS
/// connection policies, and auto-HTTPS settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct Server {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listen: Vec<String>,

    /// Bounds each read from the connection.
    #[serde(default, with = "duration_opt", skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<Duration>,

    /// Bounds reading a request's header block.
    #[serde(default, with = "duration_opt", skip_serializing_if = "Option::is_none")]
    pub read_header_timeout: Option<Duration>,

    /// Bounds producing and writing a response.
    #[serde(default, with = "duration_opt", skip_serializing_if = "Option::is_none")]
    pub write_timeout: Option<Duration>,

    /// Bounds idle keep-alive gaps between requests.
    #[serde(default, with = "duration_opt", skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_header_bytes: Option<usize>,

    #[serde(default, skip_serializing_if = "RouteList::is_empty")]
    pub routes: RouteList,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<ErrorRoutes>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls_connection_policies: Vec<ConnectionPolicy>,

    #[serde(default)]
    pub automatic_https: AutoHttpsConfig,

    #[serde(
        default = "default_max_rehandles",
        skip_serializing_if = "is_default_max_rehandles"
    )]
    pub max_rehandles: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<ServerLogs>,

    /// Bind an HTTP/3 endpoint alongside each TLS listener.
    #[serde(default, skip_serializing_if = "is_false")]
    pub experimental_http3: bool,

    #[serde(skip)]
    pub(crate) name: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen: Vec::new(),
            read_timeout: None,
            read_header_timeout: None,
            write_timeout: None,
            idle_timeout: None,
            max_header_bytes: None,
            routes: RouteList::default(),
            errors: None,
            tls_connection_policies: Vec::new(),
            automatic_https: AutoHttpsConfig::default(),
            max_rehandles: DEFAULT_MAX_REHANDLES,
            logs: None,
            experimental_http3: false,
            name: String::new(),
        }
    }
}

impl Server {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parse all listen addresses.
    pub fn listen_addrs(&self) -> Result<Vec<NetworkAddress>> {
        self.listen.iter().map(|a| NetworkAddress::parse(a)).collect()
    }

    pub(crate) fn provision_matchers(&mut self, registry: &Registry) -> Result<()> {
        self.routes.provision_matchers(registry)?;
        if let Some(errors) = &mut self.errors {
            errors.routes.provision_matchers(registry)?;
        }
        Ok(())
    }

    pub(crate) fn provision_handlers(&mut self, registry: &Registry) -> Result<()> {
        self.routes.provision_handlers(registry)?;
        if let Some(errors) = &mut self.errors {
            errors.routes.provision_handlers(registry)?;
        }
        Ok(())
    }

    /// The request pipeline: challenge interception, route compilation and
    /// execution with bounded rehandling, then error routes.
    pub async fn serve_exchange(
        &self,
        ctx: &mut RequestCtx,
        w: &mut ResponseBuffer,
        tls_app: &TlsApp,
    ) {
        // the challenge solver must win before routing, and only speaks
        // plaintext
        if ctx.tls.is_none() {
            if let Some(resp) = tls_app.handle_http_challenge(&ctx.parts) {
                let (parts, body) = resp.into_parts();
                *w.headers_mut() = parts.headers;
                w.write_header(parts.status);
                if !body.is_empty() {
                    w.write(&body);
                }
                return;
            }
        }

        let mut rehandles = 0usize;
        let result = loop {
            let chain = self.routes.compile(ctx);
            match Next::new(&chain).serve(w, ctx).await {
                Err(err) if err.is_rehandle() => {
                    rehandles += 1;
                    if rehandles > self.max_rehandles {
                        break Err(HandlerError::new(500, "too many rehandles"));
                    }
                    tracing::debug!(cycle = rehandles, "rehandling request");
                    continue;
                }
                other => break other,
            }
        };

        let Err(err) = result else { return };
        tracing::error!(
            status = err.status_or_default(),
            id = %err.id,
            trace = %err.trace,
            error = %err.message,
            "request handler error"
        );

        match &self.errors {
            Some(errors) if !errors.routes.is_empty() => {
                ctx.attach_error(err.clone());
                let chain = errors.routes.compile(ctx);
                if let Err(err2) = Next::new(&chain).serve(w, ctx).await {
                    tracing::error!(id = %err2.id, error = %err2.message, "error route failed");
                    w.write_header(status_from(&err));
                }
            }
            _ => w.write_header(status_from(&err)),
        }
    }
}

fn status_from(err: &HandlerError) -> StatusCode {
    StatusCode::from_u16(err.status_or_default()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Handle one request end to end and produce the wire response.
pub(crate) async fn handle_request(
    server: Arc<Server>,
    tls_app: Arc<TlsApp>,
    req: http::Request<Body>,
    remote_addr: std::net::SocketAddr,
    local_addr: std::net::SocketAddr,
    tls: Option<TlsInfo>,
) -> http::Response<Full<Bytes>> {
    let started = Instant::now();
    let mut ctx = RequestCtx::new(req, remote_addr, local_addr, tls);
    let mut w = ResponseBuffer::new();

    match server.write_timeout {
        Some(limit) => {
            if tokio::time::timeout(limit, server.serve_exchange(&mut ctx, &mut w, &tls_app))
                .await
                .is_err()
            {
                tracing::warn!(server = %server.name, "write timeout expired while handling request");
                w.write_header(StatusCode::SERVICE_UNAVAILABLE);
            }
        }
        None => server.serve_exchange(&mut ctx, &mut w, &tls_app).await,
    }

    let status = w.status().unwrap_or(StatusCode::OK);
    let host = ctx.hostname();
    let skip_log = server
        .logs
        .as_ref()
        .is_some_and(|l| l.skip_hosts.iter().any(|h| h.eq_ignore_ascii_case(&host)));
    if !skip_log {
        tracing::info!(
            server = %server.name,
            remote = %remote_addr,
            method = %ctx.parts.method,
            uri = %ctx.parts.uri,
            host = %host,
            status = status.as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            "handled request"
        );
    }

    w.into_response()
}

/// Accept connections until shutdown is signaled.
pub(crate) async fn accept_loop(
    server: Arc<Server>,
    listener: Arc<SharedListener>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    tls_app: Arc<TlsApp>,
    conns: crate::app::ConnTracker,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.inner.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to accept connection");
                        continue;
                    }
                };
                let local_addr = stream
                    .local_addr()
                    .unwrap_or_else(|_| "0.0.0.0:0".parse().expect("valid fallback addr"));
                let server = server.clone();
                let tls_config = tls_config.clone();
                let tls_app = tls_app.clone();
                let shutdown = shutdown.clone();
                conns.lock().await.spawn(async move {
                    handle_connection(server, stream, remote_addr, local_addr, tls_config, tls_app, shutdown)
                        .await;
                });
            }
        }
    }
    tracing::debug!(address = %listener.key(), "accept loop stopped");
}

async fn handle_connection(
    server: Arc<Server>,
    stream: tokio::net::TcpStream,
    remote_addr: std::net::SocketAddr,
    local_addr: std::net::SocketAddr,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    tls_app: Arc<TlsApp>,
    shutdown: watch::Receiver<bool>,
) {
    match tls_config {
        Some(config) => {
            let acceptor = TlsAcceptor::from(config);
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(err) => {
                    tracing::debug!(remote = %remote_addr, error = %err, "TLS handshake failed");
                    return;
                }
            };
            let info = TlsInfo::from_connection(tls_stream.get_ref().1);
            serve_http(server, tls_stream, remote_addr, local_addr, Some(info), tls_app, shutdown)
                .await;
        }
        None => {
            serve_http(server, stream, remote_addr, local_addr, None, tls_app, shutdown).await;
        }
    }
}

async fn serve_http<S>(
    server: Arc<Server>,
    stream: S,
    remote_addr: std::net::SocketAddr,
    local_addr: std::net::SocketAddr,
    tls: Option<TlsInfo>,
    tls_app: Arc<TlsApp>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let read_limit = server.read_timeout.or(server.idle_timeout);
    let stream = TimeoutStream::new(stream, read_limit);

    let mut builder = auto::Builder::new(TokioExecutor::new());
    {
        let mut http1 = builder.http1();
        http1.timer(TokioTimer::new());
        if let Some(limit) = server.read_header_timeout {
            http1.header_read_timeout(limit);
        }
        if let Some(max) = server.max_header_bytes {
            http1.max_buf_size(max);
        }
    }

    let service = service_fn(move |req: http::Request<Incoming>| {
        let server = server.clone();
        let tls_app = tls_app.clone();
        let tls = tls.clone();
        async move {
            let req = req.map(|body| body.map_err(std::io::Error::other).boxed());
            Ok::<_, std::convert::Infallible>(
                handle_request(server, tls_app, req, remote_addr, local_addr, tls).await,
            )
        }
    });

    let conn = builder.serve_connection(TokioIo::new(stream), service);
    let mut conn = std::pin::pin!(conn);
    tokio::select! {
        result = conn.as_mut() => {
            if let Err(err) = result {
                tracing::debug!(remote = %remote_addr, error = %err, "connection ended with error");
            }
        }
        _ = shutdown.changed() => {
            // stop accepting new requests; in-flight ones finish (the app
            // aborts this task after the grace period)
            conn.as_mut().graceful_shutdown();
            let _ = conn.as_mut().await;
        }
    }
}

/// IO wrapper enforcing a rolling read deadline (read/idle timeouts).
struct TimeoutStream<S> {
    inner: S,
    limit: Option<Duration>,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl<S> TimeoutStream<S> {
    fn new(inner: S, limit: Option<Duration>) -> Self {
        let deadline = limit.map(|d| Box::pin(tokio::time::sleep(d)));
        Self {
            inner,
            limit,
            deadline,
        }
    }

    fn reset_deadline(&mut self) {
        if let (Some(limit), Some(deadline)) = (self.limit, self.deadline.as_mut()) {
            deadline
                .as_mut()
                .reset(tokio::time::Instant::now() + limit);
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TimeoutStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if let Some(deadline) = this.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "read timeout expired",
                )));
            }
        }
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                this.reset_deadline();
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TimeoutStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testutil::ctx;
    use portico_tls::TlsConfig;

    fn server(routes_json: &str, errors_json: Option<&str>) -> Server {
        let registry = Registry::global();
        let mut server = Server {
            routes: serde_json::from_str(routes_json).unwrap(),
            errors: errors_json.map(|e| ErrorRoutes {
                routes: serde_json::from_str(e).unwrap(),
            }),
            max_rehandles: DEFAULT_MAX_REHANDLES,
            ..Default::default()
        };
        server.provision_matchers(registry).unwrap();
        server.provision_handlers(registry).unwrap();
        server
    }

    fn tls_app() -> Arc<TlsApp> {
        TlsApp::new(TlsConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn routes_respond() {
        let server = server(
            r#"[{"match": [{"path": ["/hello"]}],
                 "handle": [{"handler": "static_response", "status_code": 200, "body": "hi"}]}]"#,
            None,
        );
        let app = tls_app();

        let mut w = ResponseBuffer::new();
        let mut r = ctx("GET", "/hello", "example.com");
        server.serve_exchange(&mut r, &mut w, &app).await;
        assert_eq!(w.status(), Some(StatusCode::OK));

        // unmatched requests fall through to an empty 200
        let mut w = ResponseBuffer::new();
        let mut r = ctx("GET", "/other", "example.com");
        server.serve_exchange(&mut r, &mut w, &app).await;
        assert_eq!(w.status(), None);
    }

    #[tokio::test]
    async fn chain_errors_write_their_status() {
        let server = server(
            r#"[{"handle": [{"handler": "static_response", "status_code": "bogus"}]}]"#,
            None,
        );
        let app = tls_app();
        let mut w = ResponseBuffer::new();
        let mut r = ctx("GET", "/", "example.com");
        server.serve_exchange(&mut r, &mut w, &app).await;
        assert_eq!(w.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn error_routes_take_over() {
        let server = server(
            r#"[{"handle": [{"handler": "static_response", "status_code": "bogus"}]}]"#,
            Some(
                r#"[{"handle": [{"handler": "static_response",
                                 "status_code": 502,
                                 "body": "error id {http.error.id}"}]}]"#,
            ),
        );
        let app = tls_app();
        let mut w = ResponseBuffer::new();
        let mut r = ctx("GET", "/", "example.com");
        server.serve_exchange(&mut r, &mut w, &app).await;
        assert_eq!(w.status(), Some(StatusCode::BAD_GATEWAY));
        assert!(r.error.is_some());
    }

    #[tokio::test]
    async fn rehandle_reruns_matching_on_the_rewritten_request() {
        use crate::matchers::{MatchPath, MatcherSet};
        use crate::routes::Route;

        struct RewriteTo(&'static str);

        #[async_trait::async_trait]
        impl crate::handler::MiddlewareHandler for RewriteTo {
            async fn serve(
                &self,
                _w: &mut dyn ResponseWriter,
                r: &mut RequestCtx,
                _next: Next<'_>,
            ) -> std::result::Result<(), HandlerError> {
                r.parts.uri = self.0.parse().expect("static test uri");
                Err(HandlerError::rehandle())
            }
        }

        fn path_set(pattern: &str) -> MatcherSet {
            let mut m = MatchPath::new(vec![pattern.to_string()]);
            m.provision().unwrap();
            MatcherSet {
                matchers: vec![Arc::new(m)],
            }
        }

        let mut rewrite = Route::default();
        rewrite.compiled_matchers = vec![path_set("/a")];
        rewrite.compiled_handlers = vec![Arc::new(RewriteTo("/b"))];

        let mut respond = Route::default();
        respond.compiled_matchers = vec![path_set("/b")];
        respond.compiled_handlers = vec![Arc::new(crate::handlers::StaticResponse {
            status_code: Some(crate::handlers::static_response::StatusField::Code(200)),
            body: "rewritten".to_string(),
            ..Default::default()
        })];

        let server = Server {
            routes: crate::routes::RouteList(vec![rewrite, respond]),
            max_rehandles: DEFAULT_MAX_REHANDLES,
            ..Default::default()
        };
        let app = tls_app();

        let mut w = ResponseBuffer::new();
        let mut r = ctx("GET", "/a", "example.com");
        server.serve_exchange(&mut r, &mut w, &app).await;
        assert_eq!(w.status(), Some(StatusCode::OK));
        assert_eq!(r.parts.uri.path(), "/b");
    }

    #[tokio::test]
    async fn rehandle_is_bounded() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct AlwaysRehandle(Arc<AtomicUsize>);

        #[async_trait::async_trait]
        impl crate::handler::MiddlewareHandler for AlwaysRehandle {
            async fn serve(
                &self,
                _w: &mut dyn ResponseWriter,
                _r: &mut RequestCtx,
                _next: Next<'_>,
            ) -> std::result::Result<(), HandlerError> {
                self.0.fetch_add(1, Ordering::Relaxed);
                Err(HandlerError::rehandle())
            }
        }

        let executions = Arc::new(AtomicUsize::new(0));
        let mut route = crate::routes::Route::default();
        route.compiled_handlers = vec![Arc::new(AlwaysRehandle(executions.clone()))];

        let server = Server {
            routes: crate::routes::RouteList(vec![route]),
            max_rehandles: DEFAULT_MAX_REHANDLES,
            ..Default::default()
        };
        let app = tls_app();

        let mut w = ResponseBuffer::new();
        let mut r = ctx("GET", "/", "example.com");
        server.serve_exchange(&mut r, &mut w, &app).await;
        assert_eq!(w.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        // the chain ran max_rehandles + 1 times, no more
        assert_eq!(executions.load(Ordering::Relaxed), DEFAULT_MAX_REHANDLES + 1);
    }

    #[tokio::test]
    async fn challenge_requests_bypass_routing() {
        let server = server(
            r#"[{"handle": [{"handler": "static_response", "status_code": 404}]}]"#,
            None,
        );
        let app = tls_app();
        // no challenge registered: normal routing applies
        let mut w = ResponseBuffer::new();
        let mut r = ctx("GET", "/.well-known/acme-challenge/unknown", "example.com");
        server.serve_exchange(&mut r, &mut w, &app).await;
        assert_eq!(w.status(), Some(StatusCode::NOT_FOUND));
    }
}
