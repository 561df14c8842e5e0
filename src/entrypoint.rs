//! Entrypoint — the shared HTTP listener
//!
//! The first request head of every connection is read and parsed before any
//! HTTP machinery runs, so an upgrade on a gated path reaches the upgrade
//! gate with the raw socket. Everything else is served by hyper over a
//! stream that replays the bytes already read.

use crate::dashboard::{DashboardApi, DashboardResponse};
use crate::error::{GatewayError, Result};
use crate::gateway::StatusTracker;
use crate::middleware::{json_response, RequestContext};
use crate::proxy::{full_body, ProxyBody, ServiceProxy, UpgradeGate};
use crate::router::RouteTable;
use bytes::Bytes;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::cmp::min;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};

/// Upper bound on a request head read before handing off
const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 100;

/// Shared state for request handling
pub struct ServerState {
    routes: RwLock<Arc<RouteTable>>,
    pub gate: Arc<UpgradeGate>,
    pub fallback: Option<Arc<ServiceProxy>>,
    pub dashboard: Option<DashboardApi>,
    pub status: Arc<StatusTracker>,
    pub trust_proxy: bool,
    pub header_read_timeout: Duration,
}

impl ServerState {
    pub fn new(gate: Arc<UpgradeGate>, status: Arc<StatusTracker>) -> Self {
        Self {
            routes: RwLock::new(Arc::new(RouteTable::default())),
            gate,
            fallback: None,
            dashboard: None,
            status,
            trust_proxy: false,
            header_read_timeout: Duration::from_secs(30),
        }
    }

    /// Current route table
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swap in a new route table and its upgrade entries
    pub fn install_routes(&self, table: RouteTable) {
        self.gate.install(table.upgrade_routes());
        let mut routes = self
            .routes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *routes = Arc::new(table);
    }
}

/// Bind the listener and spawn the accept loop
pub async fn start_http_entrypoint(
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Other(format!("Failed to bind {}: {}", addr, e)))?;
    let local_addr = listener.local_addr()?;

    tracing::info!(address = %local_addr, "HTTP entrypoint listening");

    let handle = tokio::spawn(async move {
        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);

            let state = state.clone();
            tokio::spawn(async move {
                let _guard = state.status.connection_opened();
                handle_connection(stream, remote_addr, state).await;
            });
        }
    });

    Ok((local_addr, handle))
}

async fn handle_connection(mut stream: TcpStream, remote_addr: SocketAddr, state: Arc<ServerState>) {
    let buffer = match tokio::time::timeout(state.header_read_timeout, read_head(&mut stream)).await
    {
        Ok(Ok(buffer)) => buffer,
        Ok(Err(e)) => {
            tracing::debug!(remote = %remote_addr, error = %e, "Failed to read request head");
            return;
        }
        Err(_) => {
            tracing::debug!(remote = %remote_addr, "Timed out waiting for request head");
            return;
        }
    };
    if buffer.is_empty() {
        return;
    }

    if let Some((parts, head_len)) = parse_head(&buffer) {
        if is_upgrade(&parts.headers) {
            if let Some(route) = state.gate.admit(parts.uri.path()) {
                let ctx = RequestContext::resolve(
                    &parts.headers,
                    Some(remote_addr.ip().to_string()),
                    state.trust_proxy,
                );
                let head = Bytes::copy_from_slice(&buffer[head_len..]);
                state
                    .gate
                    .handle(&route, Box::new(stream), parts, head, ctx)
                    .await;
                return;
            }
        }
    }

    let io = TokioIo::new(BufferedStream::new(stream, buffer));
    let result = http1::Builder::new()
        .serve_connection(
            io,
            service_fn(|req| handle_http_request(req, remote_addr, state.clone())),
        )
        .with_upgrades()
        .await;
    if let Err(e) = result {
        tracing::debug!(remote = %remote_addr, error = %e, "Connection ended with error");
    }
}

/// Read until the end of the first request head, EOF, or the size bound
async fn read_head(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buffer);
        }
        let search_from = buffer.len().saturating_sub(3);
        buffer.extend_from_slice(&chunk[..n]);
        if buffer[search_from..].windows(4).any(|w| w == b"\r\n\r\n")
            || buffer.len() >= MAX_HEAD_BYTES
        {
            return Ok(buffer);
        }
    }
}

/// Parse a complete request head into request parts and its length
fn parse_head(buffer: &[u8]) -> Option<(http::request::Parts, usize)> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let len = match req.parse(buffer) {
        Ok(httparse::Status::Complete(len)) => len,
        _ => return None,
    };

    let mut builder = http::Request::builder()
        .method(req.method?)
        .uri(req.path?);
    for header in req.headers.iter() {
        builder = builder.header(header.name, header.value);
    }
    let (parts, ()) = builder.body(()).ok()?.into_parts();
    Some((parts, len))
}

/// `Connection: upgrade` together with an `Upgrade` header
fn is_upgrade(headers: &http::HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    connection_upgrade && headers.contains_key(http::header::UPGRADE)
}

/// Handle an individual HTTP request
async fn handle_http_request(
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    state: Arc<ServerState>,
) -> std::result::Result<hyper::Response<ProxyBody>, Infallible> {
    state.status.request_seen();
    let path = req.uri().path().to_string();

    if let Some(dashboard) = &state.dashboard {
        if let Some(response) = dashboard.handle(&path) {
            return Ok(dashboard_response(response));
        }
    }

    if is_upgrade(req.headers()) && state.gate.admit(&path).is_some() {
        // Gated upgrades are only recognised as the first request of a connection
        tracing::warn!(
            path,
            remote = %remote_addr,
            "WebSocket upgrade on a reused connection refused"
        );
        let mut response = json_response(
            400,
            serde_json::json!({ "status": 400, "error": "Bad Request" }),
        )
        .map(full_body);
        response.headers_mut().insert(
            http::header::CONNECTION,
            http::HeaderValue::from_static("close"),
        );
        return Ok(response);
    }

    let ctx = RequestContext::resolve(
        req.headers(),
        Some(remote_addr.ip().to_string()),
        state.trust_proxy,
    );

    let table = state.routes();
    if let Some(route) = table.match_path(&path) {
        let (mut parts, body) = req.into_parts();
        match route.guard.process_request(&mut parts, &ctx).await {
            Ok(Some(response)) => return Ok(response.map(full_body)),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, path, "Auth chain failed");
                return Ok(json_response(
                    500,
                    serde_json::json!({ "status": 500, "error": "Internal Server Error" }),
                )
                .map(full_body));
            }
        }
        let req = http::Request::from_parts(parts, body);
        return Ok(route.proxy.handle(req, ctx).await);
    }

    if let Some(fallback) = &state.fallback {
        return Ok(fallback.handle(req, ctx).await);
    }

    tracing::debug!(path, "No route matched");
    Ok(json_response(404, serde_json::json!({ "status": 404, "error": "Not Found" })).map(full_body))
}

fn dashboard_response(response: DashboardResponse) -> hyper::Response<ProxyBody> {
    let mut out = hyper::Response::new(full_body(response.body));
    *out.status_mut() =
        http::StatusCode::from_u16(response.status).unwrap_or(http::StatusCode::OK);
    if let Ok(value) = http::HeaderValue::from_str(&response.content_type) {
        out.headers_mut().insert(http::header::CONTENT_TYPE, value);
    }
    out
}

/// A TCP stream that first replays bytes already read from it
struct BufferedStream {
    stream: TcpStream,
    buffer: Vec<u8>,
    cursor: usize,
}

impl BufferedStream {
    fn new(stream: TcpStream, buffer: Vec<u8>) -> Self {
        Self {
            stream,
            buffer,
            cursor: 0,
        }
    }
}

impl AsyncRead for BufferedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.cursor < self.buffer.len() && buf.remaining() > 0 {
            let remaining = self.buffer.len() - self.cursor;
            let to_copy = min(remaining, buf.remaining());
            let start = self.cursor;
            buf.put_slice(&self.buffer[start..start + to_copy]);
            self.cursor += to_copy;
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for BufferedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        Pin::new(&mut this.stream).poll_write(cx, data)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.stream).poll_shutdown(cx)
    }
}
