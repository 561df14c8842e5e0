//! Service proxy — the generic engine behind every proxied service
//!
//! A [`ServiceProxy`] is built once per configured service by the
//! [`ProxyFactory`] and shared by all requests. Per request it resolves the
//! target, rewrites path and headers through its pipeline, forwards with
//! `reqwest` and streams the response back. Upgrade sockets admitted by the
//! gate are tunnelled over a raw upstream connection.

use super::error::{ErrorBoundary, ResponseState, UpstreamFailure};
use super::upgrade::{BoxedSocket, UpgradeHandler};
use super::{is_hop_by_hop, upstream, BoxError, ProxyBody};
use crate::error::Result;
use crate::middleware::{
    json_response, rewrite_request_path, ForwardedHeadersMiddleware, PathRewriteMiddleware, Pipeline,
    RequestContext,
};
use crate::service::ServiceProxyConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http::{HeaderMap, HeaderValue, Response};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Builds proxies sharing one upstream client
#[derive(Clone)]
pub struct ProxyFactory {
    client: reqwest::Client,
    connect_timeout: Option<Duration>,
}

impl ProxyFactory {
    pub fn new(connect_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(32);
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            connect_timeout,
        })
    }

    /// Build the proxy for one service
    pub fn build(&self, config: ServiceProxyConfig) -> ServiceProxy {
        let forwarded = Arc::new(ForwardedHeadersMiddleware::new(config.auth_header.clone()));
        let pipeline = Pipeline::new(vec![
            forwarded.clone(),
            Arc::new(PathRewriteMiddleware::new(config.clone())),
        ]);
        ServiceProxy {
            boundary: ErrorBoundary::new(&config.name),
            config,
            pipeline,
            forwarded,
            client: self.client.clone(),
            connect_timeout: self.connect_timeout,
        }
    }
}

/// A runnable proxy for one service
pub struct ServiceProxy {
    config: ServiceProxyConfig,
    pipeline: Pipeline,
    forwarded: Arc<ForwardedHeadersMiddleware>,
    boundary: ErrorBoundary,
    client: reqwest::Client,
    connect_timeout: Option<Duration>,
}

impl ServiceProxy {
    pub fn config(&self) -> &ServiceProxyConfig {
        &self.config
    }

    /// Proxy one request. Never fails: upstream errors become a 502 through
    /// the error boundary.
    pub async fn handle<B>(&self, req: http::Request<B>, ctx: RequestContext) -> Response<ProxyBody>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let target = self.config.resolve_target();
        let ctx = ctx.with_service(&self.config.name, target.clone());
        let original_path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let state = Arc::new(ResponseState::new());

        let (mut parts, body) = req.into_parts();
        if let Err(e) = self.pipeline.process_request(&mut parts, &ctx).await {
            let failure = UpstreamFailure::new(e.to_string(), None);
            return self.fail(&failure, &original_path, &ctx, &state);
        }

        // An incomplete upload is never forwarded
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let e: BoxError = e.into();
                tracing::debug!(
                    service = self.config.name,
                    error = %e,
                    path = original_path,
                    "Client body read failed, request not forwarded"
                );
                return json_response(
                    400,
                    serde_json::json!({ "status": 400, "error": "Bad Request" }),
                )
                .map(super::full_body);
            }
        };

        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", target, path);

        let upstream = self
            .client
            .request(parts.method.clone(), &url)
            .headers(forwardable(&parts.headers))
            .body(body);

        tracing::debug!(service = self.config.name, path = original_path, url, "Forwarding request");

        let response = match upstream.send().await {
            Ok(response) => response,
            Err(e) => {
                let failure = UpstreamFailure::from_reqwest(&e);
                return self.fail(&failure, &original_path, &ctx, &state);
            }
        };

        let (mut head, _) = Response::new(()).into_parts();
        head.status = response.status();
        head.version = http::Version::HTTP_11;
        head.headers = forwardable(response.headers());

        if let Err(e) = self.pipeline.process_response(&mut head, &ctx).await {
            let failure = UpstreamFailure::new(e.to_string(), None);
            return self.fail(&failure, &original_path, &ctx, &state);
        }

        state.commit();

        let boundary = self.boundary.clone();
        let stream_target = target.clone();
        let stream_state = state.clone();
        let stream_path = original_path.clone();
        let stream = response.bytes_stream().map_ok(Frame::data).map_err(move |e| {
            let failure = UpstreamFailure::from_reqwest(&e);
            let _ = boundary.handle(&failure, &stream_path, &stream_target, &stream_state);
            BoxError::from(e)
        });

        Response::from_parts(head, StreamBody::new(stream).boxed_unsync())
    }

    fn fail(
        &self,
        failure: &UpstreamFailure,
        path: &str,
        ctx: &RequestContext,
        state: &ResponseState,
    ) -> Response<ProxyBody> {
        let target = ctx
            .target
            .clone()
            .unwrap_or_else(|| self.config.resolve_target());
        self.boundary
            .handle(failure, path, &target, state)
            .unwrap_or_else(|| {
                // The boundary only declines once a response is under way,
                // which cannot happen before the head is returned.
                let mut response = Response::new(super::empty_body());
                *response.status_mut() = http::StatusCode::BAD_GATEWAY;
                response
            })
    }

    /// Write the rewritten upgrade request head for the upstream
    fn upgrade_head(&self, req: &http::request::Parts, path: &str) -> Vec<u8> {
        let mut head = format!("{} {} HTTP/1.1\r\n", req.method, path).into_bytes();
        for (name, value) in &req.headers {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");
        head
    }
}

/// Headers safe to forward across the hop. `Host` is dropped so the
/// client sets it from the upstream URL.
fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) || name == http::header::HOST {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

#[async_trait]
impl UpgradeHandler for ServiceProxy {
    async fn upgrade(
        &self,
        mut socket: BoxedSocket,
        mut req: http::request::Parts,
        head: Bytes,
        ctx: RequestContext,
    ) {
        let target = self.config.resolve_target();
        let ctx = ctx.with_service(&self.config.name, target.clone());
        let original_path = req
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let path = rewrite_request_path(&original_path, &self.config);

        self.forwarded.apply(&mut req.headers, &ctx);
        if let Ok(host) = HeaderValue::from_str(&target.authority()) {
            req.headers.insert(http::header::HOST, host);
        }

        let mut upstream = match upstream::connect(&target, self.connect_timeout).await {
            Ok(upstream) => upstream,
            Err(e) => {
                let failure = UpstreamFailure::from_io(&e);
                tracing::error!(
                    service = self.config.name,
                    path = original_path,
                    target = %target,
                    code = failure.code.as_deref().unwrap_or("-"),
                    error = %failure.message,
                    "{} WebSocket proxy error",
                    self.config.name
                );
                let _ = socket.shutdown().await;
                return;
            }
        };

        let request_head = self.upgrade_head(&req, &path);
        let write = async {
            upstream.write_all(&request_head).await?;
            if !head.is_empty() {
                upstream.write_all(&head).await?;
            }
            upstream.flush().await
        };
        if let Err(e) = write.await {
            let failure = UpstreamFailure::from_io(&e);
            tracing::error!(
                service = self.config.name,
                path = original_path,
                target = %target,
                code = failure.code.as_deref().unwrap_or("-"),
                error = %failure.message,
                "{} WebSocket proxy error",
                self.config.name
            );
            let _ = socket.shutdown().await;
            return;
        }

        tracing::debug!(service = self.config.name, path = original_path, "WebSocket tunnel open");

        match tokio::io::copy_bidirectional(&mut socket, &mut upstream).await {
            Ok((to_upstream, to_client)) => {
                tracing::debug!(
                    service = self.config.name,
                    to_upstream,
                    to_client,
                    "WebSocket tunnel closed"
                );
            }
            Err(e) => {
                tracing::debug!(service = self.config.name, error = %e, "WebSocket tunnel ended");
            }
        }
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}
