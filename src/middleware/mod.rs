//! Middleware pipeline — composable request/response transformations
//!
//! Middlewares are applied in order before the request reaches the backend,
//! and in reverse order for the response.

mod forwarded;
mod rewrite;
mod session;

pub use forwarded::ForwardedHeadersMiddleware;
pub use rewrite::{external_base, rewrite_location, rewrite_request_path, PathRewriteMiddleware};
pub use session::{
    PortalSessionValidator, SessionAuthMiddleware, SessionStatus, SessionValidator,
};

use crate::error::Result;
use crate::service::Origin;
use async_trait::async_trait;
use http::Response;
use std::sync::Arc;

/// Request context passed through the middleware pipeline
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Client IP address, resolved through trusted proxies when enabled
    pub client_ip: String,
    /// Socket peer address, if known
    pub peer_ip: Option<String>,
    /// Protocol the client used to reach the gateway
    pub protocol: String,
    /// Service name that matched
    pub service: String,
    /// Upstream origin resolved for this request
    pub target: Option<Origin>,
}

impl RequestContext {
    /// Context for a connection whose only known fact is the peer address
    pub fn for_peer(peer_ip: Option<String>) -> Self {
        Self {
            client_ip: peer_ip.clone().unwrap_or_else(|| "unknown".to_string()),
            peer_ip,
            protocol: "http".to_string(),
            service: String::new(),
            target: None,
        }
    }

    /// Resolve the client IP: leftmost `X-Forwarded-For` entry when the
    /// gateway trusts its edge proxy, else the socket peer, else `unknown`.
    pub fn resolve(headers: &http::HeaderMap, peer_ip: Option<String>, trust_proxy: bool) -> Self {
        let mut ctx = Self::for_peer(peer_ip);
        if trust_proxy {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty());
            if let Some(ip) = forwarded {
                ctx.client_ip = ip.to_string();
            }
        }
        ctx
    }

    pub fn with_service(mut self, service: &str, target: Origin) -> Self {
        self.service = service.to_string();
        self.target = Some(target);
        self
    }
}

/// Middleware trait — process a request and optionally short-circuit
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process the request. Return Ok(None) to continue the pipeline,
    /// or Ok(Some(response)) to short-circuit with an immediate response.
    async fn handle_request(
        &self,
        req: &mut http::request::Parts,
        ctx: &RequestContext,
    ) -> Result<Option<Response<Vec<u8>>>>;

    /// Process the response (optional, default is pass-through)
    async fn handle_response(
        &self,
        _resp: &mut http::response::Parts,
        _ctx: &RequestContext,
    ) -> Result<()> {
        Ok(())
    }

    /// Middleware name for logging
    fn name(&self) -> &str;
}

/// Ordered middleware pipeline
#[derive(Clone, Default)]
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    /// Create an empty pipeline
    pub fn empty() -> Self {
        Self::default()
    }

    /// Execute the request through all middlewares.
    /// Returns Some(response) if any middleware short-circuits.
    pub async fn process_request(
        &self,
        parts: &mut http::request::Parts,
        ctx: &RequestContext,
    ) -> Result<Option<Response<Vec<u8>>>> {
        for mw in &self.middlewares {
            if let Some(response) = mw.handle_request(parts, ctx).await? {
                tracing::debug!(middleware = mw.name(), "Middleware short-circuited request");
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Execute the response through all middlewares (reverse order)
    pub async fn process_response(
        &self,
        parts: &mut http::response::Parts,
        ctx: &RequestContext,
    ) -> Result<()> {
        for mw in self.middlewares.iter().rev() {
            mw.handle_response(parts, ctx).await?;
        }
        Ok(())
    }

    /// Number of middlewares in the pipeline
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Whether the pipeline is empty
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

/// Small JSON response used by short-circuiting middlewares
pub(crate) fn json_response(status: u16, body: serde_json::Value) -> Response<Vec<u8>> {
    let mut response = Response::new(body.to_string().into_bytes());
    *response.status_mut() =
        http::StatusCode::from_u16(status).unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}
