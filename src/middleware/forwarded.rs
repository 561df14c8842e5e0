//! Forwarded headers middleware — client identity and service credentials
//!
//! Sets `X-Real-IP`, extends `X-Forwarded-For`, fills in the forwarded
//! proto/host/port triple (inbound values from an edge proxy win) and
//! injects the service's auth header.

use super::{Middleware, RequestContext};
use crate::error::Result;
use crate::service::AuthHeader;
use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Response};

const X_REAL_IP: &str = "x-real-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PORT: &str = "x-forwarded-port";

/// Header forwarder for one service
pub struct ForwardedHeadersMiddleware {
    auth_header: Option<AuthHeader>,
}

impl ForwardedHeadersMiddleware {
    pub fn new(auth_header: Option<AuthHeader>) -> Self {
        Self { auth_header }
    }

    /// Apply forwarding and auth headers in place
    pub fn apply(&self, headers: &mut HeaderMap, ctx: &RequestContext) {
        let client_ip = ctx.client_ip.as_str();
        set(headers, X_REAL_IP, client_ip);

        let chain = headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let forwarded_for = match chain {
            Some(chain) => {
                let hop = ctx.peer_ip.as_deref().unwrap_or(client_ip);
                format!("{}, {}", chain, hop)
            }
            None => client_ip.to_string(),
        };
        set(headers, X_FORWARDED_FOR, &forwarded_for);

        let proto = inbound(headers, X_FORWARDED_PROTO)
            .unwrap_or_else(|| ctx.protocol.clone());
        let proto = if proto.is_empty() { "http".to_string() } else { proto };

        let host = inbound(headers, X_FORWARDED_HOST)
            .or_else(|| inbound(headers, "host"))
            .unwrap_or_default();

        let port = inbound(headers, X_FORWARDED_PORT).unwrap_or_else(|| {
            if proto == "https" { "443" } else { "80" }.to_string()
        });

        set(headers, X_FORWARDED_PROTO, &proto);
        set(headers, X_FORWARDED_HOST, &host);
        set(headers, X_FORWARDED_PORT, &port);

        if let Some(auth) = &self.auth_header {
            match HeaderValue::from_str(&auth.value) {
                Ok(value) => {
                    headers.insert(auth.name.clone(), value);
                }
                Err(_) => {
                    tracing::warn!(
                        header = auth.name.as_str(),
                        service = ctx.service,
                        "Service auth header value is not a valid header value"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl Middleware for ForwardedHeadersMiddleware {
    async fn handle_request(
        &self,
        req: &mut http::request::Parts,
        ctx: &RequestContext,
    ) -> Result<Option<Response<Vec<u8>>>> {
        self.apply(&mut req.headers, ctx);
        Ok(None)
    }

    fn name(&self) -> &str {
        "forwarded-headers"
    }
}

fn inbound(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn set(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(name, v);
    }
}
