//! Proxy error boundary — structured 502s, written at most once
//!
//! Every upstream failure funnels through [`ErrorBoundary::handle`]. It logs
//! the failure with the service, path, target and low-level code, and
//! produces a 502 JSON body only if nothing has been sent to the client yet.

use super::{full_body, ProxyBody};
use crate::service::Origin;
use http::Response;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Wire body of an upstream failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayErrorBody {
    pub status: u16,
    pub error: String,
    pub message: String,
    pub target: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Tracks whether a response has started for one request
#[derive(Debug, Default)]
pub struct ResponseState {
    committed: AtomicBool,
}

impl ResponseState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the response as started; returns whether it already was
    pub fn commit(&self) -> bool {
        self.committed.swap(true, Ordering::SeqCst)
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }
}

/// A failed upstream exchange, reduced to what is logged and reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamFailure {
    pub message: String,
    pub code: Option<String>,
}

impl UpstreamFailure {
    pub fn new(message: impl Into<String>, code: Option<&str>) -> Self {
        Self {
            message: message.into(),
            code: code.map(str::to_string),
        }
    }

    /// Classify a transport error raised by the HTTP client
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let io = find_io_error(err);
        let chain = error_chain(err);

        let code = if err.is_timeout() {
            Some("ETIMEDOUT")
        } else if chain.contains("dns error") || chain.contains("failed to lookup address") {
            Some("ENOTFOUND")
        } else {
            io.and_then(io_code)
        };

        let message = match io {
            Some(io) => io.to_string(),
            None => chain,
        };
        Self::new(message, code)
    }

    /// Classify a raw socket error (upgrade tunnels)
    pub fn from_io(err: &std::io::Error) -> Self {
        Self::new(err.to_string(), io_code(err))
    }
}

impl std::fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

fn find_io_error<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a std::io::Error> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return Some(io);
        }
        current = e.source();
    }
    None
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(e) = current {
        parts.push(e.to_string());
        current = e.source();
    }
    parts.join(": ")
}

/// Node-style code for a socket error
fn io_code(err: &std::io::Error) -> Option<&'static str> {
    use std::io::ErrorKind;
    let code = match err.kind() {
        ErrorKind::ConnectionRefused => "ECONNREFUSED",
        ErrorKind::ConnectionReset => "ECONNRESET",
        ErrorKind::ConnectionAborted => "ECONNABORTED",
        ErrorKind::TimedOut => "ETIMEDOUT",
        ErrorKind::BrokenPipe => "EPIPE",
        ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
        ErrorKind::HostUnreachable => "EHOSTUNREACH",
        ErrorKind::NetworkUnreachable => "ENETUNREACH",
        ErrorKind::UnexpectedEof => "ECONNRESET",
        _ => {
            let text = err.to_string();
            if text.contains("failed to lookup address") || text.contains("Name or service not known") {
                "ENOTFOUND"
            } else {
                return None;
            }
        }
    };
    Some(code)
}

/// Error boundary shared by every request of one proxied service
#[derive(Debug, Clone)]
pub struct ErrorBoundary {
    service: String,
}

impl ErrorBoundary {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Report a failure. Returns the 502 response to send, or `None` when
    /// the response has already started and only the log line remains.
    pub fn handle(
        &self,
        failure: &UpstreamFailure,
        path: &str,
        target: &Origin,
        state: &ResponseState,
    ) -> Option<Response<ProxyBody>> {
        let target = target.to_string();
        tracing::error!(
            service = self.service,
            path,
            target,
            code = failure.code.as_deref().unwrap_or("-"),
            error = %failure.message,
            "{} proxy error",
            self.service
        );

        if state.commit() {
            return None;
        }

        let body = GatewayErrorBody {
            status: 502,
            error: "Service unavailable".to_string(),
            message: format!("Unable to connect to {}", self.service),
            target,
            reason: failure.message.clone(),
            code: failure.code.clone(),
        };
        let json = serde_json::to_vec(&body).unwrap_or_default();

        let mut response = Response::new(full_body(json));
        *response.status_mut() = http::StatusCode::BAD_GATEWAY;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json; charset=utf-8"),
        );
        Some(response)
    }
}
