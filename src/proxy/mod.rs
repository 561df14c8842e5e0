//! Proxy layer — request forwarding to proxied services
//!
//! One generic engine ([`ServiceProxy`]) parameterized by a
//! `ServiceProxyConfig`, an error boundary shared by HTTP and tunnel
//! failures, and the upgrade gate that owns raw WebSocket sockets.

pub mod error;
pub mod http_proxy;
pub mod upgrade;
pub mod upstream;

pub use error::{ErrorBoundary, GatewayErrorBody, ResponseState, UpstreamFailure};
pub use http_proxy::{ProxyFactory, ServiceProxy};
pub use upgrade::{BoxedSocket, GateOutcome, Socket, UpgradeGate, UpgradeHandler, UpgradeRoute};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};

/// Boxed error carried by streamed bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response body produced by the gateway
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

/// Buffered body
pub fn full_body(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed_unsync()
}

pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

/// Check if a header is a hop-by-hop header that should not be forwarded
pub fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("keep-alive"));
        assert!(is_hop_by_hop("Transfer-Encoding"));
        assert!(is_hop_by_hop("Upgrade"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("X-Api-Key"));
        assert!(!is_hop_by_hop("Location"));
    }

    #[tokio::test]
    async fn test_full_body() {
        let body = full_body("hello");
        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello");
    }
}
