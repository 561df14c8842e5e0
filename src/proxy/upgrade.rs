//! WebSocket upgrade gate — session check before any socket hand-off
//!
//! A single gate is created with the gateway and owns the
//! `{prefix → handler}` table for upgrade requests. The table is replaced
//! wholesale whenever routes are rebuilt; lookups take a snapshot, so a
//! connection in flight keeps the table it started with.

use crate::middleware::{RequestContext, SessionValidator};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Bytes written to an unauthenticated upgrade before closing
pub const UNAUTHORIZED_RESPONSE: &[u8] = b"HTTP/1.1 401 Unauthorized\r\n\r\n";

/// A duplex byte stream the gate can hand to a proxy
pub trait Socket: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Socket for T {}

pub type BoxedSocket = Box<dyn Socket>;

/// Receiver of authenticated upgrade sockets
#[async_trait]
pub trait UpgradeHandler: Send + Sync {
    /// Take ownership of the client socket, the original request head and
    /// any bytes the client sent past it.
    async fn upgrade(
        &self,
        socket: BoxedSocket,
        req: http::request::Parts,
        head: Bytes,
        ctx: RequestContext,
    );

    /// Name for logging
    fn name(&self) -> &str;
}

/// One `{prefix → handler}` entry
#[derive(Clone)]
pub struct UpgradeRoute {
    pub prefix: String,
    pub handler: Arc<dyn UpgradeHandler>,
}

impl UpgradeRoute {
    pub fn new(prefix: impl Into<String>, handler: Arc<dyn UpgradeHandler>) -> Self {
        Self {
            prefix: prefix.into(),
            handler,
        }
    }
}

/// What the gate did with a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Session valid; the socket went to the route's handler
    Forwarded,
    /// Session invalid; 401 written and the socket closed
    Rejected,
}

/// The upgrade gate
pub struct UpgradeGate {
    validator: Arc<dyn SessionValidator>,
    routes: RwLock<Arc<Vec<UpgradeRoute>>>,
}

impl UpgradeGate {
    pub fn new(validator: Arc<dyn SessionValidator>) -> Self {
        Self {
            validator,
            routes: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Replace the route table
    pub fn install(&self, routes: Vec<UpgradeRoute>) {
        let mut current = self
            .routes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = Arc::new(routes);
    }

    /// Current table, in registration order
    pub fn routes(&self) -> Arc<Vec<UpgradeRoute>> {
        self.routes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// First route whose prefix matches `path`, if the gate owns it
    pub fn admit(&self, path: &str) -> Option<UpgradeRoute> {
        self.routes()
            .iter()
            .find(|route| path.starts_with(route.prefix.as_str()))
            .cloned()
    }

    /// Validate the session, then either hand the socket to `route` exactly
    /// once or reject it with a bare 401.
    pub async fn handle(
        &self,
        route: &UpgradeRoute,
        mut socket: BoxedSocket,
        req: http::request::Parts,
        head: Bytes,
        ctx: RequestContext,
    ) -> GateOutcome {
        let authenticated = match self.validator.validate(&req).await {
            Ok(status) => status.has_user(),
            Err(e) => {
                tracing::warn!(error = %e, path = %req.uri, "Session validation failed");
                false
            }
        };

        if !authenticated {
            tracing::warn!(
                path = %req.uri,
                remote = ctx.client_ip,
                "Unauthenticated WebSocket upgrade attempt"
            );
            let _ = socket.write_all(UNAUTHORIZED_RESPONSE).await;
            let _ = socket.shutdown().await;
            return GateOutcome::Rejected;
        }

        tracing::debug!(
            path = %req.uri,
            service = route.handler.name(),
            "WebSocket upgrade admitted"
        );
        route.handler.upgrade(socket, req, head, ctx).await;
        GateOutcome::Forwarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::middleware::SessionStatus;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    struct Fixed(SessionStatus);

    #[async_trait]
    impl SessionValidator for Fixed {
        async fn validate(&self, _req: &http::request::Parts) -> Result<SessionStatus> {
            Ok(self.0.clone())
        }
    }

    /// Records every hand-off and echoes a marker on the socket
    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(String, Bytes)>>,
    }

    #[async_trait]
    impl UpgradeHandler for Recording {
        async fn upgrade(
            &self,
            mut socket: BoxedSocket,
            req: http::request::Parts,
            head: Bytes,
            _ctx: RequestContext,
        ) {
            self.calls
                .lock()
                .unwrap()
                .push((req.uri.to_string(), head));
            let _ = socket.write_all(b"handed-off").await;
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn upgrade_request(path: &str) -> http::request::Parts {
        http::Request::builder()
            .uri(path)
            .header("connection", "Upgrade")
            .header("upgrade", "websocket")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    fn gate(status: SessionStatus) -> (UpgradeGate, Arc<Recording>, Arc<Recording>) {
        let gate = UpgradeGate::new(Arc::new(Fixed(status)));
        let plex = Arc::new(Recording::default());
        let tdarr = Arc::new(Recording::default());
        gate.install(vec![
            UpgradeRoute::new("/web", plex.clone()),
            UpgradeRoute::new("/tdarr/socket.io", tdarr.clone()),
        ]);
        (gate, plex, tdarr)
    }

    #[test]
    fn test_admit_first_match_in_order() {
        let (gate, _, _) = gate(SessionStatus::user(1, false));
        assert_eq!(gate.admit("/web/socket").unwrap().prefix, "/web");
        assert_eq!(
            gate.admit("/tdarr/socket.io/?EIO=4").unwrap().prefix,
            "/tdarr/socket.io"
        );
        assert!(gate.admit("/tdarr/dashboard").is_none());
        assert!(gate.admit("/api/v1/ws").is_none());
    }

    #[test]
    fn test_install_replaces_table() {
        let (gate, _, _) = gate(SessionStatus::user(1, false));
        let snapshot = gate.routes();
        gate.install(Vec::new());
        assert!(gate.admit("/web").is_none());
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_rejects_unauthenticated() {
        let (gate, plex, tdarr) = gate(SessionStatus::anonymous());
        let (client, server) = tokio::io::duplex(1024);
        let route = gate.admit("/web/socket").unwrap();

        let outcome = gate
            .handle(
                &route,
                Box::new(server),
                upgrade_request("/web/socket"),
                Bytes::new(),
                RequestContext::for_peer(Some("10.0.0.3".to_string())),
            )
            .await;
        assert_eq!(outcome, GateOutcome::Rejected);

        let mut client = client;
        let mut written = Vec::new();
        client.read_to_end(&mut written).await.unwrap();
        assert_eq!(written, UNAUTHORIZED_RESPONSE);

        assert!(plex.calls.lock().unwrap().is_empty());
        assert!(tdarr.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_authenticated_without_user() {
        let (gate, plex, _) = gate(SessionStatus {
            authenticated: true,
            user_id: None,
            admin: false,
        });
        let (mut client, server) = tokio::io::duplex(1024);
        let route = gate.admit("/web/socket").unwrap();

        let outcome = gate
            .handle(
                &route,
                Box::new(server),
                upgrade_request("/web/socket"),
                Bytes::new(),
                RequestContext::for_peer(None),
            )
            .await;
        assert_eq!(outcome, GateOutcome::Rejected);

        let mut written = Vec::new();
        client.read_to_end(&mut written).await.unwrap();
        assert_eq!(written, UNAUTHORIZED_RESPONSE);
        assert!(plex.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forwards_authenticated_exactly_once() {
        let (gate, plex, tdarr) = gate(SessionStatus::user(1, false));
        let (mut client, server) = tokio::io::duplex(1024);
        let route = gate.admit("/tdarr/socket.io/?EIO=4").unwrap();
        let head = Bytes::from_static(b"\x81\x05hello");

        let outcome = gate
            .handle(
                &route,
                Box::new(server),
                upgrade_request("/tdarr/socket.io/?EIO=4"),
                head.clone(),
                RequestContext::for_peer(None),
            )
            .await;
        assert_eq!(outcome, GateOutcome::Forwarded);

        {
            let calls = tdarr.calls.lock().unwrap();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].0, "/tdarr/socket.io/?EIO=4");
            assert_eq!(calls[0].1, head);
            assert!(plex.calls.lock().unwrap().is_empty());
        }

        // The handler received the same socket the gate was given
        let mut buf = [0u8; 10];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"handed-off");
    }
}
