//! Gateway orchestrator — lifecycle of the shared listener and route table
//!
//! Ties together the settings provider, the route registry and service
//! catalog, the proxy factory, the upgrade gate and the entrypoint. Routes
//! are rebuilt from the current settings on start and on every reload; the
//! listener keeps running across rebuilds.

use crate::config::{GatewayConfig, MediaSettings, SettingsProvider, SettingsStore};
use crate::dashboard::DashboardApi;
use crate::entrypoint::{self, ServerState};
use crate::error::{GatewayError, Result};
use crate::middleware::SessionValidator;
use crate::proxy::{ProxyFactory, UpgradeGate};
use crate::router::{ActiveRouteRegistry, RouteTable};
use crate::service::{Origin, ServiceCatalog, ServiceKind, ServiceProxyConfig};
use crate::{GatewayState, HealthStatus};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Runtime state and counters shared with the entrypoint and dashboard
pub struct StatusTracker {
    state: RwLock<GatewayState>,
    start_time: Instant,
    active_connections: AtomicUsize,
    total_requests: AtomicU64,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GatewayState::Created),
            start_time: Instant::now(),
            active_connections: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> GatewayState {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_state(&self, new_state: GatewayState) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tracing::debug!(from = %*state, to = %new_state, "State transition");
        *state = new_state;
    }

    /// Health status snapshot
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            state: self.state(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
        }
    }

    /// Count a connection until the returned guard drops
    pub fn connection_opened(self: &Arc<Self>) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            tracker: self.clone(),
        }
    }

    pub fn request_seen(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the active connection count on drop
pub struct ConnectionGuard {
    tracker: Arc<StatusTracker>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
    }
}

/// The main Gateway — coordinates all components
pub struct Gateway {
    config: GatewayConfig,
    settings: Arc<SettingsStore>,
    registry: ActiveRouteRegistry,
    catalog: ServiceCatalog,
    factory: ProxyFactory,
    validator: Arc<dyn SessionValidator>,
    server: Arc<ServerState>,
    status: Arc<StatusTracker>,
    shutdown: AtomicBool,
    local_addr: RwLock<Option<SocketAddr>>,
    handles: RwLock<Vec<tokio::task::JoinHandle<()>>>,
}

impl Gateway {
    /// Create a gateway; nothing is bound until [`Gateway::start`]
    pub fn new(
        config: GatewayConfig,
        settings: Arc<SettingsStore>,
        validator: Arc<dyn SessionValidator>,
    ) -> Result<Self> {
        config.validate()?;

        let provider: Arc<dyn SettingsProvider> = settings.clone();
        let registry = ActiveRouteRegistry::new(provider.clone());
        let catalog = ServiceCatalog::new(provider);
        let factory = ProxyFactory::new(config.connect_timeout_secs.map(Duration::from_secs))?;
        let status = Arc::new(StatusTracker::new());

        // Registered once; only its route table changes afterwards
        let gate = Arc::new(UpgradeGate::new(validator.clone()));

        let mut server = ServerState::new(gate, status.clone());
        server.trust_proxy = config.trust_proxy;
        server.header_read_timeout = Duration::from_secs(config.header_read_timeout_secs);
        server.fallback = match &config.app_upstream {
            Some(upstream) => Some(Arc::new(factory.build(portal_config(upstream)?))),
            None => None,
        };
        server.dashboard = config
            .dashboard_prefix
            .as_ref()
            .map(|prefix| DashboardApi::new(prefix.clone(), status.clone(), registry.clone()));

        Ok(Self {
            config,
            settings,
            registry,
            catalog,
            factory,
            validator,
            server: Arc::new(server),
            status,
            shutdown: AtomicBool::new(false),
            local_addr: RwLock::new(None),
            handles: RwLock::new(Vec::new()),
        })
    }

    /// Start the gateway: mount routes and begin accepting on the listener
    pub async fn start(&self) -> Result<()> {
        self.status.set_state(GatewayState::Starting);

        self.rebuild();

        let addr = self.config.listen_addr()?;
        let (local_addr, handle) =
            entrypoint::start_http_entrypoint(addr, self.server.clone()).await?;

        *self
            .local_addr
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(local_addr);
        self.handles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);

        self.status.set_state(GatewayState::Running);
        tracing::info!(address = %local_addr, "Gateway is running");
        Ok(())
    }

    /// Recompute the route table and upgrade table from current settings.
    /// Returns the number of mounted routes.
    pub fn rebuild(&self) -> usize {
        let table = RouteTable::build(
            &self.registry,
            &self.catalog,
            &self.factory,
            self.validator.clone(),
        );
        let mounted = table.len();
        self.server.install_routes(table);
        tracing::info!(
            routes = mounted,
            upgrade_routes = self.server.gate.routes().len(),
            "Route table rebuilt"
        );
        mounted
    }

    /// Replace the settings snapshot and rebuild routes
    pub fn reload_settings(&self, settings: MediaSettings) {
        let previous = self.state();
        self.status.set_state(GatewayState::Reloading);

        self.settings.replace(settings);
        self.rebuild();

        self.status.set_state(previous);
        tracing::info!("Gateway settings reloaded");
    }

    /// Stop accepting connections
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        self.status.set_state(GatewayState::Stopping);
        tracing::info!("Gateway shutting down");

        let mut handles = self
            .handles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for handle in handles.drain(..) {
            handle.abort();
        }

        self.status.set_state(GatewayState::Stopped);
        tracing::info!("Gateway stopped");
    }

    /// Wait for Ctrl+C, then shut down
    pub async fn wait_for_shutdown(&self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
        self.shutdown().await;
    }

    /// Bound listener address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .local_addr
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> GatewayState {
        self.status.state()
    }

    pub fn health(&self) -> HealthStatus {
        self.status.health()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The settings store routes are derived from
    pub fn settings(&self) -> Arc<SettingsStore> {
        self.settings.clone()
    }

    /// Registry of proxy-owned paths
    pub fn registry(&self) -> &ActiveRouteRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.state() == GatewayState::Running
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Pass-through configuration for the portal behind the gateway
fn portal_config(upstream: &str) -> Result<ServiceProxyConfig> {
    let origin = Origin::parse(upstream).ok_or_else(|| {
        GatewayError::Config(format!("Invalid app_upstream origin '{}'", upstream))
    })?;
    Ok(ServiceProxyConfig::new(
        ServiceKind::Portal.label(),
        ServiceKind::Portal,
        Arc::new(move || origin.clone()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::SessionStatus;
    use async_trait::async_trait;

    struct Anonymous;

    #[async_trait]
    impl SessionValidator for Anonymous {
        async fn validate(&self, _req: &http::request::Parts) -> Result<SessionStatus> {
            Ok(SessionStatus::anonymous())
        }
    }

    fn local_config() -> GatewayConfig {
        GatewayConfig {
            listen: "127.0.0.1:0".to_string(),
            ..GatewayConfig::default()
        }
    }

    fn gateway(config: GatewayConfig) -> Result<Gateway> {
        Gateway::new(
            config,
            Arc::new(SettingsStore::default()),
            Arc::new(Anonymous),
        )
    }

    fn with_plex() -> MediaSettings {
        let mut settings = MediaSettings::default();
        settings.plex.ip = "10.0.0.5".to_string();
        settings
    }

    #[test]
    fn test_gateway_new() {
        let gw = gateway(local_config()).unwrap();
        assert_eq!(gw.state(), GatewayState::Created);
        assert!(!gw.is_running());
        assert!(!gw.is_shutdown());
        assert!(gw.local_addr().is_none());
    }

    #[test]
    fn test_gateway_new_invalid_config() {
        let config = GatewayConfig {
            listen: "nowhere".to_string(),
            ..GatewayConfig::default()
        };
        assert!(gateway(config).is_err());
    }

    #[test]
    fn test_gateway_fallback_origin() {
        let config = GatewayConfig {
            app_upstream: Some("http://127.0.0.1:3000".to_string()),
            ..local_config()
        };
        let gw = gateway(config).unwrap();
        let fallback = gw.server.fallback.as_ref().unwrap();
        assert_eq!(
            fallback.config().resolve_target().to_string(),
            "http://127.0.0.1:3000"
        );
        assert_eq!(fallback.config().kind, ServiceKind::Portal);
    }

    #[test]
    fn test_rebuild_follows_settings() {
        let gw = gateway(local_config()).unwrap();
        assert_eq!(gw.rebuild(), 0);

        gw.reload_settings(with_plex());
        assert_eq!(gw.server.routes().len(), 1);
        assert_eq!(gw.server.gate.routes().len(), 1);
        assert_eq!(gw.registry().list_active_paths(), vec!["/web"]);

        gw.reload_settings(MediaSettings::default());
        assert!(gw.server.routes().is_empty());
        assert!(gw.server.gate.routes().is_empty());
    }

    #[test]
    fn test_state_transitions() {
        let gw = gateway(local_config()).unwrap();
        gw.status.set_state(GatewayState::Running);
        assert!(gw.is_running());
        gw.reload_settings(with_plex());
        assert_eq!(gw.state(), GatewayState::Running);
    }

    #[test]
    fn test_connection_guard_counts() {
        let tracker = Arc::new(StatusTracker::new());
        {
            let _a = tracker.connection_opened();
            let _b = tracker.connection_opened();
            assert_eq!(tracker.health().active_connections, 2);
        }
        tracker.request_seen();
        let health = tracker.health();
        assert_eq!(health.active_connections, 0);
        assert_eq!(health.total_requests, 1);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let gw = gateway(local_config()).unwrap();
        gw.start().await.unwrap();
        assert!(gw.is_running());
        let addr = gw.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        gw.shutdown().await;
        assert!(gw.is_shutdown());
        assert_eq!(gw.state(), GatewayState::Stopped);

        // Double shutdown is a no-op
        gw.shutdown().await;
        assert_eq!(gw.state(), GatewayState::Stopped);
    }
}
