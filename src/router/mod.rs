//! Router — base-path routing onto mounted service proxies
//!
//! The [`RouteTable`] is rebuilt from the active route registry whenever
//! settings change. Matching is by segment-boundary prefix, first match in
//! registry order wins, and a service's own path filters apply.

pub mod base_path;
pub mod registry;

pub use base_path::{BasePathValidator, BaseUrlValidationResult, RESERVED_PATHS};
pub use registry::{active_routes, path_has_prefix, ActiveRouteEntry, ActiveRouteRegistry};

use crate::middleware::{Pipeline, SessionAuthMiddleware, SessionValidator};
use crate::proxy::{ProxyFactory, ServiceProxy, UpgradeRoute};
use crate::service::ServiceCatalog;
use std::sync::Arc;

/// A proxy mounted at a base path, with its auth chain
pub struct MountedRoute {
    pub entry: ActiveRouteEntry,
    pub guard: Pipeline,
    pub proxy: Arc<ServiceProxy>,
}

/// Compiled routes for the current settings snapshot
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<MountedRoute>,
}

impl RouteTable {
    /// Mount one proxy per active route
    pub fn build(
        registry: &ActiveRouteRegistry,
        catalog: &ServiceCatalog,
        factory: &ProxyFactory,
        validator: Arc<dyn SessionValidator>,
    ) -> Self {
        let routes = registry
            .active_routes()
            .into_iter()
            .map(|entry| {
                let config = catalog.config_for(&entry);
                let guard = Pipeline::new(vec![Arc::new(SessionAuthMiddleware::new(
                    validator.clone(),
                    config.require_admin,
                ))]);
                tracing::info!(
                    service = entry.service_name,
                    path = entry.base_path,
                    websocket = config.websocket,
                    "Proxy route mounted"
                );
                MountedRoute {
                    entry,
                    guard,
                    proxy: Arc::new(factory.build(config)),
                }
            })
            .collect();
        Self { routes }
    }

    /// First route owning `path`
    pub fn match_path(&self, path: &str) -> Option<&MountedRoute> {
        self.routes.iter().find(|route| {
            path_has_prefix(path, &route.entry.base_path) && route.proxy.config().accepts(path)
        })
    }

    /// `{prefix → proxy}` entries for the upgrade gate, in route order
    pub fn upgrade_routes(&self) -> Vec<UpgradeRoute> {
        self.routes
            .iter()
            .filter_map(|route| {
                let config = route.proxy.config();
                if !config.websocket {
                    return None;
                }
                let prefix = config.upgrade_path_prefix.clone()?;
                Some(UpgradeRoute::new(prefix, route.proxy.clone()))
            })
            .collect()
    }

    /// Mounted route entries
    pub fn entries(&self) -> Vec<ActiveRouteEntry> {
        self.routes.iter().map(|route| route.entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
