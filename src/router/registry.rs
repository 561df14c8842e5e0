//! Active route registry — which base paths are proxy-owned right now
//!
//! Derived from the settings snapshot on every query. Nothing is cached:
//! enabling, disabling or re-pathing a service is visible on the next call.

use crate::config::{MediaSettings, SettingsProvider};
use crate::service::{
    normalize_base_path, ServiceKind, PLEX_BASE_PATH, TDARR_BASE_PATH, TDARR_STATIC_PATH,
};
use serde::Serialize;
use std::sync::Arc;

/// One enabled proxy mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRouteEntry {
    pub base_path: String,
    pub service_name: String,
    pub service_kind: ServiceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<u32>,
}

/// Registry of active proxy routes
#[derive(Clone)]
pub struct ActiveRouteRegistry {
    settings: Arc<dyn SettingsProvider>,
}

impl ActiveRouteRegistry {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self { settings }
    }

    /// Enabled routes, in mount order
    pub fn active_routes(&self) -> Vec<ActiveRouteEntry> {
        active_routes(&self.settings.snapshot())
    }

    /// Ordered, de-duplicated base paths of every enabled service
    pub fn list_active_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for entry in self.active_routes() {
            if !paths.contains(&entry.base_path) {
                paths.push(entry.base_path);
            }
        }
        paths
    }

    /// Whether `path` falls under a proxy-owned base path
    pub fn is_proxy_path(&self, path: &str) -> bool {
        self.list_active_paths()
            .iter()
            .any(|base| path_has_prefix(path, base))
    }
}

/// Compute the enabled routes for a settings snapshot
pub fn active_routes(settings: &MediaSettings) -> Vec<ActiveRouteEntry> {
    let mut routes = Vec::new();

    if !settings.plex.ip.trim().is_empty() {
        routes.push(ActiveRouteEntry {
            base_path: PLEX_BASE_PATH.to_string(),
            service_name: ServiceKind::Plex.label().to_string(),
            service_kind: ServiceKind::Plex,
            instance_id: None,
        });
    }

    for (kind, instances) in [
        (ServiceKind::Radarr, &settings.radarr),
        (ServiceKind::Sonarr, &settings.sonarr),
    ] {
        for instance in instances {
            let base = normalize_base_path(instance.base_url.as_deref().unwrap_or(""));
            if instance.enabled && !instance.hostname.trim().is_empty() && !base.is_empty() {
                routes.push(ActiveRouteEntry {
                    base_path: base,
                    service_name: format!("{} ({})", kind.label(), instance.name),
                    service_kind: kind,
                    instance_id: Some(instance.id),
                });
            }
        }
    }

    for (kind, service) in [
        (ServiceKind::Lidarr, &settings.lidarr),
        (ServiceKind::Prowlarr, &settings.prowlarr),
        (ServiceKind::Bazarr, &settings.bazarr),
    ] {
        let base = normalize_base_path(service.url_base.as_deref().unwrap_or(""));
        if service.enabled && has_host(service.hostname.as_deref()) && !base.is_empty() {
            routes.push(single(kind, base));
        }
    }

    let tautulli = &settings.tautulli;
    let tautulli_base = normalize_base_path(tautulli.url_base.as_deref().unwrap_or(""));
    if tautulli.enabled && has_host(tautulli.hostname.as_deref()) && !tautulli_base.is_empty() {
        routes.push(single(ServiceKind::Tautulli, tautulli_base));
    }

    if settings.tdarr.enabled && has_host(settings.tdarr.hostname.as_deref()) {
        routes.push(single(ServiceKind::Tdarr, TDARR_BASE_PATH.to_string()));
        routes.push(single(ServiceKind::Tdarr, TDARR_STATIC_PATH.to_string()));
    }

    routes
}

fn single(kind: ServiceKind, base_path: String) -> ActiveRouteEntry {
    ActiveRouteEntry {
        base_path,
        service_name: kind.label().to_string(),
        service_kind: kind,
        instance_id: None,
    }
}

fn has_host(hostname: Option<&str>) -> bool {
    hostname.map(|h| !h.trim().is_empty()).unwrap_or(false)
}

/// Segment-boundary prefix match: `/radarr` owns `/radarr` and `/radarr/x`, not `/radarrx`
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}
