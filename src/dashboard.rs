//! Dashboard API — gateway status and the active route list
//!
//! Served under the optional `dashboard_prefix`. `/routes` is how non-Rust
//! collaborators (the portal's API schema validator) learn which paths are
//! proxy-owned.

use crate::gateway::StatusTracker;
use crate::router::ActiveRouteRegistry;
use serde::Serialize;
use std::sync::Arc;

/// Gateway version information
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub name: &'static str,
    pub version: &'static str,
}

impl VersionInfo {
    pub(crate) fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Dashboard API handler
pub struct DashboardApi {
    /// Path prefix for the dashboard
    pub path_prefix: String,
    status: Arc<StatusTracker>,
    registry: ActiveRouteRegistry,
}

impl DashboardApi {
    pub fn new(
        path_prefix: impl Into<String>,
        status: Arc<StatusTracker>,
        registry: ActiveRouteRegistry,
    ) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            status,
            registry,
        }
    }

    /// Check if a request path belongs to the dashboard
    pub fn matches(&self, path: &str) -> bool {
        crate::router::path_has_prefix(path, &self.path_prefix)
    }

    /// Handle a dashboard request; `None` when the path is not ours
    pub fn handle(&self, path: &str) -> Option<DashboardResponse> {
        if !self.matches(path) {
            return None;
        }
        let sub_path = path.strip_prefix(&self.path_prefix)?;

        let response = match sub_path {
            "/health" | "/health/" => DashboardResponse::json(200, &self.status.health()),
            "/routes" | "/routes/" => DashboardResponse::json(200, &self.registry.active_routes()),
            "/paths" | "/paths/" => {
                DashboardResponse::json(200, &self.registry.list_active_paths())
            }
            "/version" | "/version/" => DashboardResponse::json(200, &VersionInfo::current()),
            _ => DashboardResponse::not_found("Not found"),
        };
        Some(response)
    }
}

/// Response from the dashboard API
#[derive(Debug, Clone)]
pub struct DashboardResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl DashboardResponse {
    pub(crate) fn json<T: Serialize>(status: u16, value: &T) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body: serde_json::to_string_pretty(value).unwrap_or_default(),
        }
    }

    pub(crate) fn not_found(message: &str) -> Self {
        Self::json(404, &serde_json::json!({ "status": 404, "error": message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MediaSettings, SettingsProvider, SettingsStore};
    use crate::GatewayState;

    fn api(settings: MediaSettings) -> (DashboardApi, Arc<StatusTracker>) {
        let provider: Arc<dyn SettingsProvider> = Arc::new(SettingsStore::new(settings));
        let status = Arc::new(StatusTracker::new());
        let api = DashboardApi::new(
            "/_gateway",
            status.clone(),
            ActiveRouteRegistry::new(provider),
        );
        (api, status)
    }

    fn with_plex() -> MediaSettings {
        let mut settings = MediaSettings::default();
        settings.plex.ip = "10.0.0.5".to_string();
        settings
    }

    #[test]
    fn test_dashboard_matches() {
        let (api, _) = api(MediaSettings::default());
        assert!(api.matches("/_gateway/health"));
        assert!(!api.matches("/_gatewayx/health"));
        assert!(!api.matches("/web"));
        assert!(api.handle("/web").is_none());
    }

    #[test]
    fn test_dashboard_health() {
        let (api, status) = api(MediaSettings::default());
        status.set_state(GatewayState::Running);
        let resp = api.handle("/_gateway/health").unwrap();
        assert_eq!(resp.status, 200);
        assert!(resp.content_type.contains("json"));
        let body: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
        assert_eq!(body["state"], "Running");
    }

    #[test]
    fn test_dashboard_routes() {
        let (api, _) = api(with_plex());
        let resp = api.handle("/_gateway/routes").unwrap();
        assert_eq!(resp.status, 200);
        let body: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
        assert_eq!(body[0]["basePath"], "/web");
        assert_eq!(body[0]["serviceKind"], "plex");
    }

    #[test]
    fn test_dashboard_paths() {
        let (api, _) = api(with_plex());
        let resp = api.handle("/_gateway/paths/").unwrap();
        let body: Vec<String> = serde_json::from_str(&resp.body).unwrap();
        assert_eq!(body, vec!["/web"]);
    }

    #[test]
    fn test_dashboard_version() {
        let (api, _) = api(MediaSettings::default());
        let resp = api.handle("/_gateway/version").unwrap();
        assert!(resp.body.contains("mediastack-gateway"));
        assert!(resp.body.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_dashboard_not_found() {
        let (api, _) = api(MediaSettings::default());
        let resp = api.handle("/_gateway/unknown").unwrap();
        assert_eq!(resp.status, 404);
        assert!(resp.body.contains("Not found"));
    }
}
