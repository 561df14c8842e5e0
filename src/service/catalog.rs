//! Declarative catalog of proxied services
//!
//! Maps an active route onto the [`ServiceProxyConfig`] the proxy engine
//! runs with. Per-service differences live here as data; target
//! resolvers close over the settings provider and read the current
//! snapshot on every call.

use super::{AuthHeader, Origin, PathRewrite, ServiceKind, ServiceProxyConfig, TargetResolver};
use crate::config::{MediaSettings, SettingsProvider};
use crate::router::registry::ActiveRouteEntry;
use http::HeaderName;
use std::sync::Arc;

/// Fixed mount path of the media server web client
pub const PLEX_BASE_PATH: &str = "/web";
/// Fixed mount path of the transcoding manager
pub const TDARR_BASE_PATH: &str = "/tdarr";
/// Asset path the transcoding manager UI loads from the site root
pub const TDARR_STATIC_PATH: &str = "/static";

const PLEX_TOKEN_HEADER: &str = "x-plex-token";
const TDARR_SOCKET_PREFIX: &str = "/tdarr/socket.io";
const BUNDLER_ASSET_SEGMENT: &str = "/_next/";

/// Builds proxy configurations from live settings
#[derive(Clone)]
pub struct ServiceCatalog {
    settings: Arc<dyn SettingsProvider>,
}

impl ServiceCatalog {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self { settings }
    }

    /// Proxy configuration for an active route
    pub fn config_for(&self, entry: &ActiveRouteEntry) -> ServiceProxyConfig {
        let snapshot = self.settings.snapshot();
        let target = self.resolver(entry.service_kind, entry.instance_id);
        let mut config = ServiceProxyConfig::new(&entry.service_name, entry.service_kind, target);
        config.instance_id = entry.instance_id;
        config.base_path = entry.base_path.clone();

        match entry.service_kind {
            ServiceKind::Plex => {
                config.rewrite = PathRewrite::PrependBase(PLEX_BASE_PATH.to_string());
                config.auth_header = snapshot
                    .plex
                    .token
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .map(|t| AuthHeader::named(HeaderName::from_static(PLEX_TOKEN_HEADER), t));
                config.websocket = true;
                config.upgrade_path_prefix = Some(PLEX_BASE_PATH.to_string());
            }
            ServiceKind::Radarr | ServiceKind::Sonarr => {
                config.rewrite = PathRewrite::PrependBase(entry.base_path.clone());
                config.auth_header = dvr_api_key(&snapshot, entry.service_kind, entry.instance_id)
                    .map(AuthHeader::api_key);
                config.require_admin = true;
            }
            ServiceKind::Lidarr | ServiceKind::Prowlarr => {
                config.rewrite = PathRewrite::PrependBase(entry.base_path.clone());
                let service = if entry.service_kind == ServiceKind::Lidarr {
                    &snapshot.lidarr
                } else {
                    &snapshot.prowlarr
                };
                config.auth_header = service.api_key.clone().map(AuthHeader::api_key);
                config.require_admin = true;
            }
            ServiceKind::Bazarr => {
                config.rewrite = PathRewrite::PrependBase(entry.base_path.clone());
                config.auth_header = snapshot.bazarr.api_key.clone().map(AuthHeader::api_key);
                config.require_admin = true;
            }
            ServiceKind::Tautulli => {
                config.rewrite = PathRewrite::PrependBase(entry.base_path.clone());
                config.require_admin = true;
            }
            ServiceKind::Tdarr if entry.base_path == TDARR_STATIC_PATH => {
                config.name = format!("{} assets", ServiceKind::Tdarr.label());
                config.rewrite = PathRewrite::PrependBase(TDARR_STATIC_PATH.to_string());
                config.require_admin = true;
            }
            ServiceKind::Tdarr => {
                config.rewrite = PathRewrite::FixedRemap(TDARR_BASE_PATH.to_string());
                config.websocket = true;
                config.upgrade_path_prefix = Some(TDARR_SOCKET_PREFIX.to_string());
                config.excluded_segments = vec![BUNDLER_ASSET_SEGMENT.to_string()];
                config.require_admin = true;
            }
            ServiceKind::Portal => {}
        }

        config
    }

    /// Target resolver reading the current snapshot on every call
    fn resolver(&self, kind: ServiceKind, instance_id: Option<u32>) -> TargetResolver {
        let settings = self.settings.clone();
        Arc::new(move || resolve_origin(&settings.snapshot(), kind, instance_id))
    }
}

/// Upstream origin of a service in a settings snapshot
pub fn resolve_origin(settings: &MediaSettings, kind: ServiceKind, instance_id: Option<u32>) -> Origin {
    match kind {
        ServiceKind::Plex => {
            let plex = &settings.plex;
            Origin::new(plex.use_ssl, Some(&plex.ip), Some(plex.port))
        }
        ServiceKind::Radarr | ServiceKind::Sonarr => {
            let instances = if kind == ServiceKind::Radarr {
                &settings.radarr
            } else {
                &settings.sonarr
            };
            match instances.iter().find(|i| Some(i.id) == instance_id) {
                Some(i) => Origin::new(i.use_ssl, Some(&i.hostname), Some(i.port)),
                None => Origin::new(false, None, None),
            }
        }
        ServiceKind::Tautulli => {
            let t = &settings.tautulli;
            Origin::new(t.use_ssl, t.hostname.as_deref(), t.port)
        }
        ServiceKind::Lidarr | ServiceKind::Bazarr | ServiceKind::Prowlarr | ServiceKind::Tdarr => {
            let s = match kind {
                ServiceKind::Lidarr => &settings.lidarr,
                ServiceKind::Bazarr => &settings.bazarr,
                ServiceKind::Prowlarr => &settings.prowlarr,
                _ => &settings.tdarr,
            };
            Origin::new(s.use_ssl, s.hostname.as_deref(), s.port)
        }
        // Configured on the gateway itself, not in the settings file
        ServiceKind::Portal => Origin::new(false, None, None),
    }
}

fn dvr_api_key(settings: &MediaSettings, kind: ServiceKind, instance_id: Option<u32>) -> Option<String> {
    let instances = match kind {
        ServiceKind::Radarr => &settings.radarr,
        _ => &settings.sonarr,
    };
    instances
        .iter()
        .find(|i| Some(i.id) == instance_id)
        .map(|i| i.api_key.clone())
        .filter(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DvrSettings, SettingsStore};
    use crate::router::registry::active_routes;

    fn store() -> Arc<SettingsStore> {
        let store = SettingsStore::default();
        store.update(|s| {
            s.plex.ip = "10.0.0.5".to_string();
            s.plex.token = Some("plex-token".to_string());
            s.radarr.push(DvrSettings {
                id: 3,
                name: "Main".to_string(),
                hostname: "10.0.0.7".to_string(),
                port: 7878,
                api_key: "r-key".to_string(),
                base_url: Some("/radarr".to_string()),
                ..DvrSettings::default()
            });
            s.bazarr.enabled = true;
            s.bazarr.hostname = Some("10.0.0.8".to_string());
            s.bazarr.port = Some(6767);
            s.bazarr.url_base = Some("/bazarr".to_string());
            s.bazarr.api_key = Some("b-key".to_string());
            s.tdarr.enabled = true;
            s.tdarr.hostname = Some("10.0.0.9".to_string());
            s.tdarr.port = Some(8265);
        });
        Arc::new(store)
    }

    fn configs(store: &Arc<SettingsStore>) -> Vec<ServiceProxyConfig> {
        let catalog = ServiceCatalog::new(store.clone());
        active_routes(&store.snapshot())
            .iter()
            .map(|entry| catalog.config_for(entry))
            .collect()
    }

    #[test]
    fn test_plex_config() {
        let configs = configs(&store());
        let plex = &configs[0];
        assert_eq!(plex.kind, ServiceKind::Plex);
        assert_eq!(plex.rewrite, PathRewrite::PrependBase("/web".to_string()));
        assert_eq!(plex.upgrade_path_prefix.as_deref(), Some("/web"));
        assert!(plex.websocket);
        assert!(!plex.require_admin);
        let auth = plex.auth_header.as_ref().unwrap();
        assert_eq!(auth.name.as_str(), "x-plex-token");
        assert_eq!(auth.value, "plex-token");
        assert_eq!(plex.resolve_target().to_string(), "http://10.0.0.5:32400");
    }

    #[test]
    fn test_plex_without_token_has_no_auth_header() {
        let store = store();
        store.update(|s| s.plex.token = None);
        assert!(configs(&store)[0].auth_header.is_none());
    }

    #[test]
    fn test_dvr_instance_config() {
        let configs = configs(&store());
        let radarr = &configs[1];
        assert_eq!(radarr.name, "Radarr (Main)");
        assert_eq!(radarr.instance_id, Some(3));
        assert_eq!(radarr.rewrite, PathRewrite::PrependBase("/radarr".to_string()));
        assert_eq!(radarr.auth_header.as_ref().unwrap().value, "r-key");
        assert!(radarr.require_admin);
        assert_eq!(radarr.resolve_target().to_string(), "http://10.0.0.7:7878");
    }

    #[test]
    fn test_bazarr_api_key() {
        let configs = configs(&store());
        let bazarr = configs
            .iter()
            .find(|c| c.kind == ServiceKind::Bazarr)
            .unwrap();
        let auth = bazarr.auth_header.as_ref().unwrap();
        assert_eq!(auth.name.as_str(), "x-api-key");
        assert_eq!(auth.value, "b-key");
    }

    #[test]
    fn test_tdarr_configs() {
        let configs = configs(&store());
        let tdarr: Vec<_> = configs
            .iter()
            .filter(|c| c.kind == ServiceKind::Tdarr)
            .collect();
        assert_eq!(tdarr.len(), 2);

        let main = tdarr[0];
        assert_eq!(main.rewrite, PathRewrite::FixedRemap("/tdarr".to_string()));
        assert_eq!(main.upgrade_path_prefix.as_deref(), Some("/tdarr/socket.io"));
        assert!(!main.accepts("/tdarr/_next/static/app.js"));
        assert!(main.auth_header.is_none());

        let assets = tdarr[1];
        assert_eq!(assets.base_path, "/static");
        assert_eq!(assets.name, "Tdarr assets");
        assert!(assets.upgrade_path_prefix.is_none());
    }

    #[test]
    fn test_target_follows_settings_changes() {
        let store = store();
        let radarr = configs(&store).remove(1);
        store.update(|s| s.radarr[0].port = 7879);
        assert_eq!(radarr.resolve_target().port, 7879);

        store.update(|s| s.radarr.clear());
        assert_eq!(radarr.resolve_target().to_string(), "http://localhost:80");
    }
}
