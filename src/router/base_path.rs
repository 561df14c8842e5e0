//! Base-path validation for operator-edited service mounts
//!
//! Rules run in order and stop at the first failure: empty is allowed,
//! leading `/` required, no trailing `/`, no reserved application route,
//! no collision with another configured service.

use crate::config::{MediaSettings, SettingsProvider};
use crate::service::{
    normalize_base_path, ServiceKind, PLEX_BASE_PATH, TDARR_BASE_PATH, TDARR_STATIC_PATH,
};
use serde::Serialize;
use std::sync::Arc;

/// Top-level routes owned by the portal itself
pub const RESERVED_PATHS: &[&str] = &[
    "/api",
    "/signin",
    "/logout",
    "/setup",
    "/admin",
    "/profile",
    "/settings",
    "/web",
    "/request",
    "/invites",
    "/imageproxy",
    "/logo",
    "/api-docs",
    "/watch",
    "/schedule",
    "/help",
    "/signup",
    "/resetpassword",
    "/_next",
    "/offline.html",
];

/// Outcome of a base-path validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseUrlValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BaseUrlValidationResult {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// A configured path owned by some service
struct ClaimedPath {
    path: String,
    name: String,
    kind: ServiceKind,
    instance_id: Option<u32>,
}

/// Validates candidate base paths against reserved routes and configured services
pub struct BasePathValidator {
    settings: Arc<dyn SettingsProvider>,
    reserved: Vec<String>,
}

impl BasePathValidator {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            settings,
            reserved: RESERVED_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Extend the reserved list with deployment-specific routes
    pub fn with_reserved_paths(mut self, extra: &[String]) -> Self {
        self.reserved.extend(extra.iter().cloned());
        self
    }

    /// Validate `candidate` for the service being edited.
    ///
    /// The entry being edited is identified by `(kind, current_instance)`:
    /// multi-instance kinds pass the instance id (or `None` when creating a
    /// new instance); single-instance kinds pass `None`.
    pub fn validate(
        &self,
        candidate: &str,
        kind: ServiceKind,
        current_instance: Option<u32>,
    ) -> BaseUrlValidationResult {
        if candidate.is_empty() {
            return BaseUrlValidationResult::ok();
        }

        if !candidate.starts_with('/') {
            return BaseUrlValidationResult::invalid("URL Base must start with /");
        }

        if candidate.ends_with('/') && candidate != "/" {
            return BaseUrlValidationResult::invalid("URL Base must not end with /");
        }

        let normalized = candidate.to_lowercase();
        let reserved = self.reserved.iter().any(|r| {
            let r = r.to_lowercase();
            normalized == r || normalized.starts_with(&format!("{}/", r))
        });
        if reserved {
            return BaseUrlValidationResult::invalid(format!(
                "\"{}\" is not a valid base URL as it conflicts with reserved application paths",
                candidate
            ));
        }

        let settings = self.settings.snapshot();
        let duplicate = claimed_paths(&settings).into_iter().find(|claimed| {
            claimed.path.to_lowercase() == normalized
                && !(claimed.kind == kind && claimed.instance_id == current_instance)
        });

        if let Some(claimed) = duplicate {
            return BaseUrlValidationResult::invalid(format!(
                "URL Base is already in use by {} ({})",
                claimed.name, claimed.kind
            ));
        }

        BaseUrlValidationResult::ok()
    }
}

/// Every non-empty configured path, enabled or not, normalized the way
/// routes are mounted
fn claimed_paths(settings: &MediaSettings) -> Vec<ClaimedPath> {
    let mut paths = Vec::new();

    if !settings.plex.ip.trim().is_empty() {
        paths.push(ClaimedPath {
            path: PLEX_BASE_PATH.to_string(),
            name: ServiceKind::Plex.label().to_string(),
            kind: ServiceKind::Plex,
            instance_id: None,
        });
    }

    for (kind, instances) in [
        (ServiceKind::Radarr, &settings.radarr),
        (ServiceKind::Sonarr, &settings.sonarr),
    ] {
        for instance in instances {
            let base = normalize_base_path(instance.base_url.as_deref().unwrap_or(""));
            if !base.is_empty() {
                paths.push(ClaimedPath {
                    path: base,
                    name: instance.name.clone(),
                    kind,
                    instance_id: Some(instance.id),
                });
            }
        }
    }

    for (kind, url_base) in [
        (ServiceKind::Lidarr, settings.lidarr.url_base.as_deref()),
        (ServiceKind::Bazarr, settings.bazarr.url_base.as_deref()),
        (ServiceKind::Prowlarr, settings.prowlarr.url_base.as_deref()),
        (ServiceKind::Tautulli, settings.tautulli.url_base.as_deref()),
    ] {
        let base = normalize_base_path(url_base.unwrap_or(""));
        if !base.is_empty() {
            paths.push(ClaimedPath {
                path: base,
                name: kind.label().to_string(),
                kind,
                instance_id: None,
            });
        }
    }

    if settings.tdarr.enabled {
        for path in [TDARR_BASE_PATH, TDARR_STATIC_PATH] {
            paths.push(ClaimedPath {
                path: path.to_string(),
                name: ServiceKind::Tdarr.label().to_string(),
                kind: ServiceKind::Tdarr,
                instance_id: None,
            });
        }
    }

    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DvrSettings, SettingsStore};

    fn dvr(id: u32, name: &str, base: &str) -> DvrSettings {
        DvrSettings {
            id,
            name: name.to_string(),
            hostname: "10.0.0.7".to_string(),
            port: 7878,
            base_url: Some(base.to_string()),
            ..DvrSettings::default()
        }
    }

    fn validator(edit: impl FnOnce(&mut MediaSettings)) -> BasePathValidator {
        let store = SettingsStore::default();
        store.update(edit);
        BasePathValidator::new(Arc::new(store))
    }

    #[test]
    fn test_empty_is_valid() {
        let v = validator(|_| {});
        assert!(v.validate("", ServiceKind::Radarr, Some(1)).valid);
    }

    #[test]
    fn test_must_start_with_slash() {
        let v = validator(|_| {});
        let result = v.validate("radarr", ServiceKind::Radarr, Some(1));
        assert!(!result.valid);
        assert_eq!(result.error.as_deref(), Some("URL Base must start with /"));
    }

    #[test]
    fn test_must_not_end_with_slash() {
        let v = validator(|_| {});
        let result = v.validate("/radarr/", ServiceKind::Radarr, Some(1));
        assert!(!result.valid);
        assert_eq!(result.error.as_deref(), Some("URL Base must not end with /"));
    }

    #[test]
    fn test_root_is_allowed_format() {
        let v = validator(|_| {});
        assert!(v.validate("/", ServiceKind::Bazarr, None).valid);
    }

    #[test]
    fn test_reserved_prefix_rejected() {
        let v = validator(|_| {});
        let result = v.validate("/admin/anything", ServiceKind::Bazarr, None);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("reserved"));
    }

    #[test]
    fn test_reserved_exact_case_insensitive() {
        let v = validator(|_| {});
        assert!(!v.validate("/API", ServiceKind::Lidarr, None).valid);
        assert!(!v.validate("/Settings", ServiceKind::Lidarr, None).valid);
        // Prefix without a segment boundary is fine
        assert!(v.validate("/apiary", ServiceKind::Lidarr, None).valid);
    }

    #[test]
    fn test_extra_reserved_paths() {
        let v = validator(|_| {}).with_reserved_paths(&["/status".to_string()]);
        assert!(!v.validate("/status/page", ServiceKind::Lidarr, None).valid);
    }

    #[test]
    fn test_collision_with_other_instance() {
        let v = validator(|s| s.radarr.push(dvr(1, "Radarr Main", "/radarr")));
        let result = v.validate("/radarr", ServiceKind::Radarr, Some(2));
        assert!(!result.valid);
        assert_eq!(
            result.error.as_deref(),
            Some("URL Base is already in use by Radarr Main (radarr)")
        );
    }

    #[test]
    fn test_trailing_slash_checked_before_collision() {
        let v = validator(|s| s.radarr.push(dvr(1, "Radarr Main", "/radarr")));
        let result = v.validate("/radarr/", ServiceKind::Radarr, Some(2));
        assert!(!result.valid);
        assert_eq!(result.error.as_deref(), Some("URL Base must not end with /"));
    }

    #[test]
    fn test_collision_is_case_insensitive() {
        let v = validator(|s| s.sonarr.push(dvr(4, "Sonarr", "/Shows")));
        let result = v.validate("/shows", ServiceKind::Radarr, Some(1));
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("Sonarr (sonarr)"));
    }

    #[test]
    fn test_collision_with_unnormalized_stored_path() {
        let v = validator(|s| s.radarr.push(dvr(1, "Radarr Main", "radarr/")));
        let result = v.validate("/radarr", ServiceKind::Sonarr, Some(1));
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("Radarr Main (radarr)"));

        let v = validator(|s| s.lidarr.url_base = Some(" music/ ".to_string()));
        let result = v.validate("/music", ServiceKind::Radarr, Some(1));
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("(lidarr)"));
    }

    #[test]
    fn test_editing_own_instance_is_not_a_collision() {
        let v = validator(|s| s.radarr.push(dvr(1, "Radarr Main", "/radarr")));
        assert!(v.validate("/radarr", ServiceKind::Radarr, Some(1)).valid);
    }

    #[test]
    fn test_new_instance_collides_with_existing() {
        let v = validator(|s| s.radarr.push(dvr(1, "Radarr Main", "/radarr")));
        assert!(!v.validate("/radarr", ServiceKind::Radarr, None).valid);
    }

    #[test]
    fn test_same_id_different_kind_collides() {
        let v = validator(|s| s.radarr.push(dvr(1, "Radarr Main", "/media")));
        assert!(!v.validate("/media", ServiceKind::Sonarr, Some(1)).valid);
    }

    #[test]
    fn test_single_instance_edit_excludes_itself() {
        let v = validator(|s| {
            s.bazarr.url_base = Some("/subtitles".to_string());
        });
        assert!(v.validate("/subtitles", ServiceKind::Bazarr, None).valid);
        let result = v.validate("/subtitles", ServiceKind::Prowlarr, None);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("Bazarr (bazarr)"));
    }

    #[test]
    fn test_tdarr_fixed_path_claimed_when_enabled() {
        let v = validator(|s| s.tdarr.enabled = true);
        assert!(!v.validate("/tdarr", ServiceKind::Lidarr, None).valid);

        let v = validator(|_| {});
        assert!(v.validate("/tdarr", ServiceKind::Lidarr, None).valid);
    }

    #[test]
    fn test_result_serialization() {
        let ok = serde_json::to_value(BaseUrlValidationResult::ok()).unwrap();
        assert_eq!(ok, serde_json::json!({ "valid": true }));
    }
}
