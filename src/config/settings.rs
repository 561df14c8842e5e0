//! Media-stack settings — the portal's `settings.json`, read-only here
//!
//! Only the sections the gateway needs are modelled; every other key in
//! the portal's file is ignored on load.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Source of the current settings snapshot
///
/// Implementations must return the latest settings on every call; callers
/// never cache a snapshot beyond the operation they are performing.
pub trait SettingsProvider: Send + Sync {
    /// Current settings
    fn snapshot(&self) -> Arc<MediaSettings>;
}

/// Settings for every proxyable service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaSettings {
    pub plex: PlexSettings,
    pub tautulli: TautulliSettings,
    pub radarr: Vec<DvrSettings>,
    pub sonarr: Vec<DvrSettings>,
    pub lidarr: ServiceSettings,
    pub bazarr: ServiceSettings,
    pub prowlarr: ServiceSettings,
    pub tdarr: ServiceSettings,
}

/// Media server connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlexSettings {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub use_ssl: bool,
    /// Server token, injected as `X-Plex-Token` when present
    pub token: Option<String>,
}

impl Default for PlexSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            ip: String::new(),
            port: 32400,
            use_ssl: false,
            token: None,
        }
    }
}

/// Library-statistics service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TautulliSettings {
    pub enabled: bool,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub use_ssl: bool,
    pub url_base: Option<String>,
    pub api_key: Option<String>,
}

impl Default for TautulliSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            hostname: None,
            port: None,
            use_ssl: false,
            url_base: None,
            api_key: None,
        }
    }
}

/// One download-automation instance (multi-instance kinds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DvrSettings {
    pub id: u32,
    pub name: String,
    pub enabled: bool,
    pub hostname: String,
    pub port: u16,
    pub api_key: String,
    pub use_ssl: bool,
    pub base_url: Option<String>,
}

impl Default for DvrSettings {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            enabled: true,
            hostname: String::new(),
            port: 0,
            api_key: String::new(),
            use_ssl: false,
            base_url: None,
        }
    }
}

/// A single-instance service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceSettings {
    pub enabled: bool,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub use_ssl: bool,
    pub url_base: Option<String>,
    pub api_key: Option<String>,
}

impl MediaSettings {
    /// Parse settings from the portal's JSON document
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| {
            GatewayError::Config(format!("Failed to parse settings: {}", e))
        })
    }

    /// Load settings from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read settings file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }
}

/// In-memory settings holder, swapped wholesale on reload
pub struct SettingsStore {
    current: RwLock<Arc<MediaSettings>>,
}

impl SettingsStore {
    pub fn new(settings: MediaSettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    /// Replace the current snapshot
    pub fn replace(&self, settings: MediaSettings) {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = Arc::new(settings);
    }

    /// Apply an in-place edit to a copy of the current snapshot
    pub fn update(&self, edit: impl FnOnce(&mut MediaSettings)) {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = MediaSettings::clone(&current);
        edit(&mut next);
        *current = Arc::new(next);
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(MediaSettings::default())
    }
}

impl SettingsProvider for SettingsStore {
    fn snapshot(&self) -> Arc<MediaSettings> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
