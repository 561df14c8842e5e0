//! Configuration types for the media-stack gateway
//!
//! Two documents are involved:
//! - the gateway's own configuration (HCL): listener, session validation,
//!   reserved paths, fallback upstream;
//! - the media-stack settings (JSON, shared with the portal): which
//!   services exist, where they live and under which base path.

mod settings;

pub use settings::{
    DvrSettings, MediaSettings, PlexSettings, ServiceSettings, SettingsProvider, SettingsStore,
    TautulliSettings,
};

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::error::{GatewayError, Result};

/// Top-level gateway configuration
///
/// # HCL Example
///
/// ```hcl
/// listen        = "0.0.0.0:5055"
/// settings_path = "/config/settings.json"
/// app_upstream  = "http://127.0.0.1:3000"
/// trust_proxy   = true
///
/// session {
///   verify_url = "http://127.0.0.1:3000/api/v1/auth/me"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listen address for the shared HTTP server
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path to the media-stack settings file
    #[serde(default = "default_settings_path")]
    pub settings_path: String,

    /// Reload routes when the settings file changes
    #[serde(default = "default_true")]
    pub watch_settings: bool,

    /// Resolve the client IP from `X-Forwarded-For` (gateway sits behind an edge proxy)
    #[serde(default)]
    pub trust_proxy: bool,

    /// Origin receiving every request that is not proxy-owned (the portal itself)
    #[serde(default)]
    pub app_upstream: Option<String>,

    /// Maximum time to wait for a request head on a new connection
    #[serde(default = "default_header_read_timeout")]
    pub header_read_timeout_secs: u64,

    /// Upstream connect timeout; unset leaves it to the transport
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// Path prefix for the gateway status endpoints (disabled when unset)
    #[serde(default)]
    pub dashboard_prefix: Option<String>,

    /// Paths appended to the built-in reserved application routes
    #[serde(default)]
    pub extra_reserved_paths: Vec<String>,

    /// Session validation settings
    #[serde(default)]
    pub session: SessionConfig,
}

/// How sessions are validated against the portal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Portal endpoint returning the current user for the forwarded cookies
    #[serde(default = "default_verify_url")]
    pub verify_url: String,

    /// Permission bit granting admin access
    #[serde(default = "default_admin_permission")]
    pub admin_permission: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verify_url: default_verify_url(),
            admin_permission: default_admin_permission(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:5055".to_string()
}

fn default_settings_path() -> String {
    "config/settings.json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_header_read_timeout() -> u64 {
    30
}

fn default_verify_url() -> String {
    "http://127.0.0.1:3000/api/v1/auth/me".to_string()
}

fn default_admin_permission() -> u64 {
    2
}

impl GatewayConfig {
    /// Load configuration from an HCL file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_hcl(&content)
    }

    /// Parse configuration from an HCL string
    pub fn from_hcl(content: &str) -> Result<Self> {
        hcl::from_str(content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse HCL config: {}", e)))
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        if let Some(upstream) = &self.app_upstream {
            if !(upstream.starts_with("http://") || upstream.starts_with("https://")) {
                return Err(GatewayError::Config(format!(
                    "app_upstream '{}' must be an http:// or https:// origin",
                    upstream
                )));
            }
        }

        if let Some(prefix) = &self.dashboard_prefix {
            if !prefix.starts_with('/') || (prefix.len() > 1 && prefix.ends_with('/')) {
                return Err(GatewayError::Config(format!(
                    "dashboard_prefix '{}' must start with / and not end with /",
                    prefix
                )));
            }
        }

        for path in &self.extra_reserved_paths {
            if !path.starts_with('/') {
                return Err(GatewayError::Config(format!(
                    "reserved path '{}' must start with /",
                    path
                )));
            }
        }

        if self.session.verify_url.is_empty() {
            return Err(GatewayError::Config(
                "session.verify_url cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            GatewayError::Config(format!("Invalid listen address '{}': {}", self.listen, e))
        })
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            settings_path: default_settings_path(),
            watch_settings: true,
            trust_proxy: false,
            app_upstream: None,
            header_read_timeout_secs: default_header_read_timeout(),
            connect_timeout_secs: None,
            dashboard_prefix: None,
            extra_reserved_paths: Vec::new(),
            session: SessionConfig::default(),
        }
    }
}
