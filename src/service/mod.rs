//! Proxied services — per-service proxy configuration as data
//!
//! Every upstream the gateway fronts is described by a
//! [`ServiceProxyConfig`]; the proxy engine itself is generic.

mod catalog;

pub use catalog::{ServiceCatalog, PLEX_BASE_PATH, TDARR_BASE_PATH, TDARR_STATIC_PATH};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of proxied service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Plex,
    Radarr,
    Sonarr,
    Lidarr,
    Bazarr,
    Prowlarr,
    Tautulli,
    Tdarr,
    /// The portal application behind the gateway (fallback upstream)
    Portal,
}

impl ServiceKind {
    /// Whether several instances of this kind can be configured
    pub fn is_multi_instance(&self) -> bool {
        matches!(self, Self::Radarr | Self::Sonarr)
    }

    /// Display label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Plex => "Plex",
            Self::Radarr => "Radarr",
            Self::Sonarr => "Sonarr",
            Self::Lidarr => "Lidarr",
            Self::Bazarr => "Bazarr",
            Self::Prowlarr => "Prowlarr",
            Self::Tautulli => "Tautulli",
            Self::Tdarr => "Tdarr",
            Self::Portal => "Portal",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plex => "plex",
            Self::Radarr => "radarr",
            Self::Sonarr => "sonarr",
            Self::Lidarr => "lidarr",
            Self::Bazarr => "bazarr",
            Self::Prowlarr => "prowlarr",
            Self::Tautulli => "tautulli",
            Self::Tdarr => "tdarr",
            Self::Portal => "portal",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plex" => Ok(Self::Plex),
            "radarr" => Ok(Self::Radarr),
            "sonarr" => Ok(Self::Sonarr),
            "lidarr" => Ok(Self::Lidarr),
            "bazarr" => Ok(Self::Bazarr),
            "prowlarr" => Ok(Self::Prowlarr),
            "tautulli" => Ok(Self::Tautulli),
            "tdarr" => Ok(Self::Tdarr),
            other => Err(format!("unknown service kind: {}", other)),
        }
    }
}

/// Upstream origin of a proxied service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub tls: bool,
    pub host: String,
    pub port: u16,
}

impl Origin {
    /// Build an origin from settings values. A missing host still yields a
    /// well-formed origin; the connection attempt fails later instead.
    pub fn new(tls: bool, host: Option<&str>, port: Option<u16>) -> Self {
        let host = host
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or("localhost");
        Self {
            tls,
            host: host.to_string(),
            port: port
                .filter(|p| *p != 0)
                .unwrap_or(if tls { 443 } else { 80 }),
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Parse an `http(s)://host[:port]` origin string
    pub fn parse(origin: &str) -> Option<Self> {
        let (tls, rest) = if let Some(rest) = origin.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = origin.strip_prefix("http://") {
            (false, rest)
        } else {
            return None;
        };
        let authority = rest.split('/').next().unwrap_or(rest);
        let authority: http::uri::Authority = authority.parse().ok()?;
        let host = authority.host().trim_start_matches('[').trim_end_matches(']');
        Some(Self::new(tls, Some(host), authority.port_u16()))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme(), self.authority())
    }
}

/// Computes the upstream origin at request time
pub type TargetResolver = Arc<dyn Fn() -> Origin + Send + Sync>;

/// How an inbound path maps onto the upstream's path space
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathRewrite {
    /// Remove the mount path; the upstream is addressed at its own root
    StripPrefix,
    /// Remove the mount path, then prepend this base the upstream expects
    PrependBase(String),
    /// Remove this hardcoded prefix; redirects are mapped back under it
    FixedRemap(String),
}

/// Header injected on every upstream request. Names are written in
/// lowercase on both the HTTP and the upgrade path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeader {
    pub name: http::HeaderName,
    pub value: String,
}

impl AuthHeader {
    pub fn api_key(value: impl Into<String>) -> Self {
        Self::named(http::HeaderName::from_static("x-api-key"), value)
    }

    pub fn named(name: http::HeaderName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// Declarative description of one proxied service instance
#[derive(Clone)]
pub struct ServiceProxyConfig {
    /// Display identifier used in logs and error bodies
    pub name: String,
    pub kind: ServiceKind,
    pub instance_id: Option<u32>,
    pub target: TargetResolver,
    /// Externally visible mount path
    pub base_path: String,
    pub rewrite: PathRewrite,
    pub auth_header: Option<AuthHeader>,
    pub websocket: bool,
    /// Prefix matched by the upgrade gate (may differ from `base_path`)
    pub upgrade_path_prefix: Option<String>,
    /// Requests whose path contains one of these segments are not proxied
    pub excluded_segments: Vec<String>,
    pub require_admin: bool,
}

impl ServiceProxyConfig {
    /// Minimal configuration: prepend-nothing pass-through at `base_path`
    pub fn new(name: impl Into<String>, kind: ServiceKind, target: TargetResolver) -> Self {
        Self {
            name: name.into(),
            kind,
            instance_id: None,
            target,
            base_path: String::new(),
            rewrite: PathRewrite::PrependBase(String::new()),
            auth_header: None,
            websocket: false,
            upgrade_path_prefix: None,
            excluded_segments: Vec::new(),
            require_admin: false,
        }
    }

    /// Resolve the upstream origin for the current request
    pub fn resolve_target(&self) -> Origin {
        (self.target)()
    }

    /// Whether this service handles `path`
    pub fn accepts(&self, path: &str) -> bool {
        !self
            .excluded_segments
            .iter()
            .any(|segment| path.contains(segment.as_str()))
    }
}

impl fmt::Debug for ServiceProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxyConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("instance_id", &self.instance_id)
            .field("base_path", &self.base_path)
            .field("rewrite", &self.rewrite)
            .field("websocket", &self.websocket)
            .field("upgrade_path_prefix", &self.upgrade_path_prefix)
            .field("require_admin", &self.require_admin)
            .finish()
    }
}

/// Normalize a configured base path: leading `/`, no trailing `/`
pub fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let with_slash = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };
    let normalized = with_slash.trim_end_matches('/');
    if normalized.is_empty() {
        "/".to_string()
    } else {
        normalized.to_string()
    }
}
