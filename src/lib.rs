//! # Media-stack gateway
//!
//! An authenticated reverse proxy that exposes the services of a
//! self-hosted media stack (media server, download automation, transcoding
//! manager, library statistics) behind the portal's single origin.
//!
//! ## Architecture
//!
//! ```text
//! Entrypoint ─┬─ upgrade on a gated path ─→ Upgrade Gate ─→ session check ─→ tunnel
//!             └─ HTTP ─→ base-path router ─→ auth chain ─→ Service proxy ─→ upstream
//! ```
//!
//! ## Core Features
//!
//! - **Generic proxy engine**: one engine, per-service behaviour as data
//! - **Path rewriting**: strip-prefix, prepend-base and fixed-remap modes,
//!   with `Location` headers mapped back into the external path space
//! - **WebSocket gate**: raw sockets are handed to a backend only after
//!   the session validates
//! - **Live settings**: routes follow the portal's settings file without
//!   a restart
//! - **Base-path validation**: format, reserved-route and collision checks
//!   for operator-edited paths
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mediastack_gateway::config::{GatewayConfig, MediaSettings, SettingsStore};
//! use mediastack_gateway::middleware::PortalSessionValidator;
//! use mediastack_gateway::Gateway;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> mediastack_gateway::Result<()> {
//!     let config = GatewayConfig::from_file("gateway.hcl").await?;
//!     let settings = Arc::new(SettingsStore::new(MediaSettings::from_file(&config.settings_path)?));
//!     let validator = Arc::new(PortalSessionValidator::new(&config.session)?);
//!     let gateway = Gateway::new(config, settings, validator)?;
//!     gateway.start().await?;
//!     gateway.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dashboard;
pub(crate) mod entrypoint;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod provider;
pub mod proxy;
pub mod router;
pub mod service;

// Re-export main types
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use router::{ActiveRouteEntry, ActiveRouteRegistry, BasePathValidator, BaseUrlValidationResult};

use serde::{Deserialize, Serialize};

/// Gateway runtime state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayState {
    /// Created but not yet started
    #[default]
    Created,
    /// Routes are being mounted and the listener bound
    Starting,
    /// Accepting and proxying requests
    Running,
    /// Rebuilding routes after a settings change; the listener stays up
    Reloading,
    /// Listener is being torn down
    Stopping,
    /// Fully stopped
    Stopped,
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Reloading => write!(f, "reloading"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Gateway health status snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Current gateway state
    pub state: GatewayState,
    /// Uptime in seconds since gateway started
    pub uptime_secs: u64,
    /// Open client connections, including WebSocket tunnels
    pub active_connections: usize,
    /// HTTP requests seen since start (gated upgrades excluded)
    pub total_requests: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_state_default() {
        assert_eq!(GatewayState::default(), GatewayState::Created);
    }

    #[test]
    fn test_gateway_state_display() {
        assert_eq!(GatewayState::Created.to_string(), "created");
        assert_eq!(GatewayState::Running.to_string(), "running");
        assert_eq!(GatewayState::Reloading.to_string(), "reloading");
        assert_eq!(GatewayState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn test_health_status_serialization() {
        let health = HealthStatus {
            state: GatewayState::Reloading,
            uptime_secs: 3600,
            active_connections: 3,
            total_requests: 250,
        };
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["state"], "Reloading");
        let parsed: HealthStatus = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.active_connections, 3);
        assert_eq!(parsed.total_requests, 250);
    }
}
