//! Settings providers — follow the portal's settings file
//!
//! Watches the media-stack settings for changes so routes can be rebuilt
//! without restarting the gateway.

pub mod settings_watcher;

pub use settings_watcher::{SettingsEvent, SettingsWatcher};
