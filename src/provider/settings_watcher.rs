//! Settings watcher — follows the portal's settings file
//!
//! Uses the `notify` crate for cross-platform file system events. The
//! portal rewrites its settings file whenever an operator saves a change;
//! each burst of events is coalesced and the file is re-parsed once.

use crate::config::MediaSettings;
use crate::error::{GatewayError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Quiet period that closes a burst of file events
const DEBOUNCE_MS: u64 = 500;

/// Watches the settings file and reports parsed snapshots
pub struct SettingsWatcher {
    settings_path: PathBuf,
    reload_count: Arc<AtomicU64>,
}

/// Emitted once per burst of changes to the settings file
#[derive(Debug, Clone)]
pub struct SettingsEvent {
    pub trigger_path: PathBuf,
    /// Parsed settings, or why parsing failed
    pub settings: std::result::Result<MediaSettings, String>,
    pub timestamp: Instant,
}

impl SettingsWatcher {
    pub fn new(settings_path: impl AsRef<Path>) -> Self {
        Self {
            settings_path: settings_path.as_ref().to_path_buf(),
            reload_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Successful reloads so far
    pub fn reload_count(&self) -> u64 {
        self.reload_count.load(Ordering::Relaxed)
    }

    /// Parse the settings file as it is now
    pub fn load(&self) -> Result<MediaSettings> {
        MediaSettings::from_file(&self.settings_path)
    }

    /// Start watching. Events arrive on the returned channel until it is dropped.
    pub fn watch(&self) -> Result<mpsc::Receiver<SettingsEvent>> {
        let (event_tx, event_rx) = mpsc::channel();
        let (notify_tx, notify_rx) = mpsc::channel();

        let settings_path = self.settings_path.clone();
        let reload_count = self.reload_count.clone();

        let mut watcher: RecommendedWatcher =
            Watcher::new(notify_tx, notify::Config::default()).map_err(|e| {
                GatewayError::Other(format!("Failed to create file watcher: {}", e))
            })?;

        // The directory, not the file: editors and the portal replace the file
        let watch_path = match settings_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher
            .watch(&watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                GatewayError::Other(format!(
                    "Failed to watch {}: {}",
                    watch_path.display(),
                    e
                ))
            })?;

        std::thread::spawn(move || {
            let _watcher = watcher;

            loop {
                let event: Event = match notify_rx.recv() {
                    Ok(Ok(event)) => event,
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "File watcher error");
                        continue;
                    }
                    Err(_) => break,
                };
                if !is_relevant_event(&event) || !touches(&event, &settings_path) {
                    continue;
                }

                // Drain the rest of the burst
                let debounce = Duration::from_millis(DEBOUNCE_MS);
                while notify_rx.recv_timeout(debounce).is_ok() {}

                let trigger_path = event
                    .paths
                    .first()
                    .cloned()
                    .unwrap_or_else(|| settings_path.clone());
                tracing::info!(path = %trigger_path.display(), "Settings change detected");

                let settings = MediaSettings::from_file(&settings_path);
                match &settings {
                    Ok(_) => {
                        reload_count.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            "Settings reload failed, keeping previous settings"
                        );
                    }
                }

                let sent = event_tx.send(SettingsEvent {
                    trigger_path,
                    settings: settings.map_err(|e| e.to_string()),
                    timestamp: Instant::now(),
                });
                if sent.is_err() {
                    break;
                }
            }
        });

        Ok(event_rx)
    }
}

fn is_relevant_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}

/// Whether the event concerns the settings file (by file name)
fn touches(event: &Event, settings_path: &Path) -> bool {
    let name = settings_path.file_name();
    event.paths.is_empty() || event.paths.iter().any(|p| p.file_name() == name)
}
