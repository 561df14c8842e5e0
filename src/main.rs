use clap::{Parser, Subcommand};
use mediastack_gateway::config::{GatewayConfig, MediaSettings, SettingsProvider, SettingsStore};
use mediastack_gateway::middleware::PortalSessionValidator;
use mediastack_gateway::provider::SettingsWatcher;
use mediastack_gateway::router::{active_routes, BasePathValidator};
use mediastack_gateway::service::ServiceKind;
use mediastack_gateway::{Gateway, GatewayError};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Media-stack gateway — authenticated reverse proxy for the portal's services
#[derive(Parser)]
#[command(name = "mediastack-gateway", version, about)]
struct Cli {
    /// Path to configuration file (.hcl)
    #[arg(short, long, default_value = "gateway.hcl")]
    config: String,

    /// Override listen address (e.g., 0.0.0.0:8080)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and list the routes it would mount
    Validate,
    /// Check a candidate base path for a service against the current settings
    CheckPath {
        /// Service kind (radarr, sonarr, lidarr, bazarr, prowlarr, tautulli, ...)
        #[arg(long)]
        kind: ServiceKind,
        /// Instance id being edited (multi-instance kinds)
        #[arg(long)]
        instance: Option<u32>,
        /// Candidate base path
        path: String,
    },
}

#[tokio::main]
async fn main() -> mediastack_gateway::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Validate) => return validate_config(&cli.config).await,
        Some(Commands::CheckPath {
            kind,
            instance,
            path,
        }) => return check_path(&cli.config, *kind, *instance, path).await,
        None => {}
    }

    init_tracing(&cli.log_level, cli.log_json);

    tracing::info!("Media-stack gateway v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(&cli.config).await?;
    if let Some(listen) = &cli.listen {
        config.listen = listen.clone();
    }

    let settings = match MediaSettings::from_file(&config.settings_path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "Settings not loaded, starting with no proxied services");
            MediaSettings::default()
        }
    };
    let store = Arc::new(SettingsStore::new(settings));
    let validator = Arc::new(PortalSessionValidator::new(&config.session)?);

    let gateway = Arc::new(Gateway::new(config.clone(), store, validator)?);
    gateway.start().await?;

    tracing::info!("Gateway ready, press Ctrl+C to stop");

    if config.watch_settings {
        let watcher = SettingsWatcher::new(&config.settings_path);
        match watcher.watch() {
            Ok(rx) => {
                let gw = gateway.clone();
                tokio::task::spawn_blocking(move || {
                    while let Ok(event) = rx.recv() {
                        match event.settings {
                            Ok(settings) => gw.reload_settings(settings),
                            Err(e) => tracing::error!(
                                error = %e,
                                path = %event.trigger_path.display(),
                                "Settings reload failed, keeping current routes"
                            ),
                        }
                    }
                });
                tracing::info!(path = config.settings_path, "Settings hot reload enabled");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to start settings watcher, hot reload disabled");
            }
        }
    }

    gateway.wait_for_shutdown().await;

    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

async fn load_config(path: &str) -> mediastack_gateway::Result<GatewayConfig> {
    if Path::new(path).exists() {
        tracing::info!(config = path, "Loading configuration");
        GatewayConfig::from_file(path).await
    } else {
        tracing::warn!(config = path, "Config file not found, using defaults");
        Ok(GatewayConfig::default())
    }
}

/// Validate a configuration file and print the routes it would mount
async fn validate_config(path: &str) -> mediastack_gateway::Result<()> {
    if !Path::new(path).exists() {
        eprintln!("✗ Config file not found: {}", path);
        std::process::exit(1);
    }

    let config = match GatewayConfig::from_file(path).await {
        Ok(c) => {
            println!("✓ Config parsed successfully ({})", path);
            c
        }
        Err(e) => {
            eprintln!("✗ Parse error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("✗ Validation error: {}", e);
        std::process::exit(1);
    }

    println!("✓ Configuration is valid");
    println!();
    println!("  Listen:      {}", config.listen);
    println!("  Session:     {}", config.session.verify_url);
    if let Some(upstream) = &config.app_upstream {
        println!("  Fallback:    {}", upstream);
    }

    let settings = match MediaSettings::from_file(&config.settings_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("✗ Settings error: {}", e);
            std::process::exit(1);
        }
    };
    let routes = active_routes(&settings);
    println!("  Routes:      {}", routes.len());
    for route in &routes {
        println!("    - {} → {} ({})", route.base_path, route.service_name, route.service_kind);
    }

    Ok(())
}

/// Run the base-path validator from the command line
async fn check_path(
    config_path: &str,
    kind: ServiceKind,
    instance: Option<u32>,
    candidate: &str,
) -> mediastack_gateway::Result<()> {
    let config = if Path::new(config_path).exists() {
        GatewayConfig::from_file(config_path).await?
    } else {
        GatewayConfig::default()
    };
    let settings = MediaSettings::from_file(&config.settings_path)
        .map_err(|e| GatewayError::Config(format!("Cannot check path: {}", e)))?;
    let provider: Arc<dyn SettingsProvider> = Arc::new(SettingsStore::new(settings));

    let result = BasePathValidator::new(provider)
        .with_reserved_paths(&config.extra_reserved_paths)
        .validate(candidate, kind, instance);

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.valid {
        std::process::exit(1);
    }
    Ok(())
}
