use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chanchat::bus::{Bus, MemoryBus, RedisBus};
use chanchat::config::{Backend, ServerConfig};
use chanchat::registry::{MemoryRegistry, Registry, RedisRegistry};
use chanchat::{server, state::AppState};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chanchat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting chanchat...");

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let (registry, bus): (Arc<dyn Registry>, Arc<dyn Bus>) = match &config.backend {
        Backend::Redis { url } => {
            let registry = match RedisRegistry::connect(url, config.store_timeout).await {
                Ok(registry) => registry,
                Err(e) => {
                    tracing::error!("Failed to connect registry: {}", e);
                    std::process::exit(1);
                }
            };
            let bus = match RedisBus::connect(url, config.store_timeout).await {
                Ok(bus) => bus,
                Err(e) => {
                    tracing::error!("Failed to connect broadcast bus: {}", e);
                    std::process::exit(1);
                }
            };
            let registry: Arc<dyn Registry> = Arc::new(registry);
            let bus: Arc<dyn Bus> = Arc::new(bus);
            (registry, bus)
        }
        Backend::Memory => {
            tracing::warn!("Using in-memory registry and bus, names are not shared across servers");
            let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
            let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
            (registry, bus)
        }
    };

    let state = Arc::new(AppState::new(registry, bus, config.session.clone()));

    let listener = match tokio::net::TcpListener::bind(config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Error starting server on {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on {}", config.listen_addr);

    server::run(listener, state, config.shutdown_grace, shutdown_signal()).await;
    tracing::info!("Server stopped");
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
