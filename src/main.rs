//! AmpliPi Control - Rust Implementation
//!
//! Bridges an AmpliPi controller to Home Assistant (MQTT) and an HTTP API.

use amplipi_control::adapters::mqtt::MqttAdapter;
use amplipi_control::adapters::Startable;
use amplipi_control::amplipi::AmpliPiClient;
use amplipi_control::coordinator::EntityCoordinator;
use amplipi_control::snapshot::SnapshotFetcher;
use amplipi_control::{api, bus, config};

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amplipi_control=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting AmpliPi Control v{} ({})",
        env!("AMPLIPI_CONTROL_VERSION"),
        env!("AMPLIPI_CONTROL_GIT_SHA")
    );

    // Load configuration
    let config = config::load_config()?;
    let base_url = config.controller.base_url();
    tracing::info!(
        "Configuration loaded, port: {}, controller: {}",
        config.port,
        base_url
    );

    // Create event bus
    let bus = bus::create_bus();
    tracing::info!("Event bus initialized");

    // MQTT bridge first so it sees entity discovery
    let mqtt = Arc::new(MqttAdapter::new(config.mqtt.clone(), bus.clone()));
    if mqtt.can_start().await {
        if let Err(e) = mqtt.start().await {
            tracing::warn!("Failed to start MQTT adapter: {}", e);
        } else {
            tracing::info!("MQTT adapter started");
        }
    }

    // Controller client and entity coordinator
    let client = AmpliPiClient::new(&base_url)?;
    let coordinator = EntityCoordinator::new(
        SnapshotFetcher::new(Arc::new(client)),
        base_url,
        config.reconcile_context()?,
        bus.clone(),
        config.polling.interval(),
    );
    if let Err(e) = coordinator.start().await {
        tracing::warn!("Failed to start AmpliPi coordinator: {}", e);
    }

    let state = api::AppState::new(
        coordinator.clone(),
        mqtt.clone(),
        config.controller.clone(),
        bus.clone(),
    );
    let app = api::router(state);

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup: stop adapters
    tracing::info!("Shutting down adapters...");
    coordinator.shutdown().await;
    mqtt.stop().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
