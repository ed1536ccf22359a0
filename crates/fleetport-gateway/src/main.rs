//! Fleetport gateway entry point.
//!
//! Runs the HTTP API with the control plane embedded, plus the background
//! offline sweep. Configuration comes from the environment; see
//! `ControlConfig::from_env` and `GatewayConfig::from_env`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetport_auth::HmacJwt;
use fleetport_control::{ControlConfig, ControlPlaneService};
use fleetport_gateway::{create_router, spawn_offline_sweep, GatewayConfig, GatewayState};
use fleetport_store::RocksStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetport=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting fleetport gateway");

    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/fleetport".into());
    let control_config = ControlConfig::from_env();
    let gateway_config = GatewayConfig::from_env();

    if control_config.auth.jwt_secret == fleetport_auth::AuthConfig::default().jwt_secret {
        tracing::warn!("JWT_SECRET not set - using the built-in development secret");
    }

    tracing::info!(
        listen_addr = %gateway_config.listen_addr,
        data_dir = %data_dir,
        port_min = control_config.port_min,
        port_max = control_config.port_max,
        lock_mode = ?control_config.lock_mode,
        public_host = ?control_config.public_host,
        "Gateway configuration loaded"
    );

    // Initialize RocksDB store
    tracing::info!(path = %data_dir, "Opening RocksDB store");
    let store = Arc::new(
        RocksStore::open(&data_dir).with_context(|| format!("opening store at {data_dir}"))?,
    );

    let jwt_validator = Arc::new(HmacJwt::new(control_config.auth.clone()));
    let sweep_every = Duration::from_secs(control_config.offline_sweep_interval_seconds.max(1));
    let control = Arc::new(ControlPlaneService::new(store, control_config));

    let sweep = spawn_offline_sweep(Arc::clone(&control), sweep_every);

    let listen_addr = gateway_config.listen_addr.clone();
    let state = GatewayState::new(control, jwt_validator, gateway_config);
    let app = create_router(state);

    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
    })
    .await?;

    sweep.abort();

    Ok(())
}
