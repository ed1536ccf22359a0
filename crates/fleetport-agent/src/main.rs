//! Fleetport agent entry point.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetport_agent::{AgentConfig, AgentRuntime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::parse().resolve_aliases(|name| std::env::var(name).ok());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        agent = %config.agent_name,
        api_base_url = %config.api_base_url,
        work_dir = %config.work_dir.display(),
        workload_bind = %config.workload_bind,
        "Starting fleetport agent"
    );
    if config.tunnel_endpoint().is_none() {
        tracing::warn!("No tunnel server configured; start tasks must carry one");
    }

    let runtime = AgentRuntime::new(config)?;
    if let Err(e) = runtime.ensure_registered().await {
        if !e.is_transient() {
            return Err(e.into());
        }
        tracing::warn!(error = %e, "Control plane unreachable, the loops will register on first contact");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    runtime.run(shutdown_rx).await?;
    tracing::info!("Agent stopped");

    Ok(())
}
