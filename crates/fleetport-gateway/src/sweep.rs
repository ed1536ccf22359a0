//! Background task that marks silent agents offline.

use std::sync::Arc;
use std::time::Duration;

use fleetport_control::ControlPlane;

/// Run the offline sweep forever on a fixed interval.
///
/// Failures are logged and the next tick retries.
pub async fn run_offline_sweep<C>(control: Arc<C>, every: Duration)
where
    C: ControlPlane + 'static,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match control.sweep_offline().await {
            Ok(0) => {}
            Ok(swept) => tracing::info!(swept, "Marked agents offline"),
            Err(e) => tracing::warn!(error = %e, "Offline sweep failed"),
        }
    }
}

/// Spawn [`run_offline_sweep`] onto the runtime.
pub fn spawn_offline_sweep<C>(control: Arc<C>, every: Duration) -> tokio::task::JoinHandle<()>
where
    C: ControlPlane + 'static,
{
    tokio::spawn(run_offline_sweep(control, every))
}
