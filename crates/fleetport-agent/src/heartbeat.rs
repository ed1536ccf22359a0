//! Heartbeat loop: liveness reports plus workload self-healing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::client::ControlClient;
use crate::metrics::MetricsSampler;
use crate::supervisor::ProcessSupervisor;
use crate::workload::{Remediation, WorkloadManager};
use crate::{tunnel, workload};

/// What a single beat did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatReport {
    /// The control plane acknowledged the heartbeat.
    pub delivered: bool,
    /// The workload was restarted during this beat.
    pub remediation: Option<Remediation>,
}

/// Sends heartbeats, restarts a crashed workload and trims process logs.
pub struct HeartbeatLoop {
    client: Arc<ControlClient>,
    workload: Arc<WorkloadManager>,
    supervisor: Arc<ProcessSupervisor>,
    metrics: MetricsSampler,
}

impl HeartbeatLoop {
    /// Create the loop.
    #[must_use]
    pub fn new(
        client: Arc<ControlClient>,
        workload: Arc<WorkloadManager>,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Self {
        Self {
            client,
            workload,
            supervisor,
            metrics: MetricsSampler::new(),
        }
    }

    /// Run one beat.
    ///
    /// A failed heartbeat is logged and left to the next beat. Remediation
    /// runs regardless of whether the heartbeat was delivered.
    pub async fn beat(&self) -> BeatReport {
        let metrics = self.metrics.sample();
        let delivered = match self.client.heartbeat(metrics).await {
            Ok(()) => {
                tracing::debug!(cpu = ?metrics.cpu, mem = ?metrics.mem, "Heartbeat sent");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, transient = e.is_transient(), "Heartbeat failed");
                false
            }
        };

        let remediation = match self.workload.remediate().await {
            Ok(remediation) => remediation,
            Err(e) => {
                tracing::error!(error = %e, "Workload remediation failed");
                None
            }
        };

        for role in [workload::ROLE, tunnel::ROLE] {
            if let Err(e) = self.supervisor.trim_logs(role) {
                tracing::warn!(role, error = %e, "Log trim failed");
            }
        }

        BeatReport {
            delivered,
            remediation,
        }
    }

    /// Beat every `every` until `shutdown` flips.
    ///
    /// Shutdown is only observed between beats; a beat in progress completes.
    pub async fn run(&self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
            self.beat().await;
        }
        tracing::debug!("Heartbeat loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialCache;
    use crate::supervisor::ProcessSupervisor;
    use fleetport_core::AgentId;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn heartbeat_loop(server: &MockServer, dir: &TempDir) -> HeartbeatLoop {
        let cache = CredentialCache::new(dir.path().join("credentials.json"));
        cache.save(AgentId::new(1), "1:tok").unwrap();
        let client = ControlClient::new(
            server.uri(),
            "agent_x",
            "secret",
            cache,
            Duration::from_secs(2),
        )
        .unwrap();
        let supervisor = Arc::new(ProcessSupervisor::new(dir.path().join("logs"), 1024));
        let workload = WorkloadManager::new(
            Arc::clone(&supervisor),
            "code-server",
            "127.0.0.1:1",
            Duration::from_secs(1),
        );
        HeartbeatLoop::new(Arc::new(client), Arc::new(workload), supervisor)
    }

    #[tokio::test]
    async fn beat_reports_metrics() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/agent/heartbeat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let report = heartbeat_loop(&server, &dir).beat().await;
        assert_eq!(
            report,
            BeatReport {
                delivered: true,
                remediation: None
            }
        );

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = requests[0].body_json().unwrap();
        assert!(body["cpu"].is_number());
    }

    #[tokio::test]
    async fn failed_heartbeat_does_not_start_an_unmanaged_workload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/agent/heartbeat"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let heartbeat = heartbeat_loop(&server, &dir);
        let report = heartbeat.beat().await;

        assert!(!report.delivered);
        assert!(report.remediation.is_none());
        assert_eq!(heartbeat.workload.pid().await, None);
    }

    #[tokio::test]
    async fn beat_trims_oversized_logs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/agent/heartbeat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(logs.join("workload.err.log"), "e".repeat(4096)).unwrap();
        std::fs::write(logs.join("tunnel.out.log"), "small").unwrap();

        heartbeat_loop(&server, &dir).beat().await;

        assert_eq!(std::fs::metadata(logs.join("workload.err.log")).unwrap().len(), 0);
        assert_eq!(
            std::fs::metadata(logs.join("workload.err.log.1")).unwrap().len(),
            4096
        );
        assert_eq!(std::fs::read_to_string(logs.join("tunnel.out.log")).unwrap(), "small");
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/agent/heartbeat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let heartbeat = Arc::new(heartbeat_loop(&server, &dir));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn({
            let heartbeat = Arc::clone(&heartbeat);
            async move { heartbeat.run(Duration::from_millis(20), rx).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(!server.received_requests().await.unwrap().is_empty());
    }
}
