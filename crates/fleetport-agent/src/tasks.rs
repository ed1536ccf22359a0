//! Task loop: poll, execute, report.
//!
//! Tasks are delivered at least once, so both handlers are idempotent:
//! starting a running workload keeps it, stopping a stopped one is a no-op.
//! A stop for a port other than the one currently tunnelled is also a no-op,
//! since the agent has since moved on to a newer allocation.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use fleetport_core::{
    StartWorkloadPayload, StopWorkloadPayload, TaskKind, TaskReportStatus, TaskView,
};
use tokio::sync::watch;

use crate::client::ControlClient;
use crate::error::{AgentError, Result};
use crate::tunnel::{TunnelManager, TunnelRoute};
use crate::workload::WorkloadManager;

/// The report produced for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Reported status.
    pub status: TaskReportStatus,
    /// Reported message.
    pub message: String,
}

impl TaskOutcome {
    fn done(message: impl Into<String>) -> Self {
        Self {
            status: TaskReportStatus::Done,
            message: message.into(),
        }
    }

    fn failed(err: &AgentError) -> Self {
        Self {
            status: TaskReportStatus::Failed,
            message: err.to_string(),
        }
    }
}

/// Executes tasks polled from the control plane.
pub struct TaskRunner {
    client: Arc<ControlClient>,
    workload: Arc<WorkloadManager>,
    tunnel: Arc<TunnelManager>,
}

impl TaskRunner {
    /// Create a runner.
    #[must_use]
    pub fn new(
        client: Arc<ControlClient>,
        workload: Arc<WorkloadManager>,
        tunnel: Arc<TunnelManager>,
    ) -> Self {
        Self {
            client,
            workload,
            tunnel,
        }
    }

    /// Carry out a task's side effects.
    ///
    /// Returns `None` for task types this agent does not know.
    pub async fn execute(&self, task: &TaskView) -> Option<TaskOutcome> {
        let Ok(kind) = TaskKind::from_str(&task.kind) else {
            tracing::warn!(task_id = %task.id, kind = %task.kind, "Skipping unknown task type");
            return None;
        };

        let result = match kind {
            TaskKind::StartCodeServer => self.start(task).await,
            TaskKind::StopCodeServer => self.stop(task).await,
        };

        Some(match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(task_id = %task.id, %kind, error = %e, "Task failed");
                TaskOutcome::failed(&e)
            }
        })
    }

    async fn start(&self, task: &TaskView) -> Result<TaskOutcome> {
        let payload: StartWorkloadPayload = task
            .payload_as()
            .map_err(|e| AgentError::InvalidPayload(e.to_string()))?;
        tracing::info!(
            task_id = %task.id,
            allocation_id = %payload.allocation_id,
            remote_port = payload.remote_port,
            "Starting workload"
        );

        let route = TunnelRoute {
            service: payload.service,
            remote_port: payload.remote_port,
            local_port: self.workload.bind_port()?,
        };
        self.workload.start(&payload.password).await?;
        if let Err(e) = self.tunnel.start(route, payload.tunnel).await {
            // No tunnel means the allocation fails; leave nothing for remediation to revive
            if let Err(stop_err) = self.workload.stop().await {
                tracing::warn!(
                    task_id = %task.id,
                    error = %stop_err,
                    "Failed to stop workload after tunnel failure"
                );
            }
            return Err(e);
        }

        Ok(TaskOutcome::done(format!("remote_port={}", payload.remote_port)))
    }

    async fn stop(&self, task: &TaskView) -> Result<TaskOutcome> {
        let payload: StopWorkloadPayload = task
            .payload_as()
            .map_err(|e| AgentError::InvalidPayload(e.to_string()))?;
        tracing::info!(
            task_id = %task.id,
            allocation_id = %payload.allocation_id,
            remote_port = payload.remote_port,
            "Stopping workload"
        );

        if let Some(current) = self.tunnel.route().await {
            if current.remote_port != payload.remote_port {
                tracing::info!(
                    task_id = %task.id,
                    remote_port = payload.remote_port,
                    serving_port = current.remote_port,
                    "Stop targets an allocation this agent no longer serves"
                );
                return Ok(TaskOutcome::done(format!(
                    "not serving remote_port={}",
                    payload.remote_port
                )));
            }
        }

        self.tunnel.stop().await?;
        self.workload.stop().await?;

        Ok(TaskOutcome::done("stopped"))
    }

    /// Poll once and handle every task in the batch.
    ///
    /// A failing task or report does not stop the rest of the batch.
    /// Returns the number of tasks reported.
    ///
    /// # Errors
    ///
    /// Returns the poll error if the task list could not be fetched.
    pub async fn run_once(&self) -> Result<usize> {
        let tasks = self.client.poll_tasks().await?;
        if !tasks.is_empty() {
            tracing::debug!(count = tasks.len(), "Polled tasks");
        }

        let mut reported = 0;
        for task in &tasks {
            let Some(outcome) = self.execute(task).await else {
                continue;
            };
            match self
                .client
                .report_task(task.id, outcome.status, Some(outcome.message))
                .await
            {
                Ok(()) => reported += 1,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "Failed to report task");
                }
            }
        }

        Ok(reported)
    }

    /// Poll every `every` until `shutdown` flips.
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
            if let Err(e) = self.run_once().await {
                tracing::warn!(error = %e, transient = e.is_transient(), "Task poll failed");
            }
        }
        tracing::debug!("Task loop stopped");
    }
}
