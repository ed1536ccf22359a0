//! Per-agent task queue.
//!
//! Agents pull work: every poll returns all unfinished tasks for the agent, so
//! a task is re-delivered until the agent reports it. Agent handlers must be
//! idempotent. The first delivery marks a task `Dispatched`; later deliveries
//! only bump its attempt counter.
//!
//! Reports are the only thing that moves an allocation to `Active`, `Released`,
//! or `Failed`.

use chrono::Utc;
use fleetport_core::{
    AgentId, AllocationId, TaskId, TaskKind, TaskReportStatus, TaskStatus, TaskView,
};
use fleetport_store::{AllocationStatus, Sequence, Store, Task};
use serde::Deserialize;
use serde_json::json;

use crate::audit::{self, action, Actor, Target};
use crate::error::{ControlError, Result};
use crate::lifecycle;

/// What a report did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The task was already finished; nothing changed.
    AlreadyFinished,
    /// The task result was recorded but no allocation edge applied.
    Recorded,
    /// The task result was recorded and its allocation moved to this state.
    Transitioned(AllocationStatus),
}

/// Both task payloads carry the allocation they act on.
#[derive(Deserialize)]
struct AllocationRef {
    allocation_id: AllocationId,
}

/// Create a `Pending` task for an agent.
///
/// # Errors
///
/// Returns a storage error if the task cannot be written.
pub fn enqueue<S: Store>(
    store: &S,
    agent_id: AgentId,
    kind: TaskKind,
    payload: serde_json::Value,
) -> Result<Task> {
    let now = Utc::now();
    let task = Task {
        task_id: TaskId::new(store.next_id(Sequence::Task)?),
        agent_id,
        kind,
        payload,
        status: TaskStatus::Pending,
        last_error: None,
        attempts: 0,
        created_at: now,
        updated_at: now,
        dispatched_at: None,
    };
    store.put_task(&task)?;

    tracing::debug!(
        task_id = %task.task_id,
        agent_id = %agent_id,
        kind = %kind,
        "Enqueued task"
    );

    Ok(task)
}

/// Serve every unfinished task of an agent, oldest first.
///
/// # Errors
///
/// Returns a storage error if the queue cannot be read or updated.
pub fn poll<S: Store>(store: &S, agent_id: AgentId) -> Result<Vec<Task>> {
    let now = Utc::now();
    let mut served = Vec::new();

    for listed in store.list_tasks_by_agent(agent_id)? {
        if listed.status.is_finished() {
            continue;
        }

        // A report may have landed since the listing; re-check under the row lock
        let mut serve = false;
        let updated = store.update_task(listed.task_id, &mut |task| {
            serve = !task.status.is_finished();
            if !serve {
                return false;
            }
            if task.status == TaskStatus::Pending {
                task.status = TaskStatus::Dispatched;
                task.dispatched_at = Some(now);
            }
            task.attempts = task.attempts.saturating_add(1);
            task.updated_at = now;
            true
        })?;

        if let Some(task) = updated.filter(|_| serve) {
            served.push(task);
        }
    }

    Ok(served)
}

/// Render a task for the agent-facing API.
#[must_use]
pub fn to_view(task: &Task) -> TaskView {
    TaskView {
        id: task.task_id,
        kind: task.kind.as_str().to_string(),
        payload: task.payload.clone(),
        status: task.status,
        created_at: task.created_at,
    }
}

/// Record an agent's report for one of its tasks and apply the allocation edge.
///
/// # Errors
///
/// Returns `ControlError::TaskNotFound` if the task does not exist or belongs
/// to another agent, or a storage error.
pub fn report<S: Store>(
    store: &S,
    agent_id: AgentId,
    task_id: TaskId,
    status: TaskReportStatus,
    message: Option<String>,
) -> Result<ReportOutcome> {
    let mut owned = false;
    let mut recorded = false;
    let updated = store.update_task(task_id, &mut |task| {
        owned = task.agent_id == agent_id;
        recorded = owned && !task.status.is_finished();
        if !recorded {
            return false;
        }
        task.status = status.into();
        task.last_error.clone_from(&message);
        task.updated_at = Utc::now();
        true
    })?;
    let task = updated
        .filter(|_| owned)
        .ok_or(ControlError::TaskNotFound(task_id))?;

    if !recorded {
        tracing::debug!(
            task_id = %task_id,
            status = ?task.status,
            "Ignoring report for finished task"
        );
        return Ok(ReportOutcome::AlreadyFinished);
    }

    tracing::info!(
        task_id = %task_id,
        agent_id = %agent_id,
        kind = %task.kind,
        status = ?status,
        "Task reported"
    );

    apply_allocation_edge(store, &task, status, message)
}

fn apply_allocation_edge<S: Store>(
    store: &S,
    task: &Task,
    status: TaskReportStatus,
    message: Option<String>,
) -> Result<ReportOutcome> {
    let Ok(AllocationRef { allocation_id }) = serde_json::from_value(task.payload.clone()) else {
        tracing::warn!(task_id = %task.task_id, "Task payload has no allocation_id");
        return Ok(ReportOutcome::Recorded);
    };

    let Some(mut allocation) = store.get_allocation(allocation_id)? else {
        tracing::warn!(
            task_id = %task.task_id,
            allocation_id = %allocation_id,
            "Task references unknown allocation"
        );
        return Ok(ReportOutcome::Recorded);
    };

    let target = lifecycle::target_for_report(task.kind, status);
    if !lifecycle::is_valid_transition(allocation.status, target) {
        tracing::warn!(
            task_id = %task.task_id,
            allocation_id = %allocation_id,
            from = ?allocation.status,
            to = ?target,
            "Skipping allocation transition"
        );
        return Ok(ReportOutcome::Recorded);
    }

    let message = message.unwrap_or_else(|| "task failed".to_string());
    lifecycle::transition(store, &mut allocation, target, Some(message.clone()))?;

    let (audit_action, meta) = match target {
        AllocationStatus::Active => (
            action::ALLOCATION_ACTIVE,
            json!({ "task_id": task.task_id, "port": allocation.remote_port }),
        ),
        AllocationStatus::Released => (
            action::ALLOCATION_RELEASED,
            json!({ "task_id": task.task_id, "port": allocation.remote_port }),
        ),
        _ => (
            action::ALLOCATION_FAILED,
            json!({ "task_id": task.task_id, "message": message }),
        ),
    };
    audit::record(
        store,
        Actor::Agent(task.agent_id),
        audit_action,
        Some(Target::Allocation(allocation_id)),
        meta,
    )?;

    tracing::info!(
        allocation_id = %allocation_id,
        status = ?target,
        port = allocation.remote_port,
        "Allocation transitioned"
    );

    Ok(ReportOutcome::Transitioned(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetport_core::UserId;
    use fleetport_store::{Allocation, RocksStore};
    use tempfile::TempDir;

    fn setup() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn put_allocation(store: &RocksStore, status: AllocationStatus) -> Allocation {
        let now = Utc::now();
        let allocation = Allocation {
            allocation_id: AllocationId::new(store.next_id(Sequence::Allocation).unwrap()),
            agent_id: AgentId::new(1),
            user_id: UserId::new(1),
            service: "code_server".to_string(),
            remote_port: 50100,
            status,
            created_at: now,
            updated_at: now,
            released_at: None,
            error_message: None,
        };
        store.put_allocation(&allocation).unwrap();
        allocation
    }

    fn task_for(store: &RocksStore, kind: TaskKind, allocation: &Allocation) -> Task {
        enqueue(
            store,
            allocation.agent_id,
            kind,
            json!({
                "allocation_id": allocation.allocation_id,
                "remote_port": allocation.remote_port,
            }),
        )
        .unwrap()
    }

    #[test]
    fn poll_redelivers_until_reported() {
        let (store, _dir) = setup();
        let allocation = put_allocation(&store, AllocationStatus::Requested);
        let task = task_for(&store, TaskKind::StartCodeServer, &allocation);

        let first = poll(&store, allocation.agent_id).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, TaskStatus::Dispatched);
        assert_eq!(first[0].attempts, 1);
        let dispatched_at = first[0].dispatched_at.unwrap();

        let second = poll(&store, allocation.agent_id).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].attempts, 2);
        assert_eq!(second[0].dispatched_at, Some(dispatched_at));

        report(&store, allocation.agent_id, task.task_id, TaskReportStatus::Done, None).unwrap();
        assert!(poll(&store, allocation.agent_id).unwrap().is_empty());
    }

    #[test]
    fn poll_is_per_agent_and_ordered() {
        let (store, _dir) = setup();
        let a = enqueue(&store, AgentId::new(1), TaskKind::StartCodeServer, json!({})).unwrap();
        enqueue(&store, AgentId::new(2), TaskKind::StartCodeServer, json!({})).unwrap();
        let b = enqueue(&store, AgentId::new(1), TaskKind::StopCodeServer, json!({})).unwrap();

        let ids: Vec<TaskId> = poll(&store, AgentId::new(1))
            .unwrap()
            .iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(ids, vec![a.task_id, b.task_id]);
    }

    #[test]
    fn start_done_activates_allocation() {
        let (store, _dir) = setup();
        let allocation = put_allocation(&store, AllocationStatus::Requested);
        let task = task_for(&store, TaskKind::StartCodeServer, &allocation);

        let outcome = report(
            &store,
            allocation.agent_id,
            task.task_id,
            TaskReportStatus::Done,
            Some("remote_port=50100".to_string()),
        )
        .unwrap();
        assert_eq!(outcome, ReportOutcome::Transitioned(AllocationStatus::Active));

        let stored = store.get_allocation(allocation.allocation_id).unwrap().unwrap();
        assert_eq!(stored.status, AllocationStatus::Active);
        assert_eq!(store.list_audit(1).unwrap()[0].action, "allocation_active");
    }

    #[test]
    fn stop_done_releases_allocation() {
        let (store, _dir) = setup();
        let allocation = put_allocation(&store, AllocationStatus::Releasing);
        let task = task_for(&store, TaskKind::StopCodeServer, &allocation);

        report(&store, allocation.agent_id, task.task_id, TaskReportStatus::Done, None).unwrap();

        let stored = store.get_allocation(allocation.allocation_id).unwrap().unwrap();
        assert_eq!(stored.status, AllocationStatus::Released);
        assert!(stored.released_at.is_some());
    }

    #[test]
    fn failure_fails_allocation_with_message() {
        let (store, _dir) = setup();
        let allocation = put_allocation(&store, AllocationStatus::Requested);
        let task = task_for(&store, TaskKind::StartCodeServer, &allocation);

        report(
            &store,
            allocation.agent_id,
            task.task_id,
            TaskReportStatus::Failed,
            Some("code-server: not found".to_string()),
        )
        .unwrap();

        let stored = store.get_allocation(allocation.allocation_id).unwrap().unwrap();
        assert_eq!(stored.status, AllocationStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("code-server: not found"));
        assert!(store.held_ports().unwrap().is_empty());

        let stored_task = store.get_task(task.task_id).unwrap().unwrap();
        assert_eq!(stored_task.status, TaskStatus::Failed);
        assert_eq!(stored_task.last_error.as_deref(), Some("code-server: not found"));
    }

    #[test]
    fn finished_tasks_are_immutable() {
        let (store, _dir) = setup();
        let allocation = put_allocation(&store, AllocationStatus::Requested);
        let task = task_for(&store, TaskKind::StartCodeServer, &allocation);

        report(&store, allocation.agent_id, task.task_id, TaskReportStatus::Done, None).unwrap();
        let outcome = report(
            &store,
            allocation.agent_id,
            task.task_id,
            TaskReportStatus::Failed,
            Some("late".to_string()),
        )
        .unwrap();

        assert_eq!(outcome, ReportOutcome::AlreadyFinished);
        let stored = store.get_allocation(allocation.allocation_id).unwrap().unwrap();
        assert_eq!(stored.status, AllocationStatus::Active);
        assert_eq!(store.get_task(task.task_id).unwrap().unwrap().status, TaskStatus::Done);
    }

    #[test]
    fn polls_racing_a_report_never_reopen_the_task() {
        let (store, _dir) = setup();
        let store = std::sync::Arc::new(store);
        let allocation = put_allocation(&*store, AllocationStatus::Requested);
        let task = task_for(&store, TaskKind::StartCodeServer, &allocation);

        let poller = {
            let store = std::sync::Arc::clone(&store);
            let agent_id = allocation.agent_id;
            std::thread::spawn(move || {
                for _ in 0..200 {
                    poll(&*store, agent_id).unwrap();
                }
            })
        };
        report(&*store, allocation.agent_id, task.task_id, TaskReportStatus::Done, None).unwrap();
        poller.join().unwrap();

        assert_eq!(store.get_task(task.task_id).unwrap().unwrap().status, TaskStatus::Done);
        assert!(poll(&*store, allocation.agent_id).unwrap().is_empty());
    }

    #[test]
    fn invalid_edge_is_skipped_but_recorded() {
        let (store, _dir) = setup();
        // A stale start task acknowledged after the allocation was released
        let allocation = put_allocation(&store, AllocationStatus::Released);
        let task = task_for(&store, TaskKind::StartCodeServer, &allocation);

        let outcome =
            report(&store, allocation.agent_id, task.task_id, TaskReportStatus::Done, None).unwrap();

        assert_eq!(outcome, ReportOutcome::Recorded);
        let stored = store.get_allocation(allocation.allocation_id).unwrap().unwrap();
        assert_eq!(stored.status, AllocationStatus::Released);
        assert_eq!(store.get_task(task.task_id).unwrap().unwrap().status, TaskStatus::Done);
    }

    #[test]
    fn reports_from_other_agents_are_rejected() {
        let (store, _dir) = setup();
        let allocation = put_allocation(&store, AllocationStatus::Requested);
        let task = task_for(&store, TaskKind::StartCodeServer, &allocation);

        let result = report(&store, AgentId::new(99), task.task_id, TaskReportStatus::Done, None);
        assert!(matches!(result, Err(ControlError::TaskNotFound(_))));

        let result = report(&store, allocation.agent_id, TaskId::new(404), TaskReportStatus::Done, None);
        assert!(matches!(result, Err(ControlError::TaskNotFound(_))));
    }

    #[test]
    fn view_uses_wire_type_tag() {
        let (store, _dir) = setup();
        let task = enqueue(&store, AgentId::new(1), TaskKind::StopCodeServer, json!({"a": 1})).unwrap();

        let view = to_view(&task);
        assert_eq!(view.kind, "stop_code_server");
        assert_eq!(view.id, task.task_id);
        assert_eq!(view.payload["a"], 1);
    }
}
