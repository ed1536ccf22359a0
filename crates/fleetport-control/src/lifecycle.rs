//! Allocation lifecycle state machine.
//!
//! This module defines the valid state transitions for allocations and provides
//! validation logic to ensure state machine invariants are maintained.
//!
//! # State Machine
//!
//! ```text
//!     ┌───────────┐  start done   ┌──────────┐  release   ┌───────────┐  stop done   ┌──────────┐
//!     │ Requested │──────────────▶│  Active  │───────────▶│ Releasing │─────────────▶│ Released │
//!     └─────┬─────┘               └────┬─────┘            └─────┬─────┘              └──────────┘
//!           │                          │                        │
//!           │        task failed       │                        │
//!           └──────────────────────────┴────────────────────────┴───────▶ Failed
//! ```
//!
//! `Starting` behaves like `Requested`. `Released` and `Failed` are terminal.

use chrono::Utc;
use fleetport_core::{AllocationId, TaskKind, TaskReportStatus};
use fleetport_store::{Allocation, AllocationStatus, Store};

use crate::error::{ControlError, Result};

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidTransition` if the transition is not allowed.
pub fn validate_transition(
    allocation_id: AllocationId,
    from: AllocationStatus,
    to: AllocationStatus,
) -> Result<AllocationStatus> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidTransition {
            allocation_id,
            from,
            to,
        })
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: AllocationStatus, to: AllocationStatus) -> bool {
    use AllocationStatus::{Active, Failed, Released, Releasing, Requested, Starting};

    matches!(
        (from, to),
        (Requested | Starting, Active)
            | (Active, Releasing)
            | (Releasing, Released)
            | (Requested | Starting | Active | Releasing, Failed)
    )
}

/// Returns the list of valid target states from the given state.
#[must_use]
pub fn valid_transitions_from(state: AllocationStatus) -> Vec<AllocationStatus> {
    use AllocationStatus::{Active, Failed, Released, Releasing, Requested, Starting};

    match state {
        Requested | Starting => vec![Active, Failed],
        Active => vec![Releasing, Failed],
        Releasing => vec![Released, Failed],
        Released | Failed => vec![],
    }
}

/// Returns true if the allocation is in a terminal state.
#[must_use]
pub const fn is_terminal(state: AllocationStatus) -> bool {
    matches!(state, AllocationStatus::Released | AllocationStatus::Failed)
}

/// The allocation state a task report drives toward.
#[must_use]
pub const fn target_for_report(kind: TaskKind, status: TaskReportStatus) -> AllocationStatus {
    match (kind, status) {
        (TaskKind::StartCodeServer, TaskReportStatus::Done) => AllocationStatus::Active,
        (TaskKind::StopCodeServer, TaskReportStatus::Done) => AllocationStatus::Released,
        (_, TaskReportStatus::Failed) => AllocationStatus::Failed,
    }
}

/// Apply a validated transition and persist the allocation.
///
/// Entering `Released` stamps `released_at`; entering `Failed` records `message`.
///
/// # Errors
///
/// Returns `ControlError::InvalidTransition` if the edge is not allowed, or a
/// storage error if the write fails.
pub fn transition<S: Store>(
    store: &S,
    allocation: &mut Allocation,
    to: AllocationStatus,
    message: Option<String>,
) -> Result<()> {
    validate_transition(allocation.allocation_id, allocation.status, to)?;

    let now = Utc::now();
    allocation.status = to;
    allocation.updated_at = now;
    match to {
        AllocationStatus::Released => allocation.released_at = Some(now),
        AllocationStatus::Failed => allocation.error_message = message,
        _ => {}
    }

    store.put_allocation(allocation)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use AllocationStatus::*;

    const ALL: [AllocationStatus; 6] = [Requested, Starting, Active, Releasing, Released, Failed];

    #[test]
    fn valid_transitions() {
        // Start acknowledged
        assert!(is_valid_transition(Requested, Active));
        assert!(is_valid_transition(Starting, Active));
        // Release requested, then stop acknowledged
        assert!(is_valid_transition(Active, Releasing));
        assert!(is_valid_transition(Releasing, Released));
        // Any non-terminal state can fail
        for from in [Requested, Starting, Active, Releasing] {
            assert!(is_valid_transition(from, Failed));
        }
    }

    #[test]
    fn invalid_transitions() {
        // Can't release before the workload is up
        assert!(!is_valid_transition(Requested, Releasing));
        // Can't skip Releasing
        assert!(!is_valid_transition(Active, Released));
        // Can't reactivate
        assert!(!is_valid_transition(Releasing, Active));
        // Terminal states stay put
        for to in ALL {
            assert!(!is_valid_transition(Released, to));
            assert!(!is_valid_transition(Failed, to));
        }
    }

    #[test]
    fn transition_table_matches_listing() {
        for from in ALL {
            let listed = valid_transitions_from(from);
            for to in ALL {
                assert_eq!(is_valid_transition(from, to), listed.contains(&to));
            }
        }
    }

    #[test]
    fn validate_transition_err() {
        let result = validate_transition(AllocationId::new(3), Released, Active);

        match result {
            Err(ControlError::InvalidTransition { from, to, .. }) => {
                assert_eq!(from, Released);
                assert_eq!(to, Active);
            }
            _ => panic!("expected InvalidTransition error"),
        }
    }

    #[test]
    fn terminal_states() {
        assert!(is_terminal(Released));
        assert!(is_terminal(Failed));
        assert!(!is_terminal(Active));
        assert!(!is_terminal(Releasing));
    }

    #[test]
    fn report_targets() {
        assert_eq!(
            target_for_report(TaskKind::StartCodeServer, TaskReportStatus::Done),
            Active
        );
        assert_eq!(
            target_for_report(TaskKind::StopCodeServer, TaskReportStatus::Done),
            Released
        );
        assert_eq!(
            target_for_report(TaskKind::StopCodeServer, TaskReportStatus::Failed),
            Failed
        );
    }
}
