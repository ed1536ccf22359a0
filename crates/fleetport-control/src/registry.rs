//! Agent registry operations.
//!
//! An operator invites an agent by name and hands the one-time secret to the
//! machine. The agent exchanges name and secret for a composite token and uses
//! that token on every later call. Registering again with the same secret
//! rotates the token.

use chrono::{DateTime, Utc};
use fleetport_auth::{generate_secret, hash_secret, verify_secret, AgentToken};
use fleetport_core::{AgentId, HeartbeatRequest};
use fleetport_store::{Agent, AgentStatus, AllocationStatus, Sequence, Store, StoreError};

use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::types::AgentSummary;

/// Longest accepted agent name.
pub const MAX_NAME_LEN: usize = 64;

/// Check that a name is 1 to 64 characters of `[A-Za-z0-9_-]`.
///
/// # Errors
///
/// Returns `ControlError::InvalidRequest` describing the problem.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ControlError::InvalidRequest(format!(
            "name must be 1-{MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ControlError::InvalidRequest(
            "name may only contain letters, digits, '_' and '-'".to_string(),
        ));
    }
    Ok(())
}

/// Create an offline agent record and return it with its raw invite secret.
///
/// # Errors
///
/// Returns `ControlError::InvalidRequest` for a bad name,
/// `ControlError::DuplicateName` if the name is taken, or a storage error.
pub fn create_invite<S: Store>(store: &S, name: &str) -> Result<(Agent, String)> {
    validate_name(name)?;

    let secret = generate_secret();
    let now = Utc::now();
    let agent = Agent {
        agent_id: AgentId::new(store.next_id(Sequence::Agent)?),
        name: name.to_string(),
        secret_hash: hash_secret(&secret),
        token_hash: None,
        status: AgentStatus::Offline,
        last_seen_at: None,
        ip: None,
        cpu_percent: None,
        mem_percent: None,
        created_at: now,
        updated_at: now,
    };

    store.insert_agent(&agent).map_err(|e| match e {
        StoreError::Conflict(_) => ControlError::DuplicateName(name.to_string()),
        other => other.into(),
    })?;

    Ok((agent, secret))
}

/// Exchange an invite secret for a fresh agent token.
///
/// # Errors
///
/// Returns `ControlError::AuthenticationFailure` for an unknown name or wrong
/// secret, or a storage error.
pub fn register<S: Store>(
    store: &S,
    name: &str,
    secret: &str,
    ip: Option<String>,
) -> Result<(Agent, AgentToken)> {
    let invited = store
        .get_agent_by_name(name)?
        .ok_or(ControlError::AuthenticationFailure)?;

    if !verify_secret(secret, &invited.secret_hash)? {
        return Err(ControlError::AuthenticationFailure);
    }

    let token = AgentToken::generate(invited.agent_id);
    let token_hash = hash_secret(&token.secret);
    let now = Utc::now();
    let agent = store
        .update_agent(invited.agent_id, &mut |agent| {
            agent.token_hash = Some(token_hash.clone());
            agent.status = AgentStatus::Online;
            agent.last_seen_at = Some(now);
            agent.updated_at = now;
            if ip.is_some() {
                agent.ip.clone_from(&ip);
            }
            true
        })?
        .ok_or(ControlError::AuthenticationFailure)?;

    Ok((agent, token))
}

/// Resolve a presented `<agent_id>:<secret>` token to its agent.
///
/// # Errors
///
/// Returns `ControlError::AuthenticationFailure` if the token is malformed,
/// names an unknown agent, or does not match the stored hash.
pub fn authenticate<S: Store>(store: &S, token: &str) -> Result<Agent> {
    let token: AgentToken = token
        .parse()
        .map_err(|_| ControlError::AuthenticationFailure)?;

    let agent = store
        .get_agent(token.agent_id)?
        .ok_or(ControlError::AuthenticationFailure)?;

    let Some(stored) = agent.token_hash.as_deref() else {
        return Err(ControlError::AuthenticationFailure);
    };
    if !verify_secret(&token.secret, stored)? {
        return Err(ControlError::AuthenticationFailure);
    }

    Ok(agent)
}

/// Record a heartbeat: metrics, source IP, and liveness.
///
/// # Errors
///
/// Returns `ControlError::AgentNotFound` or a storage error.
pub fn heartbeat<S: Store>(
    store: &S,
    agent_id: AgentId,
    report: HeartbeatRequest,
    ip: Option<String>,
) -> Result<Agent> {
    let now = Utc::now();
    store
        .update_agent(agent_id, &mut |agent| {
            agent.status = AgentStatus::Online;
            agent.last_seen_at = Some(now);
            agent.updated_at = now;
            agent.cpu_percent = report.cpu;
            agent.mem_percent = report.mem;
            if ip.is_some() {
                agent.ip.clone_from(&ip);
            }
            true
        })?
        .ok_or(ControlError::AgentNotFound(agent_id))
}

/// Liveness as observed at `now`: online only if seen within `timeout`.
#[must_use]
pub fn effective_status(
    agent: &Agent,
    now: DateTime<Utc>,
    timeout: chrono::Duration,
) -> AgentStatus {
    match agent.last_seen_at {
        Some(seen) if agent.status == AgentStatus::Online && now - seen <= timeout => {
            AgentStatus::Online
        }
        _ => AgentStatus::Offline,
    }
}

/// List every agent with its effective liveness.
///
/// # Errors
///
/// Returns a storage error if the registry cannot be read.
pub fn list<S: Store>(
    store: &S,
    now: DateTime<Utc>,
    timeout: chrono::Duration,
) -> Result<Vec<AgentSummary>> {
    Ok(store
        .list_agents()?
        .into_iter()
        .map(|agent| AgentSummary {
            id: agent.agent_id,
            status: effective_status(&agent, now, timeout),
            name: agent.name,
            last_seen_at: agent.last_seen_at,
            ip: agent.ip,
            cpu: agent.cpu_percent,
            mem: agent.mem_percent,
        })
        .collect())
}

/// What removing an agent cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    /// Tasks deleted with the agent.
    pub tasks_deleted: usize,
    /// Non-terminal allocations moved to `Failed`.
    pub allocations_failed: usize,
}

/// Remove an agent, its tasks, and its claim on any ports.
///
/// # Errors
///
/// Returns `ControlError::AgentNotFound` or a storage error.
pub fn remove<S: Store>(store: &S, agent_id: AgentId) -> Result<Removal> {
    if store.get_agent(agent_id)?.is_none() {
        return Err(ControlError::AgentNotFound(agent_id));
    }

    let tasks_deleted = store.delete_tasks_by_agent(agent_id)?;

    let mut allocations_failed = 0;
    for mut allocation in store.list_allocations_by_agent(agent_id)? {
        if lifecycle::is_terminal(allocation.status) {
            continue;
        }
        lifecycle::transition(
            store,
            &mut allocation,
            AllocationStatus::Failed,
            Some("agent removed".to_string()),
        )?;
        allocations_failed += 1;
    }

    store.delete_agent(agent_id)?;

    Ok(Removal {
        tasks_deleted,
        allocations_failed,
    })
}

/// Mark agents whose heartbeats stopped as offline. Returns the affected IDs.
///
/// # Errors
///
/// Returns a storage error.
pub fn sweep_offline<S: Store>(
    store: &S,
    now: DateTime<Utc>,
    timeout: chrono::Duration,
) -> Result<Vec<AgentId>> {
    let mut swept = Vec::new();

    for listed in store.list_agents()? {
        if listed.status != AgentStatus::Online
            || effective_status(&listed, now, timeout) == AgentStatus::Online
        {
            continue;
        }

        // Re-check against the stored row: a heartbeat may have just arrived
        let mut went_offline = false;
        store.update_agent(listed.agent_id, &mut |agent| {
            went_offline = agent.status == AgentStatus::Online
                && effective_status(agent, now, timeout) == AgentStatus::Offline;
            if went_offline {
                agent.status = AgentStatus::Offline;
                agent.updated_at = now;
            }
            went_offline
        })?;
        if went_offline {
            swept.push(listed.agent_id);
        }
    }

    Ok(swept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetport_store::RocksStore;
    use tempfile::TempDir;

    fn setup() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn name_rules() {
        assert!(validate_name("agent_x").is_ok());
        assert!(validate_name("edge-01").is_ok());
        assert!(validate_name(&"a".repeat(64)).is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"a".repeat(65)).is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("semi;colon").is_err());
    }

    #[test]
    fn invite_is_offline_and_hides_secret() {
        let (store, _dir) = setup();
        let (agent, secret) = create_invite(&store, "agent_x").unwrap();

        assert_eq!(agent.status, AgentStatus::Offline);
        assert!(agent.token_hash.is_none());
        assert!(!agent.secret_hash.contains(&secret));

        assert!(matches!(
            create_invite(&store, "agent_x"),
            Err(ControlError::DuplicateName(_))
        ));
    }

    #[test]
    fn registration_round_trip() {
        let (store, _dir) = setup();
        let (invited, secret) = create_invite(&store, "agent_x").unwrap();

        let (agent, token) =
            register(&store, "agent_x", &secret, Some("10.0.0.5".to_string())).unwrap();
        assert_eq!(agent.agent_id, invited.agent_id);
        assert_eq!(agent.status, AgentStatus::Online);
        assert_eq!(agent.ip.as_deref(), Some("10.0.0.5"));

        // Right token authenticates
        let authed = authenticate(&store, &token.to_string()).unwrap();
        assert_eq!(authed.agent_id, agent.agent_id);

        // Wrong secret half, wrong id, garbage
        let forged = format!("{}:{}", agent.agent_id, generate_secret());
        assert!(matches!(
            authenticate(&store, &forged),
            Err(ControlError::AuthenticationFailure)
        ));
        let other_id = format!("999:{}", token.secret);
        assert!(authenticate(&store, &other_id).is_err());
        assert!(authenticate(&store, "garbage").is_err());
    }

    #[test]
    fn wrong_secret_or_name_is_rejected() {
        let (store, _dir) = setup();
        create_invite(&store, "agent_x").unwrap();

        assert!(matches!(
            register(&store, "agent_x", "wrong", None),
            Err(ControlError::AuthenticationFailure)
        ));
        assert!(matches!(
            register(&store, "nobody", "wrong", None),
            Err(ControlError::AuthenticationFailure)
        ));
    }

    #[test]
    fn unregistered_agent_cannot_authenticate() {
        let (store, _dir) = setup();
        let (agent, _secret) = create_invite(&store, "agent_x").unwrap();

        let token = AgentToken::generate(agent.agent_id);
        assert!(authenticate(&store, &token.to_string()).is_err());
    }

    #[test]
    fn reregistration_rotates_token() {
        let (store, _dir) = setup();
        let (_, secret) = create_invite(&store, "agent_x").unwrap();

        let (_, old) = register(&store, "agent_x", &secret, None).unwrap();
        let (_, new) = register(&store, "agent_x", &secret, None).unwrap();

        assert!(authenticate(&store, &old.to_string()).is_err());
        assert!(authenticate(&store, &new.to_string()).is_ok());
    }

    #[test]
    fn heartbeat_updates_metrics() {
        let (store, _dir) = setup();
        let (agent, _) = create_invite(&store, "agent_x").unwrap();

        let report = HeartbeatRequest {
            cpu: Some(12.5),
            mem: Some(40.0),
        };
        let updated = heartbeat(&store, agent.agent_id, report, None).unwrap();
        assert_eq!(updated.status, AgentStatus::Online);
        assert_eq!(updated.cpu_percent, Some(12.5));
        assert!(updated.last_seen_at.is_some());

        assert!(matches!(
            heartbeat(&store, AgentId::new(77), report, None),
            Err(ControlError::AgentNotFound(_))
        ));
    }

    #[test]
    fn stale_agents_are_swept_and_listed_offline() {
        let (store, _dir) = setup();
        let (agent, _) = create_invite(&store, "agent_x").unwrap();
        heartbeat(&store, agent.agent_id, HeartbeatRequest::default(), None).unwrap();

        let timeout = chrono::Duration::seconds(90);
        let now = Utc::now();
        let listed = list(&store, now, timeout).unwrap();
        assert_eq!(listed[0].status, AgentStatus::Online);

        let later = now + chrono::Duration::seconds(91);
        let listed = list(&store, later, timeout).unwrap();
        assert_eq!(listed[0].status, AgentStatus::Offline);

        assert!(sweep_offline(&store, now, timeout).unwrap().is_empty());
        let swept = sweep_offline(&store, later, timeout).unwrap();
        assert_eq!(swept, vec![agent.agent_id]);
        assert_eq!(
            store.get_agent(agent.agent_id).unwrap().unwrap().status,
            AgentStatus::Offline
        );
    }

    #[test]
    fn sweeps_racing_registration_keep_the_newest_token() {
        let (store, _dir) = setup();
        let (_, secret) = create_invite(&store, "agent_x").unwrap();
        let store = std::sync::Arc::new(store);

        let registrar = {
            let store = std::sync::Arc::clone(&store);
            std::thread::spawn(move || {
                let mut last = None;
                for _ in 0..50 {
                    last = Some(register(&*store, "agent_x", &secret, None).unwrap().1);
                }
                last.unwrap()
            })
        };
        let far_future = Utc::now() + chrono::Duration::days(1);
        for _ in 0..50 {
            sweep_offline(&*store, far_future, chrono::Duration::seconds(90)).unwrap();
        }
        let newest = registrar.join().unwrap();

        assert!(authenticate(&*store, &newest.to_string()).is_ok());
    }

    #[test]
    fn remove_unknown_agent() {
        let (store, _dir) = setup();
        assert!(matches!(
            remove(&store, AgentId::new(5)),
            Err(ControlError::AgentNotFound(_))
        ));
    }
}
