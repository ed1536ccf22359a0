//! Control plane service implementation.
//!
//! This module provides the `ControlPlane` trait and `ControlPlaneService` implementation
//! that coordinates the agent registry, port allocation, and task dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fleetport_auth::{generate_password, HmacJwt};
use fleetport_core::{
    AgentId, AllocationId, HeartbeatRequest, RegisterResponse, StartWorkloadPayload,
    StopWorkloadPayload, TaskId, TaskKind, TaskReportRequest, TaskView, UserId,
};
use fleetport_store::{Agent, Allocation, AllocationStatus, AuditEntry, Store, User};
use serde_json::json;

use crate::allocator;
use crate::audit::{self, action, Actor, Target};
use crate::dispatcher::{self, ReportOutcome};
use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::lock::{InProcessLockProvider, LockProvider};
use crate::registry;
use crate::types::{AgentSummary, ControlConfig, Invite, IssuedToken, PortStats};
use crate::users;

/// Trait defining the control plane operations.
///
/// This trait provides the complete API behind the HTTP surface.
/// Implementations handle state persistence, validation, and coordination.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    // =========================================================================
    // Operator Accounts
    // =========================================================================

    /// Create an operator account.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::DuplicateName` if the username is taken.
    async fn register_user(&self, username: &str, password: &str) -> Result<User>;

    /// Verify an operator's password and issue a JWT.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::AuthenticationFailure` on bad credentials.
    async fn login(&self, username: &str, password: &str) -> Result<IssuedToken>;

    // =========================================================================
    // Agent Registry
    // =========================================================================

    /// Invite an agent by name, returning its one-time secret.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::DuplicateName` if the name is taken.
    async fn create_invite(&self, actor: UserId, name: &str) -> Result<Invite>;

    /// Exchange an invite secret for an agent token.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::AuthenticationFailure` on a bad name or secret.
    async fn register_agent(
        &self,
        name: &str,
        secret: &str,
        ip: Option<String>,
    ) -> Result<RegisterResponse>;

    /// Resolve an agent token to its agent.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::AuthenticationFailure` if the token is rejected.
    async fn authenticate_agent(&self, token: &str) -> Result<Agent>;

    /// Record a heartbeat.
    async fn heartbeat(
        &self,
        agent_id: AgentId,
        report: HeartbeatRequest,
        ip: Option<String>,
    ) -> Result<()>;

    /// List agents with effective liveness.
    async fn list_agents(&self) -> Result<Vec<AgentSummary>>;

    /// Remove an agent, deleting its tasks and failing its open allocations.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::AgentNotFound` if the agent doesn't exist.
    async fn remove_agent(&self, actor: UserId, agent_id: AgentId) -> Result<()>;

    /// Mark agents with stale heartbeats offline. Returns how many changed.
    async fn sweep_offline(&self) -> Result<usize>;

    // =========================================================================
    // Allocations
    // =========================================================================

    /// Reserve a port on an agent and enqueue the start task.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::AgentNotFound`, `ControlError::ResourceExhausted`,
    /// or `ControlError::LockUnavailable`.
    async fn allocate(&self, user_id: UserId, agent_id: AgentId, service: &str)
        -> Result<Allocation>;

    /// Begin releasing an active allocation.
    ///
    /// Releasing an allocation that is already releasing, released, or failed
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::AllocationNotFound`, or `ControlError::InvalidState`
    /// if the workload has not been acknowledged yet.
    async fn release(&self, user_id: UserId, allocation_id: AllocationId) -> Result<()>;

    /// Get an allocation by ID.
    async fn get_allocation(&self, allocation_id: AllocationId) -> Result<Allocation>;

    /// List allocations, optionally for one agent.
    async fn list_allocations(&self, agent_id: Option<AgentId>) -> Result<Vec<Allocation>>;

    /// Port pool statistics.
    async fn port_stats(&self) -> Result<PortStats>;

    /// Public address of an allocation's workload, if a public host is configured.
    fn access_url(&self, allocation: &Allocation) -> Option<String>;

    // =========================================================================
    // Task Dispatch
    // =========================================================================

    /// Serve the agent's unfinished tasks.
    async fn poll_tasks(&self, agent_id: AgentId) -> Result<Vec<TaskView>>;

    /// Record the agent's report for one of its tasks.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::TaskNotFound` if the task isn't the agent's.
    async fn report_task(
        &self,
        agent_id: AgentId,
        task_id: TaskId,
        report: TaskReportRequest,
    ) -> Result<()>;

    // =========================================================================
    // Audit
    // =========================================================================

    /// The newest audit entries, newest first.
    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>>;
}

/// The main control plane service implementation.
pub struct ControlPlaneService<S: Store> {
    store: Arc<S>,
    config: ControlConfig,
    locks: Arc<dyn LockProvider>,
    jwt: HmacJwt,
}

impl<S: Store> ControlPlaneService<S> {
    /// Create a new control plane service with an in-process port lock.
    #[must_use]
    pub fn new(store: Arc<S>, config: ControlConfig) -> Self {
        let jwt = HmacJwt::new(config.auth.clone());
        Self {
            store,
            config,
            locks: Arc::new(InProcessLockProvider::new()),
            jwt,
        }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, ControlConfig::default())
    }

    /// Replace the port lock provider.
    #[must_use]
    pub fn with_lock_provider(mut self, locks: Arc<dyn LockProvider>) -> Self {
        self.locks = locks;
        self
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    fn start_payload(&self, allocation: &Allocation) -> Result<serde_json::Value> {
        let payload = StartWorkloadPayload {
            allocation_id: allocation.allocation_id,
            remote_port: allocation.remote_port,
            password: generate_password(self.config.workload_password_length),
            service: allocation.service.clone(),
            tunnel: self.config.tunnel.clone(),
        };
        serde_json::to_value(&payload).map_err(|e| ControlError::Internal(e.to_string()))
    }
}

#[async_trait]
impl<S: Store + 'static> ControlPlane for ControlPlaneService<S> {
    // =========================================================================
    // Operator Accounts
    // =========================================================================

    async fn register_user(&self, username: &str, password: &str) -> Result<User> {
        let user = users::register_user(&*self.store, username, password)?;

        tracing::info!(user_id = %user.user_id, username = %user.username, "Registered user");

        Ok(user)
    }

    async fn login(&self, username: &str, password: &str) -> Result<IssuedToken> {
        let issued = users::login(
            &*self.store,
            &self.jwt,
            self.config.auth.token_ttl_seconds,
            username,
            password,
        )?;

        tracing::debug!(user_id = %issued.user_id, "Issued operator token");

        Ok(issued)
    }

    // =========================================================================
    // Agent Registry
    // =========================================================================

    async fn create_invite(&self, actor: UserId, name: &str) -> Result<Invite> {
        let (agent, secret) = registry::create_invite(&*self.store, name)?;

        audit::record(
            &*self.store,
            Actor::User(actor),
            action::AGENT_INVITED,
            Some(Target::Agent(agent.agent_id)),
            json!({ "name": agent.name }),
        )?;

        tracing::info!(agent_id = %agent.agent_id, name = %agent.name, "Created invite");

        Ok(Invite {
            name: agent.name,
            secret,
        })
    }

    async fn register_agent(
        &self,
        name: &str,
        secret: &str,
        ip: Option<String>,
    ) -> Result<RegisterResponse> {
        let (agent, token) = registry::register(&*self.store, name, secret, ip)?;

        audit::record(
            &*self.store,
            Actor::Agent(agent.agent_id),
            action::AGENT_REGISTERED,
            Some(Target::Agent(agent.agent_id)),
            json!({ "name": agent.name, "ip": agent.ip }),
        )?;

        tracing::info!(agent_id = %agent.agent_id, name = %agent.name, "Registered agent");

        Ok(RegisterResponse {
            agent_id: agent.agent_id,
            agent_token: token.to_string(),
        })
    }

    async fn authenticate_agent(&self, token: &str) -> Result<Agent> {
        registry::authenticate(&*self.store, token)
    }

    async fn heartbeat(
        &self,
        agent_id: AgentId,
        report: HeartbeatRequest,
        ip: Option<String>,
    ) -> Result<()> {
        registry::heartbeat(&*self.store, agent_id, report, ip)?;

        tracing::debug!(
            agent_id = %agent_id,
            cpu = ?report.cpu,
            mem = ?report.mem,
            "Processed heartbeat"
        );

        Ok(())
    }

    async fn list_agents(&self) -> Result<Vec<AgentSummary>> {
        registry::list(&*self.store, Utc::now(), self.config.heartbeat_timeout())
    }

    async fn remove_agent(&self, actor: UserId, agent_id: AgentId) -> Result<()> {
        let removal = registry::remove(&*self.store, agent_id)?;

        audit::record(
            &*self.store,
            Actor::User(actor),
            action::AGENT_REMOVED,
            Some(Target::Agent(agent_id)),
            json!({
                "tasks_deleted": removal.tasks_deleted,
                "allocations_failed": removal.allocations_failed,
            }),
        )?;

        tracing::info!(
            agent_id = %agent_id,
            tasks_deleted = removal.tasks_deleted,
            allocations_failed = removal.allocations_failed,
            "Removed agent"
        );

        Ok(())
    }

    async fn sweep_offline(&self) -> Result<usize> {
        let swept =
            registry::sweep_offline(&*self.store, Utc::now(), self.config.heartbeat_timeout())?;

        for agent_id in &swept {
            audit::record(
                &*self.store,
                Actor::System,
                action::AGENT_OFFLINE,
                Some(Target::Agent(*agent_id)),
                json!({}),
            )?;
            tracing::info!(agent_id = %agent_id, "Agent went offline");
        }

        Ok(swept.len())
    }

    // =========================================================================
    // Allocations
    // =========================================================================

    async fn allocate(
        &self,
        user_id: UserId,
        agent_id: AgentId,
        service: &str,
    ) -> Result<Allocation> {
        if service.is_empty() {
            return Err(ControlError::InvalidRequest(
                "service must not be empty".to_string(),
            ));
        }
        if self.store.get_agent(agent_id)?.is_none() {
            return Err(ControlError::AgentNotFound(agent_id));
        }

        let allocation = allocator::allocate(
            &*self.store,
            &*self.locks,
            &self.config,
            agent_id,
            user_id,
            service,
        )
        .await?;

        // Outside the lock: the task needs no port-uniqueness guarantee
        let payload = self.start_payload(&allocation)?;
        dispatcher::enqueue(&*self.store, agent_id, TaskKind::StartCodeServer, payload)?;

        audit::record(
            &*self.store,
            Actor::User(user_id),
            action::CREATE_ALLOCATION,
            Some(Target::Allocation(allocation.allocation_id)),
            json!({
                "agent_id": agent_id,
                "port": allocation.remote_port,
                "service": allocation.service,
            }),
        )?;

        tracing::info!(
            allocation_id = %allocation.allocation_id,
            agent_id = %agent_id,
            user_id = %user_id,
            port = allocation.remote_port,
            "Created allocation"
        );

        Ok(allocation)
    }

    async fn release(&self, user_id: UserId, allocation_id: AllocationId) -> Result<()> {
        let mut allocation = self
            .store
            .get_allocation(allocation_id)?
            .ok_or(ControlError::AllocationNotFound(allocation_id))?;

        match allocation.status {
            AllocationStatus::Releasing | AllocationStatus::Released | AllocationStatus::Failed => {
                tracing::debug!(
                    allocation_id = %allocation_id,
                    status = ?allocation.status,
                    "Release is a no-op"
                );
                return Ok(());
            }
            AllocationStatus::Requested | AllocationStatus::Starting => {
                return Err(ControlError::InvalidState {
                    allocation_id,
                    status: allocation.status,
                });
            }
            AllocationStatus::Active => {}
        }

        lifecycle::transition(
            &*self.store,
            &mut allocation,
            AllocationStatus::Releasing,
            None,
        )?;

        let payload = StopWorkloadPayload {
            allocation_id,
            remote_port: allocation.remote_port,
        };
        let payload =
            serde_json::to_value(payload).map_err(|e| ControlError::Internal(e.to_string()))?;
        dispatcher::enqueue(
            &*self.store,
            allocation.agent_id,
            TaskKind::StopCodeServer,
            payload,
        )?;

        audit::record(
            &*self.store,
            Actor::User(user_id),
            action::RELEASE_ALLOCATION,
            Some(Target::Allocation(allocation_id)),
            json!({ "agent_id": allocation.agent_id, "port": allocation.remote_port }),
        )?;

        tracing::info!(
            allocation_id = %allocation_id,
            port = allocation.remote_port,
            "Releasing allocation"
        );

        Ok(())
    }

    async fn get_allocation(&self, allocation_id: AllocationId) -> Result<Allocation> {
        self.store
            .get_allocation(allocation_id)?
            .ok_or(ControlError::AllocationNotFound(allocation_id))
    }

    async fn list_allocations(&self, agent_id: Option<AgentId>) -> Result<Vec<Allocation>> {
        Ok(match agent_id {
            Some(agent_id) => self.store.list_allocations_by_agent(agent_id)?,
            None => self.store.list_allocations()?,
        })
    }

    async fn port_stats(&self) -> Result<PortStats> {
        Ok(PortStats {
            min: self.config.port_min,
            max: self.config.port_max,
            allocated_count: self.store.held_ports()?.len(),
        })
    }

    fn access_url(&self, allocation: &Allocation) -> Option<String> {
        self.config
            .public_host
            .as_ref()
            .map(|host| format!("{host}:{}", allocation.remote_port))
    }

    // =========================================================================
    // Task Dispatch
    // =========================================================================

    async fn poll_tasks(&self, agent_id: AgentId) -> Result<Vec<TaskView>> {
        let tasks = dispatcher::poll(&*self.store, agent_id)?;

        if !tasks.is_empty() {
            tracing::debug!(agent_id = %agent_id, count = tasks.len(), "Served tasks");
        }

        Ok(tasks.iter().map(dispatcher::to_view).collect())
    }

    async fn report_task(
        &self,
        agent_id: AgentId,
        task_id: TaskId,
        report: TaskReportRequest,
    ) -> Result<()> {
        let outcome =
            dispatcher::report(&*self.store, agent_id, task_id, report.status, report.message)?;

        if let ReportOutcome::Transitioned(status) = outcome {
            tracing::debug!(task_id = %task_id, status = ?status, "Report moved allocation");
        }

        Ok(())
    }

    // =========================================================================
    // Audit
    // =========================================================================

    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        audit::list(&*self.store, limit)
    }
}
