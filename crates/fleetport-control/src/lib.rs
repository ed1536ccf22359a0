//! Control plane for fleetport port allocation and task dispatch.
//!
//! This crate holds the business logic behind the HTTP gateway: the agent
//! registry, the port allocator, the per-agent task queue, and the audit log.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Gateway (HTTP)                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ControlPlaneService                      │
//! │  ┌───────────┐ ┌───────────┐ ┌────────────┐ ┌───────────┐   │
//! │  │ Registry  │ │ Allocator │ │ Dispatcher │ │   Audit   │   │
//! │  └───────────┘ └───────────┘ └────────────┘ └───────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────┐
//!        │  Store   │   │  Auth    │   │   Lock   │
//!        │ (RocksDB)│   │  (JWT)   │   │ Provider │
//!        └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetport_control::{ControlPlane, ControlPlaneService, UserId};
//! use fleetport_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/fleetport")?);
//! let control = ControlPlaneService::with_defaults(store);
//!
//! let operator = UserId::new(1);
//! let invite = control.create_invite(operator, "agent_x").await?;
//! let registered = control.register_agent("agent_x", &invite.secret, None).await?;
//!
//! let allocation = control
//!     .allocate(operator, registered.agent_id, "code_server")
//!     .await?;
//! println!("Reserved port {}", allocation.remote_port);
//! # Ok(())
//! # }
//! ```
//!
//! # State Machine
//!
//! Allocations move through:
//!
//! - `Requested` / `Starting` → `Active` (start task done)
//! - `Active` → `Releasing` (operator release)
//! - `Releasing` → `Released` (stop task done)
//! - any non-terminal state → `Failed`
//!
//! See the [`lifecycle`] module for transition validation helpers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod allocator;
pub mod audit;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod registry;
pub mod service;
pub mod types;
pub mod users;

pub use error::{ControlError, Result};
pub use lock::{InProcessLockProvider, LockLease, LockProvider, PORT_LOCK};
pub use service::{ControlPlane, ControlPlaneService};
pub use types::{AgentSummary, ControlConfig, Invite, IssuedToken, LockMode, PortStats};

#[cfg(any(test, feature = "test-utils"))]
pub use lock::UnavailableLockProvider;

// Re-export commonly used types from dependencies for convenience
pub use fleetport_core::{AgentId, AllocationId, TaskId, UserId};
pub use fleetport_store::{Agent, AgentStatus, Allocation, AllocationStatus, AuditEntry, User};
