//! Core types and wire protocol for fleetport.
//!
//! This crate provides the foundational types shared by the control plane and
//! the agent runtime:
//!
//! - **Identifiers**: Strongly-typed numeric IDs for agents, allocations, tasks, users, and audit entries
//! - **Protocol**: Task kinds, task payloads, and the request/response bodies exchanged with agents
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use fleetport_core::{AgentId, AllocationId, StartWorkloadPayload, TaskKind};
//!
//! let agent_id: AgentId = "7".parse().unwrap();
//! assert_eq!(agent_id.get(), 7);
//!
//! let payload = StartWorkloadPayload {
//!     allocation_id: AllocationId::new(1),
//!     remote_port: 50123,
//!     password: "s3cret".to_string(),
//!     service: "code_server".to_string(),
//!     tunnel: None,
//! };
//! assert_eq!(TaskKind::StartCodeServer.as_str(), "start_code_server");
//! assert_eq!(payload.remote_port, 50123);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod protocol;

pub use error::{CoreError, Result};
pub use ids::{AgentId, AllocationId, AuditId, IdError, TaskId, UserId};
pub use protocol::{
    HeartbeatRequest, OkResponse, RegisterRequest, RegisterResponse, StartWorkloadPayload,
    StopWorkloadPayload, TaskKind, TaskReportRequest, TaskReportStatus, TaskStatus, TaskView,
    TunnelEndpoint,
};
