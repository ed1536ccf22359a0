//! # fleetport-agent
//!
//! Runtime for a fleetport compute agent.
//!
//! The agent registers with the control plane using its invite secret, then
//! runs two independent loops:
//!
//! - **Heartbeat**: reports CPU/memory and restarts the workload if the agent
//!   started it and it has since crashed or stopped listening.
//! - **Tasks**: polls for `start_code_server`/`stop_code_server` tasks, starts
//!   or stops the workload and tunnel processes, and reports each outcome.
//!
//! Both loops share the workload and tunnel managers, each of which serializes
//! its start/stop transitions behind a single lock.
//!
//! ## Example
//!
//! ```no_run
//! use clap::Parser;
//! use fleetport_agent::{AgentConfig, AgentRuntime};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AgentConfig::parse();
//! let runtime = AgentRuntime::new(config)?;
//! runtime.ensure_registered().await?;
//!
//! let (_tx, rx) = tokio::sync::watch::channel(false);
//! runtime.run(rx).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod heartbeat;
pub mod metrics;
pub mod runtime;
pub mod supervisor;
pub mod tasks;
pub mod tunnel;
pub mod workload;

pub use client::ControlClient;
pub use config::AgentConfig;
pub use credentials::{CredentialCache, Credentials};
pub use error::{AgentError, Result};
pub use heartbeat::{BeatReport, HeartbeatLoop};
pub use metrics::MetricsSampler;
pub use runtime::AgentRuntime;
pub use supervisor::{LaunchSpec, ProcessHandle, ProcessSupervisor, StopOutcome};
pub use tasks::{TaskOutcome, TaskRunner};
pub use tunnel::{render_config, TunnelManager, TunnelRoute};
pub use workload::{Remediation, WorkloadManager};
