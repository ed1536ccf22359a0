//! HTTP gateway for the fleetport control plane.
//!
//! This crate exposes the control plane over HTTP. It handles:
//!
//! - Operator login and JWT authentication
//! - Agent registration and agent-token authentication
//! - REST endpoints for invites, allocations, port stats and the audit log
//! - The task queue agents poll and report against
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────┐
//! │      Operators       │        │        Agents        │
//! │   (Bearer <jwt>)     │        │  (Bearer <id:token>) │
//! └──────────────────────┘        └──────────────────────┘
//!            │                               │
//!            ▼                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     fleetport-gateway                       │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │    Auth     │ │   Router    │ │    Offline          │    │
//! │  │ Extractors  │ │ + Handlers  │ │    Sweep            │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                    ┌───────────────────┐
//!                    │   Control Plane   │
//!                    └───────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetport_gateway::{GatewayConfig, GatewayState, create_router};
//! use fleetport_control::{ControlConfig, ControlPlaneService};
//! use fleetport_auth::HmacJwt;
//! use fleetport_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ControlConfig::default();
//! let jwt_validator = Arc::new(HmacJwt::new(config.auth.clone()));
//!
//! let store = Arc::new(RocksStore::open("/tmp/fleetport")?);
//! let control = Arc::new(ControlPlaneService::new(store, config));
//!
//! let state = GatewayState::new(control, jwt_validator, GatewayConfig::default());
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod sweep;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::GatewayState;
pub use sweep::spawn_offline_sweep;

// Re-export key types for convenience
pub use auth::{AdminUser, AgentAuth, ClientIp};
