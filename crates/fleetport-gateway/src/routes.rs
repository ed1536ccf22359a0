//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use fleetport_auth::JwtValidator;
use fleetport_control::ControlPlane;

use crate::handlers::{agents, allocations, audit, auth, health, tasks};
use crate::state::GatewayState;

/// Create the gateway router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `POST /v1/auth/register` - Create an operator account
/// - `POST /v1/auth/login` - Issue an operator JWT
///
/// ## Operator (JWT)
/// - `POST /v1/invites` - Invite an agent
/// - `GET /v1/agents` - List agents
/// - `DELETE /v1/agents/:agent_id` - Remove an agent
/// - `POST /v1/allocations` - Reserve a port
/// - `GET /v1/allocations` - List allocations (`?agent_id=` filter)
/// - `GET /v1/allocations/:allocation_id` - Get an allocation
/// - `POST /v1/allocations/:allocation_id/release` - Release an allocation
/// - `GET /v1/ports/stats` - Port pool statistics
/// - `GET /v1/audit` - Audit log (`?limit=`)
///
/// ## Agent
/// - `POST /v1/agent/register` - Exchange invite secret for a token
/// - `POST /v1/agent/heartbeat` - Liveness and metrics (token)
/// - `GET /v1/agent/tasks` - Poll tasks (token)
/// - `POST /v1/agent/tasks/:task_id/report` - Report a task (token)
pub fn create_router<C, V>(state: GatewayState<C, V>) -> Router
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    // Extract config values before moving state
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = state.config.request_timeout();

    let state = Arc::new(state);

    Router::new()
        // Public
        .route("/health", get(health::health::<C, V>))
        .route("/v1/auth/register", post(auth::register::<C, V>))
        .route("/v1/auth/login", post(auth::login::<C, V>))
        // Agent registry (operator)
        .route("/v1/invites", post(agents::create_invite::<C, V>))
        .route("/v1/agents", get(agents::list_agents::<C, V>))
        .route(
            "/v1/agents/:agent_id",
            delete(agents::remove_agent::<C, V>),
        )
        // Allocations (operator)
        .route(
            "/v1/allocations",
            get(allocations::list_allocations::<C, V>)
                .post(allocations::create_allocation::<C, V>),
        )
        .route(
            "/v1/allocations/:allocation_id",
            get(allocations::get_allocation::<C, V>),
        )
        .route(
            "/v1/allocations/:allocation_id/release",
            post(allocations::release_allocation::<C, V>),
        )
        .route("/v1/ports/stats", get(allocations::port_stats::<C, V>))
        .route("/v1/audit", get(audit::list_audit::<C, V>))
        // Agent-facing
        .route("/v1/agent/register", post(agents::register::<C, V>))
        .route("/v1/agent/heartbeat", post(agents::heartbeat::<C, V>))
        .route("/v1/agent/tasks", get(tasks::poll::<C, V>))
        .route(
            "/v1/agent/tasks/:task_id/report",
            post(tasks::report::<C, V>),
        )
        // Middleware, outermost first
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(RequestBodyLimitLayer::new(max_body_bytes))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
