//! Operator account endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use fleetport_auth::JwtValidator;
use fleetport_control::ControlPlane;
use fleetport_core::UserId;

use crate::error::ApiError;
use crate::state::GatewayState;

/// Username and password, for both registration and login.
#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
    /// Login name.
    pub username: String,
    /// Plain password.
    pub password: String,
}

/// Response for a newly created operator.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    /// Operator ID.
    pub user_id: UserId,
    /// Login name.
    pub username: String,
}

/// Create an operator account.
///
/// # Errors
///
/// Returns an error if the username is invalid or already taken.
pub async fn register<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    Json(body): Json<CredentialsBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let user = state
        .control
        .register_user(&body.username, &body.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            user_id: user.user_id,
            username: user.username,
        }),
    ))
}

/// Exchange operator credentials for a JWT.
///
/// # Errors
///
/// Returns `401` on bad credentials.
pub async fn login<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    Json(body): Json<CredentialsBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let issued = state.control.login(&body.username, &body.password).await?;

    Ok(Json(issued))
}
