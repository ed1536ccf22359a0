//! Request extractors for the two kinds of callers.
//!
//! Operators present an HS256 JWT and agents present their composite
//! `<agent_id>:<secret>` token, both as `Authorization: Bearer <token>`.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

use fleetport_auth::{JwtValidator, ValidatedClaims};
use fleetport_control::{Agent, ControlPlane};
use fleetport_core::UserId;

use crate::error::ApiError;
use crate::state::GatewayState;

/// An operator authenticated by JWT.
#[derive(Debug, Clone)]
pub struct AdminUser {
    /// The operator's user ID.
    pub user_id: UserId,
    /// The operator's username.
    pub username: String,
    /// The operator's role.
    pub role: String,
}

impl AdminUser {
    /// Create an `AdminUser` from validated claims.
    #[must_use]
    pub fn from_claims(claims: ValidatedClaims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username,
            role: claims.role,
        }
    }
}

#[async_trait]
impl<C, V> FromRequestParts<Arc<GatewayState<C, V>>> for AdminUser
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState<C, V>>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        let claims = state.jwt_validator.validate(token).await?;

        Ok(Self::from_claims(claims))
    }
}

/// A registered agent authenticated by its agent token.
#[derive(Debug, Clone)]
pub struct AgentAuth(pub Agent);

#[async_trait]
impl<C, V> FromRequestParts<Arc<GatewayState<C, V>>> for AgentAuth
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState<C, V>>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        let agent = state.control.authenticate_agent(token).await?;

        Ok(Self(agent))
    }
}

/// The caller's address: first `X-Forwarded-For` hop, then `X-Real-IP`,
/// then the socket peer when the server was started with connect info.
#[derive(Debug, Clone, Default)]
pub struct ClientIp(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ip) = forwarded_ip(&parts.headers) {
            return Ok(Self(Some(ip)));
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Ok(Self(peer))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .or_else(|| header("x-real-ip"))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn admin_user_from_claims() {
        let claims = ValidatedClaims {
            user_id: UserId::new(7),
            username: "ops".to_string(),
            role: "user".to_string(),
            expires_at: Utc::now(),
        };

        let user = AdminUser::from_claims(claims);
        assert_eq!(user.user_id, UserId::new(7));
        assert_eq!(user.username, "ops");
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(
            bearer_token(&headers(&[("authorization", "Bearer abc")])),
            Some("abc")
        );
        assert_eq!(bearer_token(&headers(&[("authorization", "Basic abc")])), None);
        assert_eq!(bearer_token(&headers(&[("authorization", "Bearer ")])), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn forwarded_ip_prefers_first_hop() {
        assert_eq!(
            forwarded_ip(&headers(&[("x-forwarded-for", "203.0.113.5, 10.0.0.1")])).as_deref(),
            Some("203.0.113.5")
        );
        assert_eq!(
            forwarded_ip(&headers(&[("x-real-ip", "198.51.100.2")])).as_deref(),
            Some("198.51.100.2")
        );
        assert_eq!(forwarded_ip(&HeaderMap::new()), None);
    }
}
