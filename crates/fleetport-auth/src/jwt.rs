//! Operator JWT issuance and validation.
//!
//! Operators log in with a username and password and receive an HS256 token
//! signed with the control plane's shared secret.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetport_core::UserId;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};
use crate::AuthConfig;

/// Validated claims extracted from an operator JWT.
#[derive(Debug, Clone)]
pub struct ValidatedClaims {
    /// The operator's user ID (`sub` claim).
    pub user_id: UserId,
    /// The operator's username.
    pub username: String,
    /// The operator's role.
    pub role: String,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

/// Trait for validating operator JWTs.
#[async_trait]
pub trait JwtValidator: Send + Sync {
    /// Validate a JWT and extract claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is invalid, expired, or cannot be validated.
    async fn validate(&self, token: &str) -> Result<ValidatedClaims>;
}

#[derive(Debug, Serialize, Deserialize)]
struct RawClaims {
    iss: String,
    sub: String,
    name: String,
    #[serde(default = "default_role")]
    role: String,
    exp: u64,
    iat: u64,
}

fn default_role() -> String {
    "user".to_string()
}

/// HS256 token issuer and validator sharing one secret.
pub struct HmacJwt {
    config: AuthConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl HmacJwt {
    /// Create an issuer/validator from configuration.
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        let encoding = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        Self {
            config,
            encoding,
            decoding,
        }
    }

    /// Issue a token for an operator.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if signing fails.
    pub fn issue(&self, user_id: UserId, username: &str, role: &str) -> Result<String> {
        let now = Utc::now().timestamp().unsigned_abs();
        let claims = RawClaims {
            iss: self.config.issuer.clone(),
            sub: user_id.to_string(),
            name: username.to_string(),
            role: role.to_string(),
            exp: now + self.config.token_ttl_seconds,
            iat: now,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(e.to_string()))
    }
}

#[async_trait]
impl JwtValidator for HmacJwt {
    async fn validate(&self, token: &str) -> Result<ValidatedClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.validate_exp = true;

        let token_data =
            decode::<RawClaims>(token, &self.decoding, &validation).map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;

        let claims = token_data.claims;
        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| AuthError::InvalidUserId)?;

        let exp_secs = i64::try_from(claims.exp).unwrap_or(i64::MAX);
        let expires_at = DateTime::from_timestamp(exp_secs, 0)
            .ok_or_else(|| AuthError::InvalidToken("invalid exp timestamp".to_string()))?;

        Ok(ValidatedClaims {
            user_id,
            username: claims.name,
            role: claims.role,
            expires_at,
        })
    }
}

/// A mock JWT validator for testing.
///
/// This validator accepts any token in the format `test-token:<user_id>:<username>`.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MockJwtValidator;

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl JwtValidator for MockJwtValidator {
    async fn validate(&self, token: &str) -> Result<ValidatedClaims> {
        let rest = token.strip_prefix("test-token:").ok_or_else(|| {
            AuthError::InvalidToken("expected test-token:<user_id>:<username>".to_string())
        })?;

        let (id, username) = rest.split_once(':').ok_or_else(|| {
            AuthError::InvalidToken("expected test-token:<user_id>:<username>".to_string())
        })?;

        let user_id = id.parse::<UserId>().map_err(|_| AuthError::InvalidUserId)?;

        Ok(ValidatedClaims {
            user_id,
            username: username.to_string(),
            role: default_role(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            ..AuthConfig::default()
        }
    }

    #[tokio::test]
    async fn issued_token_validates() {
        let jwt = HmacJwt::new(config());
        let token = jwt.issue(UserId::new(9), "ops", "user").unwrap();

        let claims = jwt.validate(&token).await.unwrap();
        assert_eq!(claims.user_id, UserId::new(9));
        assert_eq!(claims.username, "ops");
        assert_eq!(claims.role, "user");
        assert!(claims.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let token = HmacJwt::new(config())
            .issue(UserId::new(1), "ops", "user")
            .unwrap();

        let other = HmacJwt::new(AuthConfig {
            jwt_secret: "different".to_string(),
            ..AuthConfig::default()
        });
        assert!(matches!(
            other.validate(&token).await,
            Err(AuthError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let jwt = HmacJwt::new(config());
        let past = Utc::now().timestamp().unsigned_abs() - 3600;
        let claims = RawClaims {
            iss: jwt.config.issuer.clone(),
            sub: "1".to_string(),
            name: "ops".to_string(),
            role: "user".to_string(),
            exp: past,
            iat: past - 60,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &jwt.encoding).unwrap();

        assert!(matches!(
            jwt.validate(&token).await,
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let jwt = HmacJwt::new(config());
        assert!(matches!(
            jwt.validate("not.a.jwt").await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn mock_validator_works() {
        let claims = MockJwtValidator
            .validate("test-token:5:alice")
            .await
            .unwrap();
        assert_eq!(claims.user_id, UserId::new(5));
        assert_eq!(claims.username, "alice");
    }

    #[tokio::test]
    async fn mock_validator_rejects_invalid() {
        assert!(MockJwtValidator.validate("invalid-token").await.is_err());
        assert!(MockJwtValidator
            .validate("test-token:not-a-number:alice")
            .await
            .is_err());
    }
}
