//! Authentication for fleetport.
//!
//! This crate covers both credential families used by the control plane:
//!
//! - **Operators** log in with a password and present an HS256 JWT on every
//!   administrative request ([`HmacJwt`], [`JwtValidator`]).
//! - **Agents** register with a one-time invite secret and then present a
//!   composite `<agent_id>:<secret>` token ([`AgentToken`]).
//!
//! Secrets of both kinds are persisted only as salted hashes
//! ([`hash_secret`], [`verify_secret`]).
//!
//! # Example
//!
//! ```
//! use fleetport_auth::{hash_secret, verify_secret, AgentToken};
//! use fleetport_core::AgentId;
//!
//! let token = AgentToken::generate(AgentId::new(1));
//! let stored = hash_secret(&token.secret);
//!
//! let presented: AgentToken = token.to_string().parse().unwrap();
//! assert!(verify_secret(&presented.secret, &stored).unwrap());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod credentials;
pub mod error;
pub mod jwt;
pub mod password;

pub use credentials::{
    generate_password, generate_secret, hash_secret, verify_secret, AgentToken,
};
pub use error::{AuthError, Result};
pub use jwt::{HmacJwt, JwtValidator, ValidatedClaims};
pub use password::{hash_password, verify_password};

#[cfg(any(test, feature = "test-utils"))]
pub use jwt::MockJwtValidator;

/// Configuration for operator token issuance.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HS256 signing secret.
    pub jwt_secret: String,
    /// Expected and issued `iss` claim.
    pub issuer: String,
    /// Lifetime of issued tokens, in seconds.
    pub token_ttl_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
            issuer: "fleetport".to_string(),
            token_ttl_seconds: 12 * 3600,
        }
    }
}
