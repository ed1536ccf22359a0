//! Secret hashing and agent token handling.
//!
//! Generated secrets (invite secrets and agent tokens) are stored as
//! `<salt_hex>$<blake3_hex>` where the digest covers the salt followed by the
//! secret. Raw secrets are only ever held in memory. Operator passwords are
//! chosen by people and go through [`crate::password`] instead.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use fleetport_core::AgentId;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};

use crate::error::{AuthError, Result};

const SALT_LEN: usize = 16;

/// Number of random bytes in a generated secret.
pub const SECRET_BYTES: usize = 32;

/// Generate a random URL-safe secret.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a random alphanumeric password of the given length.
#[must_use]
pub fn generate_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Hash a secret with a fresh random salt.
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = digest(&salt, secret);
    format!("{}${}", hex::encode(salt), digest.to_hex())
}

/// Verify a secret against a stored hash.
///
/// # Errors
///
/// Returns `AuthError::MalformedHash` if the stored value cannot be parsed.
pub fn verify_secret(secret: &str, stored: &str) -> Result<bool> {
    let (salt_hex, hash_hex) = stored.split_once('$').ok_or(AuthError::MalformedHash)?;
    let salt = hex::decode(salt_hex).map_err(|_| AuthError::MalformedHash)?;
    let expected = blake3::Hash::from_hex(hash_hex).map_err(|_| AuthError::MalformedHash)?;

    // blake3::Hash equality is constant-time
    Ok(digest(&salt, secret) == expected)
}

fn digest(salt: &[u8], secret: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize()
}

/// A composite agent credential: `<agent_id>:<raw_secret>`.
#[derive(Clone, PartialEq, Eq)]
pub struct AgentToken {
    /// The agent the token belongs to.
    pub agent_id: AgentId,
    /// The raw secret half, verified against the stored hash.
    pub secret: String,
}

impl AgentToken {
    /// Issue a fresh token for an agent.
    #[must_use]
    pub fn generate(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            secret: generate_secret(),
        }
    }
}

impl fmt::Display for AgentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.agent_id, self.secret)
    }
}

impl fmt::Debug for AgentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentToken")
            .field("agent_id", &self.agent_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl FromStr for AgentToken {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        let (id, secret) = s.split_once(':').ok_or(AuthError::MalformedAgentToken)?;
        if secret.is_empty() {
            return Err(AuthError::MalformedAgentToken);
        }
        let agent_id = id.parse().map_err(|_| AuthError::MalformedAgentToken)?;
        Ok(Self {
            agent_id,
            secret: secret.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let stored = hash_secret("hunter2");
        assert!(verify_secret("hunter2", &stored).unwrap());
        assert!(!verify_secret("hunter3", &stored).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        assert_ne!(hash_secret("same"), hash_secret("same"));
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(matches!(
            verify_secret("x", "no-separator"),
            Err(AuthError::MalformedHash)
        ));
        assert!(matches!(
            verify_secret("x", "zz$abcd"),
            Err(AuthError::MalformedHash)
        ));
    }

    #[test]
    fn generated_secrets_are_url_safe() {
        let secret = generate_secret();
        // 32 bytes, unpadded base64
        assert_eq!(secret.len(), 43);
        assert!(secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn generated_password_length() {
        let password = generate_password(24);
        assert_eq!(password.len(), 24);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn agent_token_format() {
        let token: AgentToken = "17:abc:def".parse().unwrap();
        assert_eq!(token.agent_id, AgentId::new(17));
        // Only the first colon separates the id
        assert_eq!(token.secret, "abc:def");
        assert_eq!(token.to_string(), "17:abc:def");

        let fresh = AgentToken::generate(AgentId::new(3));
        assert!(fresh.to_string().starts_with("3:"));
        assert!(!format!("{fresh:?}").contains(&fresh.secret));
    }

    #[test]
    fn agent_token_rejects_garbage() {
        for bad in ["", "nocolon", "x:secret", "5:"] {
            assert!(bad.parse::<AgentToken>().is_err(), "{bad} should fail");
        }
    }
}
