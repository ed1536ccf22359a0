//! Operator password hashing.
//!
//! Passwords are stored as Argon2id PHC strings
//! (`$argon2id$v=19$m=...,t=...,p=...$<salt>$<hash>`), so the parameters
//! travel with each hash and can be raised without a migration.

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use crate::error::{AuthError, Result};

/// Hash a password with a fresh random salt.
///
/// # Errors
///
/// Returns `AuthError::PasswordHash` if Argon2 rejects the input.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::PasswordHash(e.to_string()))
}

/// Verify a password against a stored PHC string.
///
/// # Errors
///
/// Returns `AuthError::MalformedHash` if the stored value is not a PHC string.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored).map_err(|_| AuthError::MalformedHash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_a_phc_string() {
        let stored = hash_password("correct horse").unwrap();
        let parsed = PasswordHash::new(&stored).unwrap();
        assert_eq!(parsed.algorithm.as_str(), "argon2id");
        assert!(parsed.salt.is_some());
    }

    #[test]
    fn verify_accepts_only_the_right_password() {
        let stored = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &stored).unwrap());
        assert!(!verify_password("battery staple", &stored).unwrap());
        assert_ne!(stored, hash_password("correct horse").unwrap());
    }

    #[test]
    fn fast_digest_is_not_a_password_hash() {
        let legacy = crate::hash_secret("pw");
        assert!(matches!(
            verify_password("pw", &legacy),
            Err(AuthError::MalformedHash)
        ));
    }
}
