//! Operator accounts.

use chrono::Utc;
use fleetport_auth::{hash_password, verify_password, HmacJwt};
use fleetport_core::UserId;
use fleetport_store::{Sequence, Store, StoreError, User};

use crate::error::{ControlError, Result};
use crate::registry::validate_name;
use crate::types::IssuedToken;

/// Role given to self-registered operators.
pub const DEFAULT_ROLE: &str = "user";

/// Create an operator account.
///
/// # Errors
///
/// Returns `ControlError::InvalidRequest` for a bad username or empty password,
/// `ControlError::DuplicateName` if the username is taken, or a storage error.
pub fn register_user<S: Store>(store: &S, username: &str, password: &str) -> Result<User> {
    validate_name(username)?;
    if password.is_empty() {
        return Err(ControlError::InvalidRequest(
            "password must not be empty".to_string(),
        ));
    }

    let user = User {
        user_id: UserId::new(store.next_id(Sequence::User)?),
        username: username.to_string(),
        password_hash: hash_password(password)?,
        role: DEFAULT_ROLE.to_string(),
        created_at: Utc::now(),
    };

    store.insert_user(&user).map_err(|e| match e {
        StoreError::Conflict(_) => ControlError::DuplicateName(username.to_string()),
        other => other.into(),
    })?;

    Ok(user)
}

/// Verify an operator's password and issue a token.
///
/// # Errors
///
/// Returns `ControlError::AuthenticationFailure` for an unknown user or wrong
/// password, or an auth/storage error.
pub fn login<S: Store>(
    store: &S,
    jwt: &HmacJwt,
    ttl_seconds: u64,
    username: &str,
    password: &str,
) -> Result<IssuedToken> {
    let user = store
        .get_user_by_name(username)?
        .ok_or(ControlError::AuthenticationFailure)?;

    if !verify_password(password, &user.password_hash)? {
        return Err(ControlError::AuthenticationFailure);
    }

    let access_token = jwt.issue(user.user_id, &user.username, &user.role)?;

    Ok(IssuedToken {
        access_token,
        token_type: "bearer".to_string(),
        expires_in: ttl_seconds,
        user_id: user.user_id,
        username: user.username,
    })
}
