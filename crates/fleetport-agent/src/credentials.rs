//! Local credential cache.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fleetport_core::AgentId;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Credentials obtained from the last successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Agent identifier assigned by the control plane.
    pub agent_id: AgentId,
    /// Composite bearer token.
    pub agent_token: String,
    /// When the credentials were written.
    pub ts: DateTime<Utc>,
}

/// JSON file holding the agent's [`Credentials`].
#[derive(Debug, Clone)]
pub struct CredentialCache {
    path: PathBuf,
}

impl CredentialCache {
    /// Create a cache backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load cached credentials.
    ///
    /// A missing or unreadable file yields `None`.
    #[must_use]
    pub fn load(&self) -> Option<Credentials> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read credentials");
                return None;
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(creds) => Some(creds),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring corrupt credentials file");
                None
            }
        }
    }

    /// Persist credentials, creating the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Credentials` if the file cannot be written.
    pub fn save(&self, agent_id: AgentId, agent_token: &str) -> Result<Credentials> {
        let creds = Credentials {
            agent_id,
            agent_token: agent_token.to_string(),
            ts: Utc::now(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::Credentials(format!("{}: {e}", parent.display())))?;
        }
        let body = serde_json::to_vec_pretty(&creds)
            .map_err(|e| AgentError::Credentials(e.to_string()))?;
        std::fs::write(&self.path, body)
            .map_err(|e| AgentError::Credentials(format!("{}: {e}", self.path.display())))?;

        Ok(creds)
    }
}
