//! Configuration and response types for control plane operations.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleetport_auth::AuthConfig;
use fleetport_core::{AgentId, TunnelEndpoint, UserId};
use fleetport_store::AgentStatus;
use serde::{Deserialize, Serialize};

/// What to do when the port-allocation lock cannot be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Fail the allocation with `LockUnavailable`.
    #[default]
    Strict,
    /// Log a warning and allocate without mutual exclusion.
    BestEffort,
}

impl FromStr for LockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "best_effort" | "best-effort" => Ok(Self::BestEffort),
            other => Err(format!("unknown lock mode: {other}")),
        }
    }
}

/// Configuration for the control plane service.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Lowest allocatable port (inclusive).
    pub port_min: u16,
    /// Highest allocatable port (inclusive).
    pub port_max: u16,
    /// Random picks tried before falling back to a linear scan.
    pub port_random_attempts: u32,
    /// How long to wait for the port lock (milliseconds).
    pub port_lock_timeout_ms: u64,
    /// Behaviour when the port lock is unavailable.
    pub lock_mode: LockMode,
    /// Seconds without a heartbeat before an agent counts as offline.
    pub heartbeat_timeout_seconds: u64,
    /// Interval of the background offline sweep (seconds).
    pub offline_sweep_interval_seconds: u64,
    /// Length of generated workload passwords.
    pub workload_password_length: usize,
    /// Public host used to render allocation access URLs.
    pub public_host: Option<String>,
    /// Tunnel server details forwarded to agents in start tasks.
    pub tunnel: Option<TunnelEndpoint>,
    /// Operator token settings.
    pub auth: AuthConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            port_min: 50000,
            port_max: 60000,
            port_random_attempts: 10,
            port_lock_timeout_ms: 5000,
            lock_mode: LockMode::Strict,
            heartbeat_timeout_seconds: 90,
            offline_sweep_interval_seconds: 30,
            workload_password_length: 24,
            public_host: None,
            tunnel: None,
            auth: AuthConfig::default(),
        }
    }
}

impl ControlConfig {
    /// Load configuration from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PORT_MIN") {
            if let Ok(n) = val.parse() {
                config.port_min = n;
            }
        }
        if let Ok(val) = std::env::var("PORT_MAX") {
            if let Ok(n) = val.parse() {
                config.port_max = n;
            }
        }
        if let Ok(val) = std::env::var("PORT_RANDOM_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                config.port_random_attempts = n;
            }
        }
        if let Ok(val) = std::env::var("PORT_LOCK_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                config.port_lock_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("PORT_LOCK_MODE") {
            match val.parse() {
                Ok(mode) => config.lock_mode = mode,
                Err(e) => tracing::warn!(error = %e, "Ignoring PORT_LOCK_MODE"),
            }
        }
        if let Ok(val) = std::env::var("HEARTBEAT_TIMEOUT_SEC") {
            if let Ok(n) = val.parse() {
                config.heartbeat_timeout_seconds = n;
            }
        }
        if let Ok(val) = std::env::var("OFFLINE_SWEEP_INTERVAL_SEC") {
            if let Ok(n) = val.parse() {
                config.offline_sweep_interval_seconds = n;
            }
        }
        if let Ok(val) = std::env::var("WORKLOAD_PASSWORD_LENGTH") {
            if let Ok(n) = val.parse() {
                config.workload_password_length = n;
            }
        }
        if let Ok(val) = std::env::var("PUBLIC_HOST") {
            if !val.is_empty() {
                config.public_host = Some(val);
            }
        }
        if let Ok(server_addr) = std::env::var("TUNNEL_SERVER_ADDR") {
            let server_port = std::env::var("TUNNEL_SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7000);
            let token = std::env::var("TUNNEL_TOKEN").unwrap_or_default();
            config.tunnel = Some(TunnelEndpoint {
                server_addr,
                server_port,
                token,
            });
        }
        if let Ok(val) = std::env::var("JWT_SECRET") {
            config.auth.jwt_secret = val;
        }
        if let Ok(val) = std::env::var("JWT_ISSUER") {
            config.auth.issuer = val;
        }
        if let Ok(val) = std::env::var("TOKEN_TTL_SECONDS") {
            if let Ok(n) = val.parse() {
                config.auth.token_ttl_seconds = n;
            }
        }

        config
    }

    /// Port lock timeout as a `Duration`.
    #[must_use]
    pub const fn port_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.port_lock_timeout_ms)
    }

    /// Heartbeat timeout as a `chrono::Duration`.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.heartbeat_timeout_seconds).unwrap_or(i64::MAX))
    }
}

/// A freshly created invite. The secret is only ever returned here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    /// The invited agent's name.
    pub name: String,
    /// One-time registration secret.
    pub secret: String,
}

/// Agent listing entry with effective liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    /// Agent identifier.
    pub id: AgentId,
    /// Agent name.
    pub name: String,
    /// `online` only if a heartbeat arrived within the timeout.
    pub status: AgentStatus,
    /// Last registration or heartbeat.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Last reported IP.
    pub ip: Option<String>,
    /// Last reported CPU percentage.
    pub cpu: Option<f32>,
    /// Last reported memory percentage.
    pub mem: Option<f32>,
}

/// Port pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStats {
    /// Lowest allocatable port.
    pub min: u16,
    /// Highest allocatable port.
    pub max: u16,
    /// Ports currently held by non-terminal allocations.
    pub allocated_count: usize,
}

/// An operator token issued by a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    /// The signed JWT.
    pub access_token: String,
    /// Always `bearer`.
    pub token_type: String,
    /// Token lifetime in seconds.
    pub expires_in: u64,
    /// The operator's ID.
    pub user_id: UserId,
    /// The operator's username.
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ControlConfig::default();
        assert_eq!(config.port_min, 50000);
        assert_eq!(config.port_max, 60000);
        assert_eq!(config.port_random_attempts, 10);
        assert_eq!(config.lock_mode, LockMode::Strict);
        assert_eq!(config.port_lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.heartbeat_timeout(), chrono::Duration::seconds(90));
    }

    #[test]
    fn lock_mode_parsing() {
        assert_eq!("strict".parse::<LockMode>().unwrap(), LockMode::Strict);
        assert_eq!(
            "best_effort".parse::<LockMode>().unwrap(),
            LockMode::BestEffort
        );
        assert_eq!(
            "Best-Effort".parse::<LockMode>().unwrap(),
            LockMode::BestEffort
        );
        assert!("yolo".parse::<LockMode>().is_err());
    }
}
