//! Agent configuration.
//!
//! Every flag can also be supplied through its environment variable, which is
//! how the agent is normally deployed.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fleetport_core::TunnelEndpoint;

/// Runtime configuration for a fleetport agent.
#[derive(Parser, Debug, Clone)]
#[command(name = "fleetport-agent")]
#[command(author, version, about = "Fleetport agent runtime", long_about = None)]
pub struct AgentConfig {
    /// Name the invite was issued for.
    #[arg(long, env = "AGENT_NAME")]
    pub agent_name: String,

    /// Invite secret used for (re-)registration.
    #[arg(long, env = "AGENT_SECRET", hide_env_values = true)]
    pub agent_secret: String,

    /// Base URL of the control plane.
    #[arg(long, env = "API_BASE_URL", default_value = "http://127.0.0.1:8080")]
    pub api_base_url: String,

    /// Fallback tunnel server host when a start task carries none.
    #[arg(long, env = "TUNNEL_SERVER_ADDR")]
    pub tunnel_server_addr: Option<String>,

    /// Fallback tunnel server control port.
    #[arg(long, env = "TUNNEL_SERVER_PORT", default_value_t = 7000)]
    pub tunnel_server_port: u16,

    /// Fallback tunnel token.
    #[arg(long, env = "TUNNEL_TOKEN", hide_env_values = true)]
    pub tunnel_token: Option<String>,

    /// Address the workload listens on (`host:port`).
    #[arg(long, env = "WORKLOAD_BIND", default_value = "127.0.0.1:8080")]
    pub workload_bind: String,

    /// Workload executable.
    #[arg(long, env = "WORKLOAD_BIN", default_value = "code-server")]
    pub workload_bin: String,

    /// Tunnel client executable.
    #[arg(long, env = "TUNNEL_BIN", default_value = "frpc")]
    pub tunnel_bin: String,

    /// Seconds between heartbeats.
    #[arg(long, env = "HEARTBEAT_INTERVAL_SEC", default_value_t = 30)]
    pub heartbeat_interval_sec: u64,

    /// Seconds between task polls.
    #[arg(long, env = "POLL_INTERVAL_SEC", default_value_t = 5)]
    pub poll_interval_sec: u64,

    /// Grace period before a stopped process is killed.
    #[arg(long, env = "STOP_TIMEOUT_SEC", default_value_t = 5)]
    pub stop_timeout_sec: u64,

    /// Timeout for every control-plane request.
    #[arg(long, env = "REQUEST_TIMEOUT_SEC", default_value_t = 5)]
    pub request_timeout_sec: u64,

    /// Size at which a process log file is rotated.
    #[arg(long, env = "LOG_MAX_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub log_max_bytes: u64,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Directory for credentials, logs and generated tunnel config.
    #[arg(long, env = "WORK_DIR", default_value = "./runtime")]
    pub work_dir: PathBuf,
}

impl AgentConfig {
    /// Apply legacy environment names for settings that were not given explicitly.
    ///
    /// `FRP_SERVER_ADDR`, `FRP_SERVER_PORT` and `FRP_TOKEN` fill the tunnel
    /// settings, `CS_BIND` fills the workload bind address.
    #[must_use]
    pub fn resolve_aliases(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let explicit = |name: &str| lookup(name).is_some();

        if self.tunnel_server_addr.is_none() {
            self.tunnel_server_addr = lookup("FRP_SERVER_ADDR");
        }
        if self.tunnel_token.is_none() {
            self.tunnel_token = lookup("FRP_TOKEN");
        }
        if !explicit("TUNNEL_SERVER_PORT") {
            if let Some(port) = lookup("FRP_SERVER_PORT").and_then(|p| p.parse().ok()) {
                self.tunnel_server_port = port;
            }
        }
        if !explicit("WORKLOAD_BIND") {
            if let Some(bind) = lookup("CS_BIND") {
                self.workload_bind = bind;
            }
        }
        self
    }

    /// Tunnel endpoint from configuration, if a server address and token are set.
    #[must_use]
    pub fn tunnel_endpoint(&self) -> Option<TunnelEndpoint> {
        Some(TunnelEndpoint {
            server_addr: self.tunnel_server_addr.clone()?,
            server_port: self.tunnel_server_port,
            token: self.tunnel_token.clone()?,
        })
    }

    /// Path of the credentials file.
    #[must_use]
    pub fn credentials_path(&self) -> PathBuf {
        self.work_dir.join("credentials.json")
    }

    /// Directory holding process logs.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }

    /// Path of the generated tunnel configuration.
    #[must_use]
    pub fn tunnel_config_path(&self) -> PathBuf {
        self.work_dir.join("tunnel.ini")
    }

    /// Heartbeat interval.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_sec)
    }

    /// Task poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_sec)
    }

    /// Stop grace period.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_sec)
    }

    /// Control-plane request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(args: &[&str]) -> AgentConfig {
        let mut argv = vec!["fleetport-agent", "--agent-name", "agent_x", "--agent-secret", "s"];
        argv.extend_from_slice(args);
        AgentConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&[]);
        assert_eq!(config.tunnel_server_port, 7000);
        assert_eq!(config.workload_bind, "127.0.0.1:8080");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.log_max_bytes, 10 * 1024 * 1024);
        assert_eq!(
            config.credentials_path(),
            PathBuf::from("./runtime/credentials.json")
        );
        assert!(config.tunnel_endpoint().is_none());
    }

    #[test]
    fn legacy_names_fill_missing_settings() {
        let env: HashMap<&str, &str> = [
            ("FRP_SERVER_ADDR", "tunnel.example.com"),
            ("FRP_SERVER_PORT", "7100"),
            ("FRP_TOKEN", "tok"),
            ("CS_BIND", "127.0.0.1:9000"),
        ]
        .into_iter()
        .collect();

        let config =
            parse(&[]).resolve_aliases(|name| env.get(name).map(ToString::to_string));

        let endpoint = config.tunnel_endpoint().unwrap();
        assert_eq!(endpoint.server_addr, "tunnel.example.com");
        assert_eq!(endpoint.server_port, 7100);
        assert_eq!(endpoint.token, "tok");
        assert_eq!(config.workload_bind, "127.0.0.1:9000");
    }

    #[test]
    fn explicit_settings_win_over_legacy_names() {
        let env: HashMap<&str, &str> = [
            ("TUNNEL_SERVER_PORT", "7200"),
            ("FRP_SERVER_PORT", "7100"),
            ("FRP_SERVER_ADDR", "old.example.com"),
        ]
        .into_iter()
        .collect();

        let config = parse(&[
            "--tunnel-server-addr",
            "new.example.com",
            "--tunnel-server-port",
            "7200",
        ])
        .resolve_aliases(|name| env.get(name).map(ToString::to_string));

        assert_eq!(config.tunnel_server_addr.as_deref(), Some("new.example.com"));
        assert_eq!(config.tunnel_server_port, 7200);
    }
}
