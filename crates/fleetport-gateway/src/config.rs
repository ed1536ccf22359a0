//! Gateway configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the HTTP surface.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Listen address (e.g., "0.0.0.0:8080").
    #[serde(default = "GatewayConfig::default_listen_addr")]
    pub listen_addr: String,

    /// Allowed CORS origins.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    #[serde(default = "GatewayConfig::default_max_body")]
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    #[serde(default = "GatewayConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl GatewayConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    const fn default_max_body() -> usize {
        64 * 1024
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    /// Load from the environment over the defaults.
    ///
    /// `CORS_ORIGINS` is a comma separated list.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        if let Ok(val) = std::env::var("CORS_ORIGINS") {
            config.cors_origins = val
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(val) = std::env::var("MAX_BODY_BYTES") {
            if let Ok(n) = val.parse() {
                config.max_body_bytes = n;
            }
        }
        if let Ok(val) = std::env::var("REQUEST_TIMEOUT_SEC") {
            if let Ok(n) = val.parse() {
                config.request_timeout_seconds = n;
            }
        }

        config
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            cors_origins: vec!["*".to_string()],
            max_body_bytes: Self::default_max_body(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.cors_origins, vec!["*"]);
        assert_eq!(config.max_body_bytes, 64 * 1024);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn deserialize_with_defaults() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"listen_addr":"127.0.0.1:9000"}"#).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert!(config.cors_origins.is_empty());
        assert_eq!(config.request_timeout_seconds, 30);
    }
}
