//! Configuration types for the lecture session engine.

use serde::{Deserialize, Serialize};

/// Main configuration for the session engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the control plane (e.g. "https://api.example.com").
    pub api_base_url: String,

    /// Optional bearer token sent to the control plane.
    pub auth_token: Option<String>,

    /// Gateway WebSocket URL override. When `None`, the URL from the
    /// bootstrap response is used.
    pub gateway_url: Option<String>,

    /// STUN server URLs.
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional).
    pub turn_servers: Vec<TurnServerConfig>,

    /// Roster poll interval in milliseconds (default: 3000ms).
    pub roster_poll_interval_ms: u64,

    /// Gateway keepalive interval in milliseconds (default: 25000ms;
    /// the gateway reaps sessions idle for 60s).
    pub keepalive_interval_ms: u64,

    /// Timeout for a single gateway request/reply exchange (default: 10s).
    pub gateway_request_timeout_ms: u64,

    /// Control-plane HTTP timeout in seconds (default: 30s).
    pub http_timeout_secs: u64,
}

/// TURN server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://).
    pub url: String,

    /// Username for TURN authentication.
    pub username: String,

    /// Credential for TURN authentication.
    pub credential: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            auth_token: None,
            gateway_url: None,
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            roster_poll_interval_ms: 3_000,
            keepalive_interval_ms: 25_000,
            gateway_request_timeout_ms: 10_000,
            http_timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Configuration pointing at a control plane, defaults elsewhere.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_keep_keepalive_under_gateway_reap_window() {
        let config = EngineConfig::default();
        assert!(config.keepalive_interval_ms < 60_000);
        assert!(!config.stun_servers.is_empty());
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = EngineConfig::new("https://api.example.com");
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.api_base_url, "https://api.example.com");
        assert_eq!(back.roster_poll_interval_ms, 3_000);
    }
}
