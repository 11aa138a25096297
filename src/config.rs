//! Host-facing run configuration (§6 "Configuration").
//!
//! A single explicit struct threaded through [`crate::run_bot`]; there is no
//! ambient mutable global (§9 "Dynamic configuration via process-wide
//! mutable binding"). Grounded on the reference crate's `ShardConfig` /
//! `ClusterConfig`, trimmed to the knobs this spec actually names plus the
//! ambient ones §6 adds (max frame size, hello timeout, reconnect backoff).

use std::time::Duration;

use crate::error::GatewayError;

/// Configuration for [`crate::run_bot`].
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Whether a fatal close code (§3) escalates to [`crate::BotEffect::DisconnectBot`]
    /// instead of a per-shard reconnect.
    ///
    /// When `false` (the default), a fatal code such as 4004 (authentication
    /// failed) is treated as transient and the shard keeps reconnecting —
    /// this is the documented policy (§7 item 4) even though it can loop
    /// forever on a bad token. Set this `true` to fail fast instead.
    pub stop_on_fatal_code: bool,

    /// Maximum text/binary frame size accepted from the gateway (§4.1, §6).
    pub max_frame_bytes: usize,

    /// How long to wait for `hello` after a websocket connects before
    /// giving up and reconnecting (§5). The abstract spec has no
    /// application-level read timeouts; this one exists solely to avoid
    /// wedging a shard that never receives a handshake.
    pub hello_timeout: Duration,

    /// Base delay for reconnect backoff (§4.5).
    pub reconnect_base_ms: u64,

    /// Cap for reconnect backoff (§4.5).
    pub reconnect_max_ms: u64,

    /// Gateway discovery endpoint (C2). Defaults to the platform's
    /// `/gateway/bot` REST route.
    pub discovery_url: String,

    /// Override the websocket URL returned by discovery. Used by tests and
    /// non-standard deployments (e.g. a local gateway mock); discovery is
    /// still consulted for `shard_count` unless [`RunConfig::shard_count_override`]
    /// is also set.
    pub gateway_url_override: Option<String>,

    /// Override the shard count discovery would otherwise recommend. When
    /// both this and [`RunConfig::gateway_url_override`] are set, discovery
    /// is skipped entirely.
    pub shard_count_override: Option<u16>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stop_on_fatal_code: false,
            max_frame_bytes: crate::ws::DEFAULT_MAX_FRAME_BYTES,
            hello_timeout: Duration::from_secs(10),
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 60_000,
            discovery_url: crate::DEFAULT_DISCOVERY_URL.to_string(),
            gateway_url_override: None,
            shard_count_override: None,
        }
    }
}

/// Read the bot token from environment variable `name`. Mirrors the
/// reference crate's example binaries, but — unlike an ambient global — it
/// is never called implicitly; host binaries opt in explicitly (§6).
pub fn token_from_env(name: &str) -> Result<String, GatewayError> {
    std::env::var(name)
        .map_err(|_| GatewayError::MissingConfig(format!("environment variable {name} not set")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = RunConfig::default();
        assert!(!config.stop_on_fatal_code);
        assert_eq!(config.max_frame_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn token_from_env_reports_missing_config_not_panic() {
        let result = token_from_env("GATEFLEET_TEST_TOKEN_DOES_NOT_EXIST");
        assert!(matches!(result, Err(GatewayError::MissingConfig(_))));
    }

    #[test]
    fn token_from_env_reads_set_variable() {
        std::env::set_var("GATEFLEET_TEST_TOKEN", "abc123");
        assert_eq!(token_from_env("GATEFLEET_TEST_TOKEN").unwrap(), "abc123");
        std::env::remove_var("GATEFLEET_TEST_TOKEN");
    }
}
