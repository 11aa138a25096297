//! Gateway error types using thiserror, and close-code classification.
//!
//! All errors in this crate are represented by the [`GatewayError`] enum.
//! No `.unwrap()` calls are used outside of tests.

use thiserror::Error;

/// Errors that can occur during Gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// WebSocket connection or protocol error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Failed to parse a JSON payload.
    #[error("json decode error: {0}")]
    JsonDecode(String),

    /// Gateway discovery (C2) failed, or returned a body with no `url` field.
    #[error("gateway discovery failed: {0}")]
    Discovery(String),

    /// `run_bot` refused to start because `session_start_limit.remaining`
    /// would not cover the shard count (§4.7 step 1).
    #[error("session start limit exhausted: {remaining} remaining, {needed} needed")]
    SessionStartLimitExhausted {
        /// Remaining session starts reported by discovery.
        remaining: u32,
        /// Shard count this run would need to start.
        needed: u16,
    },

    /// A channel used to talk to a shard's runner or driver task was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// A piece of host-supplied configuration (e.g. an environment variable)
    /// was missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::JsonDecode(err.to_string())
    }
}

impl<T> From<flume::SendError<T>> for GatewayError {
    fn from(err: flume::SendError<T>) -> Self {
        GatewayError::ChannelClosed(err.to_string())
    }
}

/// Gateway close codes that invalidate the session (§3 "new-session
/// codes"): a shard that reconnects after one of these must re-identify
/// rather than resume.
pub const NEW_SESSION_CODES: &[u16] = &[4003, 4004, 4007, 4009];

/// Gateway close codes that, under `RunConfig::stop_on_fatal_code`, escalate
/// to a whole-bot stop instead of a per-shard reconnect (§3 "fatal codes").
pub const FATAL_CODES: &[u16] = &[4001, 4002, 4003, 4004, 4005, 4008, 4010];

/// The close code that directs the whole fleet to tear down and reconnect
/// with a new shard count (§3 "re-shard code").
pub const RESHARD_CODE: u16 = 4011;

/// Whether `code` is in the new-session set.
pub fn is_new_session_code(code: u16) -> bool {
    NEW_SESSION_CODES.contains(&code)
}

/// Whether `code` is in the fatal set.
pub fn is_fatal_code(code: u16) -> bool {
    FATAL_CODES.contains(&code)
}

/// Whether `code` is the re-shard directive.
pub fn is_reshard_code(code: u16) -> bool {
    code == RESHARD_CODE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_codes_classified() {
        for code in [4003, 4004, 4007, 4009] {
            assert!(is_new_session_code(code), "{code} should be new-session");
        }
        assert!(!is_new_session_code(1001));
        assert!(!is_new_session_code(4011));
    }

    #[test]
    fn fatal_codes_classified() {
        for code in [4001, 4002, 4003, 4004, 4005, 4008, 4010] {
            assert!(is_fatal_code(code), "{code} should be fatal");
        }
        assert!(!is_fatal_code(4011));
        assert!(!is_fatal_code(4009));
    }

    #[test]
    fn reshard_code_classified() {
        assert!(is_reshard_code(4011));
        assert!(!is_reshard_code(4010));
    }

    #[test]
    fn new_session_and_fatal_overlap_on_auth_codes() {
        // 4003/4004 are both new-session and fatal; step()'s tie-break
        // order (re-shard, then fatal, then reconnect) still applies, but
        // should_resume must independently reject them via new-session.
        for code in [4003, 4004] {
            assert!(is_new_session_code(code));
            assert!(is_fatal_code(code));
        }
    }
}
