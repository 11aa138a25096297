//! Reconnect backoff helpers.
//!
//! The spec is silent on reconnect pacing beyond "open a new websocket"
//! (§4.5 `reconnect` effect); a small jittered exponential backoff is added
//! as an ambient robustness measure, matching the defensive reconnect
//! posture the reference transport already takes.

use std::time::Duration;

/// Calculate a backoff duration with exponential increase, capped at
/// `max_ms`.
///
/// `attempt` is 0-indexed (the first reconnect attempt passes `0`).
pub fn exponential_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay_ms.min(max_ms))
}

/// Add up to `jitter_factor` (0.0–1.0) proportional random jitter to a
/// duration, so that many shards backing off at once don't reconnect in
/// lockstep.
pub fn with_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    use rand::Rng;

    let jitter_range = (duration.as_millis() as f64 * jitter_factor) as u64;
    let jitter = rand::rng().random_range(0..=jitter_range.max(1));
    duration + Duration::from_millis(jitter)
}
