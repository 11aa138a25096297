//! Gateway discovery (C2).
//!
//! A one-shot HTTPS GET against the platform's gateway metadata endpoint.
//! Grounded on the reference crate's `titanium-http::HttpClient::get_gateway_bot`,
//! reimplemented directly against `reqwest` since the rest of that crate's
//! REST surface (ratelimiting, resource endpoints) is out of scope here.

use crate::error::GatewayError;
use serde::Deserialize;

/// Session start limit reported by discovery.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStartLimit {
    /// Sessions remaining in the current window.
    pub remaining: u32,
    /// Total sessions allowed per window.
    #[serde(default)]
    pub total: u32,
    /// Milliseconds until the window resets.
    #[serde(default)]
    pub reset_after: u64,
}

/// Gateway metadata returned by discovery (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayInfo {
    /// Gateway websocket URL.
    pub url: String,
    /// Recommended shard count.
    #[serde(rename = "shards")]
    pub shard_count: u16,
    /// Session start limit.
    pub session_start_limit: SessionStartLimit,
}

/// Fetch gateway metadata from `discovery_url`, authenticating with
/// `token`. No retries at this layer (§4.2) — the caller (C7) decides
/// whether and how to retry.
pub async fn fetch_gateway(discovery_url: &str, token: &str) -> Result<GatewayInfo, GatewayError> {
    let client = reqwest::Client::new();

    let response = client
        .get(discovery_url)
        .header("Authorization", token)
        .send()
        .await
        .map_err(|e| GatewayError::Discovery(e.to_string()))?;

    if !response.status().is_success() {
        return Err(GatewayError::Discovery(format!(
            "unexpected status {}",
            response.status()
        )));
    }

    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| GatewayError::Discovery(e.to_string()))?;

    if body.get("url").is_none() {
        return Err(GatewayError::Discovery(
            "response body has no url field".to_string(),
        ));
    }

    serde_json::from_value(body).map_err(|e| GatewayError::Discovery(e.to_string()))
}
