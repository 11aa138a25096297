//! Fleet coordinator (C7).
//!
//! `run_bot` is the host-facing entry point: it discovers the gateway,
//! constructs `shard_count` shard runners, staggers their startup, and
//! relays bot-level effects to the consumer until a terminal condition
//! (host-requested shutdown, re-shard, or a fatal close code) ends the run.
//! Grounded on the reference crate's `Cluster` (spawning/owning shard tasks,
//! forwarding events tagged by shard id), but restructured to react to each
//! shard's bot-level effects as they stream out rather than fire-and-forget
//! (§4.7 needs to see `re_shard`/`disconnect_bot` to orchestrate drains).

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::discovery;
use crate::error::GatewayError;
use crate::runner::{self, BotEffect, ShardHandle};
use crate::shard::Shard;

/// How long to wait between each shard's initial `connect`, matching the
/// platform's identify rate limit of one per 5 s per bot (§4.7 step 3).
const IDENTIFY_STAGGER: Duration = Duration::from_millis(5_000);

/// A command the host sends to request orderly shutdown (§3, §6
/// `control_inbox`). `run_bot`'s per-shard `connect` commands are internal;
/// this is the only inbox exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// Request an orderly shutdown of the whole fleet.
    Disconnect,
}

/// Why [`run_bot`] returned (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The host requested a normal shutdown.
    Normal,
    /// The server directed a re-shard; the caller is expected to restart
    /// `run_bot` (possibly with a new shard count from discovery).
    Reshard,
    /// A fatal close code was hit with `stop_on_fatal_code` enabled.
    Fatal,
}

/// Whether `remaining` session starts cover starting `shard_count` shards
/// (§4.7 step 1). Preserves the spec's stated `<=` lockout threshold rather
/// than a looser `<` (§9 resolved open question): exactly `remaining ==
/// shard_count` still refuses to start.
fn session_start_limit_ok(remaining: u32, shard_count: u16) -> bool {
    remaining > shard_count as u32
}

/// Run the bot: discover the gateway, connect `shard_count` shards, and
/// forward their dispatched events to `output_sink` until a terminal
/// condition is reached.
///
/// `host_control` lets the caller request an orderly shutdown by sending
/// [`HostCommand::Disconnect`]; it is never consulted for anything else.
pub async fn run_bot(
    output_sink: flume::Sender<(String, serde_json::Value)>,
    token: impl Into<String>,
    config: RunConfig,
    host_control: flume::Receiver<HostCommand>,
) -> Result<ExitReason, GatewayError> {
    let token = token.into();
    let config = Arc::new(config);

    let (gateway_url, shard_count) = resolve_gateway(&token, &config).await?;
    let gateway_url: Arc<str> = Arc::from(gateway_url.as_str());
    let token: Arc<str> = Arc::from(token.as_str());

    info!(shard_count, %gateway_url, "starting fleet");

    let (bot_tx, bot_rx) = flume::unbounded::<(u16, BotEffect)>();

    let mut handles: Vec<ShardHandle> = (0..shard_count)
        .map(|id| {
            let shard = Shard::new(id, shard_count);
            runner::spawn(
                shard,
                token.clone(),
                gateway_url.clone(),
                config.clone(),
                bot_tx.clone(),
            )
        })
        .collect();
    drop(bot_tx);

    for (i, handle) in handles.iter().enumerate() {
        let control_tx = handle.control_tx.clone();
        let delay = IDENTIFY_STAGGER * i as u32;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = control_tx.send_async(runner::ControlCommand::Connect).await;
        });
    }

    let mut host_control = Some(host_control);

    loop {
        tokio::select! {
            msg = bot_rx.recv_async() => {
                match msg {
                    Ok((shard_id, BotEffect::DiscordEvent { kind, payload })) => {
                        let _ = output_sink.send_async((kind, payload)).await;
                        let _ = shard_id;
                    }
                    Ok((shard_id, BotEffect::ReShard)) => {
                        info!(shard_id, "re-shard directive received, draining fleet");
                        shutdown_all(&mut handles).await;
                        return Ok(ExitReason::Reshard);
                    }
                    Ok((shard_id, BotEffect::DisconnectBot)) => {
                        error!(shard_id, "fatal close code received with stop_on_fatal_code enabled");
                        shutdown_all(&mut handles).await;
                        return Ok(ExitReason::Fatal);
                    }
                    Err(_) => {
                        warn!("all shard runners exited without a terminal bot-level effect");
                        return Ok(ExitReason::Normal);
                    }
                }
            }

            cmd = recv_host_command(&host_control) => {
                match cmd {
                    Some(HostCommand::Disconnect) => {
                        info!("host requested shutdown");
                        shutdown_all(&mut handles).await;
                        return Ok(ExitReason::Normal);
                    }
                    None => {
                        // The host dropped its sender; there will never be
                        // a disconnect request, so stop polling this branch.
                        host_control = None;
                    }
                }
            }
        }
    }
}

async fn recv_host_command(host_control: &Option<flume::Receiver<HostCommand>>) -> Option<HostCommand> {
    match host_control {
        Some(rx) => rx.recv_async().await.ok(),
        None => std::future::pending().await,
    }
}

async fn resolve_gateway(token: &str, config: &RunConfig) -> Result<(String, u16), GatewayError> {
    if let (Some(url), Some(count)) = (&config.gateway_url_override, config.shard_count_override) {
        return Ok((url.clone(), count));
    }

    let info = discovery::fetch_gateway(&config.discovery_url, token).await?;

    if !session_start_limit_ok(info.session_start_limit.remaining, info.shard_count) {
        return Err(GatewayError::SessionStartLimitExhausted {
            remaining: info.session_start_limit.remaining,
            needed: info.shard_count,
        });
    }

    let url = config.gateway_url_override.clone().unwrap_or(info.url);
    Ok((url, info.shard_count))
}

/// Signal every shard to stop, then wait for every runner task to exit.
///
/// Used both for a host-requested shutdown and for the re-shard drain: the
/// spec's re-shard drain counts at most two further results per shard (the
/// event that produced `re_shard`, then a subsequent `disconnect`), but a
/// shard whose socket was already gone would only ever produce one —
/// relying on stop signals instead (§9 resolved open question) sidesteps
/// that race entirely.
async fn shutdown_all(handles: &mut [ShardHandle]) {
    for handle in handles.iter_mut() {
        handle.stop();
    }
    for handle in handles.iter_mut() {
        let _ = (&mut handle.task).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_start_limit_rejects_when_remaining_equals_shard_count() {
        assert!(!session_start_limit_ok(4, 4));
    }

    #[test]
    fn session_start_limit_accepts_when_remaining_exceeds_shard_count() {
        assert!(session_start_limit_ok(5, 4));
    }

    #[test]
    fn session_start_limit_rejects_when_remaining_is_lower() {
        assert!(!session_start_limit_ok(2, 4));
    }

    #[tokio::test]
    async fn resolve_gateway_skips_discovery_when_fully_overridden() {
        let config = RunConfig {
            gateway_url_override: Some("wss://mock.invalid".to_string()),
            shard_count_override: Some(3),
            ..RunConfig::default()
        };
        let (url, count) = resolve_gateway("token", &config).await.unwrap();
        assert_eq!(url, "wss://mock.invalid");
        assert_eq!(count, 3);
    }
}
