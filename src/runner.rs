//! Shard runner (C5).
//!
//! Owns one [`Shard`]'s handles and drives its event loop: multiplexes
//! websocket events, heartbeat ticks, and host control messages, applying
//! the effects [`crate::shard::step`] produces. Grounded on the reference
//! crate's `Shard::connect_and_run` (`tokio::select!` over stream/heartbeat/
//! commands), but restructured so protocol decisions live in `step` and this
//! module only ever performs the I/O `step` asked for (see `DESIGN.md`).
//!
//! Where the abstract spec describes the runner as yielding a
//! `{shard, effects}` result after every iteration for the coordinator to
//! re-enter, this implementation instead runs as a single long-lived task
//! per shard that forwards bot-level effects over a channel — the
//! observable behavior is the same, but it fits a `tokio` task better than a
//! generator loop driven step-by-step from outside.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::backoff;
use crate::config::RunConfig;
use crate::error::GatewayError;
use crate::heartbeat::{self, HeartbeatHandle};
use crate::payload;
use crate::shard::{self, Effect, Input, Shard};
use crate::ws::{self, WsEvent, WsHandle};

/// A command sent to a shard's runner, from the host or the coordinator's
/// startup stagger (§3 `control_inbox`).
#[derive(Debug, Clone)]
pub enum ControlCommand {
    /// Open (or reopen) the websocket connection.
    Connect,
    // Other commands (arbitrary outbound frames, e.g. presence updates) are
    // reserved for future use (§4.5) — this crate does not interpret
    // dispatch-adjacent outbound traffic beyond identify/resume/heartbeat.
}

/// A bot-level effect escalated out of a shard's runner to the fleet
/// coordinator (§3, §4.7).
#[derive(Debug, Clone)]
pub enum BotEffect {
    /// The server has directed a full fleet re-shard.
    ReShard,
    /// An event was dispatched; opaque to this crate (§1 Non-goals).
    DiscordEvent {
        /// Server-provided event type name.
        kind: String,
        /// Opaque event body.
        payload: serde_json::Value,
    },
    /// The whole bot should stop (fatal close code, `stop_on_fatal_code`
    /// enabled).
    DisconnectBot,
}

/// A handle the coordinator uses to drive one shard's runner task.
pub struct ShardHandle {
    /// Sender half of this shard's control inbox.
    pub control_tx: flume::Sender<ControlCommand>,
    stop_tx: Option<oneshot::Sender<()>>,
    /// The runner task itself, awaited during shutdown/re-shard drains.
    pub task: tokio::task::JoinHandle<()>,
}

impl ShardHandle {
    /// Signal this shard's runner to stop (§4.5 item 1, §5 cancellation).
    /// Idempotent — a second call is a no-op, since the sender is only
    /// available for the first one.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Spawn a shard runner task for `shard`. Bot-level effects are forwarded on
/// `bot_tx`, tagged with the shard id, for the coordinator to apply.
pub fn spawn(
    shard: Shard,
    token: Arc<str>,
    gateway_url: Arc<str>,
    config: Arc<RunConfig>,
    bot_tx: flume::Sender<(u16, BotEffect)>,
) -> ShardHandle {
    let (control_tx, control_rx) = flume::unbounded();
    let (stop_tx, stop_rx) = oneshot::channel();

    let task = tokio::spawn(run(
        shard,
        token,
        gateway_url,
        config,
        control_rx,
        stop_rx,
        bot_tx,
    ));

    ShardHandle {
        control_tx,
        stop_tx: Some(stop_tx),
        task,
    }
}

struct RunnerState {
    shard: Shard,
    token: Arc<str>,
    gateway_url: Arc<str>,
    config: Arc<RunConfig>,
    ws: Option<Arc<WsHandle>>,
    event_rx: Option<mpsc::UnboundedReceiver<WsEvent>>,
    heartbeat: Option<HeartbeatHandle>,
    hello_deadline: Option<Instant>,
    reconnect_attempt: u32,
}

async fn run(
    shard: Shard,
    token: Arc<str>,
    gateway_url: Arc<str>,
    config: Arc<RunConfig>,
    control_rx: flume::Receiver<ControlCommand>,
    mut stop_rx: oneshot::Receiver<()>,
    bot_tx: flume::Sender<(u16, BotEffect)>,
) {
    let shard_id = shard.id;
    let mut state = RunnerState {
        shard,
        token,
        gateway_url,
        config,
        ws: None,
        event_rx: None,
        heartbeat: None,
        hello_deadline: None,
        reconnect_attempt: 0,
    };

    loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => {
                info!(shard_id, "stop signal received, shutting down shard runner");
                break;
            }

            command = control_rx.recv_async() => {
                match command {
                    Ok(ControlCommand::Connect) => {
                        if let Err(e) = handle_connect(&mut state).await {
                            error!(shard_id, error = %e, "failed to open websocket");
                        }
                    }
                    Err(_) => {
                        debug!(shard_id, "control inbox closed");
                    }
                }
            }

            fired = recv_heartbeat_tick(&state.heartbeat) => {
                if fired {
                    handle_heartbeat_tick(&mut state, &bot_tx).await;
                }
            }

            event = recv_ws_event(&mut state.event_rx) => {
                if let Some(event) = event {
                    handle_ws_event(&mut state, event, &bot_tx).await;
                }
            }

            timed_out = recv_hello_timeout(&state.hello_deadline) => {
                if timed_out {
                    handle_hello_timeout(&mut state).await;
                }
            }
        }
    }

    // Exit path: close subordinate channels and the websocket in every
    // direction (§4.5 item 1, §5 cancellation).
    if let Some(hb) = state.heartbeat.take() {
        hb.stop();
    }
    if let Some(ws) = state.ws.take() {
        ws.close().await;
    }
}

async fn recv_heartbeat_tick(heartbeat: &Option<HeartbeatHandle>) -> bool {
    match heartbeat {
        Some(hb) => hb.ticks.recv_async().await.is_ok(),
        None => std::future::pending().await,
    }
}

async fn recv_ws_event(event_rx: &mut Option<mpsc::UnboundedReceiver<WsEvent>>) -> Option<WsEvent> {
    match event_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_hello_timeout(deadline: &Option<Instant>) -> bool {
    match deadline {
        Some(instant) => {
            tokio::time::sleep_until(*instant).await;
            true
        }
        None => std::future::pending().await,
    }
}

/// Open a fresh websocket and install its event inbox, replacing whichever
/// one was previously current. The invariant that exactly one websocket
/// handle is live per shard (§3) holds because the caller always either
/// just closed the prior handle or never had one.
async fn open_new_websocket(state: &mut RunnerState) -> Result<(), GatewayError> {
    let url = ws::build_url(&state.gateway_url)?;
    let (handle, rx) = ws::connect(&url, state.config.max_frame_bytes).await?;
    state.ws = Some(handle);
    state.event_rx = Some(rx);
    state.hello_deadline = Some(Instant::now() + state.config.hello_timeout);
    Ok(())
}

/// `control_inbox`'s `connect` command (§4.5 item 2): close the prior
/// heartbeat, open a new websocket and event inbox. The identify/resume
/// decision happens later, when this websocket's own `connect` lifecycle
/// event reaches the `event_inbox` branch and is fed through `step`.
async fn handle_connect(state: &mut RunnerState) -> Result<(), GatewayError> {
    if let Some(hb) = state.heartbeat.take() {
        hb.stop();
    }
    open_new_websocket(state).await
}

/// A websocket connected but never sent `hello` within the configured
/// timeout (§5 ambient robustness addition). Treated the same as any other
/// transient failure: abandon it and try again.
async fn handle_hello_timeout(state: &mut RunnerState) {
    let shard_id = state.shard.id;
    warn!(shard_id, "no hello received within timeout, reconnecting");
    if let Some(ws) = state.ws.take() {
        ws.close().await;
    }
    state.event_rx = None;
    if let Err(e) = open_new_websocket(state).await {
        error!(shard_id, error = %e, "failed to reopen websocket after hello timeout");
    }
}

/// `heartbeat_tick` branch (§4.5 item 3). Takes `_bot_tx` only to keep the
/// same shape as the other branch handlers — zombie reconnects never
/// escalate a bot-level effect.
async fn handle_heartbeat_tick(state: &mut RunnerState, _bot_tx: &flume::Sender<(u16, BotEffect)>) {
    let shard_id = state.shard.id;

    if state.shard.ack {
        let Some(ws) = state.ws.clone() else { return };
        let frame = payload::encode_heartbeat(state.shard.seq);
        match ws.send_text(frame).await {
            Ok(()) => {
                state.shard.ack = false;
                trace!(shard_id, "heartbeat sent");
            }
            Err(e) => {
                warn!(shard_id, error = %e, "failed to send heartbeat frame");
            }
        }
        return;
    }

    // Zombie: the previous heartbeat was never acknowledged.
    warn!(shard_id, "heartbeat not acknowledged, treating connection as zombie");
    if let Some(ws) = state.ws.take() {
        ws.close().await;
    }
    if let Some(hb) = state.heartbeat.take() {
        hb.stop();
    }
    state.event_rx = None;
    if let Err(e) = open_new_websocket(state).await {
        error!(shard_id, error = %e, "failed to reconnect after zombie detection");
    }
}

/// `event_inbox` branch (§4.5 item 4): feed the event through `step`, then
/// apply every resulting effect.
async fn handle_ws_event(
    state: &mut RunnerState,
    event: WsEvent,
    bot_tx: &flume::Sender<(u16, BotEffect)>,
) {
    let is_disconnect = matches!(event, WsEvent::Disconnect(_, _));
    let input: Input = event.into();

    let current = std::mem::take(&mut state.shard);
    let (next, effects) = shard::step(current, input, state.config.stop_on_fatal_code);
    state.shard = next;

    if is_disconnect {
        // The websocket is gone; the heartbeat-liveness invariant (§3) says
        // the heartbeat channel must die with it.
        if let Some(hb) = state.heartbeat.take() {
            hb.stop();
        }
        state.event_rx = None;
        state.ws = None;
        state.hello_deadline = None;
    }

    for effect in effects {
        apply_effect(state, effect, bot_tx).await;
    }
}

/// The shard-effect handler (§4.5): effects from `step` that require I/O.
async fn apply_effect(state: &mut RunnerState, effect: Effect, bot_tx: &flume::Sender<(u16, BotEffect)>) {
    let shard_id = state.shard.id;

    match effect {
        Effect::Identify => {
            let Some(ws) = state.ws.clone() else { return };
            match payload::encode_identify(&state.token, state.shard.id, state.shard.count) {
                Ok(frame) => {
                    if let Err(e) = ws.send_text(frame).await {
                        warn!(shard_id, error = %e, "failed to send identify frame");
                    }
                }
                Err(e) => error!(shard_id, error = %e, "failed to encode identify frame"),
            }
        }

        Effect::Resume => {
            // Resolved ambiguity (see DESIGN.md): the spec's literal wording
            // has this effect open yet another replacement websocket, but
            // that websocket's own `connect` event would feed back into
            // `step` and, since `stop_code`/`session_id`/`seq` are
            // unchanged, immediately produce another `Resume` — an infinite
            // loop of sockets that never completes a handshake. Sending the
            // resume frame on the socket whose `connect` event we are
            // already handling keeps the same observable contract (resume
            // frame carries the prior session/seq) without the loop.
            let Some(ws) = state.ws.clone() else { return };
            let (Some(session_id), Some(seq)) = (state.shard.session_id.clone(), state.shard.seq)
            else {
                warn!(shard_id, "resume effect fired without session_id/seq, this is a bug");
                return;
            };
            match payload::encode_resume(&state.token, &session_id, seq) {
                Ok(frame) => {
                    if let Err(e) = ws.send_text(frame).await {
                        warn!(shard_id, error = %e, "failed to send resume frame");
                    }
                }
                Err(e) => error!(shard_id, error = %e, "failed to encode resume frame"),
            }
        }

        Effect::StartHeartbeat { interval_ms } => {
            if let Some(hb) = state.heartbeat.take() {
                hb.stop();
            }
            state.heartbeat = Some(heartbeat::start(Duration::from_millis(interval_ms)));
            state.shard.ack = true;
            state.hello_deadline = None;
            info!(shard_id, interval_ms, "heartbeat started");
        }

        Effect::SendHeartbeat => {
            if let Some(hb) = &state.heartbeat {
                hb.request_tick();
            }
        }

        Effect::Reconnect => reconnect(state).await,

        Effect::SendFrame(text) => {
            let Some(ws) = state.ws.clone() else { return };
            if let Err(e) = ws.send_text(text).await {
                warn!(shard_id, error = %e, "failed to send frame");
            }
        }

        Effect::Error(e) => {
            warn!(shard_id, error = %e, "shard reported a transport error");
        }

        Effect::ReShard => {
            let _ = bot_tx.send_async((shard_id, BotEffect::ReShard)).await;
        }

        Effect::DiscordEvent { kind, payload } => {
            let _ = bot_tx
                .send_async((shard_id, BotEffect::DiscordEvent { kind, payload }))
                .await;
        }

        Effect::DisconnectBot => {
            let _ = bot_tx.send_async((shard_id, BotEffect::DisconnectBot)).await;
        }
    }
}

/// `reconnect` effect (§4.5): open a new websocket after a jittered
/// exponential backoff; `seq`/`session_id` are left untouched (already
/// cleared upstream if an invalid-session led here).
async fn reconnect(state: &mut RunnerState) {
    let shard_id = state.shard.id;

    // The old heartbeat ticker must not survive into the new connection —
    // `heartbeat_tick` is only live between `hello` and the next disconnect
    // (§3). `reconnect` fires for payload `reconnect`/`invalid_session` too,
    // which arrive as `WsEvent::Message`, not `Disconnect`, so this cleanup
    // can't rely on `handle_ws_event`'s disconnect branch.
    if let Some(hb) = state.heartbeat.take() {
        hb.stop();
    }

    let delay = backoff::with_jitter(
        backoff::exponential_backoff(
            state.reconnect_attempt,
            state.config.reconnect_base_ms,
            state.config.reconnect_max_ms,
        ),
        0.25,
    );
    state.reconnect_attempt = state.reconnect_attempt.saturating_add(1);
    debug!(shard_id, backoff_ms = delay.as_millis(), "backing off before reconnect");
    tokio::time::sleep(delay).await;

    state.shard.invalid_session = false;
    state.shard.stop_code = None;
    state.shard.disconnect_msg = None;

    match open_new_websocket(state).await {
        Ok(()) => state.reconnect_attempt = 0,
        Err(e) => error!(shard_id, error = %e, "reconnect attempt failed"),
    }
}
