//! Shard state machine (C4).
//!
//! `Shard` is the data record §3 describes; [`step`] is the pure
//! transition function §4.4 names. It performs no I/O, spawns no tasks,
//! sleeps never, and logs nothing — every decision it makes is returned
//! as data (an [`Effect`]) for [`crate::runner`] to carry out. This is the
//! one deliberate architectural departure from the reference crate, whose
//! `Shard::connect_and_run` makes these same decisions inline with the
//! socket I/O (see `DESIGN.md`).

use crate::error::{is_fatal_code, is_new_session_code, is_reshard_code};
use crate::payload::Payload;
use crate::ws::WsEvent;

/// A shard's persistent state (§3).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Shard {
    /// This shard's id, in `0..count`.
    pub id: u16,
    /// Total shard count for this bot.
    pub count: u16,
    /// Session id, set after a `READY` dispatch; cleared on invalid
    /// session or a new-session close code.
    pub session_id: Option<String>,
    /// Last observed dispatch sequence number. Monotonically
    /// non-decreasing except when cleared by invalid-session.
    pub seq: Option<u64>,
    /// True iff the last heartbeat sent has been acknowledged. Starts
    /// true.
    pub ack: bool,
    /// Latched once the server has invalidated the session, until the
    /// next successful reconnect clears it.
    pub invalid_session: bool,
    /// Close code from the most recent disconnect, if any.
    pub stop_code: Option<u16>,
    /// Close reason from the most recent disconnect, if any.
    pub disconnect_msg: Option<String>,
    /// Whether this shard currently has a live websocket handle. Used to
    /// distinguish a disconnect on a live shard from one that arrives
    /// after the shard is already considered dead.
    pub connected: bool,
}

impl Shard {
    /// Construct a fresh shard with `ack` defaulted to true, as §3
    /// requires.
    pub fn new(id: u16, count: u16) -> Self {
        Self {
            id,
            count,
            ack: true,
            ..Default::default()
        }
    }
}

/// An input fed into [`step`]: either a websocket lifecycle event or an
/// already-decoded payload (§4.4).
#[derive(Debug, Clone)]
pub enum Input {
    /// The websocket connected.
    Connect,
    /// A raw text message arrived; `step` decodes it and recurses.
    Message(String),
    /// A transport error occurred.
    TransportError(String),
    /// The websocket disconnected with a close code and reason.
    Disconnect(u16, String),
    /// An already-decoded payload (used internally when `Message`
    /// recurses, and directly by callers/tests that want to skip codec
    /// round-tripping).
    Decoded(Payload),
}

impl From<WsEvent> for Input {
    fn from(event: WsEvent) -> Self {
        match event {
            WsEvent::Connect => Input::Connect,
            WsEvent::Message(text) => Input::Message(text),
            WsEvent::Error(e) => Input::TransportError(e),
            WsEvent::Disconnect(code, msg) => Input::Disconnect(code, msg),
        }
    }
}

/// A declarative intent produced by [`step`] (§3). Shard-local effects are
/// carried out by the runner (§4.5); bot-level effects escalate to the
/// coordinator (§4.7).
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    // Shard-local.
    /// Send an identify frame.
    Identify,
    /// Send a resume frame.
    Resume,
    /// Start heartbeating at the given interval (milliseconds).
    StartHeartbeat { interval_ms: u64 },
    /// Send a heartbeat frame.
    SendHeartbeat,
    /// Abandon the current websocket and open a new one.
    Reconnect,
    /// Send an arbitrary frame (reserved for future outbound commands).
    SendFrame(String),
    /// Log-worthy error with no further action.
    Error(String),

    // Bot-level — escalated to the coordinator.
    /// The server has directed a full fleet re-shard.
    ReShard,
    /// An event was dispatched, opaque to this crate.
    DiscordEvent { kind: String, payload: serde_json::Value },
    /// The whole bot should stop (fatal close code, `stop_on_fatal_code`
    /// enabled).
    DisconnectBot,
}

/// Whether `shard` is in a state where reconnecting can resume the prior
/// session rather than re-identifying (§4.4).
pub fn should_resume(shard: &Shard) -> bool {
    match shard.stop_code {
        Some(code) if is_new_session_code(code) => false,
        Some(_) => shard.session_id.is_some() && shard.seq.is_some(),
        None => false,
    }
}

/// The pure transition function (§4.4). Given the shard's current state
/// and an input, returns the next state and the effects to carry out.
///
/// `stop_on_fatal_code` mirrors `RunConfig::stop_on_fatal_code` — it is
/// threaded in explicitly rather than read from ambient state (§9).
pub fn step(shard: Shard, input: Input, stop_on_fatal_code: bool) -> (Shard, Vec<Effect>) {
    match input {
        Input::Connect => {
            let mut next = shard.clone();
            next.connected = true;
            if should_resume(&shard) {
                (next, vec![Effect::Resume])
            } else {
                (next, vec![Effect::Identify])
            }
        }

        Input::Disconnect(code, msg) => {
            if !shard.connected {
                // Disconnect on an already-dead shard: no-op (§4.4).
                return (shard, vec![]);
            }
            let mut next = shard;
            next.connected = false;
            next.stop_code = Some(code);
            next.disconnect_msg = Some(msg);

            let effects = if is_reshard_code(code) {
                vec![Effect::ReShard]
            } else if is_fatal_code(code) && stop_on_fatal_code {
                vec![Effect::DisconnectBot]
            } else {
                vec![Effect::Reconnect]
            };
            (next, effects)
        }

        Input::TransportError(e) => (shard, vec![Effect::Error(e)]),

        Input::Message(text) => match crate::payload::decode(&text) {
            Ok(Some(payload)) => step(shard, Input::Decoded(payload), stop_on_fatal_code),
            Ok(None) => (shard, vec![]),
            Err(e) => (shard, vec![Effect::Error(e.to_string())]),
        },

        Input::Decoded(Payload::Hello {
            heartbeat_interval_ms,
        }) => (
            shard,
            vec![Effect::StartHeartbeat {
                interval_ms: heartbeat_interval_ms,
            }],
        ),

        Input::Decoded(Payload::Heartbeat) => (shard, vec![Effect::SendHeartbeat]),

        Input::Decoded(Payload::HeartbeatAck) => {
            let mut next = shard;
            next.ack = true;
            (next, vec![])
        }

        Input::Decoded(Payload::Reconnect) => (shard, vec![Effect::Reconnect]),

        Input::Decoded(Payload::InvalidSession { .. }) => {
            let mut next = shard;
            next.session_id = None;
            next.seq = None;
            next.invalid_session = true;
            (next, vec![Effect::Reconnect])
        }

        Input::Decoded(Payload::EventDispatch { t, s, d }) => {
            let mut next = shard;
            next.seq = Some(s);
            if t == "READY" {
                if let Some(session_id) = d.get("session_id").and_then(|v| v.as_str()) {
                    next.session_id = Some(session_id.to_string());
                }
            }
            (
                next,
                vec![Effect::DiscordEvent {
                    kind: t,
                    payload: d,
                }],
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(id: u16, count: u16) -> Shard {
        Shard::new(id, count)
    }

    // Scenario 1: happy identify (§8).
    #[test]
    fn happy_identify_sequence() {
        let shard = fresh(0, 1);

        let (shard, effects) = step(shard, Input::Connect, false);
        assert_eq!(effects, vec![Effect::Identify]);

        let (shard, effects) = step(
            shard,
            Input::Message(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#.to_string()),
            false,
        );
        assert_eq!(
            effects,
            vec![Effect::StartHeartbeat {
                interval_ms: 41250
            }]
        );

        let (shard, effects) = step(
            shard,
            Input::Message(
                r#"{"op":0,"t":"READY","s":1,"d":{"session_id":"s1"}}"#.to_string(),
            ),
            false,
        );
        assert_eq!(shard.seq, Some(1));
        assert_eq!(shard.session_id.as_deref(), Some("s1"));
        match &effects[..] {
            [Effect::DiscordEvent { kind, .. }] => assert_eq!(kind, "READY"),
            other => panic!("unexpected effects: {other:?}"),
        }
    }

    // Scenario 3: resume eligibility (§8).
    #[test]
    fn resume_eligible_after_non_new_session_close_with_prior_session() {
        let mut shard = fresh(0, 1);
        shard.session_id = Some("s1".to_string());
        shard.seq = Some(42);
        shard.stop_code = Some(1001);

        assert!(should_resume(&shard));

        let (_, effects) = step(shard, Input::Connect, false);
        assert_eq!(effects, vec![Effect::Resume]);
    }

    #[test]
    fn should_resume_false_for_new_session_codes() {
        for code in [4003u16, 4004, 4007, 4009] {
            let mut shard = fresh(0, 1);
            shard.session_id = Some("s1".to_string());
            shard.seq = Some(1);
            shard.stop_code = Some(code);
            assert!(!should_resume(&shard), "code {code} should block resume");
        }
    }

    #[test]
    fn should_resume_false_without_prior_session_or_seq() {
        let mut shard = fresh(0, 1);
        shard.stop_code = Some(1001);
        assert!(!should_resume(&shard));

        shard.session_id = Some("s1".to_string());
        assert!(!should_resume(&shard)); // seq still missing
    }

    // Scenario 4: invalid session (§8).
    #[test]
    fn invalid_session_clears_session_and_seq_then_blocks_resume() {
        let mut shard = fresh(0, 1);
        shard.session_id = Some("s1".to_string());
        shard.seq = Some(10);

        let (shard, effects) = step(
            shard,
            Input::Message(r#"{"op":9,"d":false}"#.to_string()),
            false,
        );
        assert!(shard.session_id.is_none());
        assert!(shard.seq.is_none());
        assert!(shard.invalid_session);
        assert_eq!(effects, vec![Effect::Reconnect]);

        // Next connect must identify, not resume.
        let (_, effects) = step(shard, Input::Connect, false);
        assert_eq!(effects, vec![Effect::Identify]);
    }

    // Scenario 5: re-shard (§8).
    #[test]
    fn reshard_close_code_emits_reshard_effect() {
        let mut shard = fresh(0, 1);
        shard.connected = true;

        let (shard, effects) = step(shard, Input::Disconnect(4011, String::new()), false);
        assert_eq!(effects, vec![Effect::ReShard]);
        assert_eq!(shard.stop_code, Some(4011));
    }

    // Scenario 6: fatal with stop-on-fatal (§8).
    #[test]
    fn fatal_close_code_with_stop_on_fatal_escalates_disconnect_bot() {
        let mut shard = fresh(0, 1);
        shard.connected = true;

        let (_, effects) = step(
            shard,
            Input::Disconnect(4004, "Authentication failed".to_string()),
            true,
        );
        assert_eq!(effects, vec![Effect::DisconnectBot]);
    }

    #[test]
    fn fatal_close_code_without_stop_on_fatal_reconnects() {
        let mut shard = fresh(0, 1);
        shard.connected = true;

        let (_, effects) = step(shard, Input::Disconnect(4004, "nope".to_string()), false);
        assert_eq!(effects, vec![Effect::Reconnect]);
    }

    #[test]
    fn reshard_wins_over_fatal_when_code_is_in_both_sets_is_impossible_but_tie_break_order_holds() {
        // 4011 is re-shard only; confirm the tie-break order directly by
        // checking a code that is fatal-only behaves as fatal.
        let mut shard = fresh(0, 1);
        shard.connected = true;
        let (_, effects) = step(shard, Input::Disconnect(4001, String::new()), true);
        assert_eq!(effects, vec![Effect::DisconnectBot]);
    }

    #[test]
    fn disconnect_on_already_dead_shard_is_a_noop() {
        let shard = fresh(0, 1); // connected: false
        let (next, effects) = step(shard.clone(), Input::Disconnect(1000, String::new()), false);
        assert_eq!(next, shard);
        assert!(effects.is_empty());
    }

    #[test]
    fn transport_error_is_reported_without_state_change() {
        let shard = fresh(0, 1);
        let (next, effects) = step(shard.clone(), Input::TransportError("boom".into()), false);
        assert_eq!(next, shard);
        assert_eq!(effects, vec![Effect::Error("boom".to_string())]);
    }

    #[test]
    fn heartbeat_ack_sets_ack_true() {
        let mut shard = fresh(0, 1);
        shard.ack = false;
        let (next, effects) = step(shard, Input::Decoded(Payload::HeartbeatAck), false);
        assert!(next.ack);
        assert!(effects.is_empty());
    }

    #[test]
    fn server_heartbeat_request_sends_heartbeat_effect() {
        let shard = fresh(0, 1);
        let (_, effects) = step(shard, Input::Decoded(Payload::Heartbeat), false);
        assert_eq!(effects, vec![Effect::SendHeartbeat]);
    }

    #[test]
    fn step_is_pure_same_input_same_output() {
        let mut shard = fresh(3, 8);
        shard.seq = Some(5);
        let input = Input::Decoded(Payload::EventDispatch {
            t: "MESSAGE_CREATE".to_string(),
            s: 6,
            d: serde_json::json!({"content": "hi"}),
        });

        let (a_shard, a_effects) = step(shard.clone(), input.clone(), false);
        let (b_shard, b_effects) = step(shard, input, false);
        assert_eq!(a_shard, b_shard);
        assert_eq!(a_effects, b_effects);
    }

    #[test]
    fn seq_only_advances_via_dispatch_and_resets_on_invalid_session() {
        let mut shard = fresh(0, 1);
        let (shard, _) = step(
            shard.clone(),
            Input::Decoded(Payload::EventDispatch {
                t: "A".into(),
                s: 1,
                d: serde_json::Value::Null,
            }),
            false,
        );
        assert_eq!(shard.seq, Some(1));

        let (shard, _) = step(
            shard,
            Input::Decoded(Payload::EventDispatch {
                t: "B".into(),
                s: 2,
                d: serde_json::Value::Null,
            }),
            false,
        );
        assert_eq!(shard.seq, Some(2));

        let (shard, _) = step(shard, Input::Decoded(Payload::InvalidSession { d: false }), false);
        assert_eq!(shard.seq, None);
    }
}
