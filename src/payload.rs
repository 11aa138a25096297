//! Gateway payload codec (C3).
//!
//! These are pure functions mapping between the wire JSON frames (§6) and
//! the tagged [`Payload`] variant (§3). Dispatch event bodies are kept
//! opaque (`serde_json::Value`) and forwarded untouched — interpreting
//! dispatch types is explicitly out of scope (§1 Non-goals).

use crate::opcode::{OpCode, KNOWN_RECEIVE_OPS};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A decoded gateway payload, keyed by op code (§3).
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Op 0 — an event was dispatched.
    EventDispatch {
        /// Server-provided event type name (`t`).
        t: String,
        /// Sequence number (`s`), used to track resume position.
        s: u64,
        /// Opaque event body (`d`), forwarded to the consumer untouched.
        d: serde_json::Value,
    },
    /// Op 1 — a heartbeat request (either direction).
    Heartbeat,
    /// Op 7 — the server requests a reconnect.
    Reconnect,
    /// Op 9 — the session has been invalidated.
    InvalidSession {
        /// Whether the session can be resumed (`d`).
        d: bool,
    },
    /// Op 10 — sent immediately after connecting.
    Hello {
        /// Heartbeat interval, in milliseconds.
        heartbeat_interval_ms: u64,
    },
    /// Op 11 — acknowledgment of a heartbeat.
    HeartbeatAck,
}

/// A raw frame shape used only to read the `op` discriminant and defer
/// parsing of the rest.
#[derive(Debug, Deserialize)]
struct RawFrame<'a> {
    op: u8,
    #[serde(borrow, default)]
    d: Option<&'a serde_json::value::RawValue>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelloBody {
    heartbeat_interval: u64,
}

/// Decode a text frame into a [`Payload`].
///
/// Unknown op codes are logged at `warn` and treated as "no payload" by
/// the caller (§7 item 7) — this function signals that case with `Ok(None)`
/// rather than an error, since a malformed-but-parseable frame is not a
/// codec failure.
pub fn decode(text: &str) -> Result<Option<Payload>, crate::error::GatewayError> {
    let raw: RawFrame = serde_json::from_str(text)?;

    if !KNOWN_RECEIVE_OPS.contains(&raw.op) {
        warn!(op = raw.op, "ignoring unknown gateway op code");
        return Ok(None);
    }

    let payload = match raw.op {
        0 => {
            let (Some(t), Some(s), Some(d)) = (raw.t, raw.s, raw.d) else {
                warn!("dispatch frame missing t/s/d, discarding");
                return Ok(None);
            };
            let d: serde_json::Value = serde_json::from_str(d.get())?;
            Payload::EventDispatch { t, s, d }
        }
        1 => Payload::Heartbeat,
        7 => Payload::Reconnect,
        9 => {
            let resumable = raw.d.map(|d| d.get() == "true").unwrap_or(false);
            Payload::InvalidSession { d: resumable }
        }
        10 => {
            let Some(d) = raw.d else {
                warn!("hello frame missing d, discarding");
                return Ok(None);
            };
            let hello: HelloBody = serde_json::from_str(d.get())?;
            Payload::Hello {
                heartbeat_interval_ms: hello.heartbeat_interval,
            }
        }
        11 => Payload::HeartbeatAck,
        _ => unreachable!("filtered by KNOWN_RECEIVE_OPS above"),
    };

    Ok(Some(payload))
}

/// Encode a heartbeat frame (op 1). `seq` is the last observed sequence
/// number, or `None` if no dispatch has been seen yet.
pub fn encode_heartbeat(seq: Option<u64>) -> String {
    match seq {
        Some(seq) => format!(r#"{{"op":{},"d":{}}}"#, OpCode::Heartbeat as u8, seq),
        None => format!(r#"{{"op":{},"d":null}}"#, OpCode::Heartbeat as u8),
    }
}

#[derive(Serialize)]
struct ConnectionProperties {
    #[serde(rename = "$os")]
    os: &'static str,
    #[serde(rename = "$browser")]
    browser: &'static str,
    #[serde(rename = "$device")]
    device: &'static str,
}

/// Library name used for both the `$browser` and `$device` identify
/// properties, per §4.3 ("product name twice").
const LIBRARY_NAME: &str = "gatefleet";

#[derive(Serialize)]
struct IdentifyData<'a> {
    token: &'a str,
    properties: ConnectionProperties,
    compress: bool,
    large_threshold: u8,
    shard: [u16; 2],
}

#[derive(Serialize)]
struct IdentifyFrame<'a> {
    op: u8,
    d: IdentifyData<'a>,
}

/// Encode an identify frame (op 2). Carries no `intents` field — intent
/// negotiation beyond what this frame carries is out of scope (§1).
pub fn encode_identify(
    token: &str,
    shard_id: u16,
    shard_count: u16,
) -> Result<String, crate::error::GatewayError> {
    let frame = IdentifyFrame {
        op: OpCode::Identify as u8,
        d: IdentifyData {
            token,
            properties: ConnectionProperties {
                os: std::env::consts::OS,
                browser: LIBRARY_NAME,
                device: LIBRARY_NAME,
            },
            compress: false,
            large_threshold: 50,
            shard: [shard_id, shard_count],
        },
    };
    Ok(serde_json::to_string(&frame)?)
}

#[derive(Serialize)]
struct ResumeData<'a> {
    token: &'a str,
    session_id: &'a str,
    seq: u64,
}

#[derive(Serialize)]
struct ResumeFrame<'a> {
    op: u8,
    d: ResumeData<'a>,
}

/// Encode a resume frame (op 6).
pub fn encode_resume(
    token: &str,
    session_id: &str,
    seq: u64,
) -> Result<String, crate::error::GatewayError> {
    let frame = ResumeFrame {
        op: OpCode::Resume as u8,
        d: ResumeData {
            token,
            session_id,
            seq,
        },
    };
    Ok(serde_json::to_string(&frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_hello() {
        let text = r#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
        let payload = decode(text).unwrap().unwrap();
        assert_eq!(
            payload,
            Payload::Hello {
                heartbeat_interval_ms: 41250
            }
        );
    }

    #[test]
    fn decodes_dispatch() {
        let text = r#"{"op":0,"t":"READY","s":1,"d":{"session_id":"s1"}}"#;
        let payload = decode(text).unwrap().unwrap();
        match payload {
            Payload::EventDispatch { t, s, d } => {
                assert_eq!(t, "READY");
                assert_eq!(s, 1);
                assert_eq!(d["session_id"], "s1");
            }
            other => panic!("expected EventDispatch, got {other:?}"),
        }
    }

    #[test]
    fn decodes_heartbeat_ack() {
        let payload = decode(r#"{"op":11}"#).unwrap().unwrap();
        assert_eq!(payload, Payload::HeartbeatAck);
    }

    #[test]
    fn decodes_invalid_session_true() {
        let payload = decode(r#"{"op":9,"d":true}"#).unwrap().unwrap();
        assert_eq!(payload, Payload::InvalidSession { d: true });
    }

    #[test]
    fn decodes_invalid_session_false() {
        let payload = decode(r#"{"op":9,"d":false}"#).unwrap().unwrap();
        assert_eq!(payload, Payload::InvalidSession { d: false });
    }

    #[test]
    fn decodes_reconnect() {
        assert_eq!(decode(r#"{"op":7}"#).unwrap().unwrap(), Payload::Reconnect);
    }

    #[test]
    fn unknown_op_is_ignored_not_errored() {
        let result = decode(r#"{"op":99,"d":null}"#).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(decode("not json").is_err());
    }

    #[test]
    fn heartbeat_encode_round_trips_through_decode() {
        let frame = encode_heartbeat(Some(42));
        assert_eq!(frame, r#"{"op":1,"d":42}"#);
        assert_eq!(decode(&frame).unwrap().unwrap(), Payload::Heartbeat);

        let frame_null = encode_heartbeat(None);
        assert_eq!(frame_null, r#"{"op":1,"d":null}"#);
        assert_eq!(decode(&frame_null).unwrap().unwrap(), Payload::Heartbeat);
    }

    #[test]
    fn identify_frame_has_no_intents_field() {
        let json = encode_identify("tok", 0, 1).unwrap();
        assert!(json.contains("\"token\":\"tok\""));
        assert!(json.contains("\"shard\":[0,1]"));
        assert!(json.contains("\"large_threshold\":50"));
        assert!(json.contains("\"compress\":false"));
        assert!(!json.contains("intents"));
        assert!(json.contains("\"$browser\":\"gatefleet\""));
        assert!(json.contains("\"$device\":\"gatefleet\""));
    }

    #[test]
    fn resume_frame_carries_session_and_seq() {
        let json = encode_resume("tok", "sess-1", 42).unwrap();
        assert!(json.contains("\"session_id\":\"sess-1\""));
        assert!(json.contains("\"seq\":42"));
    }
}
