//! gatefleet - a client runtime for a cloud chat platform's real-time gateway.
//!
//! This crate implements the shard-level state machine and fleet-level
//! coordination needed to run one or more websocket shards against a
//! Discord-shaped gateway protocol: discovery (C2), the wire codec (C3), a
//! pure per-shard state machine (C4), the impure runner that drives it
//! (C5), a heartbeat engine (C6), and the fleet coordinator that owns a
//! bot's whole shard set (C7).
//!
//! # Example
//!
//! ```ignore
//! use gatefleet::{run_bot, token_from_env, HostCommand, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let token = token_from_env("GATEWAY_TOKEN")?;
//!     let (output_tx, output_rx) = flume::unbounded();
//!     let (_host_tx, host_rx) = flume::unbounded::<HostCommand>();
//!
//!     let reason = gatefleet::run_bot(output_tx, token, RunConfig::default(), host_rx).await?;
//!     println!("bot exited: {reason:?}");
//!     Ok(())
//! }
//! ```

mod backoff;
pub mod config;
pub mod coordinator;
mod discovery;
pub mod error;
mod heartbeat;
mod opcode;
mod payload;
mod runner;
mod shard;
mod ws;

pub use config::{token_from_env, RunConfig};
pub use coordinator::{run_bot, ExitReason, HostCommand};
pub use discovery::{fetch_gateway, GatewayInfo, SessionStartLimit};
pub use error::GatewayError;
pub use opcode::OpCode;
pub use payload::Payload;
pub use runner::BotEffect;
pub use shard::{should_resume, step, Effect, Input, Shard};

/// Gateway protocol version this crate speaks (§1, §6).
pub const GATEWAY_VERSION: u8 = 10;

/// Default gateway discovery endpoint (C2), overridable via
/// [`RunConfig::discovery_url`].
pub const DEFAULT_DISCOVERY_URL: &str = "https://discord.com/api/v10/gateway/bot";
