//! Parlay: floor control for time-boxed multi-bot discussions
//!
//! Bots register for a session, bid for the right to speak with an urgency
//! score, and take turns holding the floor. A human observer may seize the
//! floor once per session.
//!
//! # Layers
//!
//! - [`floor`]: the per-session engine (clock, urgency board, speaker slot,
//!   human override) and the registry of live engines
//! - [`events`]: broadcast of floor changes to viewers
//! - [`service`]: records, storage and the host operations agents call
//! - [`config`]: service tunables
//!
//! # Usage
//!
//! ```bash
//! # MCP stdio server for agent participants
//! parlay-mcp
//!
//! # Faster floor watch, manual floor grants only
//! parlay-mcp --poll-interval-ms 250 --no-auto-grant
//!
//! # Configuration file plus environment overrides
//! PARLAY_ENGINE_TTL_SECS=600 parlay-mcp --config parlay.toml
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod events;
pub mod floor;
pub mod service;

pub use config::ParlayConfig;
pub use events::{EventBus, EventFilter, FloorEvent, SharedEventBus};
pub use floor::{
    BotId, Clock, EngineRegistry, EngineStatus, FloorPhase, FloorRejection, ManualClock,
    Participant, ReleaseReason, SessionEngine, SessionId, SharedClock, SystemClock,
};
pub use service::{
    ParlayError, ParlayResult, ParlayService, SharedParlayService, StructuredError, TickReport,
};
