//! Floor Control — urgency-based turn-taking for a time-boxed discussion
//!
//! One [`SessionEngine`] per live session owns the session clock, the urgency
//! board, the active speaker slot and the one-shot human override.
//!
//! # Turn Flow
//!
//! ```text
//! submit_bid ──▶ UrgencyBoard ──resolve_next──▶ winner ──grant──▶ Speaking
//!      ▲                                                            │
//!      │                    release / yield / timeout               │
//!      └──────────────────────────── Idle ◀─────────────────────────┘
//!
//! intervene ──▶ Speaking(Human)          (bypasses the board, once)
//! ```
//!
//! Time-based transitions are lazy: a speaker that runs past
//! [`MAX_SPEAKING_SECS`] and a session whose duration has elapsed are only
//! noticed when someone calls `resolve_next`, `grant` or `status`. The host is
//! expected to poll (see `service::ParlayService::tick`).

pub mod board;
pub mod clock;
pub mod engine;
pub mod error;
pub mod registry;
pub mod speaker;
pub mod types;

pub use board::{validate_score, UrgencyBid, UrgencyBoard, MAX_URGENCY, MIN_URGENCY};
pub use clock::{
    Clock, ManualClock, SessionClock, SharedClock, SystemClock, WARNING_WINDOW_SECS,
};
pub use engine::{EngineStatus, FloorTransition, SessionEngine, SpeakerStatus, HUMAN_URGENCY};
pub use error::{FloorRejection, LockPoisoned};
pub use registry::{lock_engine, EngineRegistry, SharedEngine};
pub use speaker::{ActiveSpeaker, FloorController};
pub use types::{
    BotId, FloorPhase, Participant, ReleaseReason, SessionId, HUMAN_OBSERVER_NAME,
    MAX_SPEAKING_SECS,
};
