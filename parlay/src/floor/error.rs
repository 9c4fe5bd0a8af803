//! Rejection types for floor-control operations.
//!
//! Every precondition violation is an expected outcome the caller branches on.
//! Nothing in the engine panics or treats a rejection as fatal.

use thiserror::Error;

use super::types::Participant;

/// Why an engine operation was refused. The engine state is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FloorRejection {
    /// The session clock has not been started.
    #[error("session has not started")]
    NotStarted,

    /// The session clock is already running.
    #[error("session already started")]
    AlreadyStarted,

    /// The session time is up or the session was ended.
    #[error("session has ended")]
    SessionEnded,

    /// The bidder currently holds the floor.
    #[error("{participant} currently holds the floor")]
    HoldsFloor { participant: Participant },

    /// Urgency score outside the accepted range.
    #[error("urgency score {score} outside 1..=100")]
    ScoreOutOfRange { score: i64 },

    /// Somebody else already holds the floor.
    #[error("floor is held by {holder}")]
    FloorOccupied { holder: Participant },

    /// The participant has no live bid on the urgency board.
    #[error("{participant} has no pending urgency bid")]
    NoBid { participant: Participant },

    /// Nobody holds the floor.
    #[error("nobody holds the floor")]
    FloorVacant,

    /// The requester is not the current floor holder.
    #[error("{requester} does not hold the floor (held by {holder})")]
    NotFloorHolder {
        requester: Participant,
        holder: Participant,
    },

    /// The one-shot human intervention was already spent.
    #[error("human intervention already used")]
    InterventionUsed,
}

impl FloorRejection {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotStarted => "SESSION_NOT_STARTED",
            Self::AlreadyStarted => "SESSION_ALREADY_STARTED",
            Self::SessionEnded => "SESSION_ENDED",
            Self::HoldsFloor { .. } => "HOLDS_FLOOR",
            Self::ScoreOutOfRange { .. } => "SCORE_OUT_OF_RANGE",
            Self::FloorOccupied { .. } => "FLOOR_OCCUPIED",
            Self::NoBid { .. } => "NO_BID",
            Self::FloorVacant => "FLOOR_VACANT",
            Self::NotFloorHolder { .. } => "NOT_FLOOR_HOLDER",
            Self::InterventionUsed => "INTERVENTION_USED",
        }
    }
}

/// An engine or registry lock was poisoned by a panicking holder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{what} lock poisoned")]
pub struct LockPoisoned {
    pub what: &'static str,
}

impl LockPoisoned {
    pub(crate) fn engine() -> Self {
        Self { what: "session engine" }
    }

    pub(crate) fn registry() -> Self {
        Self {
            what: "engine registry",
        }
    }
}
