//! Identifiers, participants and floor phases shared by the engine components.

use serde::{Deserialize, Serialize};

/// Maximum time a participant may hold the floor, in seconds (7 minutes).
pub const MAX_SPEAKING_SECS: i64 = 420;

/// Display name used for the human observer.
pub const HUMAN_OBSERVER_NAME: &str = "Human Observer";

/// Identifier of a live discussion session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identifier of a registered bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotId(pub u64);

impl std::fmt::Display for BotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BotId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Someone who can hold the floor.
///
/// Bots compete for the floor through urgency bids. The human observer never
/// bids; it can only seize the floor once through the override gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Participant {
    /// An autonomous participant.
    Bot(BotId),
    /// The privileged human observer.
    Human,
}

impl Participant {
    /// The bot id, if this participant is a bot.
    pub fn bot_id(self) -> Option<BotId> {
        match self {
            Self::Bot(id) => Some(id),
            Self::Human => None,
        }
    }

    pub fn is_human(self) -> bool {
        matches!(self, Self::Human)
    }
}

impl From<BotId> for Participant {
    fn from(id: BotId) -> Self {
        Self::Bot(id)
    }
}

impl std::fmt::Display for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bot(id) => write!(f, "bot:{}", id),
            Self::Human => write!(f, "human"),
        }
    }
}

/// State of the floor controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloorPhase {
    /// Nobody holds the floor; bids may be resolved.
    Idle,
    /// One participant holds the floor.
    Speaking,
}

impl std::fmt::Display for FloorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Why a speaker lost the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// The speaker finished its turn.
    Completed,
    /// The speaker gave up its turn explicitly.
    Yielded,
    /// The speaker reached the maximum speaking duration.
    TimedOut,
    /// The session clock ran out or the session was ended.
    SessionEnded,
    /// The human observer seized the floor.
    Preempted,
}

impl std::fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Yielded => write!(f, "yielded"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::SessionEnded => write!(f, "session_ended"),
            Self::Preempted => write!(f, "preempted"),
        }
    }
}
