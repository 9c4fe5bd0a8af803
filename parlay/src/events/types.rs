//! Event types broadcast to viewers and participants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::floor::{BotId, FloorTransition, Participant, ReleaseReason, SessionId};

/// All floor-control events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FloorEvent {
    /// The session clock started
    SessionStarted {
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },

    /// A bot placed or replaced its urgency bid
    UrgencySubmitted {
        session_id: SessionId,
        bot_id: BotId,
        bot_name: String,
        score: u8,
        timestamp: DateTime<Utc>,
    },

    /// A participant was given the floor
    FloorGranted {
        session_id: SessionId,
        participant: Participant,
        participant_name: String,
        score: Option<u8>,
        timestamp: DateTime<Utc>,
    },

    /// The floor became free
    FloorReleased {
        session_id: SessionId,
        participant: Participant,
        participant_name: String,
        spoke_secs: i64,
        reason: ReleaseReason,
        timestamp: DateTime<Utc>,
    },

    /// The human observer seized the floor
    HumanIntervened {
        session_id: SessionId,
        preempted: Option<Participant>,
        timestamp: DateTime<Utc>,
    },

    /// A message was added to the transcript
    MessagePosted {
        session_id: SessionId,
        message_id: u64,
        author: Participant,
        author_name: String,
        is_yield: bool,
        timestamp: DateTime<Utc>,
    },

    /// Remaining time entered the warning band
    TimeWarning {
        session_id: SessionId,
        remaining_secs: i64,
        timestamp: DateTime<Utc>,
    },

    /// The session is over
    SessionEnded {
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },
}

impl FloorEvent {
    /// Translate an engine transition into its broadcast form
    pub fn from_transition(session_id: SessionId, transition: FloorTransition) -> Self {
        match transition {
            FloorTransition::Started { at } => FloorEvent::SessionStarted {
                session_id,
                timestamp: at,
            },
            FloorTransition::BidAccepted {
                participant,
                participant_name,
                score,
                at,
            } => FloorEvent::UrgencySubmitted {
                session_id,
                bot_id: participant,
                bot_name: participant_name,
                score,
                timestamp: at,
            },
            FloorTransition::Granted {
                participant,
                participant_name,
                score,
                at,
            } => FloorEvent::FloorGranted {
                session_id,
                participant,
                participant_name,
                score,
                timestamp: at,
            },
            FloorTransition::Released {
                participant,
                participant_name,
                spoke_secs,
                reason,
                at,
            } => FloorEvent::FloorReleased {
                session_id,
                participant,
                participant_name,
                spoke_secs,
                reason,
                timestamp: at,
            },
            FloorTransition::Intervened { preempted, at } => FloorEvent::HumanIntervened {
                session_id,
                preempted,
                timestamp: at,
            },
            FloorTransition::Ended { at } => FloorEvent::SessionEnded {
                session_id,
                timestamp: at,
            },
        }
    }

    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            FloorEvent::SessionStarted { timestamp, .. } => *timestamp,
            FloorEvent::UrgencySubmitted { timestamp, .. } => *timestamp,
            FloorEvent::FloorGranted { timestamp, .. } => *timestamp,
            FloorEvent::FloorReleased { timestamp, .. } => *timestamp,
            FloorEvent::HumanIntervened { timestamp, .. } => *timestamp,
            FloorEvent::MessagePosted { timestamp, .. } => *timestamp,
            FloorEvent::TimeWarning { timestamp, .. } => *timestamp,
            FloorEvent::SessionEnded { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            FloorEvent::SessionStarted { .. } => "session_started",
            FloorEvent::UrgencySubmitted { .. } => "urgency_submitted",
            FloorEvent::FloorGranted { .. } => "floor_granted",
            FloorEvent::FloorReleased { .. } => "floor_released",
            FloorEvent::HumanIntervened { .. } => "human_intervened",
            FloorEvent::MessagePosted { .. } => "message_posted",
            FloorEvent::TimeWarning { .. } => "time_warning",
            FloorEvent::SessionEnded { .. } => "session_ended",
        }
    }

    /// Get the session this event belongs to
    pub fn session_id(&self) -> SessionId {
        match self {
            FloorEvent::SessionStarted { session_id, .. }
            | FloorEvent::UrgencySubmitted { session_id, .. }
            | FloorEvent::FloorGranted { session_id, .. }
            | FloorEvent::FloorReleased { session_id, .. }
            | FloorEvent::HumanIntervened { session_id, .. }
            | FloorEvent::MessagePosted { session_id, .. }
            | FloorEvent::TimeWarning { session_id, .. }
            | FloorEvent::SessionEnded { session_id, .. } => *session_id,
        }
    }

    /// Participant the event concerns, if any
    pub fn participant(&self) -> Option<Participant> {
        match self {
            FloorEvent::UrgencySubmitted { bot_id, .. } => Some(Participant::Bot(*bot_id)),
            FloorEvent::FloorGranted { participant, .. }
            | FloorEvent::FloorReleased { participant, .. } => Some(*participant),
            FloorEvent::HumanIntervened { .. } => Some(Participant::Human),
            FloorEvent::MessagePosted { author, .. } => Some(*author),
            _ => None,
        }
    }
}
