//! The single active speaker slot.
//!
//! ```text
//! Idle ──grant──▶ Speaking ──release / yield / timeout──▶ Idle
//!   │                ▲
//!   └────seize───────┘   (human override, from either state)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::clock::elapsed_ms;
use super::error::FloorRejection;
use super::types::{FloorPhase, Participant, MAX_SPEAKING_SECS};

/// Whoever currently holds the floor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSpeaker {
    pub participant: Participant,
    pub participant_name: String,
    pub started_at: DateTime<Utc>,
    pub max_duration_secs: i64,
    /// Urgency that won the floor (100 for the human override).
    pub score: Option<u8>,
}

impl ActiveSpeaker {
    pub fn new(
        participant: Participant,
        participant_name: &str,
        score: Option<u8>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            participant,
            participant_name: participant_name.to_string(),
            started_at: now,
            max_duration_secs: MAX_SPEAKING_SECS,
            score,
        }
    }

    /// Whole seconds spent speaking.
    pub fn speaking_secs(&self, now: DateTime<Utc>) -> i64 {
        (elapsed_ms(self.started_at, now) / 1000).max(0)
    }

    /// Whether the speaker has reached the maximum duration.
    pub fn is_overtime(&self, now: DateTime<Utc>) -> bool {
        elapsed_ms(self.started_at, now) >= self.max_duration_secs * 1000
    }
}

#[derive(Debug, Default, Clone)]
pub struct FloorController {
    speaker: Option<ActiveSpeaker>,
}

impl FloorController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> FloorPhase {
        if self.speaker.is_some() {
            FloorPhase::Speaking
        } else {
            FloorPhase::Idle
        }
    }

    pub fn speaker(&self) -> Option<&ActiveSpeaker> {
        self.speaker.as_ref()
    }

    pub fn holder(&self) -> Option<Participant> {
        self.speaker.as_ref().map(|s| s.participant)
    }

    pub fn holds(&self, participant: Participant) -> bool {
        self.holder() == Some(participant)
    }

    /// Idle → Speaking.
    pub fn grant(&mut self, speaker: ActiveSpeaker) -> Result<(), FloorRejection> {
        if let Some(holder) = self.holder() {
            return Err(FloorRejection::FloorOccupied { holder });
        }
        self.speaker = Some(speaker);
        Ok(())
    }

    /// Speaking → Idle. Returns the released speaker; a no-op when idle.
    pub fn release(&mut self) -> Option<ActiveSpeaker> {
        self.speaker.take()
    }

    /// Release on behalf of `participant`, which must hold the floor.
    pub fn release_by(&mut self, participant: Participant) -> Result<ActiveSpeaker, FloorRejection> {
        match self.holder() {
            None => Err(FloorRejection::FloorVacant),
            Some(holder) if holder != participant => Err(FloorRejection::NotFloorHolder {
                requester: participant,
                holder,
            }),
            Some(_) => self.speaker.take().ok_or(FloorRejection::FloorVacant),
        }
    }

    /// Install `speaker` regardless of state, returning whoever was displaced.
    pub fn seize(&mut self, speaker: ActiveSpeaker) -> Option<ActiveSpeaker> {
        self.speaker.replace(speaker)
    }

    /// Release the speaker if it has reached the maximum duration.
    pub fn release_if_overtime(&mut self, now: DateTime<Utc>) -> Option<ActiveSpeaker> {
        if self.speaker.as_ref().is_some_and(|s| s.is_overtime(now)) {
            self.speaker.take()
        } else {
            None
        }
    }
}
