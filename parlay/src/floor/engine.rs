//! Session engine — clock, urgency board, floor controller and human override
//! for a single session.
//!
//! The engine is a plain state machine: no locking, no I/O, no timers. Callers
//! wrap it in a mutex (see [`super::registry`]) and drive time-based
//! transitions by calling [`SessionEngine::resolve_next`] or
//! [`SessionEngine::status`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::board::{validate_score, UrgencyBid, UrgencyBoard};
use super::clock::{SessionClock, SharedClock};
use super::error::FloorRejection;
use super::speaker::{ActiveSpeaker, FloorController};
use super::types::{
    BotId, FloorPhase, Participant, ReleaseReason, SessionId, HUMAN_OBSERVER_NAME,
};

/// Urgency recorded for the human override.
pub const HUMAN_URGENCY: u8 = 100;

/// A state change inside the engine, drained by the host for broadcasting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FloorTransition {
    Started {
        at: DateTime<Utc>,
    },
    BidAccepted {
        participant: BotId,
        participant_name: String,
        score: u8,
        at: DateTime<Utc>,
    },
    Granted {
        participant: Participant,
        participant_name: String,
        score: Option<u8>,
        at: DateTime<Utc>,
    },
    Released {
        participant: Participant,
        participant_name: String,
        spoke_secs: i64,
        reason: ReleaseReason,
        at: DateTime<Utc>,
    },
    Intervened {
        preempted: Option<Participant>,
        at: DateTime<Utc>,
    },
    Ended {
        at: DateTime<Utc>,
    },
}

/// Active speaker as reported in a status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerStatus {
    pub participant: Participant,
    pub participant_name: String,
    pub speaking_for_secs: i64,
    pub remaining_secs: i64,
}

/// Point-in-time view of an engine for viewers and pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub session_id: SessionId,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub time_remaining_secs: i64,
    pub is_ended: bool,
    pub phase: FloorPhase,
    pub active_speaker: Option<SpeakerStatus>,
    pub human_intervention_available: bool,
    pub pending_bids: usize,
    pub should_warn: bool,
}

#[derive(Debug)]
pub struct SessionEngine {
    session_id: SessionId,
    clock: SharedClock,
    session_clock: SessionClock,
    board: UrgencyBoard,
    floor: FloorController,
    human_intervention_used: bool,
    transitions: Vec<FloorTransition>,
}

impl SessionEngine {
    pub fn new(session_id: SessionId, duration_minutes: u32, clock: SharedClock) -> Self {
        Self {
            session_id,
            clock,
            session_clock: SessionClock::new(duration_minutes),
            board: UrgencyBoard::new(),
            floor: FloorController::new(),
            human_intervention_used: false,
            transitions: Vec::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn configured_duration_secs(&self) -> i64 {
        self.session_clock.configured_duration_secs()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.session_clock.started_at()
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.session_clock.ended_at()
    }

    pub fn is_started(&self) -> bool {
        self.session_clock.is_started()
    }

    pub fn human_intervention_used(&self) -> bool {
        self.human_intervention_used
    }

    pub fn phase(&self) -> FloorPhase {
        self.floor.phase()
    }

    pub fn active_speaker(&self) -> Option<&ActiveSpeaker> {
        self.floor.speaker()
    }

    pub fn pending_bids(&self) -> usize {
        self.board.len()
    }

    /// Pending bids in resolution order.
    pub fn bids(&self) -> Vec<&UrgencyBid> {
        self.board.ranked()
    }

    /// Drain recorded transitions, oldest first.
    pub fn take_transitions(&mut self) -> Vec<FloorTransition> {
        std::mem::take(&mut self.transitions)
    }

    // =========================================================================
    // Session clock
    // =========================================================================

    /// Start the session clock.
    pub fn start(&mut self) -> Result<(), FloorRejection> {
        let now = self.clock.now();
        self.session_clock.start(now)?;
        self.record(FloorTransition::Started { at: now });
        Ok(())
    }

    pub fn time_remaining(&self) -> i64 {
        self.session_clock.time_remaining(self.clock.now())
    }

    /// Whether the session is over. The first positive answer closes the floor.
    pub fn has_ended(&mut self) -> bool {
        let now = self.clock.now();
        self.check_ended(now)
    }

    pub fn should_warn(&self) -> bool {
        self.session_clock.should_warn(self.clock.now())
    }

    /// End the session before its configured duration.
    pub fn end(&mut self) -> Result<(), FloorRejection> {
        let now = self.clock.now();
        if self.check_ended(now) {
            return Err(FloorRejection::SessionEnded);
        }
        self.session_clock.end(now)?;
        self.close_floor(now);
        Ok(())
    }

    // =========================================================================
    // Urgency board
    // =========================================================================

    /// Record or replace a bot's urgency bid, returning the accepted score.
    pub fn submit_bid(
        &mut self,
        participant: BotId,
        participant_name: &str,
        score: i64,
    ) -> Result<u8, FloorRejection> {
        let now = self.clock.now();
        if !self.session_clock.is_started() {
            return Err(FloorRejection::NotStarted);
        }
        if self.check_ended(now) {
            return Err(FloorRejection::SessionEnded);
        }
        let bidder = Participant::Bot(participant);
        if self.floor.holds(bidder) {
            return Err(FloorRejection::HoldsFloor {
                participant: bidder,
            });
        }
        let score = validate_score(score)?;

        self.board.place(participant, participant_name, score, now);
        self.record(FloorTransition::BidAccepted {
            participant,
            participant_name: participant_name.to_string(),
            score,
            at: now,
        });
        Ok(score)
    }

    /// The bid that would win the floor now, if the floor is free.
    ///
    /// Releases an over-time speaker first. The winning bid stays on the board
    /// until [`grant`](Self::grant) clears it.
    pub fn resolve_next(&mut self) -> Option<UrgencyBid> {
        let now = self.clock.now();
        self.enforce_speaking_limit(now);
        self.check_ended(now);
        if self.floor.speaker().is_some() {
            return None;
        }
        self.board.leader().cloned()
    }

    // =========================================================================
    // Floor controller
    // =========================================================================

    /// Give the floor to a bot holding a live bid.
    pub fn grant(&mut self, participant: BotId, participant_name: &str) -> Result<(), FloorRejection> {
        let now = self.clock.now();
        self.enforce_speaking_limit(now);
        if self.check_ended(now) {
            return Err(FloorRejection::SessionEnded);
        }
        if let Some(holder) = self.floor.holder() {
            return Err(FloorRejection::FloorOccupied { holder });
        }
        let speaker = Participant::Bot(participant);
        let score = self
            .board
            .get(participant)
            .map(|bid| bid.score)
            .ok_or(FloorRejection::NoBid {
                participant: speaker,
            })?;

        self.floor
            .grant(ActiveSpeaker::new(speaker, participant_name, Some(score), now))?;
        self.board.clear();
        self.record(FloorTransition::Granted {
            participant: speaker,
            participant_name: participant_name.to_string(),
            score: Some(score),
            at: now,
        });
        Ok(())
    }

    /// Free the floor. Harmless when nobody holds it.
    pub fn release(&mut self) -> Option<ActiveSpeaker> {
        let now = self.clock.now();
        self.release_with(ReleaseReason::Completed, now)
    }

    /// Give up the floor; only the holder may yield.
    pub fn yield_floor(&mut self, participant: Participant) -> Result<ActiveSpeaker, FloorRejection> {
        self.release_by(participant, ReleaseReason::Yielded)
    }

    /// End the holder's turn after it delivered its content.
    pub fn finish_turn(&mut self, participant: Participant) -> Result<ActiveSpeaker, FloorRejection> {
        self.release_by(participant, ReleaseReason::Completed)
    }

    // =========================================================================
    // Human override
    // =========================================================================

    /// Seize the floor for the human observer. Usable once per session.
    pub fn intervene(&mut self) -> Result<(), FloorRejection> {
        if self.human_intervention_used {
            return Err(FloorRejection::InterventionUsed);
        }
        let now = self.clock.now();
        self.board.clear();
        let displaced = self.floor.seize(ActiveSpeaker::new(
            Participant::Human,
            HUMAN_OBSERVER_NAME,
            Some(HUMAN_URGENCY),
            now,
        ));
        if let Some(ref speaker) = displaced {
            self.record_release(speaker, ReleaseReason::Preempted, now);
        }
        self.human_intervention_used = true;
        self.record(FloorTransition::Intervened {
            preempted: displaced.map(|s| s.participant),
            at: now,
        });
        Ok(())
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Snapshot after applying any pending timeout or expiry.
    pub fn status(&mut self) -> EngineStatus {
        let now = self.clock.now();
        self.enforce_speaking_limit(now);
        let is_ended = self.check_ended(now);

        EngineStatus {
            session_id: self.session_id,
            started_at: self.session_clock.started_at(),
            ended_at: self.session_clock.ended_at(),
            time_remaining_secs: self.session_clock.time_remaining(now),
            is_ended,
            phase: self.floor.phase(),
            active_speaker: self.floor.speaker().map(|s| {
                let speaking_for_secs = s.speaking_secs(now);
                SpeakerStatus {
                    participant: s.participant,
                    participant_name: s.participant_name.clone(),
                    speaking_for_secs,
                    remaining_secs: (s.max_duration_secs - speaking_for_secs).max(0),
                }
            }),
            human_intervention_available: !self.human_intervention_used,
            pending_bids: self.board.len(),
            should_warn: self.session_clock.should_warn(now),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn record(&mut self, transition: FloorTransition) {
        self.transitions.push(transition);
    }

    fn check_ended(&mut self, now: DateTime<Utc>) -> bool {
        let already_ended = self.session_clock.ended_at().is_some();
        let ended = self.session_clock.has_ended(now);
        if ended && !already_ended {
            self.close_floor(now);
        }
        ended
    }

    /// Session over: nobody keeps the floor and no bid survives.
    fn close_floor(&mut self, now: DateTime<Utc>) {
        self.release_with(ReleaseReason::SessionEnded, now);
        self.board.clear();
        let at = self.session_clock.ended_at().unwrap_or(now);
        self.record(FloorTransition::Ended { at });
    }

    fn enforce_speaking_limit(&mut self, now: DateTime<Utc>) {
        if let Some(speaker) = self.floor.release_if_overtime(now) {
            debug!(
                session_id = %self.session_id,
                participant = %speaker.participant,
                "Forced floor release after maximum speaking time"
            );
            self.record_release(&speaker, ReleaseReason::TimedOut, now);
        }
    }

    fn release_with(&mut self, reason: ReleaseReason, now: DateTime<Utc>) -> Option<ActiveSpeaker> {
        let speaker = self.floor.release()?;
        self.record_release(&speaker, reason, now);
        Some(speaker)
    }

    fn release_by(
        &mut self,
        participant: Participant,
        reason: ReleaseReason,
    ) -> Result<ActiveSpeaker, FloorRejection> {
        let now = self.clock.now();
        let speaker = self.floor.release_by(participant)?;
        self.record_release(&speaker, reason, now);
        Ok(speaker)
    }

    fn record_release(&mut self, speaker: &ActiveSpeaker, reason: ReleaseReason, now: DateTime<Utc>) {
        self.record(FloorTransition::Released {
            participant: speaker.participant,
            participant_name: speaker.participant_name.clone(),
            spoke_secs: speaker.speaking_secs(now),
            reason,
            at: now,
        });
    }
}
