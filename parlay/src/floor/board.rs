//! Urgency board: one outstanding bid per bot.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::FloorRejection;
use super::types::BotId;

/// Lowest accepted urgency score.
pub const MIN_URGENCY: u8 = 1;

/// Highest accepted urgency score.
pub const MAX_URGENCY: u8 = 100;

/// A bot's request to speak next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrgencyBid {
    pub participant: BotId,
    pub participant_name: String,
    pub score: u8,
    pub submitted_at: DateTime<Utc>,
    /// Submission order on the board; breaks ties between equal timestamps.
    pub sequence: u64,
}

/// Check a raw score against `MIN_URGENCY..=MAX_URGENCY`.
pub fn validate_score(score: i64) -> Result<u8, FloorRejection> {
    if (i64::from(MIN_URGENCY)..=i64::from(MAX_URGENCY)).contains(&score) {
        Ok(score as u8)
    } else {
        Err(FloorRejection::ScoreOutOfRange { score })
    }
}

#[derive(Debug, Default, Clone)]
pub struct UrgencyBoard {
    bids: HashMap<BotId, UrgencyBid>,
    next_sequence: u64,
}

impl UrgencyBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the bot's bid with a fresh timestamp.
    pub fn place(
        &mut self,
        participant: BotId,
        participant_name: &str,
        score: u8,
        now: DateTime<Utc>,
    ) -> &UrgencyBid {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.bids.insert(
            participant,
            UrgencyBid {
                participant,
                participant_name: participant_name.to_string(),
                score,
                submitted_at: now,
                sequence,
            },
        );
        &self.bids[&participant]
    }

    /// Highest score; ties go to the earliest submission.
    pub fn leader(&self) -> Option<&UrgencyBid> {
        self.bids.values().max_by(|a, b| {
            a.score
                .cmp(&b.score)
                .then_with(|| b.submitted_at.cmp(&a.submitted_at))
                .then_with(|| b.sequence.cmp(&a.sequence))
        })
    }

    pub fn get(&self, participant: BotId) -> Option<&UrgencyBid> {
        self.bids.get(&participant)
    }

    pub fn contains(&self, participant: BotId) -> bool {
        self.bids.contains_key(&participant)
    }

    /// Discard every bid, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.bids.len();
        self.bids.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }

    /// Bids ordered the way resolution would rank them.
    pub fn ranked(&self) -> Vec<&UrgencyBid> {
        let mut bids: Vec<&UrgencyBid> = self.bids.values().collect();
        bids.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.submitted_at.cmp(&b.submitted_at))
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        bids
    }
}
