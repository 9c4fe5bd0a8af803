//! Durable records: bots, sessions, registrations and transcript messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::floor::{BotId, Participant, SessionId, HUMAN_OBSERVER_NAME};

// ============================================================================
// Bots
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bot {
    pub id: BotId,
    pub name: String,
    /// Underlying model family, e.g. "claude" or "llama"
    pub model_type: String,
    pub specialization: Option<String>,
    pub api_endpoint: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to register a new bot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBot {
    pub name: String,
    pub model_type: String,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub api_endpoint: Option<String>,
}

impl NewBot {
    pub fn new(name: impl Into<String>, model_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_type: model_type.into(),
            ..Default::default()
        }
    }

    pub fn with_specialization(mut self, specialization: impl Into<String>) -> Self {
        self.specialization = Some(specialization.into());
        self
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Lifecycle of a session record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    RegistrationOpen,
    Live,
    Completed,
    Cancelled,
}

impl SessionStatus {
    /// Whether bots may still register
    pub fn accepts_registrations(self) -> bool {
        matches!(self, Self::Scheduled | Self::RegistrationOpen)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::RegistrationOpen => "registration_open",
            Self::Live => "live",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub title: String,
    pub topic_category: String,
    pub topic_subcategory: Option<String>,
    /// Opening question put to the participants
    pub framing_prompt: String,
    pub scheduled_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub max_participants: u32,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// Request to create a session. Unset limits fall back to configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSession {
    pub title: String,
    pub topic_category: String,
    #[serde(default)]
    pub topic_subcategory: Option<String>,
    pub framing_prompt: String,
    /// Defaults to the creation time
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl NewSession {
    pub fn new(
        title: impl Into<String>,
        topic_category: impl Into<String>,
        framing_prompt: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            topic_category: topic_category.into(),
            framing_prompt: framing_prompt.into(),
            ..Default::default()
        }
    }

    pub fn duration_minutes(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn max_participants(mut self, max: u32) -> Self {
        self.max_participants = Some(max);
        self
    }

    pub fn scheduled_at(mut self, time: DateTime<Utc>) -> Self {
        self.scheduled_time = Some(time);
        self
    }
}

/// Session record plus its registration count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: SessionRecord,
    pub participant_count: usize,
}

// ============================================================================
// Registrations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub id: u64,
    pub session_id: SessionId,
    pub bot_id: BotId,
    /// Why the bot wants to take part
    pub interest_statement: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationView {
    #[serde(flatten)]
    pub registration: Registration,
    pub bot_name: String,
}

// ============================================================================
// Transcript
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub session_id: SessionId,
    pub author: Participant,
    pub content: String,
    /// Score that won the floor for this turn; 100 for the human observer
    pub urgency_score: Option<u8>,
    pub is_yield: bool,
    pub timestamp: DateTime<Utc>,
    /// How long the author held the floor before posting
    pub duration_seconds: Option<i64>,
}

impl Message {
    pub fn is_human(&self) -> bool {
        self.author.is_human()
    }
}

/// A transcript message with its author resolved to a display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    #[serde(flatten)]
    pub message: Message,
    pub author_name: String,
    pub is_human: bool,
}

impl TranscriptEntry {
    pub fn new(message: Message, bot_name: Option<&str>) -> Self {
        let is_human = message.is_human();
        let author_name = match (is_human, bot_name) {
            (true, _) => HUMAN_OBSERVER_NAME.to_string(),
            (false, Some(name)) => name.to_string(),
            (false, None) => format!("{}", message.author),
        };
        Self {
            message,
            author_name,
            is_human,
        }
    }
}

// ============================================================================
// Live outcomes
// ============================================================================

/// Result of a bot's urgency submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UrgencyOutcome {
    /// The bid won resolution and the floor was granted immediately
    FloorGranted { bot_id: BotId, max_duration_secs: i64 },
    /// The bid is waiting on the board
    UrgencySubmitted { score: u8 },
}

impl UrgencyOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::FloorGranted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(author: Participant) -> Message {
        Message {
            id: 1,
            session_id: SessionId(1),
            author,
            content: "hello".to_string(),
            urgency_score: None,
            is_yield: false,
            timestamp: Utc::now(),
            duration_seconds: None,
        }
    }

    #[test]
    fn test_session_status_registration_window() {
        assert!(SessionStatus::Scheduled.accepts_registrations());
        assert!(SessionStatus::RegistrationOpen.accepts_registrations());
        assert!(!SessionStatus::Live.accepts_registrations());
        assert!(!SessionStatus::Completed.accepts_registrations());
        assert_eq!(
            serde_json::to_value(SessionStatus::RegistrationOpen).unwrap(),
            "registration_open"
        );
    }

    #[test]
    fn test_transcript_entry_names_human() {
        let entry = TranscriptEntry::new(message(Participant::Human), None);
        assert_eq!(entry.author_name, "Human Observer");
        assert!(entry.is_human);

        let entry = TranscriptEntry::new(message(Participant::Bot(BotId(4))), Some("Sage"));
        assert_eq!(entry.author_name, "Sage");
        assert!(!entry.is_human);
    }

    #[test]
    fn test_urgency_outcome_json() {
        let granted = UrgencyOutcome::FloorGranted {
            bot_id: BotId(2),
            max_duration_secs: 420,
        };
        let json = serde_json::to_value(&granted).unwrap();
        assert_eq!(json["status"], "floor_granted");
        assert_eq!(json["max_duration_secs"], 420);

        let json = serde_json::to_value(UrgencyOutcome::UrgencySubmitted { score: 40 }).unwrap();
        assert_eq!(json["status"], "urgency_submitted");
    }

    #[test]
    fn test_new_session_defaults_from_json() {
        let new: NewSession = serde_json::from_str(
            r#"{"title":"AI rights","topic_category":"ethics","framing_prompt":"Should models vote?"}"#,
        )
        .unwrap();
        assert!(new.duration_minutes.is_none());
        assert!(new.scheduled_time.is_none());
    }
}
