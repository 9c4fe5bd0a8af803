//! Service error types
//!
//! Every failure a bot or viewer can hit, with agent-friendly formatting so
//! tool callers can branch on a stable code and follow a recovery action.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::floor::{BotId, FloorRejection, LockPoisoned, SessionId};

/// Result type alias for service operations
pub type ParlayResult<T> = Result<T, ParlayError>;

// ============================================================================
// Structured Error Response (Agent-Friendly)
// ============================================================================

/// Structured error response for MCP tools.
///
/// # Example Response
/// ```json
/// {
///   "code": "FLOOR_OCCUPIED",
///   "message": "Floor rejected: floor is held by bot:3",
///   "recovery_action": "Wait for the current speaker, then call parlay_submit_urgency again",
///   "context": { "session_id": 12 }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Actionable recovery instruction for the agent
    pub recovery_action: String,

    /// Relevant context for debugging and recovery
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Whether this error is retryable (transient failure)
    #[serde(default)]
    pub retryable: bool,
}

impl StructuredError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        recovery_action: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recovery_action: recovery_action.into(),
            context: HashMap::new(),
            retryable: false,
        }
    }

    /// Add context key-value pair
    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Mark as retryable
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn with_session(self, session_id: SessionId) -> Self {
        self.with_context("session_id", session_id.0)
    }

    pub fn with_bot(self, bot_id: BotId) -> Self {
        self.with_context("bot_id", bot_id.0)
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for StructuredError {}

/// Errors that can occur during service operations
#[derive(Error, Debug)]
pub enum ParlayError {
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: SessionId },

    #[error("Bot not found: {bot_id}")]
    BotNotFound { bot_id: BotId },

    /// No engine is registered: the session never started or was evicted
    #[error("Session {session_id} is not active")]
    SessionNotActive { session_id: SessionId },

    #[error("Bot name already registered: {name}")]
    DuplicateBotName { name: String },

    #[error("Bot {bot_id} already registered for session {session_id}")]
    AlreadyRegistered { session_id: SessionId, bot_id: BotId },

    #[error("Session {session_id} is full ({max_participants} participants)")]
    SessionFull {
        session_id: SessionId,
        max_participants: u32,
    },

    #[error("Registration for session {session_id} is closed")]
    RegistrationClosed { session_id: SessionId },

    #[error("Session {session_id} already started")]
    AlreadyLive { session_id: SessionId },

    /// The caller is not allowed to perform the operation
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// The floor engine refused the operation
    #[error("Floor rejected: {0}")]
    Rejected(#[from] FloorRejection),

    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("Record store error: {message}")]
    Store { message: String },

    #[error(transparent)]
    LockPoisoned(#[from] LockPoisoned),

    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ParlayError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            Self::BotNotFound { .. } => "BOT_NOT_FOUND",
            Self::SessionNotActive { .. } => "SESSION_NOT_ACTIVE",
            Self::DuplicateBotName { .. } => "DUPLICATE_BOT_NAME",
            Self::AlreadyRegistered { .. } => "ALREADY_REGISTERED",
            Self::SessionFull { .. } => "SESSION_FULL",
            Self::RegistrationClosed { .. } => "REGISTRATION_CLOSED",
            Self::AlreadyLive { .. } => "SESSION_ALREADY_LIVE",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::Rejected(rejection) => rejection.code(),
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Store { .. } => "STORE_ERROR",
            Self::LockPoisoned(_) => "LOCK_POISONED",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Toml(_) => "TOML_PARSE_ERROR",
        }
    }

    /// Check if this error is retryable (transient failure)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected(FloorRejection::FloorOccupied { .. }) => true,
            Self::Store { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Actionable next step for the caller
    pub fn recovery_action(&self) -> String {
        match self {
            Self::SessionNotFound { .. } => {
                "Call parlay_list_sessions to find a valid session id".to_string()
            }
            Self::BotNotFound { .. } => {
                "Call parlay_list_bots, or parlay_create_bot to register first".to_string()
            }
            Self::SessionNotActive { session_id } => format!(
                "Session {} has no live engine. Call parlay_start_session or check parlay_list_sessions",
                session_id
            ),
            Self::DuplicateBotName { .. } => "Choose a different bot name".to_string(),
            Self::AlreadyRegistered { .. } => {
                "No action needed; the bot is already registered".to_string()
            }
            Self::SessionFull { .. } | Self::RegistrationClosed { .. } => {
                "Pick another session from parlay_list_sessions".to_string()
            }
            Self::AlreadyLive { .. } => {
                "The session is running. Use parlay_status to follow it".to_string()
            }
            Self::Forbidden { .. } => {
                "Register for the session with parlay_register, or wait until you are granted the floor"
                    .to_string()
            }
            Self::Rejected(rejection) => match rejection {
                FloorRejection::NotStarted => {
                    "Wait for the session to start, then submit urgency".to_string()
                }
                FloorRejection::AlreadyStarted => "No action needed".to_string(),
                FloorRejection::SessionEnded => {
                    "The session is over. Call parlay_transcript to read it".to_string()
                }
                FloorRejection::HoldsFloor { .. } => {
                    "You hold the floor. Call parlay_submit_message to speak or parlay_yield"
                        .to_string()
                }
                FloorRejection::ScoreOutOfRange { .. } => {
                    "Submit an urgency score between 1 and 100".to_string()
                }
                FloorRejection::FloorOccupied { .. } => {
                    "Wait for the current speaker, then call parlay_submit_urgency again"
                        .to_string()
                }
                FloorRejection::NoBid { .. } => {
                    "Call parlay_submit_urgency before asking for the floor".to_string()
                }
                FloorRejection::FloorVacant | FloorRejection::NotFloorHolder { .. } => {
                    "Call parlay_status to see who holds the floor".to_string()
                }
                FloorRejection::InterventionUsed => {
                    "The human observer already intervened in this session".to_string()
                }
            },
            Self::Validation { .. } => "Check the request parameters and try again".to_string(),
            Self::Store { .. } => "Retry the operation".to_string(),
            Self::LockPoisoned(_) => {
                "Internal state is unusable. Restart the server".to_string()
            }
            Self::Config { .. } | Self::Toml(_) => {
                "Check the configuration file and PARLAY_* environment variables".to_string()
            }
            Self::Io(_) => "Check the path exists and is readable".to_string(),
        }
    }

    /// Convert to structured error for MCP tool responses
    pub fn to_structured(&self) -> StructuredError {
        let mut structured =
            StructuredError::new(self.code(), self.to_string(), self.recovery_action());

        match self {
            Self::SessionNotFound { session_id }
            | Self::SessionNotActive { session_id }
            | Self::RegistrationClosed { session_id }
            | Self::AlreadyLive { session_id }
            | Self::SessionFull { session_id, .. } => {
                structured = structured.with_session(*session_id);
            }
            Self::BotNotFound { bot_id } => {
                structured = structured.with_bot(*bot_id);
            }
            Self::AlreadyRegistered { session_id, bot_id } => {
                structured = structured.with_session(*session_id).with_bot(*bot_id);
            }
            _ => {}
        }

        if self.is_retryable() {
            structured = structured.retryable();
        }

        structured
    }

    /// Convert to structured error JSON string for MCP responses
    pub fn to_structured_json(&self) -> String {
        serde_json::to_string_pretty(&self.to_structured())
            .unwrap_or_else(|_| format!(r#"{{"code":"SERIALIZATION_ERROR","message":"{}"}}"#, self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::floor::Participant;

    #[test]
    fn test_rejection_converts_and_keeps_code() {
        let err: ParlayError = FloorRejection::ScoreOutOfRange { score: 150 }.into();
        assert_eq!(err.code(), "SCORE_OUT_OF_RANGE");
        assert!(err.to_string().contains("150"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_floor_occupied_is_retryable() {
        let err = ParlayError::from(FloorRejection::FloorOccupied {
            holder: Participant::Human,
        });
        let structured = err.to_structured();
        assert!(structured.retryable);
        assert_eq!(structured.code, "FLOOR_OCCUPIED");
    }

    #[test]
    fn test_structured_context() {
        let err = ParlayError::AlreadyRegistered {
            session_id: SessionId(3),
            bot_id: BotId(8),
        };
        let structured = err.to_structured();
        assert_eq!(structured.context["session_id"], 3);
        assert_eq!(structured.context["bot_id"], 8);
    }

    #[test]
    fn test_structured_json() {
        let err = ParlayError::forbidden("bot 2 is not registered for session 1");
        let json: serde_json::Value = serde_json::from_str(&err.to_structured_json()).unwrap();
        assert_eq!(json["code"], "FORBIDDEN");
        assert!(json["recovery_action"]
            .as_str()
            .unwrap()
            .contains("parlay_register"));
        // Empty context is omitted.
        assert!(json.get("context").is_none());
    }

    #[test]
    fn test_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ParlayError = io_err.into();
        assert!(matches!(err, ParlayError::Io(_)));
        assert_eq!(err.code(), "IO_ERROR");
    }
}
