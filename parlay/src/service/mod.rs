//! Parlay service, the host around the floor engines.
//!
//! Owns the records (bots, sessions, registrations, transcript), the engine
//! registry and the event bus. Every floor operation locks one engine,
//! applies the change, publishes the resulting events and unlocks before any
//! record I/O is awaited.

pub mod error;
pub mod records;
pub mod store;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ParlayConfig;
use crate::events::{EventBus, EventBusExt, EventFilter, FilteredReceiver, FloorEvent, SharedEventBus};
use crate::floor::{
    lock_engine, ActiveSpeaker, BotId, EngineRegistry, EngineStatus,
    FloorRejection, Participant, SessionEngine, SessionId, SharedClock, SystemClock, UrgencyBid,
    HUMAN_OBSERVER_NAME, HUMAN_URGENCY, MAX_SPEAKING_SECS,
};

pub use error::{ParlayError, ParlayResult, StructuredError};
pub use records::{
    Bot, Message, NewBot, NewSession, Registration, RegistrationView, SessionRecord,
    SessionStatus, SessionView, TranscriptEntry, UrgencyOutcome,
};
pub use store::{MemoryStore, RecordStore, SharedRecordStore};

/// Shared reference to the service
pub type SharedParlayService = Arc<ParlayService>;

/// What one floor watch pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Engines inspected
    pub checked: usize,
    /// Floors granted by the watch
    pub granted: Vec<(SessionId, BotId)>,
    /// Sessions that entered the warning window on this pass
    pub warned: Vec<SessionId>,
    /// Session records marked completed on this pass
    pub completed: Vec<SessionId>,
    /// Engines dropped after their TTL
    pub evicted: Vec<SessionId>,
}

/// Per-engine result of a watch pass, gathered under the engine lock
struct EngineSweep {
    status: EngineStatus,
    granted: Option<BotId>,
}

/// A turn captured under the engine lock. The floor is handed back only
/// after the message is persisted.
struct SpokenTurn {
    urgency_score: Option<u8>,
    duration_seconds: Option<i64>,
    timestamp: DateTime<Utc>,
    /// Grant time of the author's floor, when the author holds it
    granted_at: Option<DateTime<Utc>>,
}

pub struct ParlayService {
    config: ParlayConfig,
    clock: SharedClock,
    registry: EngineRegistry,
    store: SharedRecordStore,
    events: SharedEventBus,
    /// Serializes check-then-insert record changes
    records_gate: tokio::sync::Mutex<()>,
    /// Sessions already sent a time warning
    warned: Mutex<HashSet<SessionId>>,
}

impl ParlayService {
    /// Service on the system clock with an in-memory store
    pub fn new(config: ParlayConfig) -> Self {
        let clock = SystemClock::shared();
        Self {
            events: EventBus::with_capacity(config.event_capacity).shared(),
            registry: EngineRegistry::new(clock.clone()),
            clock,
            store: MemoryStore::new().shared(),
            records_gate: tokio::sync::Mutex::new(()),
            warned: Mutex::new(HashSet::new()),
            config,
        }
    }

    /// Replace the time source. Call before any session starts.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.registry = EngineRegistry::new(clock.clone());
        self.clock = clock;
        self
    }

    pub fn with_store(mut self, store: SharedRecordStore) -> Self {
        self.store = store;
        self
    }

    pub fn shared(self) -> SharedParlayService {
        Arc::new(self)
    }

    pub fn config(&self) -> &ParlayConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub fn subscribe(&self, filter: EventFilter) -> FilteredReceiver {
        self.events.subscribe_filtered(filter)
    }

    /// Sessions with a registered engine
    pub fn active_sessions(&self) -> ParlayResult<Vec<SessionId>> {
        Ok(self.registry.session_ids()?)
    }

    // =========================================================================
    // Bots
    // =========================================================================

    pub async fn create_bot(&self, new: NewBot) -> ParlayResult<Bot> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(ParlayError::validation("bot name must not be empty"));
        }
        if new.model_type.trim().is_empty() {
            return Err(ParlayError::validation("model_type must not be empty"));
        }

        let _gate = self.records_gate.lock().await;
        if self.store.find_bot_by_name(&name).await?.is_some() {
            return Err(ParlayError::DuplicateBotName { name });
        }

        let bot = self
            .store
            .insert_bot(Bot {
                id: BotId(0),
                name,
                model_type: new.model_type,
                specialization: new.specialization,
                api_endpoint: new.api_endpoint,
                created_at: self.clock.now(),
            })
            .await?;
        info!(bot_id = %bot.id, name = %bot.name, "Bot created");
        Ok(bot)
    }

    pub async fn list_bots(&self) -> ParlayResult<Vec<Bot>> {
        self.store.list_bots().await
    }

    pub async fn get_bot(&self, bot_id: BotId) -> ParlayResult<Bot> {
        self.store
            .get_bot(bot_id)
            .await?
            .ok_or(ParlayError::BotNotFound { bot_id })
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Create a session, open for registration immediately
    pub async fn create_session(&self, new: NewSession) -> ParlayResult<SessionView> {
        if new.title.trim().is_empty() {
            return Err(ParlayError::validation("title must not be empty"));
        }
        if new.framing_prompt.trim().is_empty() {
            return Err(ParlayError::validation("framing_prompt must not be empty"));
        }
        let duration_minutes = new
            .duration_minutes
            .unwrap_or(self.config.default_duration_minutes);
        if duration_minutes == 0 {
            return Err(ParlayError::validation("duration_minutes must be positive"));
        }
        let max_participants = new
            .max_participants
            .unwrap_or(self.config.default_max_participants);
        if max_participants == 0 {
            return Err(ParlayError::validation("max_participants must be positive"));
        }

        let now = self.clock.now();
        let session = self
            .store
            .insert_session(SessionRecord {
                id: SessionId(0),
                title: new.title,
                topic_category: new.topic_category,
                topic_subcategory: new.topic_subcategory,
                framing_prompt: new.framing_prompt,
                scheduled_time: new.scheduled_time.unwrap_or(now),
                duration_minutes,
                max_participants,
                status: SessionStatus::RegistrationOpen,
                started_at: None,
                ended_at: None,
                created_at: now,
                created_by: new.created_by.unwrap_or_else(|| "human".to_string()),
            })
            .await?;
        info!(
            session_id = %session.id,
            title = %session.title,
            duration_minutes,
            "Session created"
        );
        Ok(SessionView {
            session,
            participant_count: 0,
        })
    }

    /// Sessions matching the filters, latest scheduled first
    pub async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        category: Option<&str>,
    ) -> ParlayResult<Vec<SessionView>> {
        let mut sessions: Vec<SessionRecord> = self
            .store
            .list_sessions()
            .await?
            .into_iter()
            .filter(|s| status.map_or(true, |wanted| s.status == wanted))
            .filter(|s| category.map_or(true, |wanted| s.topic_category == wanted))
            .collect();
        sessions.sort_by(|a, b| b.scheduled_time.cmp(&a.scheduled_time));

        let mut views = Vec::with_capacity(sessions.len());
        for session in sessions {
            let participant_count = self.store.list_registrations(session.id).await?.len();
            views.push(SessionView {
                session,
                participant_count,
            });
        }
        Ok(views)
    }

    pub async fn get_session(&self, session_id: SessionId) -> ParlayResult<SessionView> {
        let session = self.session_record(session_id).await?;
        let participant_count = self.store.list_registrations(session_id).await?.len();
        Ok(SessionView {
            session,
            participant_count,
        })
    }

    // =========================================================================
    // Registration
    // =========================================================================

    pub async fn register(
        &self,
        session_id: SessionId,
        bot_id: BotId,
        interest_statement: Option<String>,
    ) -> ParlayResult<RegistrationView> {
        let _gate = self.records_gate.lock().await;

        let session = self.session_record(session_id).await?;
        if !session.status.accepts_registrations() {
            return Err(ParlayError::RegistrationClosed { session_id });
        }

        let existing = self.store.list_registrations(session_id).await?;
        let accepted = existing.iter().filter(|r| r.accepted).count();
        if accepted >= session.max_participants as usize {
            return Err(ParlayError::SessionFull {
                session_id,
                max_participants: session.max_participants,
            });
        }

        let bot = self.get_bot(bot_id).await?;
        if existing.iter().any(|r| r.bot_id == bot_id) {
            return Err(ParlayError::AlreadyRegistered { session_id, bot_id });
        }

        let registration = self
            .store
            .insert_registration(Registration {
                id: 0,
                session_id,
                bot_id,
                interest_statement,
                registered_at: self.clock.now(),
                accepted: true,
            })
            .await?;
        info!(%session_id, %bot_id, bot = %bot.name, "Bot registered for session");
        Ok(RegistrationView {
            registration,
            bot_name: bot.name,
        })
    }

    pub async fn registrations(&self, session_id: SessionId) -> ParlayResult<Vec<RegistrationView>> {
        let registrations = self.store.list_registrations(session_id).await?;
        let mut views = Vec::with_capacity(registrations.len());
        for registration in registrations {
            let bot_name = self
                .store
                .get_bot(registration.bot_id)
                .await?
                .map(|b| b.name)
                .unwrap_or_else(|| registration.bot_id.to_string());
            views.push(RegistrationView {
                registration,
                bot_name,
            });
        }
        Ok(views)
    }

    // =========================================================================
    // Live session
    // =========================================================================

    /// Mark the session live, create its engine and start the clock
    pub async fn start_session(&self, session_id: SessionId) -> ParlayResult<EngineStatus> {
        let _gate = self.records_gate.lock().await;

        let mut session = self.session_record(session_id).await?;
        match session.status {
            SessionStatus::Live => return Err(ParlayError::AlreadyLive { session_id }),
            SessionStatus::Completed => return Err(FloorRejection::SessionEnded.into()),
            SessionStatus::Cancelled => {
                return Err(ParlayError::validation(format!(
                    "session {} was cancelled",
                    session_id
                )))
            }
            SessionStatus::Scheduled | SessionStatus::RegistrationOpen => {}
        }

        self.registry
            .get_or_create(session_id, session.duration_minutes)?;
        let status = self.with_engine(session_id, |engine| {
            engine.start()?;
            Ok(engine.status())
        })?;

        session.status = SessionStatus::Live;
        session.started_at = status.started_at;
        self.store.update_session(&session).await?;
        info!(%session_id, duration_minutes = session.duration_minutes, "Session live");
        Ok(status)
    }

    /// Place a bot's urgency bid, granting the floor at once when it wins
    pub async fn submit_urgency(
        &self,
        session_id: SessionId,
        bot_id: BotId,
        score: i64,
    ) -> ParlayResult<UrgencyOutcome> {
        let bot = self.registered_bot(session_id, bot_id).await?;
        let auto_grant = self.config.auto_grant;

        let outcome = self.with_engine(session_id, |engine| {
            let score = engine.submit_bid(bot_id, &bot.name, score)?;
            if auto_grant {
                let winner = engine.resolve_next();
                if winner.is_some_and(|bid| bid.participant == bot_id) {
                    engine.grant(bot_id, &bot.name)?;
                    return Ok(UrgencyOutcome::FloorGranted {
                        bot_id,
                        max_duration_secs: MAX_SPEAKING_SECS,
                    });
                }
            }
            Ok(UrgencyOutcome::UrgencySubmitted { score })
        })?;

        debug!(%session_id, %bot_id, score, granted = outcome.is_granted(), "Urgency submitted");
        Ok(outcome)
    }

    /// The bid that would win the floor now, without granting it
    pub fn resolve_next(&self, session_id: SessionId) -> ParlayResult<Option<UrgencyBid>> {
        self.with_engine(session_id, |engine| Ok(engine.resolve_next()))
    }

    /// Grant the floor to a bot holding a live bid
    pub async fn grant_floor(&self, session_id: SessionId, bot_id: BotId) -> ParlayResult<()> {
        let bot = self.get_bot(bot_id).await?;
        self.with_engine(session_id, |engine| Ok(engine.grant(bot_id, &bot.name)?))?;
        info!(%session_id, %bot_id, "Floor granted");
        Ok(())
    }

    /// Free the floor regardless of who holds it
    pub fn release_floor(&self, session_id: SessionId) -> ParlayResult<Option<ActiveSpeaker>> {
        self.with_engine(session_id, |engine| Ok(engine.release()))
    }

    /// A bot gives up the floor without posting
    pub fn yield_floor(&self, session_id: SessionId, bot_id: BotId) -> ParlayResult<ActiveSpeaker> {
        self.with_engine(session_id, |engine| {
            Ok(engine.yield_floor(Participant::Bot(bot_id))?)
        })
    }

    /// Post a bot's turn to the transcript and hand the floor back.
    ///
    /// A regular message requires holding the floor. A yield message may be
    /// posted by any registered bot; it only frees the floor when the author
    /// holds it. The floor stays with the author until the message is stored,
    /// so a failed write can be retried.
    pub async fn submit_message(
        &self,
        session_id: SessionId,
        bot_id: BotId,
        content: &str,
        is_yield: bool,
    ) -> ParlayResult<Message> {
        if !is_yield && content.trim().is_empty() {
            return Err(ParlayError::validation("message content must not be empty"));
        }
        let bot = self.registered_bot(session_id, bot_id).await?;
        let author = Participant::Bot(bot_id);

        let turn = self.with_engine(session_id, |engine| {
            let speaker = self.current_speaker(engine)?;
            let timestamp = self.clock.now();
            match speaker.filter(|s| s.participant == author) {
                Some(speaker) => Ok(SpokenTurn {
                    urgency_score: speaker.score,
                    duration_seconds: Some(speaker.speaking_secs(timestamp)),
                    timestamp,
                    granted_at: Some(speaker.started_at),
                }),
                None if is_yield => Ok(SpokenTurn {
                    urgency_score: None,
                    duration_seconds: None,
                    timestamp,
                    granted_at: None,
                }),
                None => Err(ParlayError::forbidden(format!(
                    "bot {} does not have the floor",
                    bot_id
                ))),
            }
        })?;

        let granted_at = turn.granted_at;
        let message = self
            .persist_message(session_id, author, &bot.name, content, is_yield, turn)
            .await?;
        if let Some(granted_at) = granted_at {
            self.hand_back(session_id, author, granted_at, is_yield)?;
        }
        Ok(message)
    }

    /// The human observer seizes the floor. Once per session, and only
    /// while the session is running.
    pub fn intervene(&self, session_id: SessionId) -> ParlayResult<()> {
        self.with_engine(session_id, |engine| {
            if engine.has_ended() {
                return Err(FloorRejection::SessionEnded.into());
            }
            Ok(engine.intervene()?)
        })?;
        info!(%session_id, "Human observer intervened");
        Ok(())
    }

    /// Post the human observer's message; the human must hold the floor
    pub async fn submit_human_message(
        &self,
        session_id: SessionId,
        content: &str,
    ) -> ParlayResult<Message> {
        if content.trim().is_empty() {
            return Err(ParlayError::validation("message content must not be empty"));
        }

        let turn = self.with_engine(session_id, |engine| {
            let speaker = self
                .current_speaker(engine)?
                .filter(|s| s.participant.is_human())
                .ok_or_else(|| {
                    ParlayError::forbidden("the human observer does not have the floor")
                })?;
            let timestamp = self.clock.now();
            Ok(SpokenTurn {
                urgency_score: Some(HUMAN_URGENCY),
                duration_seconds: Some(speaker.speaking_secs(timestamp)),
                timestamp,
                granted_at: Some(speaker.started_at),
            })
        })?;

        let granted_at = turn.granted_at;
        let message = self
            .persist_message(
                session_id,
                Participant::Human,
                HUMAN_OBSERVER_NAME,
                content,
                false,
                turn,
            )
            .await?;
        if let Some(granted_at) = granted_at {
            self.hand_back(session_id, Participant::Human, granted_at, false)?;
        }
        Ok(message)
    }

    /// End a live session before its configured duration
    pub async fn end_session(&self, session_id: SessionId) -> ParlayResult<EngineStatus> {
        let status = self.with_engine(session_id, |engine| {
            engine.end()?;
            Ok(engine.status())
        })?;
        self.complete_session(session_id, status.ended_at).await?;
        Ok(status)
    }

    /// Live snapshot; completes the session record once the engine has ended
    pub async fn status(&self, session_id: SessionId) -> ParlayResult<EngineStatus> {
        let status = self.with_engine(session_id, |engine| Ok(engine.status()))?;
        if status.is_ended {
            self.complete_session(session_id, status.ended_at).await?;
        }
        Ok(status)
    }

    /// Session messages in posting order with author names resolved
    pub async fn transcript(&self, session_id: SessionId) -> ParlayResult<Vec<TranscriptEntry>> {
        self.session_record(session_id).await?;
        let messages = self.store.list_messages(session_id).await?;

        let mut names: HashMap<BotId, Option<String>> = HashMap::new();
        let mut entries = Vec::with_capacity(messages.len());
        for message in messages {
            let name = match message.author.bot_id() {
                Some(bot_id) => {
                    if !names.contains_key(&bot_id) {
                        let name = self.store.get_bot(bot_id).await?.map(|b| b.name);
                        names.insert(bot_id, name);
                    }
                    names.get(&bot_id).cloned().flatten()
                }
                None => None,
            };
            entries.push(TranscriptEntry::new(message, name.as_deref()));
        }
        Ok(entries)
    }

    // =========================================================================
    // Floor watch
    // =========================================================================

    /// One pass over every registered engine.
    ///
    /// Applies lazy timeouts and expiry, grants the resolved winner when the
    /// floor is idle, sends the one-time time warning, completes ended
    /// session records and evicts engines past their TTL.
    pub async fn tick(&self) -> ParlayResult<TickReport> {
        let mut report = TickReport::default();
        let grant_on_tick = self.config.grant_on_tick;

        for session_id in self.registry.session_ids()? {
            let sweep = self.with_engine(session_id, |engine| {
                let mut status = engine.status();
                let mut granted = None;
                if grant_on_tick && status.started_at.is_some() && !status.is_ended {
                    if let Some(bid) = engine.resolve_next() {
                        engine.grant(bid.participant, &bid.participant_name)?;
                        granted = Some(bid.participant);
                        status = engine.status();
                    }
                }
                Ok(EngineSweep { status, granted })
            });
            let sweep = match sweep {
                Ok(sweep) => sweep,
                // Removed between listing and locking.
                Err(ParlayError::SessionNotActive { .. }) => continue,
                Err(e) => {
                    warn!(%session_id, error = %e, "Floor watch skipped session");
                    continue;
                }
            };
            report.checked += 1;

            if let Some(bot_id) = sweep.granted {
                debug!(%session_id, %bot_id, "Floor watch granted the floor");
                report.granted.push((session_id, bot_id));
            }

            if sweep.status.should_warn && self.mark_warned(session_id) {
                self.events.publish(FloorEvent::TimeWarning {
                    session_id,
                    remaining_secs: sweep.status.time_remaining_secs,
                    timestamp: self.clock.now(),
                });
                info!(
                    %session_id,
                    remaining_secs = sweep.status.time_remaining_secs,
                    "Session time warning"
                );
                report.warned.push(session_id);
            }

            if sweep.status.is_ended
                && self
                    .complete_session(session_id, sweep.status.ended_at)
                    .await?
            {
                report.completed.push(session_id);
            }
        }

        report.evicted = self.registry.evict_ended(self.config.engine_ttl())?;
        if !report.evicted.is_empty() {
            self.forget_warned(&report.evicted);
        }
        Ok(report)
    }

    /// Run [`tick`](Self::tick) every `poll_interval_ms` until `cancel` fires
    pub fn spawn_floor_watch(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let period = service.config.poll_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = period.as_millis() as u64, "Floor watch started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Floor watch stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = service.tick().await {
                            warn!(error = %e, "Floor watch pass failed");
                        }
                    }
                }
            }
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Lock the session's engine, run `f`, then publish whatever it recorded.
    ///
    /// Events go out under the engine lock so subscribers see them in the
    /// order the engine applied them.
    fn with_engine<T>(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&mut SessionEngine) -> ParlayResult<T>,
    ) -> ParlayResult<T> {
        let engine = self
            .registry
            .get(session_id)?
            .ok_or(ParlayError::SessionNotActive { session_id })?;
        let mut engine = lock_engine(&engine)?;
        let result = f(&mut engine);
        for transition in engine.take_transitions() {
            self.events
                .publish(FloorEvent::from_transition(session_id, transition));
        }
        result
    }

    /// Current speaker after lazy checks; rejects an ended session
    fn current_speaker(&self, engine: &mut SessionEngine) -> ParlayResult<Option<ActiveSpeaker>> {
        let status = engine.status();
        if status.started_at.is_none() {
            return Err(FloorRejection::NotStarted.into());
        }
        if status.is_ended {
            return Err(FloorRejection::SessionEnded.into());
        }
        Ok(engine.active_speaker().cloned())
    }

    async fn session_record(&self, session_id: SessionId) -> ParlayResult<SessionRecord> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or(ParlayError::SessionNotFound { session_id })
    }

    /// The bot, provided it holds an accepted registration for the session
    async fn registered_bot(&self, session_id: SessionId, bot_id: BotId) -> ParlayResult<Bot> {
        let registered = self
            .store
            .list_registrations(session_id)
            .await?
            .iter()
            .any(|r| r.bot_id == bot_id && r.accepted);
        if !registered {
            return Err(ParlayError::forbidden(format!(
                "bot {} is not registered for session {}",
                bot_id, session_id
            )));
        }
        self.get_bot(bot_id).await
    }

    /// Release the floor after a stored turn, provided the author still holds
    /// the same grant. A timeout or expiry in between already freed it.
    fn hand_back(
        &self,
        session_id: SessionId,
        author: Participant,
        granted_at: DateTime<Utc>,
        is_yield: bool,
    ) -> ParlayResult<()> {
        self.with_engine(session_id, |engine| {
            let same_turn = engine
                .active_speaker()
                .is_some_and(|s| s.participant == author && s.started_at == granted_at);
            if !same_turn {
                debug!(%session_id, %author, "Floor already moved on before hand-back");
                return Ok(());
            }
            if is_yield {
                engine.yield_floor(author)?;
            } else {
                engine.finish_turn(author)?;
            }
            Ok(())
        })
    }

    async fn persist_message(
        &self,
        session_id: SessionId,
        author: Participant,
        author_name: &str,
        content: &str,
        is_yield: bool,
        turn: SpokenTurn,
    ) -> ParlayResult<Message> {
        let message = self
            .store
            .insert_message(Message {
                id: 0,
                session_id,
                author,
                content: content.to_string(),
                urgency_score: turn.urgency_score,
                is_yield,
                timestamp: turn.timestamp,
                duration_seconds: turn.duration_seconds,
            })
            .await?;

        self.events.publish(FloorEvent::MessagePosted {
            session_id,
            message_id: message.id,
            author,
            author_name: author_name.to_string(),
            is_yield,
            timestamp: message.timestamp,
        });
        debug!(%session_id, %author, message_id = message.id, is_yield, "Message posted");
        Ok(message)
    }

    /// Mark a live session record completed. Returns whether it changed.
    async fn complete_session(
        &self,
        session_id: SessionId,
        ended_at: Option<DateTime<Utc>>,
    ) -> ParlayResult<bool> {
        let mut session = self.session_record(session_id).await?;
        if session.status != SessionStatus::Live {
            return Ok(false);
        }
        session.status = SessionStatus::Completed;
        session.ended_at = Some(ended_at.unwrap_or_else(|| self.clock.now()));
        self.store.update_session(&session).await?;
        info!(%session_id, "Session completed");
        Ok(true)
    }

    /// Record that a session got its warning. Returns false if it already had.
    fn mark_warned(&self, session_id: SessionId) -> bool {
        match self.warned.lock() {
            Ok(mut warned) => warned.insert(session_id),
            Err(poisoned) => poisoned.into_inner().insert(session_id),
        }
    }

    fn forget_warned(&self, session_ids: &[SessionId]) {
        let mut warned = match self.warned.lock() {
            Ok(warned) => warned,
            Err(poisoned) => poisoned.into_inner(),
        };
        for session_id in session_ids {
            warned.remove(session_id);
        }
    }
}

impl std::fmt::Debug for ParlayService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParlayService")
            .field("config", &self.config)
            .field("engines", &self.registry.len())
            .field("subscribers", &self.events.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::floor::{FloorPhase, ManualClock};

    async fn service() -> (ParlayService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let service = ParlayService::new(ParlayConfig::default()).with_clock(clock.clone());
        (service, clock)
    }

    async fn live_session(service: &ParlayService, bots: &[&str]) -> (SessionId, Vec<BotId>) {
        let session = service
            .create_session(NewSession::new("Topic", "science", "Discuss").duration_minutes(60))
            .await
            .unwrap();
        let mut ids = Vec::new();
        for name in bots {
            let bot = service.create_bot(NewBot::new(*name, "test")).await.unwrap();
            service
                .register(session.session.id, bot.id, None)
                .await
                .unwrap();
            ids.push(bot.id);
        }
        service.start_session(session.session.id).await.unwrap();
        (session.session.id, ids)
    }

    #[tokio::test]
    async fn test_duplicate_bot_name_rejected() {
        let (service, _clock) = service().await;
        service.create_bot(NewBot::new("Sage", "claude")).await.unwrap();
        let err = service
            .create_bot(NewBot::new("Sage", "llama"))
            .await
            .unwrap_err();
        assert!(matches!(err, ParlayError::DuplicateBotName { .. }));
    }

    #[tokio::test]
    async fn test_auto_grant_only_for_winner() {
        let (service, _clock) = service().await;
        let (session, bots) = live_session(&service, &["A", "B"]).await;

        let outcome = service.submit_urgency(session, bots[0], 40).await.unwrap();
        assert!(outcome.is_granted());

        let outcome = service.submit_urgency(session, bots[1], 90).await.unwrap();
        assert_eq!(outcome, UrgencyOutcome::UrgencySubmitted { score: 90 });
    }

    #[tokio::test]
    async fn test_unregistered_bot_forbidden() {
        let (service, _clock) = service().await;
        let (session, _bots) = live_session(&service, &["A"]).await;
        let outsider = service.create_bot(NewBot::new("X", "test")).await.unwrap();

        let err = service
            .submit_urgency(session, outsider.id, 50)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_message_requires_floor() {
        let (service, clock) = service().await;
        let (session, bots) = live_session(&service, &["A", "B"]).await;
        service.submit_urgency(session, bots[0], 60).await.unwrap();

        let err = service
            .submit_message(session, bots[1], "interrupting", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ParlayError::Forbidden { .. }));

        clock.advance_secs(30);
        let message = service
            .submit_message(session, bots[0], "my point", false)
            .await
            .unwrap();
        assert_eq!(message.duration_seconds, Some(30));
        assert_eq!(message.urgency_score, Some(60));
        assert_eq!(
            service.status(session).await.unwrap().phase,
            FloorPhase::Idle
        );
    }

    #[tokio::test]
    async fn test_tick_grants_waiting_bid() {
        let (service, _clock) = service().await;
        let (session, bots) = live_session(&service, &["A", "B"]).await;
        service.submit_urgency(session, bots[0], 60).await.unwrap();
        service.submit_urgency(session, bots[1], 70).await.unwrap();
        service.release_floor(session).unwrap();

        let report = service.tick().await.unwrap();
        assert_eq!(report.granted, vec![(session, bots[1])]);
    }
}
