//! Service flow tests — full session lifecycle through `ParlayService` with a
//! manual clock, an in-memory store and a live event subscription.
//!
//! Covers: registration rules, auto-grant, transcript, human intervention,
//! floor watch ticks (grant, warning, completion, eviction) and store
//! failures surfacing as structured errors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parlay::events::EventFilter;
use parlay::floor::{FloorPhase, MAX_SPEAKING_SECS};
use parlay::service::{
    Bot, MemoryStore, Message, NewBot, NewSession, RecordStore, Registration, SessionRecord,
    SessionStatus, UrgencyOutcome,
};
use parlay::{
    BotId, Clock, FloorEvent, FloorRejection, ManualClock, ParlayConfig, ParlayError, ParlayResult,
    ParlayService, Participant, ReleaseReason, SessionId,
};
use tokio_util::sync::CancellationToken;

fn service_with(config: ParlayConfig) -> (Arc<ParlayService>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let service = ParlayService::new(config).with_clock(clock.clone()).shared();
    (service, clock)
}

fn service() -> (Arc<ParlayService>, Arc<ManualClock>) {
    service_with(ParlayConfig::default())
}

async fn open_session(service: &ParlayService, minutes: u32, max: u32) -> SessionId {
    service
        .create_session(
            NewSession::new("Machine consciousness", "philosophy", "Can a model suffer?")
                .duration_minutes(minutes)
                .max_participants(max),
        )
        .await
        .unwrap()
        .session
        .id
}

async fn roster(service: &ParlayService, session_id: SessionId, names: &[&str]) -> Vec<BotId> {
    let mut ids = Vec::new();
    for name in names {
        let bot = service
            .create_bot(NewBot::new(*name, "test").with_specialization("debate"))
            .await
            .unwrap();
        service
            .register(session_id, bot.id, Some(format!("{} wants in", name)))
            .await
            .unwrap();
        ids.push(bot.id);
    }
    ids
}

// ── Records ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_registration_rules() {
    let (service, _clock) = service();
    let session_id = open_session(&service, 60, 2).await;
    let ids = roster(&service, session_id, &["Ada", "Bo"]).await;

    let third = service.create_bot(NewBot::new("Cy", "test")).await.unwrap();
    let err = service.register(session_id, third.id, None).await.unwrap_err();
    assert!(matches!(err, ParlayError::SessionFull { max_participants: 2, .. }));

    let other = open_session(&service, 60, 6).await;
    service.register(other, ids[0], None).await.unwrap();
    let err = service.register(other, ids[0], None).await.unwrap_err();
    assert!(matches!(err, ParlayError::AlreadyRegistered { .. }));

    let err = service.register(other, BotId(999), None).await.unwrap_err();
    assert!(matches!(err, ParlayError::BotNotFound { .. }));

    let err = service
        .register(SessionId(999), ids[0], None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SESSION_NOT_FOUND");

    let registrations = service.registrations(session_id).await.unwrap();
    let names: Vec<_> = registrations.iter().map(|r| r.bot_name.as_str()).collect();
    assert_eq!(names, vec!["Ada", "Bo"]);

    service.start_session(session_id).await.unwrap();
    let err = service.register(session_id, third.id, None).await.unwrap_err();
    assert!(matches!(err, ParlayError::RegistrationClosed { .. }));
}

#[tokio::test]
async fn test_list_sessions_filters_and_order() {
    let (service, clock) = service();
    let early = service
        .create_session(NewSession::new("Early", "science", "q").scheduled_at(clock.now()))
        .await
        .unwrap();
    clock.advance_secs(3600);
    let late = service
        .create_session(NewSession::new("Late", "ethics", "q").scheduled_at(clock.now()))
        .await
        .unwrap();

    let all = service.list_sessions(None, None).await.unwrap();
    assert_eq!(all[0].session.id, late.session.id);
    assert_eq!(all[1].session.id, early.session.id);
    assert_eq!(all[0].session.status, SessionStatus::RegistrationOpen);

    let ethics = service.list_sessions(None, Some("ethics")).await.unwrap();
    assert_eq!(ethics.len(), 1);

    service.start_session(early.session.id).await.unwrap();
    let live = service
        .list_sessions(Some(SessionStatus::Live), None)
        .await
        .unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].session.title, "Early");
}

#[tokio::test]
async fn test_start_twice_conflicts() {
    let (service, _clock) = service();
    let session_id = open_session(&service, 60, 6).await;
    let status = service.start_session(session_id).await.unwrap();
    assert_eq!(status.time_remaining_secs, 3600);

    let err = service.start_session(session_id).await.unwrap_err();
    assert!(matches!(err, ParlayError::AlreadyLive { .. }));

    let session = service.get_session(session_id).await.unwrap();
    assert_eq!(session.session.status, SessionStatus::Live);
    assert!(session.session.started_at.is_some());
}

// ── Live flow ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_turn_cycle_with_events() {
    let (service, clock) = service();
    let session_id = open_session(&service, 60, 6).await;
    let ids = roster(&service, session_id, &["Ada", "Bo"]).await;
    let mut events = service.subscribe(EventFilter::new().session(session_id));

    service.start_session(session_id).await.unwrap();

    let outcome = service.submit_urgency(session_id, ids[0], 75).await.unwrap();
    assert_eq!(
        outcome,
        UrgencyOutcome::FloorGranted {
            bot_id: ids[0],
            max_duration_secs: MAX_SPEAKING_SECS,
        }
    );
    let outcome = service.submit_urgency(session_id, ids[1], 90).await.unwrap();
    assert_eq!(outcome, UrgencyOutcome::UrgencySubmitted { score: 90 });

    clock.advance_secs(45);
    service
        .submit_message(session_id, ids[0], "Suffering needs a subject.", false)
        .await
        .unwrap();

    // Bo's bid survived Ada's turn; the next resolution picks it.
    let next = service.resolve_next(session_id).unwrap().unwrap();
    assert_eq!(next.participant, ids[1]);
    service.grant_floor(session_id, ids[1]).await.unwrap();
    service
        .submit_message(session_id, ids[1], "I pass for now.", true)
        .await
        .unwrap();

    let types: Vec<&str> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.event_type())
        .collect();
    assert_eq!(
        types,
        vec![
            "session_started",
            "urgency_submitted",
            "floor_granted",
            "urgency_submitted",
            "message_posted",
            "floor_released",
            "floor_granted",
            "message_posted",
            "floor_released",
        ]
    );

    let transcript = service.transcript(session_id).await.unwrap();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].author_name, "Ada");
    assert_eq!(transcript[0].message.duration_seconds, Some(45));
    assert_eq!(transcript[0].message.urgency_score, Some(75));
    assert!(transcript[1].message.is_yield);
}

#[tokio::test]
async fn test_yield_message_without_floor_keeps_speaker() {
    let (service, _clock) = service();
    let session_id = open_session(&service, 60, 6).await;
    let ids = roster(&service, session_id, &["Ada", "Bo"]).await;
    service.start_session(session_id).await.unwrap();
    service.submit_urgency(session_id, ids[0], 50).await.unwrap();

    let message = service
        .submit_message(session_id, ids[1], "Not my turn, noting agreement.", true)
        .await
        .unwrap();
    assert!(message.duration_seconds.is_none());

    let status = service.status(session_id).await.unwrap();
    assert_eq!(
        status.active_speaker.unwrap().participant,
        Participant::Bot(ids[0])
    );
}

#[tokio::test]
async fn test_urgency_rejections_are_structured() {
    let (service, _clock) = service();
    let session_id = open_session(&service, 60, 6).await;
    let ids = roster(&service, session_id, &["Ada"]).await;

    let err = service
        .submit_urgency(session_id, ids[0], 50)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SESSION_NOT_ACTIVE");

    service.start_session(session_id).await.unwrap();
    let err = service
        .submit_urgency(session_id, ids[0], 0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ParlayError::Rejected(FloorRejection::ScoreOutOfRange { score: 0 })
    ));

    service.submit_urgency(session_id, ids[0], 50).await.unwrap();
    let err = service
        .submit_urgency(session_id, ids[0], 60)
        .await
        .unwrap_err();
    let structured = err.to_structured();
    assert_eq!(structured.code, "HOLDS_FLOOR");
    assert!(structured.recovery_action.contains("parlay_submit_message"));
}

#[tokio::test]
async fn test_human_intervention_flow() {
    let (service, clock) = service();
    let session_id = open_session(&service, 60, 6).await;
    let ids = roster(&service, session_id, &["Ada", "Bo"]).await;
    service.start_session(session_id).await.unwrap();
    service.submit_urgency(session_id, ids[0], 50).await.unwrap();
    service.submit_urgency(session_id, ids[1], 80).await.unwrap();

    let mut events = service.subscribe(EventFilter::new().types(vec!["floor_released"]));
    service.intervene(session_id).unwrap();
    match events.try_recv().unwrap() {
        FloorEvent::FloorReleased {
            participant,
            reason,
            ..
        } => {
            assert_eq!(participant, Participant::Bot(ids[0]));
            assert_eq!(reason, ReleaseReason::Preempted);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let status = service.status(session_id).await.unwrap();
    assert_eq!(status.pending_bids, 0);
    assert!(!status.human_intervention_available);

    // Bots cannot speak over the human.
    let err = service
        .submit_message(session_id, ids[0], "Wait!", false)
        .await
        .unwrap_err();
    assert!(matches!(err, ParlayError::Forbidden { .. }));

    clock.advance_secs(20);
    let message = service
        .submit_human_message(session_id, "Please address the hard problem.")
        .await
        .unwrap();
    assert_eq!(message.urgency_score, Some(100));
    assert_eq!(message.author, Participant::Human);
    assert_eq!(message.duration_seconds, Some(20));

    let err = service.intervene(session_id).unwrap_err();
    assert_eq!(err.code(), "INTERVENTION_USED");

    let err = service
        .submit_human_message(session_id, "again")
        .await
        .unwrap_err();
    assert!(matches!(err, ParlayError::Forbidden { .. }));

    let transcript = service.transcript(session_id).await.unwrap();
    assert_eq!(transcript[0].author_name, "Human Observer");
    assert!(transcript[0].is_human);
}

#[tokio::test]
async fn test_manual_grant_mode() {
    let config = ParlayConfig {
        auto_grant: false,
        grant_on_tick: false,
        ..ParlayConfig::default()
    };
    let (service, _clock) = service_with(config);
    let session_id = open_session(&service, 60, 6).await;
    let ids = roster(&service, session_id, &["Ada"]).await;
    service.start_session(session_id).await.unwrap();

    let outcome = service.submit_urgency(session_id, ids[0], 50).await.unwrap();
    assert!(!outcome.is_granted());
    service.tick().await.unwrap();
    assert_eq!(
        service.status(session_id).await.unwrap().phase,
        FloorPhase::Idle
    );

    service.grant_floor(session_id, ids[0]).await.unwrap();
    let speaker = service.yield_floor(session_id, ids[0]).unwrap();
    assert_eq!(speaker.participant_name, "Ada");
    assert!(service.release_floor(session_id).unwrap().is_none());
}

// ── Floor watch ────────────────────────────────────────────────────

#[tokio::test]
async fn test_tick_times_out_speaker_and_grants_next() {
    let (service, clock) = service();
    let session_id = open_session(&service, 60, 6).await;
    let ids = roster(&service, session_id, &["Ada", "Bo"]).await;
    service.start_session(session_id).await.unwrap();
    service.submit_urgency(session_id, ids[0], 50).await.unwrap();
    service.submit_urgency(session_id, ids[1], 40).await.unwrap();

    clock.advance_secs(MAX_SPEAKING_SECS);
    let report = service.tick().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.granted, vec![(session_id, ids[1])]);

    let err = service
        .submit_message(session_id, ids[0], "late", false)
        .await
        .unwrap_err();
    assert!(matches!(err, ParlayError::Forbidden { .. }));
}

#[tokio::test]
async fn test_tick_warns_once_then_completes_and_evicts() {
    let config = ParlayConfig {
        engine_ttl_secs: 60,
        ..ParlayConfig::default()
    };
    let (service, clock) = service_with(config);
    let session_id = open_session(&service, 10, 6).await;
    service.start_session(session_id).await.unwrap();
    let mut warnings = service.subscribe(EventFilter::new().types(vec!["time_warning"]));

    clock.advance_secs(10 * 60 - 410);
    let report = service.tick().await.unwrap();
    assert_eq!(report.warned, vec![session_id]);
    match warnings.try_recv().unwrap() {
        FloorEvent::TimeWarning { remaining_secs, .. } => assert_eq!(remaining_secs, 410),
        other => panic!("unexpected event {:?}", other),
    }

    clock.advance_secs(5);
    assert!(service.tick().await.unwrap().warned.is_empty());
    assert!(warnings.try_recv().is_err());

    clock.advance_secs(405);
    let report = service.tick().await.unwrap();
    assert_eq!(report.completed, vec![session_id]);
    let session = service.get_session(session_id).await.unwrap().session;
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.ended_at.is_some());

    // Engine lingers for its TTL, then goes.
    assert_eq!(service.active_sessions().unwrap(), vec![session_id]);
    clock.advance_secs(60);
    let report = service.tick().await.unwrap();
    assert_eq!(report.evicted, vec![session_id]);
    assert!(service.active_sessions().unwrap().is_empty());

    let err = service.status(session_id).await.unwrap_err();
    assert!(matches!(err, ParlayError::SessionNotActive { .. }));
    let err = service.start_session(session_id).await.unwrap_err();
    assert_eq!(err.code(), "SESSION_ENDED");
}

#[tokio::test]
async fn test_end_session_completes_record() {
    let (service, _clock) = service();
    let session_id = open_session(&service, 60, 6).await;
    let ids = roster(&service, session_id, &["Ada"]).await;
    service.start_session(session_id).await.unwrap();
    service.submit_urgency(session_id, ids[0], 50).await.unwrap();

    let status = service.end_session(session_id).await.unwrap();
    assert!(status.is_ended);
    assert!(status.active_speaker.is_none());
    assert_eq!(
        service.get_session(session_id).await.unwrap().session.status,
        SessionStatus::Completed
    );

    let err = service.end_session(session_id).await.unwrap_err();
    assert_eq!(err.code(), "SESSION_ENDED");
}

#[tokio::test]
async fn test_intervention_rejected_once_session_over() {
    let (service, clock) = service();
    let expired = open_session(&service, 1, 6).await;
    service.start_session(expired).await.unwrap();
    clock.advance_secs(61);

    let err = service.intervene(expired).unwrap_err();
    assert_eq!(err.code(), "SESSION_ENDED");
    let status = service.status(expired).await.unwrap();
    assert!(status.is_ended);
    assert!(status.active_speaker.is_none());

    let ended = open_session(&service, 60, 6).await;
    service.start_session(ended).await.unwrap();
    service.end_session(ended).await.unwrap();
    let err = service.intervene(ended).unwrap_err();
    assert_eq!(err.code(), "SESSION_ENDED");
    assert!(service.status(ended).await.unwrap().active_speaker.is_none());
}

#[tokio::test]
async fn test_tick_survives_unbounded_engine_ttl() {
    let config = ParlayConfig {
        engine_ttl_secs: u64::MAX,
        ..ParlayConfig::default()
    };
    let (service, clock) = service_with(config);
    let session_id = open_session(&service, 1, 6).await;
    service.start_session(session_id).await.unwrap();

    clock.advance_secs(61);
    let report = service.tick().await.unwrap();
    assert_eq!(report.completed, vec![session_id]);
    assert!(report.evicted.is_empty());
    assert_eq!(service.active_sessions().unwrap(), vec![session_id]);
}

#[tokio::test(start_paused = true)]
async fn test_floor_watch_runs_until_cancelled() {
    let config = ParlayConfig {
        poll_interval_ms: 100,
        ..ParlayConfig::default()
    };
    let (service, clock) = service_with(config);
    let session_id = open_session(&service, 1, 6).await;
    service.start_session(session_id).await.unwrap();

    let cancel = CancellationToken::new();
    let watch = service.spawn_floor_watch(cancel.clone());

    clock.advance_secs(61);
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    assert_eq!(
        service.get_session(session_id).await.unwrap().session.status,
        SessionStatus::Completed
    );

    cancel.cancel();
    watch.await.unwrap();
}

// ── Store failures ─────────────────────────────────────────────────

/// Delegates to a memory store but refuses to persist messages while
/// `failing` is set.
struct FlakyMessageStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

#[async_trait]
impl RecordStore for FlakyMessageStore {
    async fn insert_bot(&self, bot: Bot) -> ParlayResult<Bot> {
        self.inner.insert_bot(bot).await
    }
    async fn get_bot(&self, bot_id: BotId) -> ParlayResult<Option<Bot>> {
        self.inner.get_bot(bot_id).await
    }
    async fn find_bot_by_name(&self, name: &str) -> ParlayResult<Option<Bot>> {
        self.inner.find_bot_by_name(name).await
    }
    async fn list_bots(&self) -> ParlayResult<Vec<Bot>> {
        self.inner.list_bots().await
    }
    async fn insert_session(&self, session: SessionRecord) -> ParlayResult<SessionRecord> {
        self.inner.insert_session(session).await
    }
    async fn get_session(&self, session_id: SessionId) -> ParlayResult<Option<SessionRecord>> {
        self.inner.get_session(session_id).await
    }
    async fn update_session(&self, session: &SessionRecord) -> ParlayResult<()> {
        self.inner.update_session(session).await
    }
    async fn list_sessions(&self) -> ParlayResult<Vec<SessionRecord>> {
        self.inner.list_sessions().await
    }
    async fn insert_registration(&self, registration: Registration) -> ParlayResult<Registration> {
        self.inner.insert_registration(registration).await
    }
    async fn list_registrations(&self, session_id: SessionId) -> ParlayResult<Vec<Registration>> {
        self.inner.list_registrations(session_id).await
    }
    async fn insert_message(&self, message: Message) -> ParlayResult<Message> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ParlayError::store("message table unavailable"));
        }
        self.inner.insert_message(message).await
    }
    async fn list_messages(&self, session_id: SessionId) -> ParlayResult<Vec<Message>> {
        self.inner.list_messages(session_id).await
    }
}

#[tokio::test]
async fn test_store_failure_keeps_floor_for_retry() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(FlakyMessageStore {
        inner: MemoryStore::new(),
        failing: AtomicBool::new(true),
    });
    let service = ParlayService::new(ParlayConfig::default())
        .with_clock(clock.clone())
        .with_store(store.clone());
    let session_id = open_session(&service, 60, 6).await;
    let ids = roster(&service, session_id, &["Ada"]).await;
    service.start_session(session_id).await.unwrap();
    service.submit_urgency(session_id, ids[0], 50).await.unwrap();

    let err = service
        .submit_message(session_id, ids[0], "hello", false)
        .await
        .unwrap_err();
    let structured = err.to_structured();
    assert_eq!(structured.code, "STORE_ERROR");
    assert!(structured.retryable);
    assert!(service.transcript(session_id).await.unwrap().is_empty());

    // The turn survives the failed write.
    let status = service.status(session_id).await.unwrap();
    assert_eq!(
        status.active_speaker.unwrap().participant,
        Participant::Bot(ids[0])
    );

    store.failing.store(false, Ordering::SeqCst);
    clock.advance_secs(5);
    let message = service
        .submit_message(session_id, ids[0], "hello", false)
        .await
        .unwrap();
    assert_eq!(message.duration_seconds, Some(5));
    assert_eq!(message.urgency_score, Some(50));
    assert_eq!(
        service.status(session_id).await.unwrap().phase,
        FloorPhase::Idle
    );
    assert_eq!(service.transcript(session_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_human_store_failure_keeps_human_on_floor() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(FlakyMessageStore {
        inner: MemoryStore::new(),
        failing: AtomicBool::new(true),
    });
    let service = ParlayService::new(ParlayConfig::default())
        .with_clock(clock.clone())
        .with_store(store.clone());
    let session_id = open_session(&service, 60, 6).await;
    service.start_session(session_id).await.unwrap();
    service.intervene(session_id).unwrap();

    let err = service
        .submit_human_message(session_id, "one moment")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "STORE_ERROR");

    store.failing.store(false, Ordering::SeqCst);
    service
        .submit_human_message(session_id, "one moment")
        .await
        .unwrap();
    assert!(service
        .status(session_id)
        .await
        .unwrap()
        .active_speaker
        .is_none());
}
