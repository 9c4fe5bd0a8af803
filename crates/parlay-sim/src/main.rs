//! Simulated Parlay session
//!
//! Runs a whole session in-process: a scripted roster registers, gives
//! opening statements, then bids for the floor round after round. Each round
//! goes to the highest bid while the floor watch enforces speaking limits and
//! the session clock. The human observer steps in once. Session time runs on
//! a manual clock advanced by each turn's speaking time, so a full session
//! finishes in seconds.
//!
//! # Usage
//!
//! ```bash
//! parlay-sim
//! parlay-sim --rounds 12 --duration-minutes 45 --intervene-at 5 --seed 7
//! RUST_LOG=parlay=debug parlay-sim --intervene-at 0
//! ```

mod roster;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use parlay::events::{EventFilter, FilteredReceiver};
use parlay::service::NewSession;
use parlay::{
    BotId, Clock, FloorEvent, FloorRejection, ManualClock, ParlayConfig, ParlayError,
    ParlayService, Participant, SessionId, SharedParlayService,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use roster::{Dice, Persona, FRAMING_PROMPT, HUMAN_LINE, LINES, ROSTER};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bidding rounds after the opening statements
    #[arg(long, default_value_t = 8)]
    rounds: u32,

    /// Session length on the simulated clock
    #[arg(long, default_value_t = 30)]
    duration_minutes: u32,

    /// Round in which the human observer intervenes (0 = never)
    #[arg(long, default_value_t = 3)]
    intervene_at: u32,

    /// Seed for urgencies, speaking times and yields
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Floor watch tick period in milliseconds
    #[arg(long, default_value_t = 20)]
    poll_interval_ms: u64,
}

/// Everything a turn needs
struct Stage {
    service: SharedParlayService,
    clock: Arc<ManualClock>,
    session_id: SessionId,
    bots: Vec<(BotId, &'static Persona)>,
}

impl Stage {
    fn persona(&self, bot_id: BotId) -> Option<&'static Persona> {
        self.bots
            .iter()
            .find(|(id, _)| *id == bot_id)
            .map(|(_, persona)| *persona)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlay_sim=info,parlay=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.duration_minutes == 0 {
        bail!("--duration-minutes must be positive");
    }

    // Grants wait until every bot of a round has bid; the watch only
    // enforces time limits, warnings and expiry.
    let config = ParlayConfig {
        poll_interval_ms: args.poll_interval_ms,
        auto_grant: false,
        grant_on_tick: false,
        ..ParlayConfig::default()
    };
    config.validate().context("invalid simulation settings")?;

    let clock = Arc::new(ManualClock::starting_now());
    let service = ParlayService::new(config)
        .with_clock(clock.clone())
        .shared();

    let cancel = CancellationToken::new();
    let watch = service.spawn_floor_watch(cancel.clone());

    let stage = setup(service.clone(), clock, args.duration_minutes).await?;
    let narrator = tokio::spawn(narrate(
        service.subscribe(EventFilter::new().session(stage.session_id)),
        cancel.clone(),
    ));

    info!(
        session_id = %stage.session_id,
        bots = stage.bots.len(),
        rounds = args.rounds,
        seed = args.seed,
        "Simulation starting"
    );
    let outcome = run(&stage, &args).await;

    if !service.status(stage.session_id).await?.is_ended {
        service.end_session(stage.session_id).await?;
    }
    cancel.cancel();
    let _ = watch.await;
    let _ = narrator.await;
    outcome?;

    print_transcript(&stage).await
}

/// Create the roster and the session, register everyone, go live
async fn setup(
    service: SharedParlayService,
    clock: Arc<ManualClock>,
    duration_minutes: u32,
) -> Result<Stage> {
    let session = service
        .create_session(
            NewSession::new("Acting under uncertainty", "ethics", FRAMING_PROMPT)
                .duration_minutes(duration_minutes)
                .max_participants(ROSTER.len() as u32),
        )
        .await?;
    let session_id = session.session.id;

    let mut bots = Vec::with_capacity(ROSTER.len());
    for persona in ROSTER {
        let bot = service.create_bot(persona.new_bot()).await?;
        service
            .register(session_id, bot.id, Some(persona.interest()))
            .await?;
        bots.push((bot.id, persona));
    }

    service.start_session(session_id).await?;
    Ok(Stage {
        service,
        clock,
        session_id,
        bots,
    })
}

async fn run(stage: &Stage, args: &Args) -> Result<()> {
    let mut dice = Dice::new(args.seed);

    // Openings go in roster order, one bid at a time.
    for (bot_id, persona) in &stage.bots {
        if ended(stage).await? {
            return Ok(());
        }
        if !bid_concurrently(stage, vec![(*bot_id, 50)]).await? {
            return Ok(());
        }
        let Some(speaker) = grant_winner(stage).await? else {
            continue;
        };
        stage.clock.advance_secs(30);
        if !speak(stage, speaker, persona.opening, false).await? {
            return Ok(());
        }
    }

    for round in 1..=args.rounds {
        if ended(stage).await? {
            info!(round, "Session time ran out");
            break;
        }

        let urgencies: Vec<(BotId, i64)> = stage
            .bots
            .iter()
            .map(|(bot_id, _)| (*bot_id, dice.between(30, 95)))
            .collect();
        if !bid_concurrently(stage, urgencies).await? {
            break;
        }
        let Some(speaker) = grant_winner(stage).await? else {
            warn!(round, "Nobody won the floor; skipping round");
            continue;
        };

        if round == args.intervene_at {
            human_turn(stage).await?;
            continue;
        }

        // Now and then a bot runs past its limit and loses the turn.
        let speaking_secs = if dice.chance(10) {
            dice.between(421, 480)
        } else {
            dice.between(20, 240)
        };
        stage.clock.advance_secs(speaking_secs);

        let is_yield = dice.chance(20);
        if !speak(stage, speaker, dice.pick(LINES), is_yield).await? {
            break;
        }
    }
    Ok(())
}

/// Every bot bids from its own task. Returns false once the session is over.
async fn bid_concurrently(stage: &Stage, urgencies: Vec<(BotId, i64)>) -> Result<bool> {
    let mut bids = JoinSet::new();
    for (bot_id, score) in urgencies {
        let service = stage.service.clone();
        let session_id = stage.session_id;
        bids.spawn(async move { service.submit_urgency(session_id, bot_id, score).await });
    }

    let mut open = true;
    while let Some(joined) = bids.join_next().await {
        match joined.context("bid task panicked")? {
            Ok(_) => {}
            Err(ParlayError::Rejected(FloorRejection::SessionEnded)) => open = false,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(open)
}

/// Grant the floor to the highest bid once every bot has had its say
async fn grant_winner(stage: &Stage) -> Result<Option<BotId>> {
    let Some(bid) = stage.service.resolve_next(stage.session_id)? else {
        return Ok(None);
    };
    stage
        .service
        .grant_floor(stage.session_id, bid.participant)
        .await?;
    info!(bot = %bid.participant_name, score = bid.score, "Floor granted");
    Ok(Some(bid.participant))
}

/// Post the speaker's turn. Returns false once the session is over.
async fn speak(stage: &Stage, speaker: BotId, line: &str, is_yield: bool) -> Result<bool> {
    match stage
        .service
        .submit_message(stage.session_id, speaker, line, is_yield)
        .await
    {
        Ok(_) => Ok(true),
        Err(ParlayError::Forbidden { .. }) => {
            let name = stage.persona(speaker).map_or("?", |p| p.name);
            info!(bot = name, "Turn cut off at the time limit");
            Ok(true)
        }
        Err(ParlayError::Rejected(FloorRejection::SessionEnded)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// The human seizes the floor from whoever was granted and speaks
async fn human_turn(stage: &Stage) -> Result<()> {
    match stage.service.intervene(stage.session_id) {
        Ok(()) => {}
        Err(ParlayError::Rejected(FloorRejection::SessionEnded)) => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    stage.clock.advance_secs(45);
    match stage
        .service
        .submit_human_message(stage.session_id, HUMAN_LINE)
        .await
    {
        Ok(_) | Err(ParlayError::Rejected(FloorRejection::SessionEnded)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn ended(stage: &Stage) -> Result<bool> {
    Ok(stage.service.status(stage.session_id).await?.is_ended)
}

/// Log the session's events as they happen
async fn narrate(mut events: FilteredReceiver, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(FloorEvent::TimeWarning { remaining_secs, .. }) => {
                    warn!(remaining_secs, "Time warning");
                }
                Ok(FloorEvent::FloorReleased { participant_name, spoke_secs, reason, .. }) => {
                    info!(speaker = %participant_name, spoke_secs, ?reason, "Floor released");
                }
                Ok(FloorEvent::HumanIntervened { preempted, .. }) => {
                    let preempted = preempted.map(|p| p.to_string());
                    info!(?preempted, "Human observer intervened");
                }
                Ok(FloorEvent::SessionEnded { .. }) => info!("Session ended"),
                Ok(_) => {}
                Err(_) => break,
            },
        }
    }
}

async fn print_transcript(stage: &Stage) -> Result<()> {
    let session = stage.service.get_session(stage.session_id).await?.session;
    let transcript = stage.service.transcript(stage.session_id).await?;
    let started = session.started_at.unwrap_or(session.created_at);

    println!("{}", "=".repeat(70));
    println!("{} [{}]", session.title, session.status);
    println!("{}", session.framing_prompt);
    println!("{}", "=".repeat(70));
    for entry in &transcript {
        let offset = (entry.message.timestamp - started).num_seconds();
        let urgency = entry
            .message
            .urgency_score
            .map(|s| format!(" urgency {}", s))
            .unwrap_or_default();
        let marker = match entry.message.author {
            Participant::Human => " (intervention)",
            Participant::Bot(_) if entry.message.is_yield => " (yields)",
            Participant::Bot(_) => "",
        };
        println!(
            "[{:02}:{:02}] {}{}{}",
            offset / 60,
            offset % 60,
            entry.author_name,
            urgency,
            marker
        );
        println!("    {}", entry.message.content);
    }
    println!("{}", "=".repeat(70));
    println!(
        "{} messages, ended at {}",
        transcript.len(),
        session
            .ended_at
            .unwrap_or_else(|| stage.clock.now())
            .format("%H:%M:%S")
    );
    Ok(())
}
