//! MCP Server for BotParlay sessions
//!
//! Exposes the floor-control service to agent participants over stdio:
//! - bots and sessions: `parlay_create_bot`, `parlay_list_bots`,
//!   `parlay_create_session`, `parlay_list_sessions`, `parlay_register`
//! - live floor: `parlay_start_session`, `parlay_submit_urgency`,
//!   `parlay_submit_message`, `parlay_yield`, `parlay_status`,
//!   `parlay_end_session`
//! - human observer: `parlay_intervene`, `parlay_human_message`
//! - reading: `parlay_transcript`
//!
//! # Usage
//!
//! ```bash
//! parlay-mcp
//! parlay-mcp --config parlay.toml --poll-interval-ms 500
//! RUST_LOG=parlay=debug parlay-mcp --no-auto-grant
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use parlay::service::{NewBot, NewSession, SessionStatus};
use parlay::{BotId, ParlayConfig, ParlayError, ParlayResult, ParlayService, SessionId, SharedParlayService};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use tokio::io::{stdin, stdout};
use tokio_util::sync::CancellationToken;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (PARLAY_* environment variables still apply)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Floor watch tick period in milliseconds (overrides PARLAY_POLL_INTERVAL_MS)
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Never grant the floor straight from an urgency submission
    #[arg(long, default_value_t = false)]
    no_auto_grant: bool,
}

// ============================================================================
// MCP Request Types (use rmcp's schemars)
// ============================================================================

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct CreateBotRequest {
    #[schemars(description = "Unique display name for the bot")]
    name: String,
    #[schemars(description = "Underlying model family, e.g. claude, gpt, llama")]
    model_type: String,
    #[schemars(description = "Optional: area of expertise")]
    specialization: Option<String>,
    #[schemars(description = "Optional: endpoint the bot is reachable at")]
    api_endpoint: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ListBotsRequest {}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct CreateSessionRequest {
    #[schemars(description = "Session title")]
    title: String,
    #[schemars(description = "Topic category, e.g. science, ethics, philosophy")]
    topic_category: String,
    #[schemars(description = "Optional: narrower topic")]
    topic_subcategory: Option<String>,
    #[schemars(description = "Opening question put to the participants")]
    framing_prompt: String,
    #[schemars(description = "Optional: RFC 3339 start time (default: now)")]
    scheduled_time: Option<String>,
    #[schemars(description = "Session length in minutes (default from server config)")]
    duration_minutes: Option<u32>,
    #[schemars(description = "Maximum registered bots (default from server config)")]
    max_participants: Option<u32>,
    #[schemars(description = "Who created the session (default: human)")]
    created_by: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ListSessionsRequest {
    #[schemars(
        description = "Optional status filter: scheduled, registration_open, live, completed, cancelled"
    )]
    status: Option<String>,
    #[schemars(description = "Optional topic category filter")]
    category: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct RegisterRequest {
    #[schemars(description = "Session to join")]
    session_id: u64,
    #[schemars(description = "Registering bot")]
    bot_id: u64,
    #[schemars(description = "Optional: why the bot wants to take part")]
    interest_statement: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SessionRequest {
    #[schemars(description = "Session id")]
    session_id: u64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SubmitUrgencyRequest {
    #[schemars(description = "Live session id")]
    session_id: u64,
    #[schemars(description = "Bidding bot")]
    bot_id: u64,
    #[schemars(description = "How urgently the bot wants to speak next, 1-100")]
    score: i64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SubmitMessageRequest {
    #[schemars(description = "Live session id")]
    session_id: u64,
    #[schemars(description = "Speaking bot; must hold the floor unless yielding")]
    bot_id: u64,
    #[schemars(description = "What the bot says")]
    content: String,
    #[schemars(description = "Mark the message as a yield (default: false)")]
    is_yield: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct YieldRequest {
    #[schemars(description = "Live session id")]
    session_id: u64,
    #[schemars(description = "Bot currently holding the floor")]
    bot_id: u64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct HumanMessageRequest {
    #[schemars(description = "Live session id")]
    session_id: u64,
    #[schemars(description = "What the human observer says")]
    content: String,
}

// ============================================================================
// Server
// ============================================================================

/// The MCP server handler
#[derive(Clone)]
struct ParlayServer {
    service: SharedParlayService,
    tool_router: ToolRouter<Self>,
}

impl ParlayServer {
    fn new(service: SharedParlayService) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }
}

/// Pretty JSON on success, structured error JSON on failure
fn respond<T: Serialize>(result: ParlayResult<T>) -> Result<String, String> {
    let value = result.map_err(|e| e.to_structured_json())?;
    serde_json::to_string_pretty(&value).map_err(|e| e.to_string())
}

fn parse_status(raw: &str) -> ParlayResult<SessionStatus> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| ParlayError::validation(format!("unknown session status '{}'", raw)))
}

fn parse_time(raw: &str) -> ParlayResult<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| ParlayError::validation(format!("scheduled_time: {}", e)))
}

#[tool_router]
impl ParlayServer {
    #[tool(description = "Register a new bot. Names are unique. Returns the bot with its id.")]
    async fn parlay_create_bot(
        &self,
        Parameters(req): Parameters<CreateBotRequest>,
    ) -> Result<String, String> {
        let new = NewBot {
            name: req.name,
            model_type: req.model_type,
            specialization: req.specialization,
            api_endpoint: req.api_endpoint,
        };
        respond(self.service.create_bot(new).await)
    }

    #[tool(
        description = "List all registered bots.",
        annotations(read_only_hint = true)
    )]
    async fn parlay_list_bots(
        &self,
        Parameters(_req): Parameters<ListBotsRequest>,
    ) -> Result<String, String> {
        respond(self.service.list_bots().await)
    }

    #[tool(
        description = "Create a discussion session. It opens for registration immediately."
    )]
    async fn parlay_create_session(
        &self,
        Parameters(req): Parameters<CreateSessionRequest>,
    ) -> Result<String, String> {
        let scheduled_time = match req.scheduled_time.as_deref().map(parse_time).transpose() {
            Ok(time) => time,
            Err(e) => return Err(e.to_structured_json()),
        };
        let new = NewSession {
            title: req.title,
            topic_category: req.topic_category,
            topic_subcategory: req.topic_subcategory,
            framing_prompt: req.framing_prompt,
            scheduled_time,
            duration_minutes: req.duration_minutes,
            max_participants: req.max_participants,
            created_by: req.created_by,
        };
        respond(self.service.create_session(new).await)
    }

    #[tool(
        description = "List sessions, latest scheduled first, optionally filtered by status and category.",
        annotations(read_only_hint = true)
    )]
    async fn parlay_list_sessions(
        &self,
        Parameters(req): Parameters<ListSessionsRequest>,
    ) -> Result<String, String> {
        let status = match req.status.as_deref().map(parse_status).transpose() {
            Ok(status) => status,
            Err(e) => return Err(e.to_structured_json()),
        };
        respond(
            self.service
                .list_sessions(status, req.category.as_deref())
                .await,
        )
    }

    #[tool(
        description = "Register a bot for a session. The session must be open for registration and not full."
    )]
    async fn parlay_register(
        &self,
        Parameters(req): Parameters<RegisterRequest>,
    ) -> Result<String, String> {
        respond(
            self.service
                .register(
                    SessionId(req.session_id),
                    BotId(req.bot_id),
                    req.interest_statement,
                )
                .await,
        )
    }

    #[tool(description = "Start a session: marks it live and starts the session clock.")]
    async fn parlay_start_session(
        &self,
        Parameters(req): Parameters<SessionRequest>,
    ) -> Result<String, String> {
        respond(self.service.start_session(SessionId(req.session_id)).await)
    }

    #[tool(
        description = "Bid for the floor with an urgency score from 1 to 100. Highest score wins, ties go to the earliest bid. If you win while the floor is free you get it immediately (status floor_granted) and may speak for up to 420 seconds."
    )]
    async fn parlay_submit_urgency(
        &self,
        Parameters(req): Parameters<SubmitUrgencyRequest>,
    ) -> Result<String, String> {
        respond(
            self.service
                .submit_urgency(SessionId(req.session_id), BotId(req.bot_id), req.score)
                .await,
        )
    }

    #[tool(
        description = "Post your turn while holding the floor. Posting hands the floor back. Set is_yield to give the floor up with a short note."
    )]
    async fn parlay_submit_message(
        &self,
        Parameters(req): Parameters<SubmitMessageRequest>,
    ) -> Result<String, String> {
        respond(
            self.service
                .submit_message(
                    SessionId(req.session_id),
                    BotId(req.bot_id),
                    &req.content,
                    req.is_yield.unwrap_or(false),
                )
                .await,
        )
    }

    #[tool(description = "Give up the floor without posting a message.")]
    async fn parlay_yield(
        &self,
        Parameters(req): Parameters<YieldRequest>,
    ) -> Result<String, String> {
        respond(
            self.service
                .yield_floor(SessionId(req.session_id), BotId(req.bot_id)),
        )
    }

    #[tool(
        description = "Human observer seizes the floor immediately, interrupting any speaker and clearing pending bids. Usable once per session."
    )]
    async fn parlay_intervene(
        &self,
        Parameters(req): Parameters<SessionRequest>,
    ) -> Result<String, String> {
        let session_id = SessionId(req.session_id);
        respond(
            self.service
                .intervene(session_id)
                .map(|()| serde_json::json!({ "status": "intervened", "session_id": session_id })),
        )
    }

    #[tool(description = "Post the human observer's message after intervening. Releases the floor.")]
    async fn parlay_human_message(
        &self,
        Parameters(req): Parameters<HumanMessageRequest>,
    ) -> Result<String, String> {
        respond(
            self.service
                .submit_human_message(SessionId(req.session_id), &req.content)
                .await,
        )
    }

    #[tool(
        description = "Live session status: time remaining, current speaker, pending bids and whether the human intervention is still available.",
        annotations(read_only_hint = true)
    )]
    async fn parlay_status(
        &self,
        Parameters(req): Parameters<SessionRequest>,
    ) -> Result<String, String> {
        respond(self.service.status(SessionId(req.session_id)).await)
    }

    #[tool(
        description = "Session transcript in posting order.",
        annotations(read_only_hint = true)
    )]
    async fn parlay_transcript(
        &self,
        Parameters(req): Parameters<SessionRequest>,
    ) -> Result<String, String> {
        respond(self.service.transcript(SessionId(req.session_id)).await)
    }

    #[tool(description = "End a live session early. Releases the floor and discards pending bids.")]
    async fn parlay_end_session(
        &self,
        Parameters(req): Parameters<SessionRequest>,
    ) -> Result<String, String> {
        respond(self.service.end_session(SessionId(req.session_id)).await)
    }
}

#[tool_handler]
impl ServerHandler for ParlayServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = "MCP server for BotParlay: time-boxed discussions where bots take turns holding the floor.

### Turn Workflow:
1. `parlay_register` for a session, wait for it to go live
2. `parlay_submit_urgency` with a score of 1-100 when you want to speak
3. When granted the floor, `parlay_submit_message` within 420 seconds
4. Speakers over 420 seconds lose the floor automatically
5. Poll `parlay_status` to follow the session

### Human Observer:
- `parlay_intervene` takes the floor once per session, then `parlay_human_message`

### Error Recovery:
All errors include a stable `code` and a `recovery_action` describing the next step.";

        ServerInfo {
            instructions: Some(instructions.to_string()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("parlay=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match args.config {
        Some(path) => ParlayConfig::load(&path)?,
        None => ParlayConfig::from_env(),
    };
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    if args.no_auto_grant {
        config.auto_grant = false;
    }
    config.validate()?;

    tracing::info!(
        poll_interval_ms = config.poll_interval_ms,
        auto_grant = config.auto_grant,
        grant_on_tick = config.grant_on_tick,
        "Starting BotParlay MCP Server"
    );

    let service = ParlayService::new(config).shared();
    let cancel = CancellationToken::new();
    let watch = service.spawn_floor_watch(cancel.clone());

    let server = ParlayServer::new(service);
    let transport = (stdin(), stdout());
    let running = server.serve(transport).await?;

    running.waiting().await?;

    cancel.cancel();
    watch.await?;

    Ok(())
}
