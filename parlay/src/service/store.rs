//! Record storage
//!
//! `RecordStore` is the durable-storage seam. `MemoryStore` keeps everything
//! in process and is what the bundled binaries use.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::error::ParlayResult;
use super::records::{Bot, Message, Registration, SessionRecord};
use crate::floor::{BotId, SessionId};

/// Shared reference to a record store
pub type SharedRecordStore = Arc<dyn RecordStore>;

/// Persistent storage for bots, sessions, registrations and messages.
///
/// `insert_*` methods ignore the incoming `id` and return the record with
/// the id the store assigned.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_bot(&self, bot: Bot) -> ParlayResult<Bot>;
    async fn get_bot(&self, bot_id: BotId) -> ParlayResult<Option<Bot>>;
    async fn find_bot_by_name(&self, name: &str) -> ParlayResult<Option<Bot>>;
    async fn list_bots(&self) -> ParlayResult<Vec<Bot>>;

    async fn insert_session(&self, session: SessionRecord) -> ParlayResult<SessionRecord>;
    async fn get_session(&self, session_id: SessionId) -> ParlayResult<Option<SessionRecord>>;
    async fn update_session(&self, session: &SessionRecord) -> ParlayResult<()>;
    async fn list_sessions(&self) -> ParlayResult<Vec<SessionRecord>>;

    async fn insert_registration(&self, registration: Registration) -> ParlayResult<Registration>;
    async fn list_registrations(&self, session_id: SessionId) -> ParlayResult<Vec<Registration>>;

    async fn insert_message(&self, message: Message) -> ParlayResult<Message>;
    /// Messages for a session, oldest first
    async fn list_messages(&self, session_id: SessionId) -> ParlayResult<Vec<Message>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    bots: BTreeMap<BotId, Bot>,
    sessions: BTreeMap<SessionId, SessionRecord>,
    registrations: Vec<Registration>,
    messages: Vec<Message>,
    last_bot_id: u64,
    last_session_id: u64,
    last_registration_id: u64,
    last_message_id: u64,
}

/// In-process record store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedRecordStore {
        Arc::new(self)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_bot(&self, mut bot: Bot) -> ParlayResult<Bot> {
        let mut state = self.state.write().await;
        state.last_bot_id += 1;
        bot.id = BotId(state.last_bot_id);
        state.bots.insert(bot.id, bot.clone());
        Ok(bot)
    }

    async fn get_bot(&self, bot_id: BotId) -> ParlayResult<Option<Bot>> {
        Ok(self.state.read().await.bots.get(&bot_id).cloned())
    }

    async fn find_bot_by_name(&self, name: &str) -> ParlayResult<Option<Bot>> {
        let state = self.state.read().await;
        Ok(state.bots.values().find(|b| b.name == name).cloned())
    }

    async fn list_bots(&self) -> ParlayResult<Vec<Bot>> {
        Ok(self.state.read().await.bots.values().cloned().collect())
    }

    async fn insert_session(&self, mut session: SessionRecord) -> ParlayResult<SessionRecord> {
        let mut state = self.state.write().await;
        state.last_session_id += 1;
        session.id = SessionId(state.last_session_id);
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: SessionId) -> ParlayResult<Option<SessionRecord>> {
        Ok(self.state.read().await.sessions.get(&session_id).cloned())
    }

    async fn update_session(&self, session: &SessionRecord) -> ParlayResult<()> {
        let mut state = self.state.write().await;
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn list_sessions(&self) -> ParlayResult<Vec<SessionRecord>> {
        Ok(self.state.read().await.sessions.values().cloned().collect())
    }

    async fn insert_registration(
        &self,
        mut registration: Registration,
    ) -> ParlayResult<Registration> {
        let mut state = self.state.write().await;
        state.last_registration_id += 1;
        registration.id = state.last_registration_id;
        state.registrations.push(registration.clone());
        Ok(registration)
    }

    async fn list_registrations(&self, session_id: SessionId) -> ParlayResult<Vec<Registration>> {
        let state = self.state.read().await;
        Ok(state
            .registrations
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn insert_message(&self, mut message: Message) -> ParlayResult<Message> {
        let mut state = self.state.write().await;
        state.last_message_id += 1;
        message.id = state.last_message_id;
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, session_id: SessionId) -> ParlayResult<Vec<Message>> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(messages)
    }
}
