//! Registry of live session engines, owned by the host service.
//!
//! Each engine sits behind its own mutex so sessions never block each other.
//! The map lock is only held for lookup and insertion; engine locks are never
//! acquired while holding it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Duration;
use tracing::{debug, info};

use super::clock::SharedClock;
use super::engine::SessionEngine;
use super::error::LockPoisoned;
use super::types::SessionId;

/// Shared reference to a session engine
pub type SharedEngine = Arc<Mutex<SessionEngine>>;

/// Lock an engine, surfacing poisoning as an error.
pub fn lock_engine(engine: &SharedEngine) -> Result<MutexGuard<'_, SessionEngine>, LockPoisoned> {
    engine.lock().map_err(|_| LockPoisoned::engine())
}

#[derive(Debug)]
pub struct EngineRegistry {
    engines: RwLock<HashMap<SessionId, SharedEngine>>,
    clock: SharedClock,
}

impl EngineRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            engines: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Existing engine for `session_id`, or a new one with `duration_minutes`.
    ///
    /// The duration is only honored when the engine is first created.
    pub fn get_or_create(
        &self,
        session_id: SessionId,
        duration_minutes: u32,
    ) -> Result<SharedEngine, LockPoisoned> {
        if let Some(engine) = self.get(session_id)? {
            debug!(%session_id, "Engine already registered; construction parameters ignored");
            return Ok(engine);
        }

        let mut engines = self.engines.write().map_err(|_| LockPoisoned::registry())?;
        let clock = self.clock.clone();
        let engine = engines.entry(session_id).or_insert_with(|| {
            info!(%session_id, duration_minutes, "Session engine created");
            Arc::new(Mutex::new(SessionEngine::new(
                session_id,
                duration_minutes,
                clock,
            )))
        });
        Ok(engine.clone())
    }

    pub fn get(&self, session_id: SessionId) -> Result<Option<SharedEngine>, LockPoisoned> {
        let engines = self.engines.read().map_err(|_| LockPoisoned::registry())?;
        Ok(engines.get(&session_id).cloned())
    }

    pub fn contains(&self, session_id: SessionId) -> Result<bool, LockPoisoned> {
        let engines = self.engines.read().map_err(|_| LockPoisoned::registry())?;
        Ok(engines.contains_key(&session_id))
    }

    /// Drop an engine. Callers still holding the `Arc` keep a working copy.
    pub fn remove(&self, session_id: SessionId) -> Result<Option<SharedEngine>, LockPoisoned> {
        let mut engines = self.engines.write().map_err(|_| LockPoisoned::registry())?;
        let removed = engines.remove(&session_id);
        if removed.is_some() {
            info!(%session_id, "Session engine removed");
        }
        Ok(removed)
    }

    /// Registered session ids in ascending order.
    pub fn session_ids(&self) -> Result<Vec<SessionId>, LockPoisoned> {
        let engines = self.engines.read().map_err(|_| LockPoisoned::registry())?;
        let mut ids: Vec<SessionId> = engines.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    pub fn len(&self) -> usize {
        self.engines.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove engines whose session ended at least `ttl` ago.
    pub fn evict_ended(&self, ttl: Duration) -> Result<Vec<SessionId>, LockPoisoned> {
        let now = self.clock.now();
        let candidates: Vec<(SessionId, SharedEngine)> = {
            let engines = self.engines.read().map_err(|_| LockPoisoned::registry())?;
            engines
                .iter()
                .map(|(id, engine)| (*id, engine.clone()))
                .collect()
        };

        let mut expired = Vec::new();
        for (session_id, engine) in candidates {
            let ended_at = lock_engine(&engine)?.ended_at();
            if ended_at.is_some_and(|at| now - at >= ttl) {
                expired.push(session_id);
            }
        }

        if !expired.is_empty() {
            let mut engines = self.engines.write().map_err(|_| LockPoisoned::registry())?;
            for session_id in &expired {
                engines.remove(session_id);
            }
            info!(count = expired.len(), "Evicted ended session engines");
        }
        expired.sort();
        Ok(expired)
    }
}
