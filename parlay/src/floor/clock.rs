//! Time sources and the session clock.
//!
//! The engine never reads the wall clock directly: every timestamp comes from
//! an injected [`Clock`], so tests and the simulator can advance time without
//! sleeping. Expiry is detected lazily: [`SessionClock::has_ended`] records
//! `ended_at` the first time a caller observes that the duration has elapsed.

use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::FloorRejection;

/// Remaining-time band (seconds) in which viewers get the 7-minute warning.
pub const WARNING_WINDOW_SECS: RangeInclusive<i64> = 400..=420;

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Shared reference to a clock
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// A manual clock frozen at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }

    /// Jump to an absolute instant.
    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Milliseconds between two instants (negative if `now` precedes `since`).
pub(crate) fn elapsed_ms(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_milliseconds()
}

/// Tracks session start, remaining time and end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClock {
    configured_duration_secs: i64,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl SessionClock {
    pub fn new(duration_minutes: u32) -> Self {
        Self {
            configured_duration_secs: i64::from(duration_minutes) * 60,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn configured_duration_secs(&self) -> i64 {
        self.configured_duration_secs
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Start the clock. A second call is rejected and never resets it.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), FloorRejection> {
        if self.started_at.is_some() {
            return Err(FloorRejection::AlreadyStarted);
        }
        self.started_at = Some(now);
        Ok(())
    }

    /// Whole seconds left; the full duration before start, zero once ended.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> i64 {
        let Some(started_at) = self.started_at else {
            return self.configured_duration_secs;
        };
        if self.ended_at.is_some() {
            return 0;
        }
        let remaining_ms = self.configured_duration_secs * 1000 - elapsed_ms(started_at, now);
        if remaining_ms <= 0 {
            0
        } else {
            remaining_ms / 1000
        }
    }

    /// Whether the session is over, recording `ended_at` on first detection.
    pub fn has_ended(&mut self, now: DateTime<Utc>) -> bool {
        if self.ended_at.is_some() {
            return true;
        }
        let Some(started_at) = self.started_at else {
            return false;
        };
        if elapsed_ms(started_at, now) >= self.configured_duration_secs * 1000 {
            self.ended_at = Some(now);
            return true;
        }
        false
    }

    /// End the session explicitly.
    pub fn end(&mut self, now: DateTime<Utc>) -> Result<(), FloorRejection> {
        if self.started_at.is_none() {
            return Err(FloorRejection::NotStarted);
        }
        if self.has_ended(now) {
            return Err(FloorRejection::SessionEnded);
        }
        self.ended_at = Some(now);
        Ok(())
    }

    /// True while the remaining time sits in the warning band. Advisory only.
    ///
    /// Follows [`time_remaining`](Self::time_remaining), so an unstarted
    /// seven-minute session already warns.
    pub fn should_warn(&self, now: DateTime<Utc>) -> bool {
        WARNING_WINDOW_SECS.contains(&self.time_remaining(now))
    }
}
