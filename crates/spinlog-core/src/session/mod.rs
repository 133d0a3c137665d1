//! Workout sessions: data model, store port and lifecycle state machine.

mod machine;

pub use machine::{SessionMachine, SessionState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

/// One debounced pedal revolution. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PedalEvent {
    pub id: i64,
    pub workout_id: i64,
    pub at: DateTime<Utc>,
}

/// A workout. `end == None` means in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSession {
    pub id: i64,
    pub user: String,
    pub begin: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl WorkoutSession {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// Persistence capability consumed by the capture loop and the dashboard.
///
/// Every method is synchronous and atomic with respect to concurrent
/// readers in other processes: a reader never observes a half-written
/// session. An open session is identified purely by its missing `end`.
pub trait SessionStore {
    /// Open a new session. Fails with [`DatabaseError::SessionAlreadyOpen`]
    /// if any session is still in progress.
    fn open_session(&self, user: &str, begin: DateTime<Utc>) -> Result<i64, DatabaseError>;

    /// Set the end timestamp of an open session.
    fn close_session(&self, session_id: i64, end: DateTime<Utc>) -> Result<(), DatabaseError>;

    /// Record a pedal event for `session_id`.
    fn append_event(&self, session_id: i64, at: DateTime<Utc>) -> Result<PedalEvent, DatabaseError>;

    /// Session with the highest id.
    fn last_session(&self) -> Result<Option<WorkoutSession>, DatabaseError>;

    /// Events of `session_id` at or after `since`, ordered by time then id.
    fn events_since(
        &self,
        session_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PedalEvent>, DatabaseError>;

    /// Every session with no end timestamp.
    fn open_sessions(&self) -> Result<Vec<WorkoutSession>, DatabaseError>;

    /// Every session, oldest first.
    fn sessions(&self) -> Result<Vec<WorkoutSession>, DatabaseError>;

    fn session(&self, session_id: i64) -> Result<Option<WorkoutSession>, DatabaseError>;

    /// Most recent event of `session_id`.
    fn last_event(&self, session_id: i64) -> Result<Option<PedalEvent>, DatabaseError>;
}

impl<S: SessionStore + ?Sized> SessionStore for &S {
    fn open_session(&self, user: &str, begin: DateTime<Utc>) -> Result<i64, DatabaseError> {
        (**self).open_session(user, begin)
    }

    fn close_session(&self, session_id: i64, end: DateTime<Utc>) -> Result<(), DatabaseError> {
        (**self).close_session(session_id, end)
    }

    fn append_event(&self, session_id: i64, at: DateTime<Utc>) -> Result<PedalEvent, DatabaseError> {
        (**self).append_event(session_id, at)
    }

    fn last_session(&self) -> Result<Option<WorkoutSession>, DatabaseError> {
        (**self).last_session()
    }

    fn events_since(
        &self,
        session_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PedalEvent>, DatabaseError> {
        (**self).events_since(session_id, since)
    }

    fn open_sessions(&self) -> Result<Vec<WorkoutSession>, DatabaseError> {
        (**self).open_sessions()
    }

    fn sessions(&self) -> Result<Vec<WorkoutSession>, DatabaseError> {
        (**self).sessions()
    }

    fn session(&self, session_id: i64) -> Result<Option<WorkoutSession>, DatabaseError> {
        (**self).session(session_id)
    }

    fn last_event(&self, session_id: i64) -> Result<Option<PedalEvent>, DatabaseError> {
        (**self).last_event(session_id)
    }
}
