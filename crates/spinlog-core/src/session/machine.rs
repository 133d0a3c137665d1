//! Workout lifecycle state machine.
//!
//! ## State Transitions
//!
//! ```text
//!          start/stop                      pedal
//!   Idle ─────────────▶ Active ◀───────────────────┐
//!    ▲                    │  └─────────────────────┘
//!    └────────────────────┘
//!          start/stop (or shutdown)
//! ```
//!
//! The machine owns lifecycle transitions only; persistence goes through a
//! [`SessionStore`]. Every transition writes to the store first and changes
//! in-memory state only after the write succeeded, so a failed write leaves
//! the machine exactly where it was and the same edge can simply be retried.

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, info};

use super::SessionStore;
use crate::error::DatabaseError;
use crate::events::Event;
use crate::input::Channel;

const IDLE_CHANNELS: &[Channel] = &[Channel::StartStop];
// Pedal first: a stroke latched together with a stop is still logged.
const ACTIVE_CHANNELS: &[Channel] = &[Channel::Pedal, Channel::StartStop];

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Active {
        session_id: i64,
        begin: DateTime<Utc>,
        pedal_strokes: u64,
    },
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    user: String,
}

impl SessionMachine {
    /// Every cycle starts from `Idle`.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            state: SessionState::Idle,
            user: user.into(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active { .. })
    }

    pub fn active_session(&self) -> Option<i64> {
        match self.state {
            SessionState::Active { session_id, .. } => Some(session_id),
            SessionState::Idle => None,
        }
    }

    /// Channels worth waiting on in the current state, in priority order.
    pub fn listening(&self) -> &'static [Channel] {
        match self.state {
            SessionState::Idle => IDLE_CHANNELS,
            SessionState::Active { .. } => ACTIVE_CHANNELS,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Apply one edge observed at `at`, truncated to the store's
    /// microsecond precision so emitted events match persisted rows.
    ///
    /// # Errors
    ///
    /// Returns the store error unchanged; the state is not modified.
    pub fn handle<S: SessionStore + ?Sized>(
        &mut self,
        channel: Channel,
        at: DateTime<Utc>,
        store: &S,
    ) -> Result<Event, DatabaseError> {
        let at = at.trunc_subsecs(6);
        match (&self.state, channel) {
            (SessionState::Idle, Channel::StartStop) => self.open(at, store),
            (SessionState::Idle, Channel::Pedal) => {
                debug!("pedal edge while idle, ignored");
                Ok(Event::EdgeIgnored { channel, at })
            }
            (SessionState::Active { session_id, .. }, Channel::Pedal) => {
                let session_id = *session_id;
                self.log_pedal(session_id, at, store)
            }
            (
                SessionState::Active {
                    session_id,
                    pedal_strokes,
                    ..
                },
                Channel::StartStop,
            ) => {
                let (session_id, pedal_strokes) = (*session_id, *pedal_strokes);
                self.close(session_id, pedal_strokes, at, store)
            }
        }
    }

    /// Forced `Active -> Idle` at process shutdown. No-op when idle.
    pub fn shutdown<S: SessionStore + ?Sized>(
        &mut self,
        at: DateTime<Utc>,
        store: &S,
    ) -> Result<Option<Event>, DatabaseError> {
        let at = at.trunc_subsecs(6);
        match self.state {
            SessionState::Active {
                session_id,
                pedal_strokes,
                ..
            } => self.close(session_id, pedal_strokes, at, store).map(Some),
            SessionState::Idle => Ok(None),
        }
    }

    fn open<S: SessionStore + ?Sized>(
        &mut self,
        at: DateTime<Utc>,
        store: &S,
    ) -> Result<Event, DatabaseError> {
        let session_id = store.open_session(&self.user, at)?;
        self.state = SessionState::Active {
            session_id,
            begin: at,
            pedal_strokes: 0,
        };
        info!(session_id, user = %self.user, "workout has begun");
        Ok(Event::SessionOpened {
            session_id,
            user: self.user.clone(),
            at,
        })
    }

    fn log_pedal<S: SessionStore + ?Sized>(
        &mut self,
        session_id: i64,
        at: DateTime<Utc>,
        store: &S,
    ) -> Result<Event, DatabaseError> {
        let event = store.append_event(session_id, at)?;
        if let SessionState::Active { pedal_strokes, .. } = &mut self.state {
            *pedal_strokes += 1;
        }
        debug!(session_id, event_id = event.id, "pedal stroke");
        Ok(Event::PedalLogged {
            session_id,
            event_id: event.id,
            at,
        })
    }

    fn close<S: SessionStore + ?Sized>(
        &mut self,
        session_id: i64,
        pedal_strokes: u64,
        at: DateTime<Utc>,
        store: &S,
    ) -> Result<Event, DatabaseError> {
        store.close_session(session_id, at)?;
        self.state = SessionState::Idle;
        info!(session_id, pedal_strokes, "workout is complete");
        Ok(Event::SessionClosed {
            session_id,
            pedal_strokes,
            at,
        })
    }
}
