//! The capture loop.
//!
//! ```text
//! recover ─▶ Idle ──start/stop──▶ Active ──start/stop──▶ Idle ─ ...
//!                                  │  ▲
//!                                  └──┘ pedal
//! ```
//!
//! Single-threaded: the only suspension point is
//! [`InputSource::wait_for_any`], which also observes the shutdown token.
//! Store, input, indicator and clock are all injected, so the whole loop
//! runs against [`SimulatedInput`](crate::input::SimulatedInput) and an
//! in-memory database in tests.

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{CoreError, DatabaseError};
use crate::events::Event;
use crate::input::{Channel, Indicator, InputSource, Wait};
use crate::session::{SessionMachine, SessionStore};

/// Sessions closed at startup because a previous run died mid-workout.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recovery {
    pub events: Vec<Event>,
}

impl Recovery {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Close every session left open, at its last pedal stroke, or at the
/// detection time when it has none.
///
/// # Errors
///
/// Stops at the first store failure; sessions closed before it stay closed.
pub fn recover_open_sessions<S, C>(store: &S, clock: &C) -> Result<Recovery, DatabaseError>
where
    S: SessionStore + ?Sized,
    C: Clock + ?Sized,
{
    let mut recovery = Recovery::default();
    for session in store.open_sessions()? {
        let detected = clock.now().trunc_subsecs(6);
        let last_event = store.last_event(session.id)?;
        let from_last_event = last_event.is_some();
        let end: DateTime<Utc> = last_event.map_or(detected, |e| e.at);
        store.close_session(session.id, end)?;
        warn!(
            session_id = session.id,
            %end,
            from_last_event,
            "closed workout left open by an earlier run"
        );
        recovery.events.push(Event::SessionRecovered {
            session_id: session.id,
            end,
            from_last_event,
            at: detected,
        });
    }
    Ok(recovery)
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub recovered: usize,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub pedal_strokes: u64,
    pub ignored_edges: u64,
    pub store_failures: u64,
}

impl RunSummary {
    fn record(&mut self, event: &Event) {
        match event {
            Event::SessionOpened { .. } => self.sessions_opened += 1,
            Event::PedalLogged { .. } => self.pedal_strokes += 1,
            Event::SessionClosed { .. } => self.sessions_closed += 1,
            Event::SessionRecovered { .. } => self.recovered += 1,
            Event::EdgeIgnored { .. } => self.ignored_edges += 1,
        }
    }
}

type EventSink = Box<dyn FnMut(&Event)>;

pub struct CaptureLoop<S, I, L, C> {
    store: S,
    input: I,
    indicator: L,
    clock: C,
    machine: SessionMachine,
    poll_interval: Duration,
    sink: Option<EventSink>,
    summary: RunSummary,
}

impl<S, I, L, C> CaptureLoop<S, I, L, C>
where
    S: SessionStore,
    I: InputSource,
    L: Indicator,
    C: Clock,
{
    pub fn new(store: S, input: I, indicator: L, clock: C) -> Self {
        Self {
            store,
            input,
            indicator,
            clock,
            machine: SessionMachine::new("default"),
            poll_interval: Duration::from_millis(100),
            sink: None,
            summary: RunSummary::default(),
        }
    }

    /// Label written on every session this loop opens.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.machine = SessionMachine::new(user);
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Receive every event as it happens, recovery included.
    pub fn on_event(mut self, sink: impl FnMut(&Event) + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    fn emit(&mut self, event: &Event) {
        self.summary.record(event);
        if let Some(sink) = self.sink.as_mut() {
            sink(event);
        }
    }

    /// Recover, then capture until cancelled. Cleanup runs exactly once,
    /// whether the loop ended by cancellation or by an input failure.
    ///
    /// # Errors
    ///
    /// Recovery failures (before any input is accepted) and input failures.
    /// Store failures during transitions are logged and the loop goes on.
    pub fn run(mut self) -> Result<RunSummary, CoreError> {
        self.indicator.set(false);
        let recovery = recover_open_sessions(&self.store, &self.clock)?;
        for event in &recovery.events {
            self.emit(event);
        }
        info!(recovered = recovery.len(), "waiting for start");

        let result = self.pump();
        self.cleanup();
        result.map(|()| self.summary)
    }

    fn pump(&mut self) -> Result<(), CoreError> {
        loop {
            let channels = self.machine.listening();
            let channel = match self.input.wait_for_any(channels, self.poll_interval)? {
                Wait::Edge(channel) => channel,
                Wait::Cancelled => {
                    debug!("capture cancelled");
                    return Ok(());
                }
            };
            let at = self.clock.now();
            debug!(%channel, %at, "edge");

            let was_active = self.machine.is_active();
            match self.machine.handle(channel, at, &self.store) {
                Ok(event) => {
                    self.emit(&event);
                    self.after_transition(was_active)?;
                }
                Err(e) => self.store_failed(channel, e),
            }
        }
    }

    fn after_transition(&mut self, was_active: bool) -> Result<(), CoreError> {
        match (was_active, self.machine.is_active()) {
            (false, true) => {
                self.indicator.set(true);
                // A stroke latched while idle belongs to no session.
                self.input.discard(Channel::Pedal)?;
            }
            (true, false) => self.indicator.set(false),
            _ => {}
        }
        Ok(())
    }

    fn store_failed(&mut self, channel: Channel, e: DatabaseError) {
        self.summary.store_failures += 1;
        let e = CoreError::from(e);
        if e.is_store_write_failure() {
            error!(%channel, error = %e, "store write failed, edge dropped");
        } else {
            warn!(%channel, error = %e, "transition refused by store");
        }
    }

    fn cleanup(&mut self) {
        let at = self.clock.now();
        match self.machine.shutdown(at, &self.store) {
            Ok(Some(event)) => self.emit(&event),
            Ok(None) => {}
            Err(e) => {
                self.summary.store_failures += 1;
                error!(error = %e, "could not close workout at shutdown, it will be recovered on next start");
            }
        }
        self.indicator.set(false);
        info!(
            sessions = self.summary.sessions_closed,
            pedal_strokes = self.summary.pedal_strokes,
            "capture stopped"
        );
    }
}
