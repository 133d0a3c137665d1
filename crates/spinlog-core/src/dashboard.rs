//! Read path for the live display and for session history.
//!
//! The display runs in its own process and only ever reads the store, so it
//! never slows the capture loop down. Store failures are logged and shown as
//! "no session" instead of being propagated.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cadence::{self, CadenceSample, SampleSource};
use crate::error::DatabaseError;
use crate::session::{SessionStore, WorkoutSession};

/// What the display should show after a refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LiveReading {
    NoSession,
    Active {
        session_id: i64,
        current_rpm: f64,
        /// Full series including the read-time decay samples.
        series: Vec<CadenceSample>,
    },
}

/// Incremental cadence series for the active session.
#[derive(Debug, Clone)]
pub struct LiveCadence {
    rest_timeout: Duration,
    session_id: Option<i64>,
    series: Vec<CadenceSample>,
    seed: Option<CadenceSample>,
    last_seen: Option<(DateTime<Utc>, i64)>,
}

impl LiveCadence {
    pub fn new(rest_timeout: Duration) -> Self {
        Self {
            rest_timeout,
            session_id: None,
            series: Vec::new(),
            seed: None,
            last_seen: None,
        }
    }

    /// Session the held series belongs to.
    pub fn session_id(&self) -> Option<i64> {
        self.session_id
    }

    fn reset(&mut self, session_id: Option<i64>) {
        self.session_id = session_id;
        self.series.clear();
        self.seed = None;
        self.last_seen = None;
    }

    /// Pull new events from `store` and report the cadence at `now`.
    pub fn refresh<S: SessionStore + ?Sized>(&mut self, store: &S, now: DateTime<Utc>) -> LiveReading {
        let session = match store.last_session() {
            Ok(Some(session)) if session.is_open() => session,
            Ok(_) => {
                self.reset(None);
                return LiveReading::NoSession;
            }
            Err(e) => {
                warn!(error = %e, "cannot read current workout");
                self.reset(None);
                return LiveReading::NoSession;
            }
        };

        if self.session_id != Some(session.id) {
            debug!(session_id = session.id, "following new workout");
            self.reset(Some(session.id));
        }

        let since = self.last_seen.map(|(at, _)| at);
        let events = match store.events_since(session.id, since) {
            Ok(events) => events,
            Err(e) => {
                warn!(session_id = session.id, error = %e, "cannot read pedal events");
                return LiveReading::NoSession;
            }
        };

        // `events_since` is inclusive, so strokes at the boundary come back again.
        let last_id = self.last_seen.map(|(_, id)| id);
        let fresh: Vec<_> = events
            .into_iter()
            .filter(|e| last_id.map_or(true, |seen| e.id > seen))
            .collect();

        if let Some(last) = fresh.last() {
            self.last_seen = Some((last.at, last.id));
            let samples = cadence::derive(self.seed.as_ref(), &fresh, self.rest_timeout);
            self.series.extend(samples);
            self.seed = self
                .series
                .iter()
                .rev()
                .find(|s| s.source != SampleSource::Rest)
                .copied();
        }

        LiveReading::Active {
            session_id: session.id,
            current_rpm: cadence::current_rpm(&self.series, now, self.rest_timeout),
            series: cadence::extend_for_live(&self.series, now, self.rest_timeout),
        }
    }
}

/// A stored workout with its recomputed cadence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session: WorkoutSession,
    pub pedal_strokes: u64,
    /// `None` while the workout is still open.
    pub duration_secs: Option<f64>,
    pub average_rpm: f64,
    pub max_rpm: f64,
    pub samples: Vec<CadenceSample>,
}

/// Full cadence series of one session, without live decay.
///
/// # Errors
///
/// [`DatabaseError::UnknownSession`] if no such session exists, or any read
/// failure from the store.
pub fn session_cadence<S: SessionStore + ?Sized>(
    store: &S,
    session_id: i64,
    rest_timeout: Duration,
) -> Result<SessionSummary, DatabaseError> {
    let session = store
        .session(session_id)?
        .ok_or(DatabaseError::UnknownSession(session_id))?;
    let events = store.events_since(session_id, None)?;
    let samples = cadence::derive(None, &events, rest_timeout);

    let measured: Vec<f64> = samples
        .iter()
        .filter(|s| s.is_measured())
        .map(|s| s.rpm)
        .collect();
    let average_rpm = if measured.is_empty() {
        0.0
    } else {
        measured.iter().sum::<f64>() / measured.len() as f64
    };
    let max_rpm = measured.iter().copied().fold(0.0, f64::max);
    let duration_secs = session
        .end
        .map(|end| (end - session.begin).num_milliseconds() as f64 / 1000.0);

    Ok(SessionSummary {
        pedal_strokes: events.len() as u64,
        duration_secs,
        average_rpm,
        max_rpm,
        samples,
        session,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::{TimeDelta, TimeZone};

    const REST: Duration = Duration::from_secs(5);

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() + TimeDelta::milliseconds(ms)
    }

    fn rpm(reading: &LiveReading) -> f64 {
        match reading {
            LiveReading::Active { current_rpm, .. } => *current_rpm,
            LiveReading::NoSession => panic!("expected an active reading"),
        }
    }

    #[test]
    fn no_session_when_store_is_empty_or_closed() {
        let db = Database::open_memory().unwrap();
        let mut live = LiveCadence::new(REST);
        assert_eq!(live.refresh(&db, t(0)), LiveReading::NoSession);

        let id = db.open_session("default", t(0)).unwrap();
        assert!(matches!(live.refresh(&db, t(0)), LiveReading::Active { .. }));
        db.close_session(id, t(1_000)).unwrap();
        assert_eq!(live.refresh(&db, t(1_000)), LiveReading::NoSession);
        assert_eq!(live.session_id(), None);
    }

    #[test]
    fn incremental_refresh_follows_strokes() {
        let db = Database::open_memory().unwrap();
        let mut live = LiveCadence::new(REST);
        let id = db.open_session("default", t(0)).unwrap();

        db.append_event(id, t(1_000)).unwrap();
        // Lone first stroke reads as zero.
        assert_eq!(rpm(&live.refresh(&db, t(1_100))), 0.0);

        db.append_event(id, t(2_000)).unwrap();
        assert_eq!(rpm(&live.refresh(&db, t(2_100))), 60.0);

        db.append_event(id, t(2_500)).unwrap();
        db.append_event(id, t(3_000)).unwrap();
        let reading = live.refresh(&db, t(3_100));
        assert_eq!(rpm(&reading), 120.0);

        // Nothing new: the same series comes back, no duplicates.
        let again = live.refresh(&db, t(3_100));
        assert_eq!(again, reading);
        match again {
            LiveReading::Active { series, .. } => assert_eq!(series.len(), 4),
            LiveReading::NoSession => unreachable!(),
        }
    }

    #[test]
    fn reading_decays_after_timeout() {
        let db = Database::open_memory().unwrap();
        let mut live = LiveCadence::new(REST);
        let id = db.open_session("default", t(0)).unwrap();
        db.append_event(id, t(0)).unwrap();
        db.append_event(id, t(1_000)).unwrap();

        let reading = live.refresh(&db, t(7_000));
        assert_eq!(rpm(&reading), 0.0);
        match reading {
            LiveReading::Active { series, .. } => {
                let tail: Vec<_> = series.iter().map(|s| (s.at, s.rpm)).collect();
                assert_eq!(tail, [(t(1_000), 60.0), (t(6_000), 0.0), (t(7_000), 0.0)]);
            }
            LiveReading::NoSession => unreachable!(),
        }
    }

    #[test]
    fn new_session_resets_series() {
        let db = Database::open_memory().unwrap();
        let mut live = LiveCadence::new(REST);
        let first = db.open_session("default", t(0)).unwrap();
        db.append_event(first, t(0)).unwrap();
        db.append_event(first, t(1_000)).unwrap();
        live.refresh(&db, t(1_000));
        db.close_session(first, t(2_000)).unwrap();

        let second = db.open_session("default", t(3_000)).unwrap();
        db.append_event(second, t(4_000)).unwrap();
        match live.refresh(&db, t(4_000)) {
            LiveReading::Active {
                session_id, series, ..
            } => {
                assert_eq!(session_id, second);
                assert_eq!(series.len(), 1);
                assert_eq!(series[0].source, SampleSource::Seed);
            }
            LiveReading::NoSession => panic!("expected the second workout"),
        }
    }

    #[test]
    fn summary_of_closed_session() {
        let db = Database::open_memory().unwrap();
        let id = db.open_session("default", t(0)).unwrap();
        for ms in [0, 1_000, 1_500, 10_000] {
            db.append_event(id, t(ms)).unwrap();
        }
        db.close_session(id, t(12_000)).unwrap();

        let summary = session_cadence(&db, id, REST).unwrap();
        assert_eq!(summary.pedal_strokes, 4);
        assert_eq!(summary.duration_secs, Some(12.0));
        assert_eq!(summary.max_rpm, 120.0);
        let expected_avg = (60.0 + 120.0 + 60.0 / 8.5) / 3.0;
        assert!((summary.average_rpm - expected_avg).abs() < 1e-9);
        assert_eq!(summary.samples.len(), 5);
    }

    #[test]
    fn summary_of_unknown_session() {
        let db = Database::open_memory().unwrap();
        assert!(matches!(
            session_cadence(&db, 7, REST),
            Err(DatabaseError::UnknownSession(7))
        ));
    }
}
