//! Cadence (pedal revolutions per minute) derived from pedal event timestamps.
//!
//! Every stroke after the first produces one sample, `60 / dt`, stamped with
//! the later stroke. A gap of at least the pedaling timeout is treated as a
//! rest: the stroke rate is assumed to hold for half a timeout on either side,
//! and two zero-rpm samples are placed at `t[i] + T/2` and `t[i+1] - T/2`.
//!
//! ```text
//!  rpm
//!   60 ─●                                            ●─ 60/9
//!       │╲                                          ╱
//!    0  │ ●──────────────────────────────────────●
//!       1s  3.5s                              7.5s  10s
//! ```
//!
//! Nothing here is persisted. Callers keep the last sample they hold and pass
//! it back as a seed, so incremental updates continue the same series.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CadenceError;
use crate::session::PedalEvent;

/// Where a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "event_id")]
pub enum SampleSource {
    /// Interval ending at this pedal event.
    Event(i64),
    /// Lone first stroke, reported at 0 rpm so the next update has a start point.
    Seed,
    /// Synthesized at the edges of a rest period.
    Rest,
    /// Appended at read time once the rider has stopped.
    Decay,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CadenceSample {
    pub at: DateTime<Utc>,
    pub rpm: f64,
    pub source: SampleSource,
}

impl CadenceSample {
    fn zero(at: DateTime<Utc>, source: SampleSource) -> Self {
        Self {
            at,
            rpm: 0.0,
            source,
        }
    }

    /// True for samples computed from a real stroke interval.
    pub fn is_measured(&self) -> bool {
        matches!(self.source, SampleSource::Event(_))
    }
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

fn seconds(d: TimeDelta) -> f64 {
    d.num_microseconds()
        .map(|us| us as f64 / 1e6)
        .unwrap_or_else(|| d.num_seconds() as f64)
}

/// Half the pedaling timeout, rounded to whole milliseconds.
fn half_timeout(rest_timeout: Duration) -> TimeDelta {
    let half_ms = (rest_timeout.as_secs_f64() * 1000.0 / 2.0).round();
    TimeDelta::milliseconds(half_ms as i64)
}

/// Seconds between consecutive timestamps. Empty for fewer than two points.
pub fn time_deltas(times: &[DateTime<Utc>]) -> Vec<f64> {
    times.windows(2).map(|w| seconds(w[1] - w[0])).collect()
}

/// `60 / dt` for each consecutive pair, stamped with the later timestamp.
///
/// # Errors
///
/// [`CadenceError::DegenerateInterval`] at the first pair that is not
/// strictly increasing.
pub fn rpm_series(times: &[DateTime<Utc>]) -> Result<Vec<(DateTime<Utc>, f64)>, CadenceError> {
    times
        .windows(2)
        .map(|w| {
            let dt = seconds(w[1] - w[0]);
            if dt <= 0.0 {
                Err(CadenceError::DegenerateInterval {
                    at: w[1],
                    delta_secs: dt,
                })
            } else {
                Ok((w[1], 60.0 / dt))
            }
        })
        .collect()
}

/// Zero-rpm samples at both edges of every gap of at least `rest_timeout`.
pub fn rest_samples(times: &[DateTime<Utc>], rest_timeout: Duration) -> Vec<CadenceSample> {
    let threshold = to_delta(rest_timeout);
    let half = half_timeout(rest_timeout);
    times
        .windows(2)
        .filter(|w| w[1] - w[0] >= threshold)
        .flat_map(|w| {
            [
                CadenceSample::zero(w[0] + half, SampleSource::Rest),
                CadenceSample::zero(w[1] - half, SampleSource::Rest),
            ]
        })
        .collect()
}

/// Cadence series for `events`, continuing from `seed` when given.
///
/// The seed's own sample is not repeated in the output. Events that do not
/// move time forward are dropped with a warning. With no seed and a single
/// event the result is one [`SampleSource::Seed`] sample at 0 rpm.
pub fn derive(
    seed: Option<&CadenceSample>,
    events: &[PedalEvent],
    rest_timeout: Duration,
) -> Vec<CadenceSample> {
    let mut times: Vec<DateTime<Utc>> = Vec::with_capacity(events.len() + 1);
    let mut ids: Vec<Option<i64>> = Vec::with_capacity(events.len() + 1);
    if let Some(seed) = seed {
        times.push(seed.at);
        ids.push(None);
    }

    for event in events {
        if let Some(&last) = times.last() {
            if let Err(err) = rpm_series(&[last, event.at]) {
                warn!(event_id = event.id, error = %err, "dropping pedal event");
                continue;
            }
        }
        times.push(event.at);
        ids.push(Some(event.id));
    }

    if times.len() == 1 {
        return match seed {
            Some(_) => Vec::new(),
            None => vec![CadenceSample::zero(times[0], SampleSource::Seed)],
        };
    }

    // Out-of-order pairs were filtered above, so every interval is positive.
    let measured = rpm_series(&times).unwrap_or_default();
    let mut samples: Vec<CadenceSample> = measured
        .into_iter()
        .zip(ids.iter().skip(1))
        .map(|((at, rpm), id)| CadenceSample {
            at,
            rpm,
            source: id.map_or(SampleSource::Seed, SampleSource::Event),
        })
        .collect();
    samples.extend(rest_samples(&times, rest_timeout));
    samples.sort_by(|a, b| a.at.cmp(&b.at));
    samples
}

/// `samples` plus the read-time decay to zero once the rider has stopped.
///
/// If at least `rest_timeout` has passed since the last sample, zeros are
/// appended at `last + rest_timeout` and at `now`.
pub fn extend_for_live(
    samples: &[CadenceSample],
    now: DateTime<Utc>,
    rest_timeout: Duration,
) -> Vec<CadenceSample> {
    let mut out = samples.to_vec();
    if let Some(last) = samples.last() {
        let threshold = to_delta(rest_timeout);
        if now - last.at >= threshold {
            out.push(CadenceSample::zero(last.at + threshold, SampleSource::Decay));
            out.push(CadenceSample::zero(now, SampleSource::Decay));
        }
    }
    out
}

/// Cadence to display right now: the last sample's rpm, or 0 once the
/// pedaling timeout has passed since it.
pub fn current_rpm(samples: &[CadenceSample], now: DateTime<Utc>, rest_timeout: Duration) -> f64 {
    match samples.last() {
        Some(last) if now - last.at < to_delta(rest_timeout) => last.rpm,
        _ => 0.0,
    }
}
