//! Input source: debounced rising-edge detection on logical channels.
//!
//! ## Latch-and-clear
//!
//! Edges are never sampled as levels. Whatever detects the edge (a GPIO
//! interrupt callback, a test injecting one) sets a sticky [`EdgeLatch`];
//! [`InputSource::wait_for_any`] reads-and-clears it on the next poll. An
//! edge that arrives while the caller is busy writing to the store, or while
//! the poll loop sleeps, stays latched until it is observed.
//!
//! ```text
//!   interrupt ──▶ EdgeLatch::trigger ──(sticky)──▶ wait_for_any ──▶ Channel
//! ```
//!
//! Debounce is applied when the latch is set: a trigger closer than the
//! debounce window to the previously accepted one is dropped.
//!
//! ## Simultaneous edges
//!
//! When several requested channels are latched at once, the first channel in
//! the caller's slice wins and only its latch is cleared. The others are
//! returned by subsequent calls.

mod gpio;
mod simulated;

pub use gpio::{GpioBoard, GpioIndicator, GpioInput};
pub use simulated::{EdgeInjector, ScriptStep, SimulatedIndicator, SimulatedInput};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::InputError;

/// Logical input channels. Physical pin numbers live in the GPIO config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Pedal rotation sensor, one edge per revolution.
    Pedal,
    /// Start/stop push button.
    StartStop,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Pedal => f.write_str("pedal"),
            Channel::StartStop => f.write_str("start_stop"),
        }
    }
}

/// Outcome of a blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Edge(Channel),
    /// The shutdown token was raised while waiting.
    Cancelled,
}

/// Blocking multi-channel edge wait.
pub trait InputSource {
    /// Block until one of `channels` has a latched edge, then clear that
    /// latch and return the channel. Returns [`Wait::Cancelled`] once the
    /// shutdown token is raised.
    fn wait_for_any(
        &mut self,
        channels: &[Channel],
        poll_interval: Duration,
    ) -> Result<Wait, InputError>;

    /// Drop any edge latched on `channel` without reporting it.
    fn discard(&mut self, channel: Channel) -> Result<(), InputError>;
}

/// Session indicator output (an LED on the bike).
pub trait Indicator {
    fn set(&mut self, on: bool);
}

impl<T: InputSource + ?Sized> InputSource for &mut T {
    fn wait_for_any(
        &mut self,
        channels: &[Channel],
        poll_interval: Duration,
    ) -> Result<Wait, InputError> {
        (**self).wait_for_any(channels, poll_interval)
    }

    fn discard(&mut self, channel: Channel) -> Result<(), InputError> {
        (**self).discard(channel)
    }
}

impl<T: Indicator + ?Sized> Indicator for &mut T {
    fn set(&mut self, on: bool) {
        (**self).set(on);
    }
}

// ── Cancellation ────────────────────────────────────────────────

/// Cooperative shutdown flag, raised from a signal handler and observed at
/// the single suspension point of the capture loop.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

// ── Edge latches ────────────────────────────────────────────────

/// Sticky, debounced edge flag. Set from any thread, cleared by the poller.
#[derive(Debug)]
pub struct EdgeLatch {
    pending: AtomicBool,
    debounce: Duration,
    last_accepted: Mutex<Option<Instant>>,
}

impl EdgeLatch {
    pub fn new(debounce: Duration) -> Self {
        Self {
            pending: AtomicBool::new(false),
            debounce,
            last_accepted: Mutex::new(None),
        }
    }

    /// Record an edge seen now. Returns false if it fell inside the
    /// debounce window of the previous accepted edge.
    pub fn trigger(&self) -> bool {
        self.trigger_at(Instant::now())
    }

    /// Record an edge seen at `at`.
    pub fn trigger_at(&self, at: Instant) -> bool {
        let mut last = self
            .last_accepted
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = *last {
            if at.saturating_duration_since(prev) < self.debounce {
                return false;
            }
        }
        *last = Some(at);
        self.pending.store(true, Ordering::Release);
        true
    }

    /// Read-and-clear.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

/// The latches of one input source, keyed by logical channel.
#[derive(Debug, Clone)]
pub(crate) struct LatchSet {
    latches: Vec<(Channel, Arc<EdgeLatch>)>,
}

impl LatchSet {
    pub(crate) fn new(debounce: Duration, channels: &[Channel]) -> Self {
        Self {
            latches: channels
                .iter()
                .map(|&ch| (ch, Arc::new(EdgeLatch::new(debounce))))
                .collect(),
        }
    }

    pub(crate) fn get(&self, channel: Channel) -> Result<&Arc<EdgeLatch>, InputError> {
        self.latches
            .iter()
            .find(|(ch, _)| *ch == channel)
            .map(|(_, latch)| latch)
            .ok_or_else(|| InputError::UnknownChannel(channel.to_string()))
    }

    /// Clear and return the first latched channel, in `channels` order.
    pub(crate) fn take_first(&self, channels: &[Channel]) -> Result<Option<Channel>, InputError> {
        for &channel in channels {
            if self.get(channel)?.take() {
                return Ok(Some(channel));
            }
        }
        Ok(None)
    }

    /// Poll until an edge is latched on one of `channels` or shutdown is
    /// requested. Pending edges are reported before cancellation.
    pub(crate) fn wait(
        &self,
        channels: &[Channel],
        poll_interval: Duration,
        shutdown: &Shutdown,
    ) -> Result<Wait, InputError> {
        if channels.is_empty() {
            return Err(InputError::NoChannels);
        }
        debug!(?channels, "waiting for input");
        loop {
            if let Some(channel) = self.take_first(channels)? {
                debug!(%channel, "edge detected");
                return Ok(Wait::Edge(channel));
            }
            if shutdown.is_requested() {
                return Ok(Wait::Cancelled);
            }
            std::thread::sleep(poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_is_sticky_until_taken() {
        let latch = EdgeLatch::new(Duration::ZERO);
        assert!(!latch.take());
        latch.trigger();
        assert!(latch.is_pending());
        assert!(latch.is_pending());
        assert!(latch.take());
        assert!(!latch.take());
    }

    #[test]
    fn debounce_drops_edges_inside_window() {
        let latch = EdgeLatch::new(Duration::from_millis(200));
        let t0 = Instant::now();
        assert!(latch.trigger_at(t0));
        assert!(!latch.trigger_at(t0 + Duration::from_millis(150)));
        assert!(latch.take());
        assert!(!latch.trigger_at(t0 + Duration::from_millis(199)));
        assert!(!latch.take());
        assert!(latch.trigger_at(t0 + Duration::from_millis(200)));
        assert!(latch.take());
    }

    #[test]
    fn simultaneous_edges_resolve_in_slice_order() {
        let set = LatchSet::new(Duration::ZERO, &[Channel::Pedal, Channel::StartStop]);
        set.get(Channel::Pedal).unwrap().trigger();
        set.get(Channel::StartStop).unwrap().trigger();

        let order = [Channel::Pedal, Channel::StartStop];
        assert_eq!(set.take_first(&order).unwrap(), Some(Channel::Pedal));
        // StartStop latch untouched by the first take.
        assert_eq!(set.take_first(&order).unwrap(), Some(Channel::StartStop));
        assert_eq!(set.take_first(&order).unwrap(), None);
    }

    #[test]
    fn reversed_order_prefers_start_stop() {
        let set = LatchSet::new(Duration::ZERO, &[Channel::Pedal, Channel::StartStop]);
        set.get(Channel::Pedal).unwrap().trigger();
        set.get(Channel::StartStop).unwrap().trigger();
        let order = [Channel::StartStop, Channel::Pedal];
        assert_eq!(set.take_first(&order).unwrap(), Some(Channel::StartStop));
    }

    #[test]
    fn unrequested_channel_stays_latched() {
        let set = LatchSet::new(Duration::ZERO, &[Channel::Pedal, Channel::StartStop]);
        set.get(Channel::Pedal).unwrap().trigger();
        assert_eq!(set.take_first(&[Channel::StartStop]).unwrap(), None);
        assert!(set.get(Channel::Pedal).unwrap().is_pending());
    }

    #[test]
    fn wait_reports_pending_edge_before_cancel() {
        let set = LatchSet::new(Duration::ZERO, &[Channel::Pedal]);
        let shutdown = Shutdown::new();
        shutdown.request();
        set.get(Channel::Pedal).unwrap().trigger();
        let got = set
            .wait(&[Channel::Pedal], Duration::from_millis(1), &shutdown)
            .unwrap();
        assert_eq!(got, Wait::Edge(Channel::Pedal));
        let got = set
            .wait(&[Channel::Pedal], Duration::from_millis(1), &shutdown)
            .unwrap();
        assert_eq!(got, Wait::Cancelled);
    }

    #[test]
    fn wait_rejects_empty_channel_list() {
        let set = LatchSet::new(Duration::ZERO, &[Channel::Pedal]);
        let err = set
            .wait(&[], Duration::from_millis(1), &Shutdown::new())
            .unwrap_err();
        assert!(matches!(err, InputError::NoChannels));
    }

    #[test]
    fn edges_from_another_thread_are_not_missed() {
        let set = LatchSet::new(Duration::ZERO, &[Channel::Pedal]);
        let latch = Arc::clone(set.get(Channel::Pedal).unwrap());
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            latch.trigger();
        });
        let got = set
            .wait(&[Channel::Pedal], Duration::from_millis(50), &Shutdown::new())
            .unwrap();
        handle.join().unwrap();
        assert_eq!(got, Wait::Edge(Channel::Pedal));
    }
}
