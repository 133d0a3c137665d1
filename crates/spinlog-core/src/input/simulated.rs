//! Deterministic input source and indicator for tests and `run --simulate`.
//!
//! Edges reach a [`SimulatedInput`] two ways:
//!
//! - an [`EdgeInjector`] handle, usable from any thread, fires a channel
//!   immediately (subject to debounce, measured in real time);
//! - a script of [`ScriptStep`]s, consumed one step per poll whenever
//!   nothing requested is latched. Each step first advances the attached
//!   [`ManualClock`] and a virtual monotonic time, so debounce and session
//!   timestamps are fully deterministic.
//!
//! When a script is attached and runs dry, the input raises its shutdown
//! token and reports [`Wait::Cancelled`], ending the capture loop the same
//! way a terminate signal would.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::TimeDelta;

use super::{Channel, Indicator, InputSource, LatchSet, Shutdown, Wait};
use crate::clock::ManualClock;
use crate::error::InputError;

const CHANNELS: [Channel; 2] = [Channel::Pedal, Channel::StartStop];

/// One scripted edge, fired `after` the previous step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptStep {
    pub channel: Channel,
    pub after: TimeDelta,
}

impl ScriptStep {
    pub fn new(channel: Channel, after: TimeDelta) -> Self {
        Self { channel, after }
    }

    pub fn pedal_after_ms(ms: i64) -> Self {
        Self::new(Channel::Pedal, TimeDelta::milliseconds(ms))
    }

    pub fn button_after_ms(ms: i64) -> Self {
        Self::new(Channel::StartStop, TimeDelta::milliseconds(ms))
    }
}

#[derive(Debug)]
pub struct SimulatedInput {
    latches: LatchSet,
    shutdown: Shutdown,
    script: Option<VecDeque<ScriptStep>>,
    clock: Option<ManualClock>,
    virtual_now: Instant,
    polls: Arc<AtomicUsize>,
}

impl SimulatedInput {
    pub fn new(shutdown: Shutdown) -> Self {
        Self::with_debounce(shutdown, Duration::ZERO)
    }

    pub fn with_debounce(shutdown: Shutdown, debounce: Duration) -> Self {
        Self {
            latches: LatchSet::new(debounce, &CHANNELS),
            shutdown,
            script: None,
            clock: None,
            virtual_now: Instant::now(),
            polls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Attach a script; the input cancels once it is exhausted.
    pub fn script(mut self, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        self.script = Some(steps.into_iter().collect());
        self
    }

    /// Advance this clock by each step's delay before firing it.
    pub fn with_clock(mut self, clock: ManualClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Handle for firing edges from outside the capture loop.
    pub fn injector(&self) -> EdgeInjector {
        EdgeInjector {
            latches: self.latches.clone(),
            polls: Arc::clone(&self.polls),
        }
    }

    /// Number of polls performed; each scripted step costs one.
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::Acquire)
    }

    fn fire_next_step(&mut self) -> Result<bool, InputError> {
        let Some(step) = self.script.as_mut().and_then(VecDeque::pop_front) else {
            return Ok(false);
        };
        if let Some(clock) = &self.clock {
            clock.advance(step.after);
        }
        self.virtual_now += step.after.to_std().unwrap_or_default();
        self.latches.get(step.channel)?.trigger_at(self.virtual_now);
        Ok(true)
    }
}

impl InputSource for SimulatedInput {
    fn wait_for_any(
        &mut self,
        channels: &[Channel],
        poll_interval: Duration,
    ) -> Result<Wait, InputError> {
        if channels.is_empty() {
            return Err(InputError::NoChannels);
        }
        loop {
            self.polls.fetch_add(1, Ordering::AcqRel);
            if let Some(channel) = self.latches.take_first(channels)? {
                return Ok(Wait::Edge(channel));
            }
            if self.shutdown.is_requested() {
                return Ok(Wait::Cancelled);
            }
            if self.script.is_some() {
                if !self.fire_next_step()? {
                    self.shutdown.request();
                    return Ok(Wait::Cancelled);
                }
                continue;
            }
            std::thread::sleep(poll_interval);
        }
    }

    fn discard(&mut self, channel: Channel) -> Result<(), InputError> {
        self.latches.get(channel)?.take();
        Ok(())
    }
}

/// Fires edges into a [`SimulatedInput`] from any thread.
#[derive(Debug, Clone)]
pub struct EdgeInjector {
    latches: LatchSet,
    polls: Arc<AtomicUsize>,
}

impl EdgeInjector {
    /// Returns false if debounce swallowed the edge.
    pub fn fire(&self, channel: Channel) -> bool {
        self.latches
            .get(channel)
            .map(|latch| latch.trigger())
            .unwrap_or(false)
    }

    /// True until the capture loop has consumed the last edge on `channel`.
    pub fn is_pending(&self, channel: Channel) -> bool {
        self.latches
            .get(channel)
            .map(|latch| latch.is_pending())
            .unwrap_or(false)
    }

    /// Block until the edge on `channel` was taken and the loop is back to
    /// waiting, so its transition is complete. False on timeout.
    pub fn wait_handled(&self, channel: Channel, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_pending(channel) {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        let taken_at = self.polls.load(Ordering::Acquire);
        while self.polls.load(Ordering::Acquire) == taken_at {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

/// Indicator double recording its state. Clones observe the same LED.
#[derive(Debug, Clone, Default)]
pub struct SimulatedIndicator {
    lit: Arc<AtomicBool>,
    changes: Arc<AtomicUsize>,
}

impl SimulatedIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_lit(&self) -> bool {
        self.lit.load(Ordering::Acquire)
    }

    /// Number of on/off transitions seen.
    pub fn changes(&self) -> usize {
        self.changes.load(Ordering::Acquire)
    }
}

impl Indicator for SimulatedIndicator {
    fn set(&mut self, on: bool) {
        if self.lit.swap(on, Ordering::AcqRel) != on {
            self.changes.fetch_add(1, Ordering::AcqRel);
        }
    }
}
