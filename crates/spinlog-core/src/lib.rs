//! # Spinlog Core Library
//!
//! Core logic for spinlog, a workout logger for an exercise bike with a pedal
//! sensor, a start/stop button and an indicator LED. The `spinlog` CLI is a
//! thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Input**: debounced, sticky edge latches behind the [`InputSource`]
//!   trait, with a GPIO backend (feature `rpi`) and a scripted simulator
//! - **Session**: the Idle/Active workout state machine and the
//!   [`SessionStore`] port it writes through
//! - **Storage**: SQLite workout store and TOML configuration
//! - **Cadence**: rpm series derived on demand from pedal timestamps
//! - **Orchestrator**: the single-threaded capture loop
//!
//! ## Key Components
//!
//! - [`CaptureLoop`]: recover, then capture until cancelled
//! - [`SessionMachine`]: workout lifecycle transitions
//! - [`Database`]: workout and pedal stroke persistence
//! - [`LiveCadence`]: incremental cadence for the live display
//! - [`Config`]: application configuration management

pub mod cadence;
pub mod clock;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod input;
pub mod orchestrator;
pub mod session;
pub mod storage;

pub use cadence::{CadenceSample, SampleSource};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dashboard::{session_cadence, LiveCadence, LiveReading, SessionSummary};
pub use error::{CadenceError, ConfigError, CoreError, DatabaseError, InputError};
pub use events::Event;
pub use input::{Channel, Indicator, InputSource, Shutdown, Wait};
pub use orchestrator::{recover_open_sessions, CaptureLoop, Recovery, RunSummary};
pub use session::{PedalEvent, SessionMachine, SessionState, SessionStore, WorkoutSession};
pub use storage::{Config, Database};
