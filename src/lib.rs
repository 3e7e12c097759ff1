//! Synheart Breath - On-device engine for guided breathing sessions
//!
//! Breath drives a timed breathing exercise (inhale → hold → exhale → rest,
//! repeated for N cycles), records one RMS amplitude sample per tick, seals the
//! recording to CSV, and afterwards summarizes and smooths the persisted trace.
//!
//! ## Modules
//!
//! - **Session**: Phase state machine, recorder and the driver wiring them together
//! - **Analysis**: Loading, summarizing and filtering persisted sessions
//! - **Filtering**: Local smoothing filters with optional remote delegation

pub mod analyzer;
pub mod config;
pub mod error;
pub mod filter;
pub mod phase;
pub mod recorder;
pub mod session;
pub mod source;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use analyzer::{downsample_for_display, LoadedSession, SessionAnalyzer, SessionReport};
pub use config::{BreathConfig, ConfigError};
pub use error::BreathError;
pub use filter::{FilterPipeline, RemoteFilterClient, RemoteFilterError};
pub use phase::{Navigator, PersistenceProbe, PhaseStateMachine, SessionState, SessionStatus};
pub use recorder::{SealHandle, SealOutcome, SessionRecorder};
pub use session::{BreathingSession, SessionOutcome};
pub use source::{SampleSource, SyntheticSource};
pub use types::{
    FilterKind, FilterSpec, NavigationSignal, Phase, PhaseDurations, Sample, SessionConfig,
    SessionSummary,
};

/// Breath version reported by the CLI and FFI
pub const BREATH_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name attached to exported reports
pub const PRODUCER_NAME: &str = "synheart-breath";
