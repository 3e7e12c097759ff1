//! Core types for the Synheart Breath engine
//!
//! This module defines the data that flows between the session state machine,
//! the recorder, the filters and the analyzer: phases and their durations,
//! session configuration, recorded samples, filter selections and summaries.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BreathError;

/// Smallest window accepted for a moving-average display filter
pub const MIN_WINDOW_SIZE: usize = 3;

/// Largest window accepted for a moving-average display filter
pub const MAX_WINDOW_SIZE: usize = 21;

/// Window size used when none is chosen
pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// One stage of a breathing cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Inhale,
    Hold,
    Exhale,
    Rest,
}

impl Phase {
    /// Label used in recorded rows and navigation signals
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Inhale => "inhale",
            Phase::Hold => "hold",
            Phase::Exhale => "exhale",
            Phase::Rest => "rest",
        }
    }

    /// Next phase within a cycle. Rest has no successor inside the cycle;
    /// what follows it is decided by the state machine.
    pub fn next_in_cycle(&self) -> Option<Phase> {
        match self {
            Phase::Inhale => Some(Phase::Hold),
            Phase::Hold => Some(Phase::Exhale),
            Phase::Exhale => Some(Phase::Rest),
            Phase::Rest => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured length of each phase, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseDurations {
    pub inhale_secs: f64,
    pub hold_secs: f64,
    pub exhale_secs: f64,
    pub rest_secs: f64,
}

impl Default for PhaseDurations {
    /// The 4-7-8 pattern followed by a 10 second rest
    fn default() -> Self {
        Self {
            inhale_secs: 4.0,
            hold_secs: 7.0,
            exhale_secs: 8.0,
            rest_secs: 10.0,
        }
    }
}

impl PhaseDurations {
    /// Duration of the given phase
    pub fn of(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Inhale => self.inhale_secs,
            Phase::Hold => self.hold_secs,
            Phase::Exhale => self.exhale_secs,
            Phase::Rest => self.rest_secs,
        }
    }

    /// Length of one full cycle
    pub fn cycle_secs(&self) -> f64 {
        self.inhale_secs + self.hold_secs + self.exhale_secs + self.rest_secs
    }
}

/// Configuration for one breathing session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Number of Inhale→Hold→Exhale→Rest cycles to run
    pub total_cycles: u32,
    /// Per-phase durations
    pub durations: PhaseDurations,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            total_cycles: 4,
            durations: PhaseDurations::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(total_cycles: u32, durations: PhaseDurations) -> Self {
        Self {
            total_cycles,
            durations,
        }
    }

    /// Reject configurations a session cannot run with
    pub fn validate(&self) -> Result<(), BreathError> {
        if self.total_cycles < 1 {
            return Err(BreathError::InvalidConfig(
                "total_cycles must be at least 1".to_string(),
            ));
        }

        for phase in [Phase::Inhale, Phase::Hold, Phase::Exhale, Phase::Rest] {
            let secs = self.durations.of(phase);
            if !secs.is_finite() || secs <= 0.0 {
                return Err(BreathError::InvalidConfig(format!(
                    "{phase} duration must be a positive number of seconds, got {secs}"
                )));
            }
        }

        Ok(())
    }
}

/// One recorded reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the session started
    pub timestamp_secs: f64,
    /// RMS amplitude of the microphone window
    pub amplitude: f64,
    /// Phase the session was in when the reading was taken
    pub phase_label: String,
}

impl Sample {
    pub fn new(timestamp_secs: f64, amplitude: f64, phase_label: impl Into<String>) -> Self {
        Self {
            timestamp_secs,
            amplitude,
            phase_label: phase_label.into(),
        }
    }
}

/// Smoothing algorithm applied to a recorded amplitude trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    #[default]
    None,
    MovingAverage,
    #[serde(rename = "lowpass")]
    LowPass,
    Adaptive,
}

impl FilterKind {
    /// Name used in the remote filter query string
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::None => "none",
            FilterKind::MovingAverage => "moving_average",
            FilterKind::LowPass => "lowpass",
            FilterKind::Adaptive => "adaptive",
        }
    }

    /// Parse a wire name. Unknown names are rejected rather than mapped to `None`.
    pub fn parse(name: &str) -> Result<Self, BreathError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(FilterKind::None),
            "moving_average" => Ok(FilterKind::MovingAverage),
            "lowpass" => Ok(FilterKind::LowPass),
            "adaptive" => Ok(FilterKind::Adaptive),
            other => Err(BreathError::InvalidArgument(format!(
                "unknown filter kind: {other}"
            ))),
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated filter selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub kind: FilterKind,
    /// Only meaningful for [`FilterKind::MovingAverage`]; still sent to the
    /// remote service for every kind.
    pub window_size: usize,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            kind: FilterKind::None,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl FilterSpec {
    /// Build a spec, rejecting moving-average windows that are even or
    /// outside `[MIN_WINDOW_SIZE, MAX_WINDOW_SIZE]`.
    pub fn new(kind: FilterKind, window_size: usize) -> Result<Self, BreathError> {
        let spec = Self { kind, window_size };
        spec.validate()?;
        Ok(spec)
    }

    /// Spec for a kind that does not use a window
    pub fn of_kind(kind: FilterKind) -> Self {
        Self {
            kind,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }

    pub fn validate(&self) -> Result<(), BreathError> {
        if self.kind != FilterKind::MovingAverage {
            return Ok(());
        }
        let w = self.window_size;
        if !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&w) || w % 2 == 0 {
            return Err(BreathError::InvalidArgument(format!(
                "moving average window must be an odd number in [{MIN_WINDOW_SIZE}, {MAX_WINDOW_SIZE}], got {w}"
            )));
        }
        Ok(())
    }
}

/// Statistics derived from a recorded session
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub completed_cycles: u32,
    pub average_amplitude: f64,
    pub max_amplitude: f64,
    pub duration_secs: f64,
}

/// Signals sent to the external view-routing collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "phase", rename_all = "snake_case")]
pub enum NavigationSignal {
    PhaseEntered(Phase),
    SessionFinished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.durations.cycle_secs(), 29.0);
    }

    #[test]
    fn test_zero_cycles_rejected() {
        let config = SessionConfig::new(0, PhaseDurations::default());
        assert!(matches!(
            config.validate(),
            Err(BreathError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_non_positive_duration_rejected() {
        let durations = PhaseDurations {
            hold_secs: 0.0,
            ..Default::default()
        };
        assert!(SessionConfig::new(4, durations).validate().is_err());

        let durations = PhaseDurations {
            rest_secs: f64::NAN,
            ..Default::default()
        };
        assert!(SessionConfig::new(4, durations).validate().is_err());
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(Phase::Inhale.next_in_cycle(), Some(Phase::Hold));
        assert_eq!(Phase::Hold.next_in_cycle(), Some(Phase::Exhale));
        assert_eq!(Phase::Exhale.next_in_cycle(), Some(Phase::Rest));
        assert_eq!(Phase::Rest.next_in_cycle(), None);
    }

    #[test]
    fn test_filter_spec_window_bounds() {
        for w in (3..=21).step_by(2) {
            assert!(FilterSpec::new(FilterKind::MovingAverage, w).is_ok());
        }
        assert!(FilterSpec::new(FilterKind::MovingAverage, 4).is_err());
        assert!(FilterSpec::new(FilterKind::MovingAverage, 1).is_err());
        assert!(FilterSpec::new(FilterKind::MovingAverage, 23).is_err());
        // window is ignored for the other kinds
        assert!(FilterSpec::new(FilterKind::LowPass, 4).is_ok());
    }

    #[test]
    fn test_filter_kind_wire_names() {
        for kind in [
            FilterKind::None,
            FilterKind::MovingAverage,
            FilterKind::LowPass,
            FilterKind::Adaptive,
        ] {
            assert_eq!(FilterKind::parse(kind.as_str()).unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert!(FilterKind::parse("butterworth").is_err());
    }

    #[test]
    fn test_navigation_signal_json() {
        let json = serde_json::to_string(&NavigationSignal::PhaseEntered(Phase::Hold)).unwrap();
        assert_eq!(json, r#"{"signal":"phase_entered","phase":"hold"}"#);
        let json = serde_json::to_string(&NavigationSignal::SessionFinished).unwrap();
        assert_eq!(json, r#"{"signal":"session_finished"}"#);
    }
}
