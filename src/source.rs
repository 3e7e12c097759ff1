//! Amplitude sources
//!
//! Capture itself lives outside this crate; a session only needs one RMS
//! reading per tick.

use std::f64::consts::TAU;

/// Supplies the current RMS amplitude of the breath signal
pub trait SampleSource {
    fn read_rms(&mut self) -> f64;
}

impl<F: FnMut() -> f64> SampleSource for F {
    fn read_rms(&mut self) -> f64 {
        self()
    }
}

/// Deterministic breath-like trace: a slow sine around a baseline
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    baseline: f64,
    depth: f64,
    period_secs: f64,
    step_secs: f64,
    elapsed: f64,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(0.05, 0.04, 8.0, 1.0 / 30.0)
    }
}

impl SyntheticSource {
    /// `step_secs` is how far the trace advances per reading
    pub fn new(baseline: f64, depth: f64, period_secs: f64, step_secs: f64) -> Self {
        Self {
            baseline,
            depth,
            period_secs: if period_secs > 0.0 { period_secs } else { 8.0 },
            step_secs: step_secs.max(0.0),
            elapsed: 0.0,
        }
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }
}

impl SampleSource for SyntheticSource {
    fn read_rms(&mut self) -> f64 {
        let value = self.baseline + self.depth * (TAU * self.elapsed / self.period_secs).sin();
        self.elapsed += self.step_secs;
        value.max(0.0)
    }
}
