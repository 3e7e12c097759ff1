//! Signal filtering
//!
//! Smoothing filters for recorded RMS traces. The local implementations are
//! authoritative; [`FilterPipeline`] may delegate to a remote service first and
//! falls back to them on any failure. Every call recomputes from scratch, no
//! state is carried between invocations.

pub mod remote;

pub use remote::{RemoteFilterClient, RemoteFilterError};

use tracing::{debug, warn};

use crate::error::BreathError;
use crate::types::{FilterKind, FilterSpec};

/// Smoothing factor of the default low-pass pipeline
pub const DEFAULT_LOWPASS_ALPHA: f64 = 0.1;

/// Base smoothing factor of the adaptive filter
const ADAPTIVE_BASE_ALPHA: f64 = 0.1;
/// How strongly sample-to-sample change raises the adaptive factor
const ADAPTIVE_CHANGE_GAIN: f64 = 5.0;
const ADAPTIVE_MIN_ALPHA: f64 = 0.1;
const ADAPTIVE_MAX_ALPHA: f64 = 0.9;

/// Centered moving average with the window truncated at both ends.
///
/// Element `i` is the mean of `values[max(0, i - w/2) ..= min(len - 1, i + w/2)]`.
pub fn moving_average(values: &[f64], window_size: usize) -> Result<Vec<f64>, BreathError> {
    if window_size == 0 {
        return Err(BreathError::InvalidArgument(
            "moving average window must be positive".to_string(),
        ));
    }
    if values.len() < 2 {
        return Ok(values.to_vec());
    }

    let half = window_size / 2;
    let last = values.len() - 1;

    let result = (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half).min(last);
            let window = &values[start..=end];
            window.iter().sum::<f64>() / window.len() as f64
        })
        .collect();

    Ok(result)
}

/// First-order exponential smoothing: `r[i] = α·v[i] + (1 − α)·r[i−1]`
pub fn low_pass(values: &[f64], alpha: f64) -> Result<Vec<f64>, BreathError> {
    if !(alpha > 0.0 && alpha <= 1.0) {
        return Err(BreathError::InvalidArgument(format!(
            "low-pass alpha must be in (0, 1], got {alpha}"
        )));
    }

    Ok(smooth(values, |_, _| alpha))
}

/// Exponential smoothing whose factor grows with the sample-to-sample change,
/// so fast transitions are followed closely and plateaus are smoothed hard.
pub fn adaptive(values: &[f64]) -> Vec<f64> {
    smooth(values, |prev, current| {
        let change = (current - prev).abs();
        (ADAPTIVE_BASE_ALPHA * (1.0 + change * ADAPTIVE_CHANGE_GAIN))
            .clamp(ADAPTIVE_MIN_ALPHA, ADAPTIVE_MAX_ALPHA)
    })
}

/// Shared recurrence for the exponential filters; `alpha_for(v[i-1], v[i])`
/// picks the factor for step `i`.
fn smooth(values: &[f64], alpha_for: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    let mut result = Vec::with_capacity(values.len());
    let Some(&first) = values.first() else {
        return result;
    };
    result.push(first);

    for pair in values.windows(2) {
        let alpha = alpha_for(pair[0], pair[1]);
        let prev = result[result.len() - 1];
        result.push(alpha * pair[1] + (1.0 - alpha) * prev);
    }

    result
}

/// Run the filter selected by `spec` locally
pub fn apply_local(
    spec: &FilterSpec,
    lowpass_alpha: f64,
    values: &[f64],
) -> Result<Vec<f64>, BreathError> {
    match spec.kind {
        FilterKind::None => Ok(values.to_vec()),
        FilterKind::MovingAverage => moving_average(values, spec.window_size),
        FilterKind::LowPass => low_pass(values, lowpass_alpha),
        FilterKind::Adaptive => Ok(adaptive(values)),
    }
}

/// Remote-first filtering with local fallback
#[derive(Debug, Clone)]
pub struct FilterPipeline {
    remote: Option<RemoteFilterClient>,
    lowpass_alpha: f64,
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::local()
    }
}

impl FilterPipeline {
    /// Pipeline that never leaves the device
    pub fn local() -> Self {
        Self {
            remote: None,
            lowpass_alpha: DEFAULT_LOWPASS_ALPHA,
        }
    }

    /// Pipeline that tries `client` before computing locally
    pub fn with_remote(client: RemoteFilterClient) -> Self {
        Self {
            remote: Some(client),
            lowpass_alpha: DEFAULT_LOWPASS_ALPHA,
        }
    }

    /// Override the low-pass smoothing factor
    pub fn with_lowpass_alpha(mut self, alpha: f64) -> Result<Self, BreathError> {
        low_pass(&[], alpha)?;
        self.lowpass_alpha = alpha;
        Ok(self)
    }

    pub fn lowpass_alpha(&self) -> f64 {
        self.lowpass_alpha
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Filter a trace. Only invalid filter parameters are reported as errors;
    /// remote failures are logged and answered locally.
    pub async fn apply(
        &self,
        timestamps: &[f64],
        values: &[f64],
        spec: &FilterSpec,
    ) -> Result<Vec<f64>, BreathError> {
        spec.validate()?;

        if let Some(client) = &self.remote {
            match client.filter(timestamps, values, spec).await {
                Ok(filtered) => {
                    debug!(filter = %spec.kind, count = filtered.len(), "Remote filter succeeded");
                    return Ok(filtered);
                }
                Err(e) => {
                    warn!(filter = %spec.kind, error = %e, "Remote filter failed, using local processing");
                }
            }
        }

        apply_local(spec, self.lowpass_alpha, values)
    }

    /// Filter a trace without touching the network
    pub fn apply_local(&self, values: &[f64], spec: &FilterSpec) -> Result<Vec<f64>, BreathError> {
        spec.validate()?;
        apply_local(spec, self.lowpass_alpha, values)
    }
}
