//! Configuration
//!
//! `BreathConfig` is read from TOML. Every key is optional and falls back to
//! the built-in default, so an empty file is a valid configuration.
//!
//! Search order for [`BreathConfig::load`]:
//! 1. `$BREATH_CONFIG`
//! 2. `./breath.toml`
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::analyzer::{SessionAnalyzer, DEFAULT_ASSUMED_CYCLE_SECS, DEFAULT_DISPLAY_POINTS};
use crate::filter::remote::{DEFAULT_REMOTE_FILTER_URL, DEFAULT_REMOTE_TIMEOUT};
use crate::filter::{FilterPipeline, RemoteFilterClient, DEFAULT_LOWPASS_ALPHA};
use crate::types::{PhaseDurations, SessionConfig};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "BREATH_CONFIG";

/// Config file picked up from the working directory
pub const LOCAL_CONFIG_FILE: &str = "breath.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// `[session]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub total_cycles: u32,
    pub inhale_secs: f64,
    pub hold_secs: f64,
    pub exhale_secs: f64,
    pub rest_secs: f64,
}

impl Default for SessionSection {
    fn default() -> Self {
        let config = SessionConfig::default();
        Self {
            total_cycles: config.total_cycles,
            inhale_secs: config.durations.inhale_secs,
            hold_secs: config.durations.hold_secs,
            exhale_secs: config.durations.exhale_secs,
            rest_secs: config.durations.rest_secs,
        }
    }
}

/// `[storage]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub data_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
        }
    }
}

/// `[analysis]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    pub assumed_cycle_secs: f64,
    pub lowpass_alpha: f64,
    pub display_points: usize,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            assumed_cycle_secs: DEFAULT_ASSUMED_CYCLE_SECS,
            lowpass_alpha: DEFAULT_LOWPASS_ALPHA,
            display_points: DEFAULT_DISPLAY_POINTS,
        }
    }
}

/// `[remote_filter]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteFilterSection {
    pub enabled: bool,
    pub url: String,
    pub timeout_secs: f64,
}

impl Default for RemoteFilterSection {
    fn default() -> Self {
        Self {
            enabled: false,
            url: DEFAULT_REMOTE_FILTER_URL.to_string(),
            timeout_secs: DEFAULT_REMOTE_TIMEOUT.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreathConfig {
    pub session: SessionSection,
    pub storage: StorageSection,
    pub analysis: AnalysisSection,
    pub remote_filter: RemoteFilterSection,
}

impl BreathConfig {
    /// Load using the search order in the module docs. Never fails; broken
    /// files are logged and skipped.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {CONFIG_ENV_VAR}");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {CONFIG_ENV_VAR}, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{CONFIG_ENV_VAR} points to a missing file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{LOCAL_CONFIG_FILE}");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{LOCAL_CONFIG_FILE}, using defaults");
                }
            }
        }

        info!("No config file found, using built-in defaults");
        Self::default()
    }

    /// Load and validate a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Collect every problem rather than stopping at the first
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if let Err(e) = self.session_config().validate() {
            errors.push(e.to_string());
        }

        let a = &self.analysis;
        if !(a.assumed_cycle_secs.is_finite() && a.assumed_cycle_secs > 0.0) {
            errors.push(format!(
                "analysis.assumed_cycle_secs must be positive, got {}",
                a.assumed_cycle_secs
            ));
        }
        if !(a.lowpass_alpha > 0.0 && a.lowpass_alpha <= 1.0) {
            errors.push(format!(
                "analysis.lowpass_alpha must be in (0, 1], got {}",
                a.lowpass_alpha
            ));
        }
        if a.display_points == 0 {
            errors.push("analysis.display_points must be at least 1".to_string());
        }

        let r = &self.remote_filter;
        if !(r.timeout_secs.is_finite() && r.timeout_secs > 0.0) {
            errors.push(format!(
                "remote_filter.timeout_secs must be positive, got {}",
                r.timeout_secs
            ));
        }
        if r.enabled && !(r.url.starts_with("http://") || r.url.starts_with("https://")) {
            errors.push(format!("remote_filter.url must be an http(s) URL, got {:?}", r.url));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let s = &self.session;
        SessionConfig::new(
            s.total_cycles,
            PhaseDurations {
                inhale_secs: s.inhale_secs,
                hold_secs: s.hold_secs,
                exhale_secs: s.exhale_secs,
                rest_secs: s.rest_secs,
            },
        )
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.remote_filter.timeout_secs).unwrap_or(DEFAULT_REMOTE_TIMEOUT)
    }

    /// Filter pipeline as configured. A remote client that cannot be built
    /// is logged and left out.
    pub fn filter_pipeline(&self) -> FilterPipeline {
        let pipeline = if self.remote_filter.enabled {
            match RemoteFilterClient::new(&self.remote_filter.url, self.remote_timeout()) {
                Ok(client) => FilterPipeline::with_remote(client),
                Err(e) => {
                    warn!(url = %self.remote_filter.url, error = %e, "Remote filter client unavailable, filtering locally");
                    FilterPipeline::local()
                }
            }
        } else {
            FilterPipeline::local()
        };

        match pipeline.clone().with_lowpass_alpha(self.analysis.lowpass_alpha) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Ignoring configured low-pass alpha");
                pipeline
            }
        }
    }

    pub fn analyzer(&self) -> SessionAnalyzer {
        SessionAnalyzer::new(self.analysis.assumed_cycle_secs, self.filter_pipeline())
    }
}
