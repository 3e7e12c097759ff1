//! Session analysis
//!
//! Loads the most recent persisted session, parses its rows, derives summary
//! statistics and produces filtered traces for display. Failures degrade to
//! empty reports rather than errors wherever a caller only wants something
//! to show.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::BreathError;
use crate::filter::FilterPipeline;
use crate::recorder::SESSION_FILE_PREFIX;
use crate::types::{FilterSpec, Sample, SessionSummary};

/// Cycle length assumed when estimating completed cycles from a trace
pub const DEFAULT_ASSUMED_CYCLE_SECS: f64 = 8.0;

/// Samples required before cycles are estimated at all
pub const MIN_SAMPLES_FOR_CYCLES: usize = 10;

/// Points kept when decimating a trace for display
pub const DEFAULT_DISPLAY_POINTS: usize = 150;

const DISPLAY_FORMAT: &str = "%d/%m/%Y %H:%M";

fn stamp_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"breathing_data_(\d{8})_(\d{6})").ok())
        .as_ref()
}

/// Where a session's display time came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StampSource {
    FileName,
    ModifiedTime,
    CurrentTime,
}

/// Display timestamp of a loaded session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStamp {
    pub at: NaiveDateTime,
    pub source: StampSource,
}

impl SessionStamp {
    /// Rendered as `dd/MM/yyyy HH:mm`
    pub fn display(&self) -> String {
        self.at.format(DISPLAY_FORMAT).to_string()
    }

    fn now() -> Self {
        Self {
            at: Local::now().naive_local(),
            source: StampSource::CurrentTime,
        }
    }
}

/// A session read back from disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedSession {
    pub path: PathBuf,
    pub stamp: SessionStamp,
    pub samples: Vec<Sample>,
}

impl LoadedSession {
    pub fn timestamps(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.timestamp_secs).collect()
    }

    pub fn amplitudes(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.amplitude).collect()
    }
}

/// What the summary view shows, whether or not loading worked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub stamp: SessionStamp,
    pub summary: SessionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub samples: Vec<Sample>,
}

impl SessionReport {
    pub fn has_data(&self) -> bool {
        !self.samples.is_empty()
    }
}

/// Reads persisted sessions and derives statistics from them
#[derive(Debug, Clone)]
pub struct SessionAnalyzer {
    assumed_cycle_secs: f64,
    pipeline: FilterPipeline,
}

impl Default for SessionAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_ASSUMED_CYCLE_SECS, FilterPipeline::local())
    }
}

impl SessionAnalyzer {
    /// Non-positive cycle lengths fall back to the default
    pub fn new(assumed_cycle_secs: f64, pipeline: FilterPipeline) -> Self {
        let assumed_cycle_secs = if assumed_cycle_secs.is_finite() && assumed_cycle_secs > 0.0 {
            assumed_cycle_secs
        } else {
            DEFAULT_ASSUMED_CYCLE_SECS
        };
        Self {
            assumed_cycle_secs,
            pipeline,
        }
    }

    pub fn assumed_cycle_secs(&self) -> f64 {
        self.assumed_cycle_secs
    }

    pub fn pipeline(&self) -> &FilterPipeline {
        &self.pipeline
    }

    /// Load the session file with the latest modification time in `dir`
    pub fn load_most_recent(&self, dir: &Path) -> Result<LoadedSession, BreathError> {
        let path = find_most_recent(dir)?;
        info!(path = %path.display(), "Loading most recent session");
        self.load_file(&path)
    }

    /// Load a specific session file
    pub fn load_file(&self, path: &Path) -> Result<LoadedSession, BreathError> {
        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidData => {
                BreathError::ParseError(format!("{} is not UTF-8 text", path.display()))
            }
            _ => BreathError::Io(e),
        })?;
        let samples = Self::parse(&contents);
        let stamp = stamp_for(path);
        debug!(
            path = %path.display(),
            samples = samples.len(),
            stamp = %stamp.display(),
            "Session loaded"
        );
        Ok(LoadedSession {
            path: path.to_path_buf(),
            stamp,
            samples,
        })
    }

    /// Parse CSV contents, skipping the header and any malformed rows.
    ///
    /// Only the first two comma-separated fields are read as numbers; the
    /// phase label is the last field when there are three or more.
    pub fn parse(contents: &str) -> Vec<Sample> {
        let mut samples = Vec::new();

        for (line_no, line) in contents.lines().enumerate().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 2 {
                debug!(line = line_no + 1, "Skipping row with too few fields");
                continue;
            }

            match (parse_decimal(fields[0]), parse_decimal(fields[1])) {
                (Some(timestamp), Some(amplitude)) => {
                    let phase = if fields.len() >= 3 {
                        fields[fields.len() - 1].trim()
                    } else {
                        ""
                    };
                    samples.push(Sample::new(timestamp, amplitude, phase));
                }
                _ => {
                    debug!(line = line_no + 1, row = line, "Skipping malformed row");
                }
            }
        }

        samples
    }

    /// Aggregate statistics; every field is zero for empty input
    pub fn summarize(&self, samples: &[Sample]) -> SessionSummary {
        let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
            return SessionSummary::default();
        };

        let duration_secs = if samples.len() >= 2 {
            last.timestamp_secs - first.timestamp_secs
        } else {
            0.0
        };

        let completed_cycles = if samples.len() >= MIN_SAMPLES_FOR_CYCLES {
            (duration_secs / self.assumed_cycle_secs).floor().max(0.0) as u32
        } else {
            0
        };

        let sum: f64 = samples.iter().map(|s| s.amplitude).sum();
        let average_amplitude = sum / samples.len() as f64;
        let max_amplitude = samples
            .iter()
            .map(|s| s.amplitude)
            .fold(f64::NEG_INFINITY, f64::max);

        SessionSummary {
            completed_cycles,
            average_amplitude,
            max_amplitude,
            duration_secs,
        }
    }

    /// Load and summarize the latest session, never failing
    pub fn report(&self, dir: &Path) -> SessionReport {
        match self.load_most_recent(dir) {
            Ok(session) => {
                let summary = self.summarize(&session.samples);
                SessionReport {
                    stamp: session.stamp,
                    summary,
                    path: Some(session.path),
                    error: None,
                    samples: session.samples,
                }
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Could not load session data");
                SessionReport {
                    stamp: SessionStamp::now(),
                    summary: SessionSummary::default(),
                    path: None,
                    error: Some(e.to_string()),
                    samples: Vec::new(),
                }
            }
        }
    }

    /// Filter a loaded session's amplitudes for display
    pub async fn filtered_trace(
        &self,
        session: &LoadedSession,
        spec: &FilterSpec,
    ) -> Result<Vec<f64>, BreathError> {
        self.pipeline
            .apply(&session.timestamps(), &session.amplitudes(), spec)
            .await
    }
}

/// Keep every `len / max_points`-th value so at most about `max_points` remain
pub fn downsample_for_display(values: &[f64], max_points: usize) -> Vec<f64> {
    if max_points == 0 || values.len() <= max_points {
        return values.to_vec();
    }
    let step = values.len() / max_points;
    values.iter().step_by(step).copied().collect()
}

fn parse_decimal(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn is_session_file(name: &str) -> bool {
    name.starts_with(SESSION_FILE_PREFIX) && name.ends_with(".csv")
}

fn find_most_recent(dir: &Path) -> Result<PathBuf, BreathError> {
    let entries = fs::read_dir(dir).map_err(|e| {
        warn!(dir = %dir.display(), error = %e, "Cannot read session directory");
        BreathError::NoSessionFound(dir.to_path_buf())
    })?;

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    let mut count = 0usize;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_session_file(name) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        count += 1;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if latest.as_ref().map_or(true, |(t, _)| modified > *t) {
            latest = Some((modified, entry.path()));
        }
    }

    debug!(dir = %dir.display(), count, "Session files found");
    latest
        .map(|(_, path)| path)
        .ok_or_else(|| BreathError::NoSessionFound(dir.to_path_buf()))
}

/// Display time from the file name, else its modification time, else now
fn stamp_for(path: &Path) -> SessionStamp {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    if let Some(at) = stamp_from_name(name) {
        return SessionStamp {
            at,
            source: StampSource::FileName,
        };
    }

    debug!(name, "File name carries no usable timestamp");
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => SessionStamp {
            at: DateTime::<Local>::from(modified).naive_local(),
            source: StampSource::ModifiedTime,
        },
        Err(_) => SessionStamp::now(),
    }
}

fn stamp_from_name(name: &str) -> Option<NaiveDateTime> {
    let caps = stamp_pattern()?.captures(name)?;
    let date = NaiveDate::parse_from_str(caps.get(1)?.as_str(), "%Y%m%d").ok()?;
    let time = NaiveTime::parse_from_str(caps.get(2)?.as_str(), "%H%M%S").ok()?;
    Some(date.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn samples_at(times: &[f64]) -> Vec<Sample> {
        times
            .iter()
            .map(|&t| Sample::new(t, 0.1, "exhale"))
            .collect()
    }

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn set_modified(path: &Path, secs_after_epoch: u64) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs_after_epoch))
            .unwrap();
    }

    #[test]
    fn test_parse_skips_malformed_row() {
        let csv = "timestamp,rms,phase\n\
                   0.00,0.01000,inhale\n\
                   0.02,abc,inhale\n\
                   0.04,0.03000,hold\n";
        let samples = SessionAnalyzer::parse(csv);
        assert_eq!(
            samples,
            vec![
                Sample::new(0.0, 0.01, "inhale"),
                Sample::new(0.04, 0.03, "hold"),
            ]
        );
    }

    #[test]
    fn test_parse_tolerates_noise() {
        let csv = "timestamp,rms,phase\r\n\
                   \r\n\
                   only_one_field\r\n\
                   1.5,0.2\r\n\
                   NaN,0.2,rest\r\n\
                   2.0,0.25,rest\r\n";
        let samples = SessionAnalyzer::parse(csv);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], Sample::new(1.5, 0.2, ""));
        assert_eq!(samples[1], Sample::new(2.0, 0.25, "rest"));
    }

    #[test]
    fn test_parse_comma_decimal_row_uses_first_two_fields() {
        // "1,50" and "0,01234" written with comma separators become four fields.
        let csv = "timestamp,rms,phase\n1,50,0,01234,exhale\n";
        let samples = SessionAnalyzer::parse(csv);
        assert_eq!(samples, vec![Sample::new(1.0, 50.0, "exhale")]);
    }

    #[test]
    fn test_parse_header_only() {
        assert!(SessionAnalyzer::parse("timestamp,rms,phase\n").is_empty());
        assert!(SessionAnalyzer::parse("").is_empty());
    }

    #[test]
    fn test_summarize_few_samples_has_no_cycles() {
        let analyzer = SessionAnalyzer::default();
        let summary = analyzer.summarize(&samples_at(&[0.0, 10.0]));
        assert_eq!(summary.completed_cycles, 0);
        assert_eq!(summary.duration_secs, 10.0);
    }

    #[test]
    fn test_summarize_estimates_cycles() {
        let analyzer = SessionAnalyzer::default();
        let times: Vec<f64> = (0..=20).map(|i| i as f64 * 2.0).collect(); // 0..=40 s
        let summary = analyzer.summarize(&samples_at(&times));
        assert_eq!(summary.completed_cycles, 5);
        assert_eq!(summary.duration_secs, 40.0);

        let analyzer = SessionAnalyzer::new(29.0, FilterPipeline::local());
        assert_eq!(analyzer.summarize(&samples_at(&times)).completed_cycles, 1);
    }

    #[test]
    fn test_summarize_amplitude_stats() {
        let analyzer = SessionAnalyzer::default();
        let samples = vec![
            Sample::new(0.0, 0.1, "inhale"),
            Sample::new(1.0, 0.4, "hold"),
            Sample::new(2.0, 0.1, "exhale"),
        ];
        let summary = analyzer.summarize(&samples);
        assert!((summary.average_amplitude - 0.2).abs() < 1e-12);
        assert_eq!(summary.max_amplitude, 0.4);
        assert_eq!(summary.duration_secs, 2.0);
    }

    #[test]
    fn test_summarize_empty_and_single() {
        let analyzer = SessionAnalyzer::default();
        assert_eq!(analyzer.summarize(&[]), SessionSummary::default());

        let single = analyzer.summarize(&[Sample::new(3.0, 0.5, "rest")]);
        assert_eq!(single.duration_secs, 0.0);
        assert_eq!(single.average_amplitude, 0.5);
        assert_eq!(single.max_amplitude, 0.5);
    }

    #[test]
    fn test_invalid_cycle_length_uses_default() {
        let analyzer = SessionAnalyzer::new(0.0, FilterPipeline::local());
        assert_eq!(analyzer.assumed_cycle_secs(), DEFAULT_ASSUMED_CYCLE_SECS);
    }

    #[test]
    fn test_load_most_recent_by_modification_time() {
        let dir = TempDir::new().unwrap();
        let older = write(
            dir.path(),
            "breathing_data_20240301_090000.csv",
            "timestamp,rms,phase\n0.00,0.10000,inhale\n",
        );
        let newer = write(
            dir.path(),
            "breathing_data_20240101_080000.csv",
            "timestamp,rms,phase\n0.00,0.20000,inhale\n0.02,0.30000,inhale\n",
        );
        set_modified(&older, 1_000);
        set_modified(&newer, 2_000);
        // Ignored: the well-known copy and unrelated files.
        let copy = write(dir.path(), "breathing_data.csv", "timestamp,rms,phase\n");
        set_modified(&copy, 9_000);
        write(dir.path(), "notes.txt", "hello");

        let session = SessionAnalyzer::default()
            .load_most_recent(dir.path())
            .unwrap();
        assert_eq!(session.path, newer);
        assert_eq!(session.samples.len(), 2);
        assert_eq!(session.stamp.source, StampSource::FileName);
        assert_eq!(session.stamp.display(), "01/01/2024 08:00");
    }

    #[test]
    fn test_load_most_recent_empty_dir() {
        let dir = TempDir::new().unwrap();
        let result = SessionAnalyzer::default().load_most_recent(dir.path());
        assert!(matches!(result, Err(BreathError::NoSessionFound(_))));

        let missing = dir.path().join("missing");
        let result = SessionAnalyzer::default().load_most_recent(&missing);
        assert!(matches!(result, Err(BreathError::NoSessionFound(_))));
    }

    #[test]
    fn test_stamp_falls_back_to_modified_time() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "breathing_data_morning.csv",
            "timestamp,rms,phase\n0.00,0.10000,inhale\n",
        );
        let session = SessionAnalyzer::default().load_file(&path).unwrap();
        assert_eq!(session.stamp.source, StampSource::ModifiedTime);

        // Digits that are not a real date also fall back.
        let path = write(dir.path(), "breathing_data_20241399_250000.csv", "");
        let session = SessionAnalyzer::default().load_file(&path).unwrap();
        assert_eq!(session.stamp.source, StampSource::ModifiedTime);
        assert!(session.samples.is_empty());
    }

    #[test]
    fn test_load_binary_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("breathing_data_20240309_070530.csv");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();
        let result = SessionAnalyzer::default().load_file(&path);
        assert!(matches!(result, Err(BreathError::ParseError(_))));
    }

    #[test]
    fn test_stamp_from_name() {
        let at = stamp_from_name("breathing_data_20240309_070530").unwrap();
        assert_eq!(at.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-03-09 07:05:30");
        assert!(stamp_from_name("data").is_none());
    }

    #[test]
    fn test_report_degrades_without_data() {
        let dir = TempDir::new().unwrap();
        let report = SessionAnalyzer::default().report(dir.path());
        assert!(!report.has_data());
        assert!(report.error.is_some());
        assert_eq!(report.summary, SessionSummary::default());
        assert_eq!(report.stamp.source, StampSource::CurrentTime);
    }

    #[test]
    fn test_report_with_data() {
        let dir = TempDir::new().unwrap();
        let mut csv = String::from("timestamp,rms,phase\n");
        for i in 0..=12 {
            csv.push_str(&format!("{:.2},0.05000,exhale\n", i as f64 * 1.5));
        }
        write(dir.path(), "breathing_data_20240309_070530.csv", &csv);

        let report = SessionAnalyzer::default().report(dir.path());
        assert!(report.has_data());
        assert!(report.error.is_none());
        assert_eq!(report.summary.completed_cycles, 2); // 18 s / 8 s
        assert_eq!(report.summary.duration_secs, 18.0);
    }

    #[test]
    fn test_downsample_for_display() {
        let values: Vec<f64> = (0..10).map(f64::from).collect();
        assert_eq!(downsample_for_display(&values, 20), values);
        assert_eq!(downsample_for_display(&values, 3), vec![0.0, 3.0, 6.0, 9.0]);
        assert_eq!(downsample_for_display(&values, 5), vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[tokio::test]
    async fn test_filtered_trace_uses_pipeline() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "breathing_data_20240309_070530.csv",
            "timestamp,rms,phase\n0.00,1.00000,exhale\n0.02,2.00000,exhale\n0.04,3.00000,exhale\n",
        );
        let analyzer = SessionAnalyzer::default();
        let session = analyzer.load_file(&path).unwrap();
        let spec = FilterSpec::new(crate::types::FilterKind::MovingAverage, 3).unwrap();
        let trace = analyzer.filtered_trace(&session, &spec).await.unwrap();
        assert_eq!(trace, vec![1.5, 2.0, 2.5]);
    }
}
