//! Session recording and persistence
//!
//! A [`SessionRecorder`] collects one row per tick and seals the session to
//! CSV exactly once. Sealing happens on an explicit [`SessionRecorder::seal`]
//! call or, failing that, when the recorder is dropped, so a session torn
//! down early is still written.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::BreathError;
use crate::phase::PersistenceProbe;
use crate::types::Sample;

/// CSV header line
pub const CSV_HEADER: &str = "timestamp,rms,phase";

/// Prefix shared by every session file
pub const SESSION_FILE_PREFIX: &str = "breathing_data_";

/// Well-known copy of the latest session
pub const LATEST_SESSION_FILE: &str = "breathing_data.csv";

/// Last-resort file name used when the regular write fails
pub const FALLBACK_SESSION_FILE: &str = "data.csv";

/// File name for a session started at `started_at`
pub fn session_file_name(started_at: &DateTime<Local>) -> String {
    format!(
        "{SESSION_FILE_PREFIX}{}.csv",
        started_at.format("%Y%m%d_%H%M%S")
    )
}

/// Shared, read-only view of a recorder's sealed flag
#[derive(Debug, Clone, Default)]
pub struct SealHandle(Arc<AtomicBool>);

impl SealHandle {
    pub fn is_sealed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn mark_sealed(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl PersistenceProbe for SealHandle {
    fn is_sealed(&self) -> bool {
        SealHandle::is_sealed(self)
    }
}

/// Result of a seal attempt that did not fail outright
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealOutcome {
    /// Primary file and the well-known copy were written
    Written { path: PathBuf, copy: PathBuf },
    /// Only the fallback file could be written
    Fallback { path: PathBuf },
    /// An earlier call already sealed the session
    AlreadySealed,
}

/// Appends samples during a session and persists them once
#[derive(Debug)]
pub struct SessionRecorder {
    session_id: Uuid,
    dir: PathBuf,
    path: PathBuf,
    samples: Vec<Sample>,
    sealed: SealHandle,
}

impl SessionRecorder {
    /// Start recording a session that will be written under `dir`
    pub fn begin(dir: impl Into<PathBuf>, started_at: DateTime<Local>) -> Self {
        let dir = dir.into();
        let path = dir.join(session_file_name(&started_at));
        let session_id = Uuid::new_v4();

        info!(session_id = %session_id, path = %path.display(), "Recording session");

        Self {
            session_id,
            dir,
            path,
            samples: Vec::new(),
            sealed: SealHandle::default(),
        }
    }

    /// Append a reading; ignored once the session is sealed
    pub fn record(&mut self, timestamp_secs: f64, amplitude: f64, phase_label: &str) {
        if self.is_sealed() {
            return;
        }
        // RMS is never negative; NaN collapses to 0 as well.
        let amplitude = amplitude.max(0.0);
        let timestamp_secs = timestamp_secs.max(0.0);
        self.samples
            .push(Sample::new(timestamp_secs, amplitude, phase_label));
    }

    /// Persist the session. Later calls are no-ops.
    ///
    /// The recorder counts as sealed after this returns, even when it
    /// reports [`BreathError::PersistenceFailed`].
    pub fn seal(&mut self) -> Result<SealOutcome, BreathError> {
        if self.is_sealed() {
            return Ok(SealOutcome::AlreadySealed);
        }

        let csv = self.to_csv();
        let result = self.write_all(&csv);
        self.sealed.mark_sealed();
        result
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.is_sealed()
    }

    /// Handle the state machine polls for persistence
    pub fn seal_handle(&self) -> SealHandle {
        self.sealed.clone()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Primary output path
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Serialize all samples with the fixed precision of the file format
    pub fn to_csv(&self) -> String {
        let mut csv = String::with_capacity(CSV_HEADER.len() + 1 + self.samples.len() * 24);
        csv.push_str(CSV_HEADER);
        csv.push('\n');
        for s in &self.samples {
            let _ = writeln!(
                csv,
                "{:.2},{:.5},{}",
                s.timestamp_secs, s.amplitude, s.phase_label
            );
        }
        csv
    }

    fn write_all(&self, csv: &str) -> Result<SealOutcome, BreathError> {
        let copy = self.dir.join(LATEST_SESSION_FILE);

        let primary = fs::create_dir_all(&self.dir)
            .and_then(|_| fs::write(&self.path, csv))
            .and_then(|_| fs::write(&copy, csv));

        match primary {
            Ok(()) => {
                info!(
                    session_id = %self.session_id,
                    path = %self.path.display(),
                    samples = self.samples.len(),
                    "Session data saved"
                );
                Ok(SealOutcome::Written {
                    path: self.path.clone(),
                    copy,
                })
            }
            Err(e) => {
                warn!(
                    session_id = %self.session_id,
                    path = %self.path.display(),
                    error = %e,
                    "Failed to save session file, trying fallback name"
                );
                let fallback = self.dir.join(FALLBACK_SESSION_FILE);
                match fs::write(&fallback, csv) {
                    Ok(()) => {
                        info!(session_id = %self.session_id, path = %fallback.display(), "Session data saved under fallback name");
                        Ok(SealOutcome::Fallback { path: fallback })
                    }
                    Err(fallback_err) => {
                        error!(
                            session_id = %self.session_id,
                            error = %fallback_err,
                            "Fallback save failed as well; session data is lost"
                        );
                        Err(BreathError::PersistenceFailed(format!(
                            "{}: {e}; {}: {fallback_err}",
                            self.path.display(),
                            fallback.display()
                        )))
                    }
                }
            }
        }
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        if self.is_sealed() {
            return;
        }
        warn!(session_id = %self.session_id, "Recorder dropped before sealing; saving now");
        if let Err(e) = self.seal() {
            error!(session_id = %self.session_id, error = %e, "Implicit seal failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn started_at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 30).unwrap()
    }

    #[test]
    fn test_file_name_convention() {
        assert_eq!(
            session_file_name(&started_at()),
            "breathing_data_20240309_070530.csv"
        );
    }

    #[test]
    fn test_csv_format() {
        let dir = TempDir::new().unwrap();
        let mut recorder = SessionRecorder::begin(dir.path(), started_at());
        recorder.record(0.0, 0.012345678, "inhale");
        recorder.record(1.256, 0.5, "hold");

        assert_eq!(
            recorder.to_csv(),
            "timestamp,rms,phase\n0.00,0.01235,inhale\n1.26,0.50000,hold\n"
        );
    }

    #[test]
    fn test_record_clamps_negative_amplitude() {
        let dir = TempDir::new().unwrap();
        let mut recorder = SessionRecorder::begin(dir.path(), started_at());
        recorder.record(0.5, -0.2, "exhale");
        recorder.record(0.6, f64::NAN, "exhale");
        assert_eq!(recorder.samples()[0].amplitude, 0.0);
        assert_eq!(recorder.samples()[1].amplitude, 0.0);
    }

    #[test]
    fn test_seal_writes_primary_and_copy() {
        let dir = TempDir::new().unwrap();
        let mut recorder = SessionRecorder::begin(dir.path(), started_at());
        recorder.record(0.0, 0.1, "inhale");

        let outcome = recorder.seal().unwrap();
        let primary = dir.path().join("breathing_data_20240309_070530.csv");
        let copy = dir.path().join(LATEST_SESSION_FILE);
        assert_eq!(
            outcome,
            SealOutcome::Written {
                path: primary.clone(),
                copy: copy.clone()
            }
        );
        let expected = "timestamp,rms,phase\n0.00,0.10000,inhale\n";
        assert_eq!(fs::read_to_string(primary).unwrap(), expected);
        assert_eq!(fs::read_to_string(copy).unwrap(), expected);
        assert!(recorder.is_sealed());
    }

    #[test]
    fn test_seal_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("sessions").join("today");
        let mut recorder = SessionRecorder::begin(&nested, started_at());
        recorder.record(0.0, 0.1, "inhale");
        recorder.seal().unwrap();
        assert!(recorder.path().exists());
    }

    #[test]
    fn test_double_seal_and_late_record_are_noops() {
        let dir = TempDir::new().unwrap();
        let mut recorder = SessionRecorder::begin(dir.path(), started_at());
        recorder.record(0.0, 0.1, "inhale");
        recorder.record(0.02, 0.2, "inhale");
        recorder.seal().unwrap();
        let before = fs::read_to_string(recorder.path()).unwrap();

        recorder.record(5.0, 0.9, "rest");
        assert_eq!(recorder.samples().len(), 2);
        assert_eq!(recorder.seal().unwrap(), SealOutcome::AlreadySealed);

        let after = fs::read_to_string(recorder.path()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_seal_handle_tracks_recorder() {
        let dir = TempDir::new().unwrap();
        let mut recorder = SessionRecorder::begin(dir.path(), started_at());
        let handle = recorder.seal_handle();
        assert!(!PersistenceProbe::is_sealed(&handle));
        recorder.seal().unwrap();
        assert!(PersistenceProbe::is_sealed(&handle));
    }

    #[test]
    fn test_drop_seals_implicitly() {
        let dir = TempDir::new().unwrap();
        let path;
        let handle;
        {
            let mut recorder = SessionRecorder::begin(dir.path(), started_at());
            recorder.record(0.0, 0.3, "exhale");
            path = recorder.path().to_path_buf();
            handle = recorder.seal_handle();
        }
        assert!(handle.is_sealed());
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "timestamp,rms,phase\n0.00,0.30000,exhale\n"
        );
    }

    #[test]
    fn test_fallback_name_when_primary_fails() {
        let dir = TempDir::new().unwrap();
        // A directory squatting on the primary file name makes that write fail.
        fs::create_dir(dir.path().join("breathing_data_20240309_070530.csv")).unwrap();

        let mut recorder = SessionRecorder::begin(dir.path(), started_at());
        recorder.record(0.0, 0.1, "inhale");
        let outcome = recorder.seal().unwrap();

        let fallback = dir.path().join(FALLBACK_SESSION_FILE);
        assert_eq!(outcome, SealOutcome::Fallback { path: fallback.clone() });
        assert!(fs::read_to_string(fallback).unwrap().starts_with(CSV_HEADER));
    }

    #[test]
    fn test_persistence_failure_still_marks_sealed() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("breathing_data_20240309_070530.csv")).unwrap();
        fs::create_dir(dir.path().join(FALLBACK_SESSION_FILE)).unwrap();

        let mut recorder = SessionRecorder::begin(dir.path(), started_at());
        recorder.record(0.0, 0.1, "inhale");
        let result = recorder.seal();

        assert!(matches!(result, Err(BreathError::PersistenceFailed(_))));
        assert!(recorder.is_sealed());
        assert_eq!(recorder.seal().unwrap(), SealOutcome::AlreadySealed);
    }
}
