//! Session driver
//!
//! [`BreathingSession`] wires a [`SampleSource`], a [`PhaseStateMachine`] and
//! a [`SessionRecorder`] together for a single periodic caller. Each tick
//! records one sample labelled with the current phase, then advances the
//! machine. The recorder is sealed just before the final Rest ends, so a
//! successful write lets the machine finish without the extra wait. Navigation
//! signals are forwarded to the caller's [`Navigator`].

use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::BreathError;
use crate::phase::{Navigator, PhaseStateMachine, SessionStatus};
use crate::types::Phase;
use crate::recorder::{SealHandle, SealOutcome, SessionRecorder};
use crate::source::SampleSource;
use crate::types::{NavigationSignal, SessionConfig};

/// What a finished session left behind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub path: PathBuf,
    /// False when the seal attempt failed; the session still completed
    pub persisted: bool,
    pub samples: usize,
}

struct ActiveSession {
    machine: PhaseStateMachine<SealHandle, Vec<NavigationSignal>>,
    recorder: SessionRecorder,
    elapsed: f64,
    persisted: Option<bool>,
}

impl ActiveSession {
    fn seal(&mut self) {
        let session_id = self.recorder.session_id();
        match self.recorder.seal() {
            Ok(SealOutcome::AlreadySealed) => {}
            Ok(SealOutcome::Written { path, .. }) | Ok(SealOutcome::Fallback { path }) => {
                info!(session_id = %session_id, path = %path.display(), "Session sealed");
                self.persisted = Some(true);
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Session could not be persisted");
                self.persisted = Some(false);
            }
        }
    }

    /// Whether the machine is in the last cycle's Rest, before any final wait
    fn in_final_rest(&self) -> bool {
        let state = self.machine.state();
        state.is_active
            && !state.is_complete
            && !state.is_awaiting_final_persistence
            && state.current_phase == Phase::Rest
            && state.current_cycle >= self.machine.config().total_cycles
    }

    /// Whether a tick of `delta_secs` ends the last cycle's Rest
    fn final_rest_ends_within(&self, delta_secs: f64) -> bool {
        self.in_final_rest()
            && delta_secs.is_finite()
            && delta_secs >= 0.0
            && self.machine.state().phase_elapsed + delta_secs
                >= self.machine.config().durations.rest_secs
    }
}

/// One breathing session at a time, driven by periodic ticks
pub struct BreathingSession<S, N> {
    data_dir: PathBuf,
    source: S,
    navigator: N,
    active: Option<ActiveSession>,
}

impl<S: SampleSource, N: Navigator> BreathingSession<S, N> {
    /// Sessions are written under `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>, source: S, navigator: N) -> Self {
        Self {
            data_dir: data_dir.into(),
            source,
            navigator,
            active: None,
        }
    }

    /// Begin a new session, sealing any previous one.
    ///
    /// An invalid config is rejected before anything is created, so nothing
    /// is written for it.
    pub fn start(&mut self, config: SessionConfig) -> Result<(), BreathError> {
        config.validate()?;

        // Dropping the previous recorder seals it.
        self.active = None;

        let recorder = SessionRecorder::begin(&self.data_dir, Local::now());
        let mut machine = PhaseStateMachine::new(recorder.seal_handle(), Vec::new());
        machine.start(config)?;

        self.active = Some(ActiveSession {
            machine,
            recorder,
            elapsed: 0.0,
            persisted: None,
        });
        self.forward_signals();
        Ok(())
    }

    /// Record one sample and advance the session by `delta_secs`
    pub fn tick(&mut self, delta_secs: f64) -> SessionStatus {
        let Some(active) = self.active.as_mut() else {
            return SessionStatus::Idle;
        };

        if active.machine.is_active() && !active.machine.is_complete() {
            let amplitude = self.source.read_rms();
            let label = active.machine.current_phase_label();
            active.recorder.record(active.elapsed, amplitude, label);
        }

        if active.final_rest_ends_within(delta_secs) {
            active.seal();
        }

        if delta_secs.is_finite() && delta_secs > 0.0 {
            active.elapsed += delta_secs;
        }
        active.machine.tick(delta_secs);

        if active.machine.is_awaiting_final_persistence() || active.machine.is_complete() {
            active.seal();
        }

        let status = active.machine.status();
        self.forward_signals();
        status
    }

    /// Skip the remainder of the current rest
    pub fn advance_manually(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if active.in_final_rest() {
            active.seal();
        }
        let advanced = active.machine.advance_manually();
        if active.machine.is_awaiting_final_persistence() || active.machine.is_complete() {
            active.seal();
        }
        self.forward_signals();
        advanced
    }

    /// Abandon the current session. Whatever was recorded is still sealed.
    pub fn reset(&mut self) {
        if let Some(mut active) = self.active.take() {
            info!(session_id = %active.recorder.session_id(), "Session reset");
            active.seal();
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.active
            .as_ref()
            .map_or(SessionStatus::Idle, |a| a.machine.status())
    }

    pub fn is_complete(&self) -> bool {
        self.status() == SessionStatus::Complete
    }

    /// Label of the current phase, `None` when no session is running
    pub fn current_phase_label(&self) -> Option<&'static str> {
        self.active
            .as_ref()
            .map(|a| a.machine.current_phase_label())
    }

    pub fn current_cycle(&self) -> Option<u32> {
        self.active.as_ref().map(|a| a.machine.state().current_cycle)
    }

    /// Seconds since the session started
    pub fn elapsed(&self) -> f64 {
        self.active.as_ref().map_or(0.0, |a| a.elapsed)
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.recorder.session_id())
    }

    pub fn session_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.recorder.path())
    }

    /// Available once the session is complete
    pub fn outcome(&self) -> Option<SessionOutcome> {
        let active = self.active.as_ref()?;
        if !active.machine.is_complete() {
            return None;
        }
        Some(SessionOutcome {
            session_id: active.recorder.session_id(),
            path: active.recorder.path().to_path_buf(),
            persisted: active.persisted.unwrap_or(false),
            samples: active.recorder.samples().len(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    pub fn navigator_mut(&mut self) -> &mut N {
        &mut self.navigator
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn forward_signals(&mut self) {
        if let Some(active) = self.active.as_mut() {
            for signal in active.machine.navigator_mut().drain(..) {
                self.navigator.navigate(signal);
            }
        }
    }
}
