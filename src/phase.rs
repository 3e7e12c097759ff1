//! Phase/cycle state machine
//!
//! Drives a session through Inhale → Hold → Exhale → Rest for the configured
//! number of cycles. The terminal transition is gated on the recorder having
//! finished its persistence attempt: when the final Rest ends before the data
//! is sealed, the machine waits one more Rest duration and then completes
//! regardless of the outcome. The flag is not polled again during that wait.

use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::BreathError;
use crate::types::{NavigationSignal, Phase, SessionConfig};

/// The one question the state machine asks about persistence
pub trait PersistenceProbe {
    /// Whether the recorder has finished trying to persist the session
    fn is_sealed(&self) -> bool;
}

impl PersistenceProbe for bool {
    fn is_sealed(&self) -> bool {
        *self
    }
}

/// Receiver of navigation signals (the view-routing collaborator)
pub trait Navigator {
    fn navigate(&mut self, signal: NavigationSignal);
}

impl Navigator for Vec<NavigationSignal> {
    fn navigate(&mut self, signal: NavigationSignal) {
        self.push(signal);
    }
}

impl Navigator for Sender<NavigationSignal> {
    fn navigate(&mut self, signal: NavigationSignal) {
        // A dropped receiver means nobody is routing views any more.
        let _ = self.send(signal);
    }
}

/// Coarse lifecycle position of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Active,
    AwaitingFinalPersistence,
    Complete,
}

/// Mutable state of the running session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub current_phase: Phase,
    /// 1-based, never above the configured total
    pub current_cycle: u32,
    /// Seconds spent in the current phase (or in the final wait)
    pub phase_elapsed: f64,
    pub is_active: bool,
    pub is_complete: bool,
    pub is_awaiting_final_persistence: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            current_phase: Phase::Inhale,
            current_cycle: 1,
            phase_elapsed: 0.0,
            is_active: false,
            is_complete: false,
            is_awaiting_final_persistence: false,
        }
    }
}

impl SessionState {
    /// State of a freshly started session
    fn started() -> Self {
        Self {
            is_active: true,
            ..Self::default()
        }
    }

    pub fn status(&self) -> SessionStatus {
        if self.is_complete {
            SessionStatus::Complete
        } else if self.is_awaiting_final_persistence {
            SessionStatus::AwaitingFinalPersistence
        } else if self.is_active {
            SessionStatus::Active
        } else {
            SessionStatus::Idle
        }
    }
}

/// Session progression with injected persistence probe and navigator
pub struct PhaseStateMachine<P, N> {
    config: SessionConfig,
    state: SessionState,
    probe: P,
    navigator: N,
}

impl<P: PersistenceProbe, N: Navigator> PhaseStateMachine<P, N> {
    /// Create an idle machine
    pub fn new(probe: P, navigator: N) -> Self {
        Self {
            config: SessionConfig::default(),
            state: SessionState::default(),
            probe,
            navigator,
        }
    }

    /// Begin a session. The state is left untouched when the config is rejected.
    pub fn start(&mut self, config: SessionConfig) -> Result<(), BreathError> {
        config.validate()?;

        self.config = config;
        self.state = SessionState::started();

        info!(
            total_cycles = config.total_cycles,
            cycle_secs = config.durations.cycle_secs(),
            "Breathing session started"
        );
        self.enter_phase(Phase::Inhale);
        Ok(())
    }

    /// Advance time by `delta_secs`. At most one transition happens per call.
    pub fn tick(&mut self, delta_secs: f64) {
        if !self.state.is_active || self.state.is_complete {
            return;
        }
        if !delta_secs.is_finite() || delta_secs < 0.0 {
            warn!(delta_secs, "Ignoring invalid tick delta");
            return;
        }

        self.state.phase_elapsed += delta_secs;

        if self.state.is_awaiting_final_persistence {
            if self.state.phase_elapsed >= self.config.durations.rest_secs {
                if !self.probe.is_sealed() {
                    warn!("Final rest elapsed before session data was sealed; finishing anyway");
                }
                self.finish();
            }
            return;
        }

        let phase = self.state.current_phase;
        if self.state.phase_elapsed < self.config.durations.of(phase) {
            return;
        }

        match phase.next_in_cycle() {
            Some(next) => self.enter_phase(next),
            None => self.leave_rest(),
        }
    }

    /// Explicit "continue" while resting. Returns whether anything changed.
    pub fn advance_manually(&mut self) -> bool {
        if !self.state.is_active
            || self.state.is_complete
            || self.state.current_phase != Phase::Rest
        {
            debug!(
                phase = %self.state.current_phase,
                "Manual advance ignored outside of an active rest"
            );
            return false;
        }

        if self.state.is_awaiting_final_persistence {
            info!("Continue pressed during the final rest; finishing session");
            self.finish();
        } else {
            self.leave_rest();
        }
        true
    }

    /// Return to idle
    pub fn reset(&mut self) {
        self.state = SessionState::default();
    }

    pub fn current_phase_label(&self) -> &'static str {
        self.state.current_phase.as_str()
    }

    pub fn current_phase(&self) -> Phase {
        self.state.current_phase
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active
    }

    pub fn is_awaiting_final_persistence(&self) -> bool {
        self.state.is_awaiting_final_persistence
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    pub fn navigator_mut(&mut self) -> &mut N {
        &mut self.navigator
    }

    /// Rest-boundary decision shared by the timer and the continue control
    fn leave_rest(&mut self) {
        if self.state.current_cycle < self.config.total_cycles {
            self.state.current_cycle += 1;
            self.enter_phase(Phase::Inhale);
            return;
        }

        if self.probe.is_sealed() {
            debug!("Final cycle complete and data already sealed");
            self.finish();
        } else {
            debug!("Final cycle complete; waiting one rest period for persistence");
            self.state.is_awaiting_final_persistence = true;
            self.state.phase_elapsed = 0.0;
        }
    }

    fn enter_phase(&mut self, phase: Phase) {
        self.state.current_phase = phase;
        self.state.phase_elapsed = 0.0;
        debug!(phase = %phase, cycle = self.state.current_cycle, "Phase entered");
        self.navigator.navigate(NavigationSignal::PhaseEntered(phase));
    }

    fn finish(&mut self) {
        self.state.is_complete = true;
        self.state.is_active = false;
        self.state.is_awaiting_final_persistence = false;
        info!(cycles = self.state.current_cycle, "Breathing session finished");
        self.navigator.navigate(NavigationSignal::SessionFinished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PhaseDurations;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct FakeProbe(Rc<Cell<bool>>);

    impl FakeProbe {
        fn set(&self, sealed: bool) {
            self.0.set(sealed);
        }
    }

    impl PersistenceProbe for FakeProbe {
        fn is_sealed(&self) -> bool {
            self.0.get()
        }
    }

    // Integer durations keep the float sums exact.
    fn config(cycles: u32) -> SessionConfig {
        SessionConfig::new(
            cycles,
            PhaseDurations {
                inhale_secs: 4.0,
                hold_secs: 7.0,
                exhale_secs: 8.0,
                rest_secs: 10.0,
            },
        )
    }

    fn machine() -> (PhaseStateMachine<FakeProbe, Vec<NavigationSignal>>, FakeProbe) {
        let probe = FakeProbe::default();
        (PhaseStateMachine::new(probe.clone(), Vec::new()), probe)
    }

    /// Tick through Inhale, Hold and Exhale of the current cycle
    fn run_to_rest<P: PersistenceProbe>(m: &mut PhaseStateMachine<P, Vec<NavigationSignal>>) {
        m.tick(4.0);
        m.tick(7.0);
        m.tick(8.0);
        assert_eq!(m.current_phase(), Phase::Rest);
    }

    #[test]
    fn test_start_begins_at_inhale() {
        let (mut m, _) = machine();
        assert_eq!(m.status(), SessionStatus::Idle);

        m.start(config(3)).unwrap();

        let state = m.state();
        assert_eq!(state.current_phase, Phase::Inhale);
        assert_eq!(state.current_cycle, 1);
        assert_eq!(state.phase_elapsed, 0.0);
        assert!(state.is_active);
        assert!(!state.is_complete);
        assert_eq!(
            m.navigator(),
            &vec![NavigationSignal::PhaseEntered(Phase::Inhale)]
        );
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let (mut m, _) = machine();
        let result = m.start(config(0));
        assert!(matches!(result, Err(BreathError::InvalidConfig(_))));
        assert_eq!(m.status(), SessionStatus::Idle);
        assert!(m.navigator().is_empty());
    }

    #[test]
    fn test_exact_duration_advances_in_order() {
        let (mut m, _) = machine();
        m.start(config(2)).unwrap();

        m.tick(4.0);
        assert_eq!(m.current_phase(), Phase::Hold);
        m.tick(7.0);
        assert_eq!(m.current_phase(), Phase::Exhale);
        m.tick(8.0);
        assert_eq!(m.current_phase(), Phase::Rest);
        m.tick(10.0);
        assert_eq!(m.current_phase(), Phase::Inhale);
        assert_eq!(m.state().current_cycle, 2);

        assert_eq!(
            m.navigator(),
            &vec![
                NavigationSignal::PhaseEntered(Phase::Inhale),
                NavigationSignal::PhaseEntered(Phase::Hold),
                NavigationSignal::PhaseEntered(Phase::Exhale),
                NavigationSignal::PhaseEntered(Phase::Rest),
                NavigationSignal::PhaseEntered(Phase::Inhale),
            ]
        );
    }

    #[test]
    fn test_shorter_ticks_never_transition() {
        let (mut m, _) = machine();
        m.start(config(1)).unwrap();

        m.tick(3.999);
        assert_eq!(m.current_phase(), Phase::Inhale);
        m.tick(0.0);
        assert_eq!(m.current_phase(), Phase::Inhale);
        assert!((m.state().phase_elapsed - 3.999).abs() < 1e-9);
    }

    #[test]
    fn test_small_ticks_accumulate() {
        let (mut m, _) = machine();
        m.start(config(1)).unwrap();

        for _ in 0..8 {
            m.tick(0.5);
        }
        assert_eq!(m.current_phase(), Phase::Hold);
        assert_eq!(m.state().phase_elapsed, 0.0);
    }

    #[test]
    fn test_surplus_time_is_dropped() {
        let (mut m, _) = machine();
        m.start(config(1)).unwrap();

        // A huge tick only moves one phase forward.
        m.tick(100.0);
        assert_eq!(m.current_phase(), Phase::Hold);
        assert_eq!(m.state().phase_elapsed, 0.0);
    }

    #[test]
    fn test_invalid_delta_ignored() {
        let (mut m, _) = machine();
        m.start(config(1)).unwrap();
        m.tick(-5.0);
        m.tick(f64::NAN);
        assert_eq!(m.state().phase_elapsed, 0.0);
    }

    #[test]
    fn test_tick_is_noop_when_idle() {
        let (mut m, _) = machine();
        m.tick(50.0);
        assert_eq!(m.status(), SessionStatus::Idle);
        assert!(m.navigator().is_empty());
    }

    #[test]
    fn test_final_rest_unsealed_waits_one_more_rest() {
        let (mut m, probe) = machine();
        m.start(config(1)).unwrap();
        run_to_rest(&mut m);

        m.tick(10.0);
        assert_eq!(m.status(), SessionStatus::AwaitingFinalPersistence);
        assert_eq!(m.current_phase(), Phase::Rest);
        assert_eq!(m.state().current_cycle, 1);
        assert!(m.is_active());
        assert!(!m.is_complete());

        // Sealing during the wait does not shorten it.
        probe.set(true);
        m.tick(9.0);
        assert!(!m.is_complete());

        m.tick(1.0);
        assert!(m.is_complete());
        assert!(!m.is_active());
        assert_eq!(
            m.navigator().last(),
            Some(&NavigationSignal::SessionFinished)
        );
    }

    #[test]
    fn test_final_wait_completes_even_if_never_sealed() {
        let (mut m, _) = machine();
        m.start(config(1)).unwrap();
        run_to_rest(&mut m);

        m.tick(10.0);
        assert!(m.is_awaiting_final_persistence());
        m.tick(10.0);
        assert_eq!(m.status(), SessionStatus::Complete);
    }

    #[test]
    fn test_final_rest_sealed_completes_directly() {
        let (mut m, probe) = machine();
        m.start(config(2)).unwrap();
        run_to_rest(&mut m);
        m.tick(10.0);
        run_to_rest(&mut m);

        probe.set(true);
        m.tick(10.0);

        assert_eq!(m.status(), SessionStatus::Complete);
        assert_eq!(m.state().current_cycle, 2);
        let finished = m
            .navigator()
            .iter()
            .filter(|s| **s == NavigationSignal::SessionFinished)
            .count();
        assert_eq!(finished, 1);
    }

    #[test]
    fn test_complete_ignores_further_ticks() {
        let (mut m, probe) = machine();
        probe.set(true);
        m.start(config(1)).unwrap();
        run_to_rest(&mut m);
        m.tick(10.0);
        assert!(m.is_complete());

        let signals = m.navigator().len();
        m.tick(100.0);
        assert!(!m.advance_manually());
        assert_eq!(m.navigator().len(), signals);
        assert_eq!(m.status(), SessionStatus::Complete);
    }

    #[test]
    fn test_awaiting_invariants_hold() {
        let (mut m, _) = machine();
        m.start(config(3)).unwrap();
        for _ in 0..3 {
            run_to_rest(&mut m);
            m.tick(10.0);
        }
        let state = m.state();
        assert!(state.is_awaiting_final_persistence);
        assert_eq!(state.current_phase, Phase::Rest);
        assert_eq!(state.current_cycle, 3);
        assert!(!(state.is_active && state.is_complete));
    }

    #[test]
    fn test_manual_advance_starts_next_cycle() {
        let (mut m, _) = machine();
        m.start(config(2)).unwrap();
        run_to_rest(&mut m);

        assert!(m.advance_manually());
        assert_eq!(m.current_phase(), Phase::Inhale);
        assert_eq!(m.state().current_cycle, 2);
        assert_eq!(m.state().phase_elapsed, 0.0);
    }

    #[test]
    fn test_manual_advance_outside_rest_is_noop() {
        let (mut m, _) = machine();
        m.start(config(2)).unwrap();
        m.tick(4.0);

        assert!(!m.advance_manually());
        assert_eq!(m.current_phase(), Phase::Hold);
    }

    #[test]
    fn test_manual_advance_on_final_rest_follows_probe() {
        let (mut m, _) = machine();
        m.start(config(1)).unwrap();
        run_to_rest(&mut m);

        assert!(m.advance_manually());
        assert!(m.is_awaiting_final_persistence());

        let (mut sealed, sealed_probe) = machine();
        sealed_probe.set(true);
        sealed.start(config(1)).unwrap();
        run_to_rest(&mut sealed);
        assert!(sealed.advance_manually());
        assert!(sealed.is_complete());
    }

    #[test]
    fn test_manual_advance_during_wait_finishes() {
        let (mut m, _) = machine();
        m.start(config(1)).unwrap();
        run_to_rest(&mut m);
        m.tick(10.0);
        assert!(m.is_awaiting_final_persistence());

        assert!(m.advance_manually());
        assert!(m.is_complete());
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let (mut m, _) = machine();
        m.start(config(2)).unwrap();
        m.tick(4.0);
        m.reset();

        assert_eq!(m.status(), SessionStatus::Idle);
        assert_eq!(m.state(), &SessionState::default());
        m.tick(4.0);
        assert_eq!(m.current_phase(), Phase::Inhale);
    }

    #[test]
    fn test_restart_after_completion() {
        let (mut m, probe) = machine();
        probe.set(true);
        m.start(config(1)).unwrap();
        run_to_rest(&mut m);
        m.tick(10.0);
        assert!(m.is_complete());

        m.start(config(1)).unwrap();
        assert_eq!(m.status(), SessionStatus::Active);
        assert_eq!(m.current_phase_label(), "inhale");
    }

    #[test]
    fn test_channel_navigator() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut m = PhaseStateMachine::new(true, tx);
        m.start(config(1)).unwrap();
        m.tick(4.0);

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            received,
            vec![
                NavigationSignal::PhaseEntered(Phase::Inhale),
                NavigationSignal::PhaseEntered(Phase::Hold),
            ]
        );
    }
}
