// safety_validator.rs

use crate::control_system::signal_phases::PhaseType;
use serde::Serialize;

/// Minimum time between two completed phase changes (seconds).
pub const MIN_PHASE_GAP: f64 = 5.0;

/// Minimum time since the last phase change before an emergency override.
pub const EMERGENCY_MIN_GAP: f64 = 2.0;

/// How the caller intends to reach the next phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPath {
    /// Through yellow and all-red clearance.
    Clearance,
    /// Straight from one green to the next.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub safe: bool,
    pub reason: String,
}

impl Verdict {
    fn safe(reason: impl Into<String>) -> Self {
        Self {
            safe: true,
            reason: reason.into(),
        }
    }

    fn unsafe_(reason: impl Into<String>) -> Self {
        Self {
            safe: false,
            reason: reason.into(),
        }
    }
}

/// Gatekeeper for phase changes.
///
/// The gap timer is unset until the first completed transition, so the very
/// first change is never blocked by it.
#[derive(Debug, Clone, Default)]
pub struct SafetyValidator {
    last_phase_change: Option<f64>,
}

impl SafetyValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_phase_change(&self) -> Option<f64> {
        self.last_phase_change
    }

    fn since_last_change(&self, now: f64) -> Option<f64> {
        self.last_phase_change.map(|t| now - t)
    }

    pub fn validate_transition(
        &self,
        current: PhaseType,
        next: PhaseType,
        now: f64,
        path: TransitionPath,
    ) -> Verdict {
        if current == next {
            return Verdict::safe("Same phase");
        }

        if let Some(elapsed) = self.since_last_change(now) {
            if elapsed < MIN_PHASE_GAP {
                return Verdict::unsafe_(format!(
                    "Too soon: {:.1}s since last change (min gap: {}s)",
                    elapsed, MIN_PHASE_GAP
                ));
            }
        }

        if path == TransitionPath::Direct && current.conflicts_with(next) {
            return Verdict::unsafe_(format!(
                "{} conflicts with {}: yellow and all-red clearance required",
                current, next
            ));
        }

        Verdict::safe("Safe transition")
    }

    /// Marks a completed phase change.
    pub fn record_transition(&mut self, now: f64) {
        self.last_phase_change = Some(now);
    }

    /// Clamps a requested green duration to the phase's configured bounds.
    pub fn validate_phase_duration(&self, phase: PhaseType, requested: f64) -> f64 {
        let cfg = phase.config();
        requested.max(cfg.min_duration).min(cfg.max_duration)
    }

    /// Emergency preemption skips the regular gap but never lands on top of
    /// a change that happened less than [`EMERGENCY_MIN_GAP`] ago.
    pub fn check_emergency_override_safe(
        &self,
        current: PhaseType,
        emergency: PhaseType,
        now: f64,
    ) -> Verdict {
        if let Some(elapsed) = self.since_last_change(now) {
            if elapsed < EMERGENCY_MIN_GAP {
                return Verdict::unsafe_(format!(
                    "Too soon for emergency override: {:.1}s since last change",
                    elapsed
                ));
            }
        }
        Verdict::safe(format!("Emergency override {} -> {} allowed", current, emergency))
    }

    pub fn reset(&mut self) {
        self.last_phase_change = None;
    }
}
