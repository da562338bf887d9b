// fixed_time_controller.rs

use crate::control_system::safety_validator::{SafetyValidator, TransitionPath};
use crate::control_system::signal_phases::{
    PhaseTransition, PhaseType, SignalCommand, TransitionStep, TRANSITION_RETRY_DELAY,
};
use crate::error::{EngineError, Result};
use crate::state_estimation::state_estimator::IntersectionState;

pub const DEFAULT_NS_GREEN: f64 = 30.0;
pub const DEFAULT_EW_GREEN: f64 = 30.0;

/// Baseline controller: alternates NS_THROUGH and EW_THROUGH on fixed greens,
/// ignoring traffic state.
#[derive(Debug, Clone)]
pub struct FixedTimeController {
    ns_green: f64,
    ew_green: f64,
    validator: SafetyValidator,
    current_phase: PhaseType,
    phase_start: Option<f64>,
    next_transition_time: Option<f64>,
    transition: PhaseTransition,
}

impl Default for FixedTimeController {
    fn default() -> Self {
        Self {
            ns_green: DEFAULT_NS_GREEN,
            ew_green: DEFAULT_EW_GREEN,
            validator: SafetyValidator::new(),
            current_phase: PhaseType::NsThrough,
            phase_start: None,
            next_transition_time: None,
            transition: PhaseTransition::idle(),
        }
    }
}

impl FixedTimeController {
    /// Greens outside the phase bounds are clamped.
    pub fn new(ns_green: f64, ew_green: f64) -> Result<Self> {
        for (name, green) in [("ns_green", ns_green), ("ew_green", ew_green)] {
            if !green.is_finite() || green <= 0.0 {
                return Err(EngineError::config(format!(
                    "{} must be a positive number of seconds, got {}",
                    name, green
                )));
            }
        }

        let validator = SafetyValidator::new();
        let ns = validator.validate_phase_duration(PhaseType::NsThrough, ns_green);
        let ew = validator.validate_phase_duration(PhaseType::EwThrough, ew_green);
        if ns != ns_green || ew != ew_green {
            log::warn!(
                "Fixed-time greens clamped to phase bounds: NS {} -> {}, EW {} -> {}",
                ns_green, ns, ew_green, ew
            );
        }

        Ok(Self {
            ns_green: ns,
            ew_green: ew,
            validator,
            ..Self::default()
        })
    }

    fn green_time(&self, phase: PhaseType) -> f64 {
        match phase {
            PhaseType::EwThrough => self.ew_green,
            _ => self.ns_green,
        }
    }

    fn next_phase(phase: PhaseType) -> PhaseType {
        match phase {
            PhaseType::NsThrough => PhaseType::EwThrough,
            _ => PhaseType::NsThrough,
        }
    }

    pub fn update(&mut self, _state: &IntersectionState, now: f64) -> SignalCommand {
        let current = self.current_phase;
        if self.phase_start.is_none() {
            self.phase_start = Some(now);
            self.next_transition_time = Some(now + self.green_time(current));
        }

        if !self.transition.in_progress() {
            let due = self.next_transition_time.map_or(false, |t| now >= t);
            if !due {
                return SignalCommand::green(current);
            }

            let next = Self::next_phase(current);
            let verdict =
                self.validator
                    .validate_transition(current, next, now, TransitionPath::Clearance);
            if !verdict.safe {
                log::warn!("Transition {} -> {} blocked: {}", current, next, verdict.reason);
                self.next_transition_time = Some(now + TRANSITION_RETRY_DELAY);
                return SignalCommand::green(current);
            }
            log::info!("[{:.1}s] Fixed-time: {} -> {}", now, current, next);
            self.transition.begin(next, now);
        }

        match self.transition.advance(current, now) {
            TransitionStep::Hold(cmd) => cmd,
            TransitionStep::Completed(target) => {
                self.current_phase = target;
                self.phase_start = Some(now);
                self.validator.record_transition(now);
                self.next_transition_time = Some(now + self.green_time(target));
                SignalCommand::green(target)
            }
        }
    }

    pub fn current_phase(&self) -> PhaseType {
        self.current_phase
    }

    pub fn ns_green(&self) -> f64 {
        self.ns_green
    }

    pub fn ew_green(&self) -> f64 {
        self.ew_green
    }

    pub fn next_transition_time(&self) -> Option<f64> {
        self.next_transition_time
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition.in_progress()
    }

    pub fn phase_elapsed(&self, now: f64) -> f64 {
        self.phase_start.map_or(0.0, |start| now - start)
    }

    pub fn validator(&self) -> &SafetyValidator {
        &self.validator
    }

    pub fn reset(&mut self) {
        *self = Self {
            ns_green: self.ns_green,
            ew_green: self.ew_green,
            ..Self::default()
        };
    }
}
