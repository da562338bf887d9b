// traffic_light_controller.rs

use crate::config::{ControllerKind, EngineConfig};
use crate::control_system::adaptive_controller::AdaptiveController;
use crate::control_system::emergency_priority::{EmergencyPriorityController, EmergencyState};
use crate::control_system::fixed_time_controller::FixedTimeController;
use crate::control_system::safety_validator::SafetyValidator;
use crate::control_system::signal_phases::{PhaseType, SignalCommand};
use crate::error::Result;
use crate::models::intersection::Approach;
use crate::state_estimation::state_estimator::IntersectionState;
use serde::{Deserialize, Serialize};

/// Common surface of the normal (non-emergency) controllers.
pub trait SignalControl {
    fn update(&mut self, state: &IntersectionState, now: f64) -> SignalCommand;
    fn reset(&mut self);
    fn current_phase(&self) -> PhaseType;
    fn safety_validator(&self) -> &SafetyValidator;
    fn name(&self) -> &'static str;

    /// Called once when an emergency override that showed `served` ends.
    fn resume_after_preemption(&mut self, _served: PhaseType) {}
}

impl SignalControl for FixedTimeController {
    fn update(&mut self, state: &IntersectionState, now: f64) -> SignalCommand {
        FixedTimeController::update(self, state, now)
    }

    fn reset(&mut self) {
        FixedTimeController::reset(self)
    }

    fn current_phase(&self) -> PhaseType {
        FixedTimeController::current_phase(self)
    }

    fn safety_validator(&self) -> &SafetyValidator {
        self.validator()
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

impl SignalControl for AdaptiveController {
    fn update(&mut self, state: &IntersectionState, now: f64) -> SignalCommand {
        AdaptiveController::update(self, state, now)
    }

    fn reset(&mut self) {
        AdaptiveController::reset(self)
    }

    fn current_phase(&self) -> PhaseType {
        AdaptiveController::current_phase(self)
    }

    fn safety_validator(&self) -> &SafetyValidator {
        self.validator()
    }

    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn resume_after_preemption(&mut self, served: PhaseType) {
        AdaptiveController::resume_after_preemption(self, served)
    }
}

/// The normal controller plugged into the arbiter.
#[derive(Debug, Clone)]
pub enum NormalController {
    FixedTime(FixedTimeController),
    Adaptive(AdaptiveController),
}

impl NormalController {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(match config.controller {
            ControllerKind::Fixed => NormalController::FixedTime(FixedTimeController::new(
                config.fixed.ns_green,
                config.fixed.ew_green,
            )?),
            ControllerKind::Adaptive => NormalController::Adaptive(AdaptiveController::new(
                config.adaptive.min_green,
                config.adaptive.max_green,
                config.adaptive.saturation_flow,
            )?),
        })
    }

    fn inner(&self) -> &dyn SignalControl {
        match self {
            NormalController::FixedTime(c) => c,
            NormalController::Adaptive(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn SignalControl {
        match self {
            NormalController::FixedTime(c) => c,
            NormalController::Adaptive(c) => c,
        }
    }
}

impl SignalControl for NormalController {
    fn update(&mut self, state: &IntersectionState, now: f64) -> SignalCommand {
        self.inner_mut().update(state, now)
    }

    fn reset(&mut self) {
        self.inner_mut().reset()
    }

    fn current_phase(&self) -> PhaseType {
        self.inner().current_phase()
    }

    fn safety_validator(&self) -> &SafetyValidator {
        self.inner().safety_validator()
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn resume_after_preemption(&mut self, served: PhaseType) {
        self.inner_mut().resume_after_preemption(served)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMode {
    Normal,
    Emergency,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub mode: ControlMode,
    pub normal_controller: &'static str,
    pub normal_phase: PhaseType,
    pub emergency_state: EmergencyState,
    pub emergency_active: bool,
    pub emergency_approach: Option<Approach>,
    pub emergency_distance: Option<f64>,
    pub emergency_phase: Option<PhaseType>,
    pub emergency_activations: u64,
    pub deferred_overrides: u64,
}

/// Arbiter between the emergency state machine and a normal controller.
///
/// Exactly one source decides each tick. While the emergency machine is in
/// PREEMPTING or CLEARING its phase is shown and the normal controller is not
/// advanced; otherwise the normal controller runs unchanged.
///
/// Engaging an override is gated by the normal controller's safety
/// validator: within [`EMERGENCY_MIN_GAP`] of its last completed phase change
/// the override is deferred and the normal controller keeps deciding for that
/// tick. Hand-back itself is never gated. The normal controller is told which
/// phase the override served and resumes from its own state.
///
/// [`EMERGENCY_MIN_GAP`]: crate::control_system::safety_validator::EMERGENCY_MIN_GAP
#[derive(Debug, Clone)]
pub struct IntegratedSignalController {
    normal: NormalController,
    emergency: EmergencyPriorityController,
    mode: ControlMode,
    served_phase: Option<PhaseType>,
    emergency_activations: u64,
    deferred_overrides: u64,
}

impl IntegratedSignalController {
    pub fn new(normal: NormalController) -> Self {
        log::info!("Integrated controller using {} normal control", normal.name());
        Self {
            normal,
            emergency: EmergencyPriorityController::new(),
            mode: ControlMode::Normal,
            served_phase: None,
            emergency_activations: 0,
            deferred_overrides: 0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self::new(NormalController::from_config(config)?))
    }

    pub fn update(&mut self, state: &IntersectionState, now: f64) -> SignalCommand {
        self.emergency.update(state, now);

        if let (true, Some(phase)) = self.emergency.get_signal_command() {
            if self.mode == ControlMode::Normal {
                let verdict = self.normal.safety_validator().check_emergency_override_safe(
                    self.normal.current_phase(),
                    phase,
                    now,
                );
                if !verdict.safe {
                    log::warn!("Emergency override deferred: {}", verdict.reason);
                    self.deferred_overrides += 1;
                    return self.normal.update(state, now);
                }
                log::info!("[{:.1}s] SWITCHING TO EMERGENCY MODE: {}", now, phase);
                self.mode = ControlMode::Emergency;
                self.emergency_activations += 1;
            }
            self.served_phase = Some(phase);
            return SignalCommand::green(phase);
        }

        if self.mode == ControlMode::Emergency {
            log::info!(
                "[{:.1}s] RETURNING TO NORMAL MODE: {} resumes",
                now,
                self.normal.current_phase()
            );
            self.mode = ControlMode::Normal;
            if let Some(served) = self.served_phase.take() {
                self.normal.resume_after_preemption(served);
            }
        }
        self.normal.update(state, now)
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn normal_controller(&self) -> &NormalController {
        &self.normal
    }

    pub fn emergency_controller(&self) -> &EmergencyPriorityController {
        &self.emergency
    }

    pub fn status(&self) -> ControllerStatus {
        let em = self.emergency.status();
        ControllerStatus {
            mode: self.mode,
            normal_controller: self.normal.name(),
            normal_phase: self.normal.current_phase(),
            emergency_state: em.state,
            emergency_active: em.is_active,
            emergency_approach: em.emergency_approach,
            emergency_distance: em.emergency_distance,
            emergency_phase: em.emergency_phase,
            emergency_activations: self.emergency_activations,
            deferred_overrides: self.deferred_overrides,
        }
    }

    pub fn reset(&mut self) {
        self.normal.reset();
        self.emergency.reset();
        self.mode = ControlMode::Normal;
        self.served_phase = None;
        self.emergency_activations = 0;
        self.deferred_overrides = 0;
    }
}
