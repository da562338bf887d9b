// adaptive_controller.rs

use crate::control_system::safety_validator::{SafetyValidator, TransitionPath};
use crate::control_system::signal_phases::{
    PhaseTransition, PhaseType, SignalCommand, TransitionStep, TRANSITION_RETRY_DELAY,
};
use crate::error::{EngineError, Result};
use crate::models::intersection::LANES_PER_APPROACH;
use crate::state_estimation::state_estimator::IntersectionState;
use std::collections::BTreeMap;

pub const DEFAULT_MIN_GREEN: f64 = 10.0;
pub const DEFAULT_MAX_GREEN: f64 = 60.0;
/// Vehicles per second per lane.
pub const DEFAULT_SATURATION_FLOW: f64 = 0.5;
/// A phase waiting longer than this is served next regardless of demand.
pub const MAX_WAIT_BEFORE_OVERRIDE: f64 = 90.0;
/// Meters of queue per vehicle.
pub const VEHICLE_SPACING: f64 = 7.0;
pub const GREEN_TIME_BUFFER: f64 = 1.5;

/// Demand-responsive two-phase controller.
///
/// Each green is sized from the queue it has to discharge, bounded by
/// `[min_green, max_green]`. A phase left unserved for more than
/// [`MAX_WAIT_BEFORE_OVERRIDE`] seconds is forced next, and ends the running
/// green early once `min_green` has been served.
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    min_green: f64,
    max_green: f64,
    saturation_flow: f64,
    validator: SafetyValidator,
    current_phase: PhaseType,
    phase_start: Option<f64>,
    planned_green: f64,
    retry_at: Option<f64>,
    transition: PhaseTransition,
    wait_times: BTreeMap<PhaseType, f64>,
    last_update: Option<f64>,
    starvation_overrides: u64,
}

impl Default for AdaptiveController {
    fn default() -> Self {
        Self::build(DEFAULT_MIN_GREEN, DEFAULT_MAX_GREEN, DEFAULT_SATURATION_FLOW)
    }
}

impl AdaptiveController {
    pub fn new(min_green: f64, max_green: f64, saturation_flow: f64) -> Result<Self> {
        if !min_green.is_finite() || min_green <= 0.0 {
            return Err(EngineError::config(format!(
                "min_green must be positive, got {}",
                min_green
            )));
        }
        if !max_green.is_finite() || max_green < min_green {
            return Err(EngineError::config(format!(
                "max_green ({}) must be >= min_green ({})",
                max_green, min_green
            )));
        }
        if !saturation_flow.is_finite() || saturation_flow <= 0.0 {
            return Err(EngineError::config(format!(
                "saturation_flow must be positive, got {}",
                saturation_flow
            )));
        }
        Ok(Self::build(min_green, max_green, saturation_flow))
    }

    fn build(min_green: f64, max_green: f64, saturation_flow: f64) -> Self {
        let wait_times = [PhaseType::NsThrough, PhaseType::EwThrough]
            .into_iter()
            .map(|p| (p, 0.0))
            .collect();
        Self {
            min_green,
            max_green,
            saturation_flow,
            validator: SafetyValidator::new(),
            current_phase: PhaseType::NsThrough,
            phase_start: None,
            planned_green: min_green,
            retry_at: None,
            transition: PhaseTransition::idle(),
            wait_times,
            last_update: None,
            starvation_overrides: 0,
        }
    }

    pub fn update(&mut self, state: &IntersectionState, now: f64) -> SignalCommand {
        let start = *self.phase_start.get_or_insert(now);
        let dt = self.last_update.map_or(0.0, |t| (now - t).max(0.0));
        self.last_update = Some(now);
        self.update_wait_times(dt);

        let current = self.current_phase;
        let elapsed = now - start;

        if !self.transition.in_progress() {
            let starving = self.starved_phase().is_some() && elapsed >= self.min_green;
            let retry_ok = self.retry_at.map_or(true, |t| now >= t);
            if retry_ok && (elapsed >= self.planned_green || starving) {
                let next = self.select_next_phase();
                let verdict =
                    self.validator
                        .validate_transition(current, next, now, TransitionPath::Clearance);
                if verdict.safe {
                    self.planned_green = self.calculate_green_time(state, next);
                    self.retry_at = None;
                    log::info!(
                        "[{:.1}s] Adaptive: {} -> {} (planned green {:.1}s)",
                        now, current, next, self.planned_green
                    );
                    self.transition.begin(next, now);
                } else {
                    log::warn!("Transition {} -> {} blocked: {}", current, next, verdict.reason);
                    self.planned_green = elapsed + TRANSITION_RETRY_DELAY;
                    self.retry_at = Some(now + TRANSITION_RETRY_DELAY);
                }
            }
        }

        if !self.transition.in_progress() {
            return SignalCommand::green(current);
        }

        match self.transition.advance(current, now) {
            TransitionStep::Hold(cmd) => cmd,
            TransitionStep::Completed(target) => {
                self.current_phase = target;
                self.phase_start = Some(now);
                self.validator.record_transition(now);
                if let Some(wait) = self.wait_times.get_mut(&target) {
                    *wait = 0.0;
                }
                SignalCommand::green(target)
            }
        }
    }

    /// Green time needed to discharge the queues served by `phase`.
    pub fn calculate_green_time(&self, state: &IntersectionState, phase: PhaseType) -> f64 {
        let approaches = phase.config().green_approaches;
        if approaches.is_empty() {
            return self.min_green;
        }

        let (total_queue, total_vehicles) = approaches.iter().fold((0.0, 0usize), |(q, n), &a| {
            let m = state.approach(a);
            (q + m.total_queue_length, n + m.total_vehicles)
        });
        if total_vehicles == 0 {
            return self.min_green;
        }

        let vehicles_in_queue = total_queue / VEHICLE_SPACING;
        let discharge_rate =
            self.saturation_flow * (approaches.len() * LANES_PER_APPROACH) as f64;
        let green = vehicles_in_queue / discharge_rate * GREEN_TIME_BUFFER;
        green.max(self.min_green).min(self.max_green)
    }

    fn update_wait_times(&mut self, dt: f64) {
        let current = self.current_phase;
        for (phase, wait) in self.wait_times.iter_mut() {
            if *phase == current {
                *wait = 0.0;
            } else {
                *wait += dt;
            }
        }
    }

    fn starved_phase(&self) -> Option<PhaseType> {
        self.wait_times
            .iter()
            .find(|&(&p, &w)| p != self.current_phase && w > MAX_WAIT_BEFORE_OVERRIDE)
            .map(|(&p, _)| p)
    }

    fn select_next_phase(&mut self) -> PhaseType {
        if let Some(phase) = self.starved_phase() {
            let waited = self.wait_times.get(&phase).copied().unwrap_or_default();
            log::warn!("Starvation override: {} waited {:.1}s", phase, waited);
            self.starvation_overrides += 1;
            return phase;
        }
        match self.current_phase {
            PhaseType::NsThrough => PhaseType::EwThrough,
            _ => PhaseType::NsThrough,
        }
    }

    pub fn current_phase(&self) -> PhaseType {
        self.current_phase
    }

    pub fn planned_green(&self) -> f64 {
        self.planned_green
    }

    pub fn wait_time(&self, phase: PhaseType) -> f64 {
        self.wait_times.get(&phase).copied().unwrap_or_default()
    }

    pub fn max_wait(&self) -> f64 {
        self.wait_times.values().copied().fold(0.0, f64::max)
    }

    pub fn starvation_overrides(&self) -> u64 {
        self.starvation_overrides
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition.in_progress()
    }

    pub fn transition_target(&self) -> Option<PhaseType> {
        self.transition.target
    }

    pub fn phase_elapsed(&self, now: f64) -> f64 {
        self.phase_start.map_or(0.0, |start| now - start)
    }

    pub fn validator(&self) -> &SafetyValidator {
        &self.validator
    }

    pub fn min_green(&self) -> f64 {
        self.min_green
    }

    pub fn max_green(&self) -> f64 {
        self.max_green
    }

    /// Hands control back after an emergency override showed `served`.
    ///
    /// Time spent frozen is not charged to the wait timers, and phases on the
    /// served axis count as just served.
    pub fn resume_after_preemption(&mut self, served: PhaseType) {
        self.last_update = None;
        for (phase, wait) in self.wait_times.iter_mut() {
            if !phase.conflicts_with(served) {
                *wait = 0.0;
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::build(self.min_green, self.max_green, self.saturation_flow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_system::signal_phases::TransitionStage;
    use crate::models::intersection::{default_lane_ids, Approach};
    use crate::state_estimation::lane_state_tracker::LaneState;
    use std::collections::BTreeMap;

    fn state_with_queues(t: f64, queue: impl Fn(Approach) -> f64) -> IntersectionState {
        let lanes: BTreeMap<String, LaneState> = default_lane_ids()
            .into_iter()
            .map(|id| {
                let mut lane = LaneState::empty(id.as_str(), t);
                if let Some(a) = lane.approach() {
                    let q = queue(a);
                    if q > 0.0 {
                        lane.queue_length = q;
                        lane.vehicle_count = (q / VEHICLE_SPACING).ceil() as usize;
                        lane.stopped_vehicles = lane.vehicle_count;
                        lane.queue_vehicle_count = lane.vehicle_count;
                    }
                }
                (id, lane)
            })
            .collect();
        IntersectionState::from_lane_states(t, lanes)
    }

    #[test]
    fn zero_demand_gets_min_green() {
        let ctrl = AdaptiveController::default();
        let state = IntersectionState::idle(0.0, &default_lane_ids());
        assert_eq!(ctrl.calculate_green_time(&state, PhaseType::EwThrough), 10.0);
    }

    #[test]
    fn green_scales_with_queue_and_is_bounded() {
        let state = state_with_queues(0.0, |a| if a.is_north_south() { 30.0 } else { 0.0 });
        let ctrl = AdaptiveController::default();
        // 180 m / 7 m = 25.7 vehicles over 6 lanes at 0.5 veh/s, times 1.5
        let expected = 180.0 / 7.0 / 3.0 * 1.5;
        let green = ctrl.calculate_green_time(&state, PhaseType::NsThrough);
        assert!((green - expected).abs() < 1e-9);
        assert_eq!(ctrl.calculate_green_time(&state, PhaseType::EwThrough), 10.0);

        let slow = AdaptiveController::new(10.0, 60.0, 0.1).unwrap();
        assert_eq!(slow.calculate_green_time(&state, PhaseType::NsThrough), 60.0);
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(AdaptiveController::new(0.0, 60.0, 0.5).is_err());
        assert!(AdaptiveController::new(30.0, 20.0, 0.5).is_err());
        assert!(AdaptiveController::new(10.0, 60.0, 0.0).is_err());
    }

    #[test]
    fn switches_after_min_green_without_demand() {
        let mut ctrl = AdaptiveController::default();
        let lanes = default_lane_ids();
        let mut stages = Vec::new();
        for i in 0..=200 {
            let t = i as f64 * 0.1;
            stages.push(ctrl.update(&IntersectionState::idle(t, &lanes), t));
        }
        // 10 s green, 3 s yellow, 2 s all-red
        assert_eq!(stages[99].stage, TransitionStage::Green);
        assert_eq!(stages[100].stage, TransitionStage::Yellow);
        assert_eq!(ctrl.current_phase(), PhaseType::EwThrough);
        assert!(ctrl.validator().last_phase_change().is_some());
    }

    #[test]
    fn wait_times_follow_elapsed_time() {
        let mut ctrl = AdaptiveController::default();
        let lanes = default_lane_ids();
        ctrl.update(&IntersectionState::idle(0.0, &lanes), 0.0);
        ctrl.update(&IntersectionState::idle(0.5, &lanes), 0.5);
        ctrl.update(&IntersectionState::idle(2.0, &lanes), 2.0);
        assert!((ctrl.wait_time(PhaseType::EwThrough) - 2.0).abs() < 1e-9);
        assert_eq!(ctrl.wait_time(PhaseType::NsThrough), 0.0);
    }

    #[test]
    fn starved_phase_cuts_a_long_green_short() {
        let mut ctrl = AdaptiveController::default();
        let heavy_ns = |t| state_with_queues(t, |a| if a.is_north_south() { 30.0 } else { 0.0 });

        // Pin NS green far beyond the starvation bound.
        ctrl.planned_green = 1_000.0;
        let mut t = 0.0;
        while t <= 100.0 {
            ctrl.update(&heavy_ns(t), t);
            if ctrl.is_transitioning() {
                break;
            }
            t += 1.0;
        }
        assert!(ctrl.is_transitioning());
        assert_eq!(ctrl.transition_target(), Some(PhaseType::EwThrough));
        assert!(t > MAX_WAIT_BEFORE_OVERRIDE && t <= MAX_WAIT_BEFORE_OVERRIDE + 1.0);
        assert_eq!(ctrl.starvation_overrides(), 1);
    }

    #[test]
    fn blocked_transition_is_retried() {
        let mut ctrl = AdaptiveController::default();
        let lanes = default_lane_ids();
        ctrl.update(&IntersectionState::idle(0.0, &lanes), 0.0);
        ctrl.validator.record_transition(8.0);

        let cmd = ctrl.update(&IntersectionState::idle(10.0, &lanes), 10.0);
        assert_eq!(cmd.stage, TransitionStage::Green);
        assert_eq!(ctrl.planned_green(), 15.0);

        let cmd = ctrl.update(&IntersectionState::idle(15.0, &lanes), 15.0);
        assert_eq!(cmd.stage, TransitionStage::Yellow);
    }

    #[test]
    fn reset_restores_initial_phase() {
        let mut ctrl = AdaptiveController::new(12.0, 40.0, 0.5).unwrap();
        let lanes = default_lane_ids();
        for i in 0..40 {
            ctrl.update(&IntersectionState::idle(i as f64, &lanes), i as f64);
        }
        ctrl.reset();
        assert_eq!(ctrl.current_phase(), PhaseType::NsThrough);
        assert_eq!(ctrl.planned_green(), 12.0);
        assert_eq!(ctrl.max_wait(), 0.0);
    }

    #[test]
    fn preemption_time_is_not_charged_as_waiting() {
        let mut ctrl = AdaptiveController::default();
        let lanes = default_lane_ids();
        ctrl.update(&IntersectionState::idle(0.0, &lanes), 0.0);
        ctrl.update(&IntersectionState::idle(5.0, &lanes), 5.0);
        assert!((ctrl.wait_time(PhaseType::EwThrough) - 5.0).abs() < 1e-9);

        ctrl.resume_after_preemption(PhaseType::EmergencyEw);
        ctrl.update(&IntersectionState::idle(160.0, &lanes), 160.0);
        assert_eq!(ctrl.wait_time(PhaseType::EwThrough), 0.0);
        ctrl.update(&IntersectionState::idle(161.0, &lanes), 161.0);
        assert!((ctrl.wait_time(PhaseType::EwThrough) - 1.0).abs() < 1e-9);
        assert_eq!(ctrl.starvation_overrides(), 0);
    }
}
