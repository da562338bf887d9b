// emergency_priority.rs

use crate::control_system::signal_phases::PhaseType;
use crate::models::intersection::Approach;
use crate::state_estimation::state_estimator::IntersectionState;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Start tracking an emergency vehicle (meters to stop line).
pub const DETECTION_THRESHOLD: f64 = 100.0;
/// Force the emergency phase.
pub const PREEMPTION_THRESHOLD: f64 = 80.0;
/// The vehicle counts as through the stop line.
pub const CLEARING_DISTANCE: f64 = 5.0;
/// Hold the emergency phase this long after the vehicle passed (seconds).
pub const CLEARANCE_TIME: f64 = 5.0;
/// Ignore new emergencies this long after clearing (seconds).
pub const COOLDOWN_TIME: f64 = 10.0;

const TRANSITION_LOG_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmergencyState {
    Normal,
    Detected,
    Preempting,
    Clearing,
    Cooldown,
}

impl EmergencyState {
    pub fn name(self) -> &'static str {
        match self {
            EmergencyState::Normal => "NORMAL",
            EmergencyState::Detected => "DETECTED",
            EmergencyState::Preempting => "PREEMPTING",
            EmergencyState::Clearing => "CLEARING",
            EmergencyState::Cooldown => "COOLDOWN",
        }
    }

    /// Whether the emergency phase overrides the normal controller.
    pub fn is_override(self) -> bool {
        matches!(self, EmergencyState::Preempting | EmergencyState::Clearing)
    }
}

impl fmt::Display for EmergencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyTransition {
    pub time: f64,
    pub from: EmergencyState,
    pub to: EmergencyState,
    pub reason: String,
}

/// Snapshot of the state machine for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyStatus {
    pub state: EmergencyState,
    pub is_active: bool,
    pub emergency_approach: Option<Approach>,
    pub emergency_distance: Option<f64>,
    pub emergency_phase: Option<PhaseType>,
    pub time_in_state: f64,
}

/// Closest approaching emergency vehicle seen in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Detection {
    approach: Approach,
    distance: f64,
}

/// Five-state preemption machine driven only by [`IntersectionState`].
///
/// ```text
/// NORMAL -> DETECTED -> PREEMPTING -> CLEARING -> COOLDOWN -> NORMAL
///              |
///              +-> NORMAL (vehicle lost)
/// ```
///
/// The emergency phase is latched on entry to PREEMPTING and held through
/// CLEARING.
#[derive(Debug, Clone)]
pub struct EmergencyPriorityController {
    state: EmergencyState,
    emergency_approach: Option<Approach>,
    emergency_distance: Option<f64>,
    emergency_phase: Option<PhaseType>,
    state_entry_time: Option<f64>,
    last_update: Option<f64>,
    transitions: VecDeque<EmergencyTransition>,
}

impl Default for EmergencyPriorityController {
    fn default() -> Self {
        Self::new()
    }
}

impl EmergencyPriorityController {
    pub fn new() -> Self {
        Self {
            state: EmergencyState::Normal,
            emergency_approach: None,
            emergency_distance: None,
            emergency_phase: None,
            state_entry_time: None,
            last_update: None,
            transitions: VecDeque::with_capacity(TRANSITION_LOG_LEN),
        }
    }

    pub fn update(&mut self, state: &IntersectionState, now: f64) {
        self.last_update = Some(now);
        let detection = detect_emergency(state);

        match self.state {
            EmergencyState::Normal => {
                if let Some(d) = detection.filter(|d| d.distance <= DETECTION_THRESHOLD) {
                    self.emergency_approach = Some(d.approach);
                    self.emergency_distance = Some(d.distance);
                    self.enter(
                        EmergencyState::Detected,
                        now,
                        format!("Emergency detected: {} @ {:.1}m", d.approach, d.distance),
                    );
                }
            }
            EmergencyState::Detected => match detection {
                None => {
                    self.emergency_approach = None;
                    self.emergency_distance = None;
                    self.enter(EmergencyState::Normal, now, "False alarm - no emergency".to_string());
                }
                Some(d) if d.distance > DETECTION_THRESHOLD => {
                    self.emergency_approach = None;
                    self.emergency_distance = None;
                    self.enter(
                        EmergencyState::Normal,
                        now,
                        format!("Emergency receded to {:.1}m", d.distance),
                    );
                }
                Some(d) => {
                    self.emergency_approach = Some(d.approach);
                    self.emergency_distance = Some(d.distance);
                    if d.distance <= PREEMPTION_THRESHOLD {
                        let phase = PhaseType::emergency_for(d.approach);
                        self.emergency_phase = Some(phase);
                        self.enter(
                            EmergencyState::Preempting,
                            now,
                            format!(
                                "Distance {:.1}m <= {}m, forcing {}",
                                d.distance, PREEMPTION_THRESHOLD, phase
                            ),
                        );
                    }
                }
            },
            EmergencyState::Preempting => match detection {
                None => self.enter(
                    EmergencyState::Clearing,
                    now,
                    "Emergency vehicle left detection range".to_string(),
                ),
                Some(d) => {
                    self.emergency_distance = Some(d.distance);
                    if d.distance <= CLEARING_DISTANCE {
                        self.enter(
                            EmergencyState::Clearing,
                            now,
                            format!("Vehicle cleared stop line (dist={:.1}m)", d.distance),
                        );
                    }
                }
            },
            EmergencyState::Clearing => {
                if self.time_in_state(now) >= CLEARANCE_TIME {
                    self.enter(
                        EmergencyState::Cooldown,
                        now,
                        format!("Clearance complete ({}s)", CLEARANCE_TIME),
                    );
                }
            }
            EmergencyState::Cooldown => {
                if self.time_in_state(now) >= COOLDOWN_TIME {
                    self.emergency_approach = None;
                    self.emergency_distance = None;
                    self.emergency_phase = None;
                    self.enter(
                        EmergencyState::Normal,
                        now,
                        format!("Cooldown complete ({}s)", COOLDOWN_TIME),
                    );
                }
            }
        }
    }

    fn enter(&mut self, to: EmergencyState, now: f64, reason: String) {
        let from = self.state;
        log::info!("[EMERGENCY] {} -> {}: {}", from, to, reason);
        self.state = to;
        self.state_entry_time = Some(now);
        if self.transitions.len() == TRANSITION_LOG_LEN {
            self.transitions.pop_front();
        }
        self.transitions.push_back(EmergencyTransition {
            time: now,
            from,
            to,
            reason,
        });
    }

    fn time_in_state(&self, now: f64) -> f64 {
        self.state_entry_time.map_or(0.0, |t| now - t)
    }

    /// `(is_active, phase)`; reads state only.
    pub fn get_signal_command(&self) -> (bool, Option<PhaseType>) {
        if self.state.is_override() {
            (true, self.emergency_phase)
        } else {
            (false, None)
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_override()
    }

    pub fn state(&self) -> EmergencyState {
        self.state
    }

    pub fn status(&self) -> EmergencyStatus {
        EmergencyStatus {
            state: self.state,
            is_active: self.is_active(),
            emergency_approach: self.emergency_approach,
            emergency_distance: self.emergency_distance,
            emergency_phase: self.emergency_phase,
            time_in_state: self.last_update.map_or(0.0, |now| self.time_in_state(now)),
        }
    }

    /// Most recent state changes, oldest first.
    pub fn transitions(&self) -> impl Iterator<Item = &EmergencyTransition> {
        self.transitions.iter()
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Nearest emergency vehicle with a positive stop-line distance.
/// Ties keep the first lane in id order.
fn detect_emergency(state: &IntersectionState) -> Option<Detection> {
    if !state.has_emergency {
        return None;
    }

    let mut best: Option<Detection> = None;
    for (lane_id, lane) in &state.lane_states {
        if !lane.has_emergency_vehicle {
            continue;
        }
        let distance = match lane.emergency_vehicle_distance {
            Some(d) if d > 0.0 => d,
            _ => continue,
        };
        let approach = match Approach::from_lane_id(lane_id) {
            Some(a) => a,
            None => continue,
        };
        if best.map_or(true, |b| distance < b.distance) {
            best = Some(Detection { approach, distance });
        }
    }
    best
}
