// src/shared_data.rs

use crate::control_system::emergency_priority::EmergencyState;
use crate::control_system::signal_phases::{PhaseType, SignalCommand, TransitionStage};
use crate::control_system::traffic_light_controller::{ControlMode, ControllerStatus};
use crate::models::intersection::Approach;
use crate::state_estimation::state_estimator::IntersectionState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock seconds since the Unix epoch (0 if the clock is before it).
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One tick of engine output, as written to the signal sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub timestamp: u64,
    pub sim_time: f64,
    pub signal_state: String,
    pub phase: PhaseType,
    pub stage: TransitionStage,
    pub mode: ControlMode,
    pub emergency_state: EmergencyState,
    pub emergency_approach: Option<Approach>,
    pub total_vehicles: usize,
    pub total_stopped: usize,
    pub total_waiting_time: f64,
    pub max_queue_length: f64,
}

impl TickRecord {
    pub fn new(
        sim_time: f64,
        command: &SignalCommand,
        status: &ControllerStatus,
        state: &IntersectionState,
    ) -> Self {
        Self {
            timestamp: current_timestamp(),
            sim_time,
            signal_state: command.state.to_string(),
            phase: command.phase,
            stage: command.stage,
            mode: status.mode,
            emergency_state: status.emergency_state,
            emergency_approach: status.emergency_approach,
            total_vehicles: state.total_vehicles,
            total_stopped: state.total_stopped,
            total_waiting_time: state.total_waiting_time,
            max_queue_length: state.max_queue_length,
        }
    }
}

/// Per-run aggregates reported by the driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub scenario: String,
    pub controller: String,
    pub ticks: u64,
    pub avg_waiting_time: f64,
    pub avg_stopped: f64,
    pub max_queue_length: f64,
    pub phase_changes: u64,
    pub emergency_ticks: u64,
    #[serde(skip)]
    last_green: Option<PhaseType>,
    #[serde(skip)]
    waiting_sum: f64,
    #[serde(skip)]
    stopped_sum: f64,
}

impl RunSummary {
    pub fn new(scenario: impl Into<String>, controller: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            controller: controller.into(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, tick: &TickRecord) {
        self.ticks += 1;
        self.waiting_sum += tick.total_waiting_time;
        self.stopped_sum += tick.total_stopped as f64;
        self.avg_waiting_time = self.waiting_sum / self.ticks as f64;
        self.avg_stopped = self.stopped_sum / self.ticks as f64;
        self.max_queue_length = self.max_queue_length.max(tick.max_queue_length);
        if tick.mode == ControlMode::Emergency {
            self.emergency_ticks += 1;
        }
        if tick.stage == TransitionStage::Green {
            if let Some(prev) = self.last_green {
                if prev != tick.phase {
                    self.phase_changes += 1;
                }
            }
            self.last_green = Some(tick.phase);
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run summary: {} ({} controller)", self.scenario, self.controller)?;
        writeln!(f, "  Ticks:              {}", self.ticks)?;
        writeln!(f, "  Avg waiting time:   {:.2}s", self.avg_waiting_time)?;
        writeln!(f, "  Avg stopped:        {:.2}", self.avg_stopped)?;
        writeln!(f, "  Max queue:          {:.1}m", self.max_queue_length)?;
        writeln!(f, "  Phase changes:      {}", self.phase_changes)?;
        write!(f, "  Emergency ticks:    {}", self.emergency_ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(phase: PhaseType, stage: TransitionStage, mode: ControlMode, waiting: f64) -> TickRecord {
        TickRecord {
            timestamp: 0,
            sim_time: 0.0,
            signal_state: phase.config().green_state.to_string(),
            phase,
            stage,
            mode,
            emergency_state: EmergencyState::Normal,
            emergency_approach: None,
            total_vehicles: 4,
            total_stopped: 2,
            total_waiting_time: waiting,
            max_queue_length: waiting,
        }
    }

    #[test]
    fn summary_counts_green_changes_and_emergency_ticks() {
        let mut summary = RunSummary::new("baseline", "adaptive");
        summary.record(&tick(PhaseType::NsThrough, TransitionStage::Green, ControlMode::Normal, 2.0));
        summary.record(&tick(PhaseType::NsThrough, TransitionStage::Yellow, ControlMode::Normal, 4.0));
        summary.record(&tick(PhaseType::EwThrough, TransitionStage::Green, ControlMode::Normal, 6.0));
        summary.record(&tick(PhaseType::EmergencyNs, TransitionStage::Green, ControlMode::Emergency, 0.0));

        assert_eq!(summary.ticks, 4);
        assert_eq!(summary.phase_changes, 2);
        assert_eq!(summary.emergency_ticks, 1);
        assert!((summary.avg_waiting_time - 3.0).abs() < 1e-12);
        assert_eq!(summary.max_queue_length, 6.0);
    }

    #[test]
    fn tick_record_serializes_enum_names() {
        let json = serde_json::to_string(&tick(
            PhaseType::EwThrough,
            TransitionStage::AllRed,
            ControlMode::Normal,
            1.0,
        ))
        .unwrap();
        assert!(json.contains("\"EW_THROUGH\""));
        assert!(json.contains("\"ALL_RED\""));
        let back: TickRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.phase, PhaseType::EwThrough);
    }
}
