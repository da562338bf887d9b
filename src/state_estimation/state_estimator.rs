// state_estimator.rs

use crate::error::{EngineError, Result};
use crate::models::intersection::Approach;
use crate::models::vehicle::PerceivedVehicle;
use crate::state_estimation::lane_state_tracker::{
    validate_lane_state, LaneState, LaneStateTracker, DEFAULT_HISTORY_LENGTH,
};
use crate::state_estimation::smoothing::{SmoothedMetric, SmoothingFilterBank};
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Aggregate over all lanes sharing an approach prefix.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ApproachMetrics {
    pub total_vehicles: usize,
    pub total_queue_length: f64,
    pub avg_density: f64,
    /// Mean waiting time weighted by stopped vehicles per lane.
    pub avg_waiting_time: f64,
    pub stopped_vehicles: usize,
    pub has_emergency: bool,
}

impl ApproachMetrics {
    pub fn from_lanes<'a>(lanes: impl IntoIterator<Item = &'a LaneState>) -> Self {
        let mut metrics = ApproachMetrics::default();
        let mut lane_count = 0usize;
        let mut density_sum = 0.0;
        let mut weighted_wait = 0.0;

        for lane in lanes {
            lane_count += 1;
            metrics.total_vehicles += lane.vehicle_count;
            metrics.total_queue_length += lane.queue_length;
            metrics.stopped_vehicles += lane.stopped_vehicles;
            metrics.has_emergency |= lane.has_emergency_vehicle;
            density_sum += lane.density;
            weighted_wait += lane.avg_waiting_time * lane.stopped_vehicles as f64;
        }

        if lane_count > 0 {
            metrics.avg_density = density_sum / lane_count as f64;
        }
        if metrics.stopped_vehicles > 0 {
            metrics.avg_waiting_time = weighted_wait / metrics.stopped_vehicles as f64;
        }
        metrics
    }
}

/// Complete traffic state of the intersection at one timestep.
/// Output of state estimation, sole input of the controllers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntersectionState {
    pub timestamp: f64,
    /// One entry for every tracked lane.
    pub lane_states: BTreeMap<String, LaneState>,
    pub approach_metrics: BTreeMap<Approach, ApproachMetrics>,
    pub total_vehicles: usize,
    pub total_stopped: usize,
    /// Sum over lanes of `avg_waiting_time * stopped_vehicles`.
    pub total_waiting_time: f64,
    pub max_queue_length: f64,
    pub has_emergency: bool,
    pub emergency_approach: Option<Approach>,
    pub emergency_distance: Option<f64>,
}

impl IntersectionState {
    /// Aggregates a complete set of lane states.
    pub fn from_lane_states(timestamp: f64, lane_states: BTreeMap<String, LaneState>) -> Self {
        let approach_metrics = Approach::ALL
            .iter()
            .map(|&a| {
                let lanes = lane_states.values().filter(move |s| s.approach() == Some(a));
                (a, ApproachMetrics::from_lanes(lanes))
            })
            .collect();

        let total_vehicles = lane_states.values().map(|s| s.vehicle_count).sum();
        let total_stopped = lane_states.values().map(|s| s.stopped_vehicles).sum();
        let total_waiting_time = lane_states
            .values()
            .map(|s| s.avg_waiting_time * s.stopped_vehicles as f64)
            .sum();
        let max_queue_length = lane_states
            .values()
            .map(|s| s.queue_length)
            .fold(0.0, f64::max);

        let has_emergency = lane_states.values().any(|s| s.has_emergency_vehicle);
        let mut emergency_approach = None;
        let mut emergency_distance: Option<f64> = None;
        for lane in lane_states.values().filter(|s| s.has_emergency_vehicle) {
            match (lane.emergency_vehicle_distance, emergency_distance) {
                (Some(d), Some(best)) if d >= best => {}
                (Some(d), _) => {
                    emergency_distance = Some(d);
                    emergency_approach = lane.approach();
                }
                (None, None) if emergency_approach.is_none() => {
                    emergency_approach = lane.approach();
                }
                (None, _) => {}
            }
        }

        Self {
            timestamp,
            lane_states,
            approach_metrics,
            total_vehicles,
            total_stopped,
            total_waiting_time,
            max_queue_length,
            has_emergency,
            emergency_approach,
            emergency_distance,
        }
    }

    /// State with every lane empty.
    pub fn idle(timestamp: f64, lane_ids: &[String]) -> Self {
        let lanes = lane_ids
            .iter()
            .map(|id| (id.clone(), LaneState::empty(id.as_str(), timestamp)))
            .collect();
        Self::from_lane_states(timestamp, lanes)
    }

    /// Metrics for an approach; zero-valued when no lane feeds it.
    pub fn approach(&self, approach: Approach) -> ApproachMetrics {
        self.approach_metrics
            .get(&approach)
            .copied()
            .unwrap_or_default()
    }

    pub fn lane(&self, lane_id: &str) -> Option<&LaneState> {
        self.lane_states.get(lane_id)
    }
}

/// Checks every lane's physical bounds and the totals' consistency.
pub fn validate_intersection_state(state: &IntersectionState) -> Result<()> {
    for (lane_id, lane) in &state.lane_states {
        let errors = validate_lane_state(lane);
        if !errors.is_empty() {
            return Err(EngineError::lane_state(lane_id.as_str(), errors.join("; ")));
        }
    }

    let sum_vehicles: usize = state.lane_states.values().map(|s| s.vehicle_count).sum();
    if sum_vehicles != state.total_vehicles {
        return Err(EngineError::InconsistentState(format!(
            "vehicle count mismatch: sum={}, total={}",
            sum_vehicles, state.total_vehicles
        )));
    }
    let sum_stopped: usize = state.lane_states.values().map(|s| s.stopped_vehicles).sum();
    if sum_stopped != state.total_stopped {
        return Err(EngineError::InconsistentState(format!(
            "stopped count mismatch: sum={}, total={}",
            sum_stopped, state.total_stopped
        )));
    }
    if state.max_queue_length < 0.0 || state.total_waiting_time < 0.0 {
        return Err(EngineError::InconsistentState(format!(
            "negative aggregate: max_queue={}, total_waiting={}",
            state.max_queue_length, state.total_waiting_time
        )));
    }
    Ok(())
}

/// Human-readable multi-line summary of a state.
pub fn format_summary(state: &IntersectionState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Traffic State @ t={:.1}s", state.timestamp);
    let _ = writeln!(
        out,
        "Total vehicles: {} | Stopped: {} | Total waiting: {:.1}s | Max queue: {:.1}m",
        state.total_vehicles, state.total_stopped, state.total_waiting_time, state.max_queue_length
    );
    if state.has_emergency {
        let approach = state
            .emergency_approach
            .map(|a| a.to_string())
            .unwrap_or_else(|| "?".to_string());
        let _ = write!(out, "EMERGENCY VEHICLE in {} approach", approach);
        if let Some(d) = state.emergency_distance {
            let _ = write!(out, " ({:.1}m from stop line)", d);
        }
        out.push('\n');
    }
    for approach in Approach::ALL {
        let m = state.approach(approach);
        let _ = writeln!(
            out,
            "  {}: {:2} veh | Queue: {:5.1}m | Wait: {:4.1}s | Stopped: {:2}",
            approach, m.total_vehicles, m.total_queue_length, m.avg_waiting_time, m.stopped_vehicles
        );
    }
    out
}

/// Perception feed in, one validated `IntersectionState` out, every tick.
///
/// For identical input and identical filter state the output is identical:
/// nothing here reads a clock or a random source.
#[derive(Debug, Clone)]
pub struct TrafficStateEstimator {
    tracker: LaneStateTracker,
    smoother: Option<SmoothingFilterBank>,
}

impl TrafficStateEstimator {
    pub fn new(lane_ids: &[String], enable_smoothing: bool) -> Result<Self> {
        Self::with_history(lane_ids, enable_smoothing, DEFAULT_HISTORY_LENGTH)
    }

    pub fn with_history(
        lane_ids: &[String],
        enable_smoothing: bool,
        history_length: usize,
    ) -> Result<Self> {
        let tracker = LaneStateTracker::new(lane_ids, history_length)?;
        info!(
            "State estimator ready ({} lanes, smoothing {})",
            lane_ids.len(),
            if enable_smoothing { "enabled" } else { "disabled" }
        );
        Ok(Self {
            tracker,
            smoother: enable_smoothing.then(SmoothingFilterBank::new),
        })
    }

    pub fn tracker(&self) -> &LaneStateTracker {
        &self.tracker
    }

    pub fn smoothing_enabled(&self) -> bool {
        self.smoother.is_some()
    }

    pub fn update(&mut self, vehicles: &[PerceivedVehicle], now: f64) -> Result<IntersectionState> {
        self.tracker.update(vehicles, now)?;

        let raw = self.tracker.get_all_states();
        let expected = self.tracker.lane_ids().len();
        if raw.len() != expected
            || !self.tracker.lane_ids().iter().all(|id| raw.contains_key(id))
        {
            return Err(EngineError::IncompleteSnapshot {
                expected,
                got: raw.len(),
            });
        }

        let lane_states = match self.smoother.as_mut() {
            Some(bank) => raw
                .iter()
                .map(|(id, state)| (id.clone(), smooth_lane_state(bank, state)))
                .collect(),
            None => raw.clone(),
        };

        let state = IntersectionState::from_lane_states(now, lane_states);
        validate_intersection_state(&state)?;
        Ok(state)
    }

    /// Clears tracking, history and filter state.
    pub fn reset(&mut self) {
        self.tracker.reset();
        if let Some(bank) = self.smoother.as_mut() {
            bank.reset();
        }
    }
}

/// New lane state with the smoothed metrics substituted in.
fn smooth_lane_state(bank: &mut SmoothingFilterBank, state: &LaneState) -> LaneState {
    let key = state.lane_id.as_str();
    let queue_length = bank.update(key, SmoothedMetric::QueueLength, state.queue_length);
    let density = bank.update(key, SmoothedMetric::Density, state.density);
    let avg_waiting_time = bank.update(key, SmoothedMetric::AvgWaitingTime, state.avg_waiting_time);
    let count = bank.update(key, SmoothedMetric::VehicleCount, state.vehicle_count as f64);

    // Keep queued <= count and stopped <= count after smoothing.
    let vehicle_count = (count as usize)
        .max(state.stopped_vehicles)
        .max(state.queue_vehicle_count);

    LaneState {
        vehicle_count,
        queue_length,
        density,
        avg_waiting_time,
        ..state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::intersection::default_lane_ids;

    fn car(id: i64, lane: &str, distance: f64, speed: f64) -> PerceivedVehicle {
        PerceivedVehicle::in_lane(id, lane, distance, (0.0, distance), (0.0, -speed)).unwrap()
    }

    #[test]
    fn totals_match_lane_sums() {
        let mut estimator = TrafficStateEstimator::new(&default_lane_ids(), false).unwrap();
        let feed = vec![
            car(1, "N_in_0", 5.0, 0.0),
            car(2, "N_in_1", 12.0, 0.0),
            car(3, "E_in_2", 50.0, 8.0),
        ];
        let state = estimator.update(&feed, 1.0).unwrap();

        assert_eq!(state.lane_states.len(), 12);
        assert_eq!(state.total_vehicles, 3);
        assert_eq!(state.total_stopped, 2);
        assert_eq!(state.max_queue_length, 12.0);
        assert_eq!(state.approach(Approach::N).total_vehicles, 2);
        assert_eq!(state.approach(Approach::N).total_queue_length, 17.0);
        assert_eq!(state.approach(Approach::S), ApproachMetrics::default());
    }

    #[test]
    fn total_waiting_time_is_weighted_by_stopped_vehicles() {
        let mut estimator = TrafficStateEstimator::new(&default_lane_ids(), false).unwrap();
        let feed = vec![car(1, "W_in_0", 5.0, 0.0), car(2, "W_in_0", 12.0, 0.0)];
        estimator.update(&feed, 0.0).unwrap();
        let state = estimator.update(&feed, 4.0).unwrap();

        assert_eq!(state.lane("W_in_0").unwrap().avg_waiting_time, 4.0);
        assert_eq!(state.total_waiting_time, 8.0);
        assert_eq!(state.approach(Approach::W).avg_waiting_time, 4.0);
    }

    #[test]
    fn emergency_resolves_to_closest_lane() {
        let mut estimator = TrafficStateEstimator::new(&default_lane_ids(), true).unwrap();
        let feed = vec![
            car(1, "N_in_1", 70.0, 12.0).into_emergency("ambulance"),
            car(2, "E_in_1", 45.0, 12.0).into_emergency("fire_truck"),
        ];
        let state = estimator.update(&feed, 1.0).unwrap();
        assert!(state.has_emergency);
        assert_eq!(state.emergency_approach, Some(Approach::E));
        assert_eq!(state.emergency_distance, Some(45.0));
    }

    #[test]
    fn smoothing_damps_queue_but_not_flags() {
        let mut estimator = TrafficStateEstimator::new(&default_lane_ids(), true).unwrap();
        estimator.update(&[], 0.0).unwrap();
        let feed = vec![car(1, "S_in_0", 20.0, 0.0)];
        let state = estimator.update(&feed, 0.1).unwrap();

        let lane = state.lane("S_in_0").unwrap();
        assert!((lane.queue_length - 6.0).abs() < 1e-9);
        assert_eq!(lane.stopped_vehicles, 1);
        // 0.5 * 1 truncates to 0, lifted back to the stopped count.
        assert_eq!(lane.vehicle_count, 1);
        assert_eq!(lane.queue_vehicle_count, 1);
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let lanes = default_lane_ids();
        let mut a = TrafficStateEstimator::new(&lanes, true).unwrap();
        let mut b = TrafficStateEstimator::new(&lanes, true).unwrap();
        let ticks = [
            vec![car(1, "N_in_0", 20.0, 3.0)],
            vec![car(1, "N_in_0", 18.0, 0.0), car(2, "E_in_0", 8.0, 0.0)],
            vec![car(2, "E_in_0", 8.0, 0.0)],
        ];
        for (i, feed) in ticks.iter().enumerate() {
            let t = i as f64 * 0.5;
            assert_eq!(a.update(feed, t).unwrap(), b.update(feed, t).unwrap());
        }
    }

    #[test]
    fn over_jam_density_is_fatal() {
        let lanes = vec!["N_in_0".to_string()];
        let mut estimator = TrafficStateEstimator::new(&lanes, false).unwrap();
        let feed: Vec<_> = (0..30).map(|i| car(i, "N_in_0", i as f64 * 3.0, 4.0)).collect();
        assert!(matches!(
            estimator.update(&feed, 1.0),
            Err(EngineError::InvalidLaneState { .. })
        ));
    }

    #[test]
    fn reset_clears_filters_and_tracks() {
        let mut estimator = TrafficStateEstimator::new(&default_lane_ids(), true).unwrap();
        estimator.update(&[car(1, "N_in_0", 10.0, 0.0)], 1.0).unwrap();
        estimator.reset();
        assert_eq!(estimator.tracker().tracked_vehicle_count(), 0);
        let state = estimator.update(&[car(1, "N_in_0", 10.0, 0.0)], 2.0).unwrap();
        assert_eq!(state.lane("N_in_0").unwrap().queue_length, 10.0);
    }

    #[test]
    fn inconsistent_totals_are_detected() {
        let mut lanes = BTreeMap::new();
        lanes.insert("N_in_0".to_string(), LaneState::empty("N_in_0", 0.0));
        let mut state = IntersectionState::from_lane_states(0.0, lanes);
        state.total_vehicles = 4;
        assert!(matches!(
            validate_intersection_state(&state),
            Err(EngineError::InconsistentState(_))
        ));
    }

    #[test]
    fn summary_mentions_emergency() {
        let mut estimator = TrafficStateEstimator::new(&default_lane_ids(), false).unwrap();
        let feed = vec![car(1, "S_in_2", 30.0, 10.0).into_emergency("ambulance")];
        let state = estimator.update(&feed, 1.0).unwrap();
        let summary = format_summary(&state);
        assert!(summary.contains("EMERGENCY VEHICLE in S approach"));
    }
}
