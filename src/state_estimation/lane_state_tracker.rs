// lane_state_tracker.rs

use crate::error::{EngineError, Result};
use crate::models::intersection::{parse_lane_id, Approach};
use crate::models::vehicle::PerceivedVehicle;
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Below this speed (m/s) a vehicle counts as stopped.
pub const STOPPED_SPEED_THRESHOLD: f64 = 0.5;
/// Queue detection zone measured back from the stop line (m).
pub const QUEUE_DISTANCE_THRESHOLD: f64 = 30.0;
/// Lane length used for density normalisation (m).
pub const LANE_LENGTH: f64 = 100.0;
/// Tracking state is dropped after a vehicle is absent this long (s).
pub const CLEANUP_TIMEOUT: f64 = 10.0;
/// Jam density, vehicles per 100 m.
pub const JAM_DENSITY: f64 = 25.0;
/// Default number of snapshots kept per lane.
pub const DEFAULT_HISTORY_LENGTH: usize = 50;

/// Traffic state of one lane at one timestep.
///
/// Created fresh by the tracker every tick and never mutated afterwards;
/// smoothing produces new values instead of editing these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneState {
    pub lane_id: String,
    pub timestamp: f64,
    pub vehicle_count: usize,
    pub stopped_vehicles: usize,
    /// Meters from the stop line to the farthest queued vehicle.
    pub queue_length: f64,
    pub queue_vehicle_count: usize,
    /// Vehicles per 100 m.
    pub density: f64,
    pub avg_speed: f64,
    /// Mean time since the current stop event of each stopped vehicle.
    pub avg_waiting_time: f64,
    pub has_emergency_vehicle: bool,
    /// Distance of the nearest emergency vehicle, if any.
    pub emergency_vehicle_distance: Option<f64>,
    pub vehicle_distances: Vec<f64>,
    pub vehicle_speeds: Vec<f64>,
}

impl LaneState {
    /// Zero-valued state for a lane with no vehicles.
    pub fn empty(lane_id: impl Into<String>, timestamp: f64) -> Self {
        Self {
            lane_id: lane_id.into(),
            timestamp,
            vehicle_count: 0,
            stopped_vehicles: 0,
            queue_length: 0.0,
            queue_vehicle_count: 0,
            density: 0.0,
            avg_speed: 0.0,
            avg_waiting_time: 0.0,
            has_emergency_vehicle: false,
            emergency_vehicle_distance: None,
            vehicle_distances: Vec::new(),
            vehicle_speeds: Vec::new(),
        }
    }

    pub fn approach(&self) -> Option<Approach> {
        Approach::from_lane_id(&self.lane_id)
    }
}

/// Checks the physical bounds of a lane state. Returns one message per violation.
pub fn validate_lane_state(state: &LaneState) -> Vec<String> {
    let mut errors = Vec::new();

    if state.queue_length < 0.0 {
        errors.push(format!("Negative queue length: {}", state.queue_length));
    }
    if state.queue_length > LANE_LENGTH {
        errors.push(format!(
            "Queue exceeds lane: {} > {}",
            state.queue_length, LANE_LENGTH
        ));
    }
    if state.density < 0.0 {
        errors.push(format!("Negative density: {}", state.density));
    }
    if state.density > JAM_DENSITY {
        errors.push(format!("Density exceeds jam: {}", state.density));
    }
    if state.avg_waiting_time < 0.0 {
        errors.push(format!("Negative waiting time: {}", state.avg_waiting_time));
    }
    if state.queue_vehicle_count > state.vehicle_count {
        errors.push(format!(
            "More queued than total: {} > {}",
            state.queue_vehicle_count, state.vehicle_count
        ));
    }
    if state.stopped_vehicles > state.vehicle_count {
        errors.push(format!(
            "More stopped than total: {} > {}",
            state.stopped_vehicles, state.vehicle_count
        ));
    }

    errors
}

/// Per-vehicle bookkeeping kept across ticks.
#[derive(Debug, Clone)]
struct VehicleTrack {
    first_seen: f64,
    last_seen: f64,
    /// Start of the current stop event, `None` while moving.
    stop_started: Option<f64>,
    last_speed: f64,
}

/// Converts the perceived-vehicle feed into one `LaneState` per configured
/// lane per tick.
#[derive(Debug, Clone)]
pub struct LaneStateTracker {
    lane_ids: Vec<String>,
    history_length: usize,
    current_states: BTreeMap<String, LaneState>,
    state_history: HashMap<String, VecDeque<LaneState>>,
    tracks: HashMap<i64, VehicleTrack>,
}

impl LaneStateTracker {
    pub fn new(lane_ids: &[String], history_length: usize) -> Result<Self> {
        if lane_ids.is_empty() {
            return Err(EngineError::config("at least one lane must be tracked"));
        }
        let mut seen = HashSet::new();
        for lane_id in lane_ids {
            parse_lane_id(lane_id)?;
            if !seen.insert(lane_id.as_str()) {
                return Err(EngineError::DuplicateLane(lane_id.clone()));
            }
        }

        let mut tracker = Self {
            lane_ids: lane_ids.to_vec(),
            history_length: history_length.max(1),
            current_states: BTreeMap::new(),
            state_history: HashMap::new(),
            tracks: HashMap::new(),
        };
        tracker.reset();
        Ok(tracker)
    }

    pub fn lane_ids(&self) -> &[String] {
        &self.lane_ids
    }

    /// Folds one tick of observations into the tracker.
    ///
    /// Every configured lane gets a fresh state, empty lanes included.
    /// Vehicles without a lane, or on a lane that is not configured, still
    /// update their stop timers but do not contribute to any lane.
    pub fn update(&mut self, vehicles: &[PerceivedVehicle], now: f64) -> Result<()> {
        let mut ids = HashSet::with_capacity(vehicles.len());
        for v in vehicles {
            if !ids.insert(v.track_id()) {
                return Err(EngineError::vehicle(
                    v.track_id(),
                    "track_id repeated within one timestep",
                ));
            }
        }

        self.update_tracks(vehicles, now);

        let mut by_lane: BTreeMap<&str, Vec<&PerceivedVehicle>> = self
            .lane_ids
            .iter()
            .map(|id| (id.as_str(), Vec::new()))
            .collect();
        for v in vehicles {
            if let Some(lane) = v.lane_id() {
                if let Some(bucket) = by_lane.get_mut(lane) {
                    bucket.push(v);
                }
            }
        }

        let new_states: BTreeMap<String, LaneState> = by_lane
            .iter()
            .map(|(&lane_id, lane_vehicles)| {
                (
                    lane_id.to_string(),
                    self.compute_lane_state(lane_id, lane_vehicles, now),
                )
            })
            .collect();
        debug_assert_eq!(new_states.len(), self.lane_ids.len());

        for (lane_id, state) in &new_states {
            let history = self
                .state_history
                .entry(lane_id.clone())
                .or_insert_with(VecDeque::new);
            if history.len() == self.history_length {
                history.pop_front();
            }
            history.push_back(state.clone());
        }
        self.current_states = new_states;

        self.cleanup_stale_tracks(now);
        Ok(())
    }

    fn update_tracks(&mut self, vehicles: &[PerceivedVehicle], now: f64) {
        for v in vehicles {
            let speed = v.speed();
            let track = self.tracks.entry(v.track_id()).or_insert(VehicleTrack {
                first_seen: now,
                last_seen: now,
                stop_started: None,
                last_speed: speed,
            });
            track.last_seen = now;
            if speed < STOPPED_SPEED_THRESHOLD {
                if track.stop_started.is_none() {
                    track.stop_started = Some(now);
                }
            } else {
                track.stop_started = None;
            }
            track.last_speed = speed;
        }
    }

    fn compute_lane_state(&self, lane_id: &str, vehicles: &[&PerceivedVehicle], now: f64) -> LaneState {
        if vehicles.is_empty() {
            return LaneState::empty(lane_id, now);
        }

        let mut distances = Vec::with_capacity(vehicles.len());
        let mut speeds = Vec::with_capacity(vehicles.len());
        let mut stopped = 0;
        let mut queue_length: f64 = 0.0;
        let mut queue_count = 0;
        let mut waiting_times = Vec::new();
        let mut emergency_distance: Option<f64> = None;
        let mut has_emergency = false;

        for v in vehicles {
            let distance = v.distance_to_stop_line();
            let speed = v.speed();
            distances.push(distance);
            speeds.push(speed);

            let is_stopped = speed < STOPPED_SPEED_THRESHOLD;
            if is_stopped {
                stopped += 1;
                if let Some(start) = self.tracks.get(&v.track_id()).and_then(|t| t.stop_started) {
                    waiting_times.push(now - start);
                }
            }

            if is_stopped && (0.0..=QUEUE_DISTANCE_THRESHOLD).contains(&distance) {
                queue_count += 1;
                queue_length = queue_length.max(distance);
            }

            if v.is_emergency() {
                has_emergency = true;
                if distance >= 0.0 {
                    emergency_distance = Some(match emergency_distance {
                        Some(d) => d.min(distance),
                        None => distance,
                    });
                }
            }
        }

        let vehicle_count = vehicles.len();
        let avg_speed = speeds.iter().sum::<f64>() / vehicle_count as f64;
        let avg_waiting_time = if waiting_times.is_empty() {
            0.0
        } else {
            waiting_times.iter().sum::<f64>() / waiting_times.len() as f64
        };

        LaneState {
            lane_id: lane_id.to_string(),
            timestamp: now,
            vehicle_count,
            stopped_vehicles: stopped,
            queue_length,
            queue_vehicle_count: queue_count,
            density: vehicle_count as f64 / LANE_LENGTH * 100.0,
            avg_speed,
            avg_waiting_time,
            has_emergency_vehicle: has_emergency,
            emergency_vehicle_distance: emergency_distance,
            vehicle_distances: distances,
            vehicle_speeds: speeds,
        }
    }

    fn cleanup_stale_tracks(&mut self, now: f64) {
        let before = self.tracks.len();
        self.tracks
            .retain(|_, track| now - track.last_seen <= CLEANUP_TIMEOUT);
        let removed = before - self.tracks.len();
        if removed > 0 {
            debug!("Purged {} stale vehicle tracks at t={:.1}", removed, now);
        }
    }

    pub fn get_lane_state(&self, lane_id: &str) -> Option<&LaneState> {
        self.current_states.get(lane_id)
    }

    /// Current state of every configured lane.
    pub fn get_all_states(&self) -> &BTreeMap<String, LaneState> {
        &self.current_states
    }

    pub fn get_approach_states(&self, approach: Approach) -> Vec<&LaneState> {
        self.current_states
            .values()
            .filter(|s| s.approach() == Some(approach))
            .collect()
    }

    /// Most recent snapshots of a lane, oldest first.
    pub fn lane_history(&self, lane_id: &str) -> Option<&VecDeque<LaneState>> {
        self.state_history.get(lane_id)
    }

    pub fn tracked_vehicle_count(&self) -> usize {
        self.tracks.len()
    }

    /// Time the vehicle has spent in its current stop, if it is stopped.
    pub fn waiting_time_of(&self, track_id: i64, now: f64) -> Option<f64> {
        self.tracks
            .get(&track_id)
            .and_then(|t| t.stop_started)
            .map(|start| now - start)
    }

    /// Seconds since the vehicle was first observed.
    pub fn time_in_scene(&self, track_id: i64, now: f64) -> Option<f64> {
        self.tracks.get(&track_id).map(|t| now - t.first_seen)
    }

    pub fn last_speed_of(&self, track_id: i64) -> Option<f64> {
        self.tracks.get(&track_id).map(|t| t.last_speed)
    }

    /// Back to construction state: zero-valued lanes, no history, no tracks.
    pub fn reset(&mut self) {
        self.current_states = self
            .lane_ids
            .iter()
            .map(|id| (id.clone(), LaneState::empty(id.as_str(), 0.0)))
            .collect();
        self.state_history = self
            .lane_ids
            .iter()
            .map(|id| (id.clone(), VecDeque::with_capacity(self.history_length)))
            .collect();
        self.tracks.clear();
    }
}
