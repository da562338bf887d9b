// traffic_feed.rs

use crate::error::{EngineError, Result};
use crate::models::intersection::{light_for_lane, parse_lane_id, Approach, LightState};
use crate::models::vehicle::PerceivedVehicle;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, VecDeque};

/// Where new vehicles appear, measured back from the stop line (m).
pub const SPAWN_DISTANCE: f64 = 150.0;
/// Bumper-to-bumper spacing of queued vehicles (m).
pub const QUEUE_SPACING: f64 = 7.0;
/// Free-flow speed of ordinary vehicles (m/s).
pub const CRUISE_SPEED: f64 = 12.0;
pub const EMERGENCY_SPEED: f64 = 15.0;
/// Vehicles farther than this from the stop line stop for yellow.
pub const YELLOW_COMMIT_DISTANCE: f64 = 15.0;
/// Ordinary vehicles per lane; keeps density below jam density.
pub const MAX_VEHICLES_PER_LANE: usize = 20;
/// Default arrivals per second per lane.
pub const DEFAULT_ARRIVAL_RATE: f64 = 0.08;
const LANE_WIDTH: f64 = 3.5;

#[derive(Debug, Clone)]
struct SimVehicle {
    track_id: i64,
    lane_id: String,
    approach: Approach,
    lane_index: usize,
    distance: f64,
    speed: f64,
    emergency_class: Option<String>,
}

impl SimVehicle {
    /// Intersection-relative coordinates; every approach drives towards the origin.
    fn kinematics(&self) -> ((f64, f64), (f64, f64)) {
        let offset = (self.lane_index as f64 + 0.5) * LANE_WIDTH;
        let d = self.distance;
        let v = self.speed;
        match self.approach {
            Approach::N => ((-offset, d), (0.0, -v)),
            Approach::S => ((offset, -d), (0.0, v)),
            Approach::E => ((d, offset), (-v, 0.0)),
            Approach::W => ((-d, -offset), (v, 0.0)),
        }
    }

    fn to_perceived(&self) -> Result<PerceivedVehicle> {
        let (position, velocity) = self.kinematics();
        let vehicle =
            PerceivedVehicle::in_lane(self.track_id, self.lane_id.as_str(), self.distance, position, velocity)?;
        Ok(match &self.emergency_class {
            Some(class) => vehicle.into_emergency(class.as_str()),
            None => vehicle,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEmergency {
    pub time: f64,
    pub lane_id: String,
    pub class_name: String,
}

/// Seeded synthetic stand-in for a perception pipeline.
///
/// Vehicles arrive per lane at a Bernoulli rate, queue behind the stop line at
/// [`QUEUE_SPACING`] while their light is red and discharge at cruise speed on
/// green. Emergency vehicles ignore both the light and the queue ahead.
#[derive(Debug, Clone)]
pub struct TrafficFeed {
    rng: SmallRng,
    lane_ids: Vec<String>,
    arrival_rates: BTreeMap<Approach, f64>,
    vehicles: Vec<SimVehicle>,
    emergencies: VecDeque<ScheduledEmergency>,
    next_track_id: i64,
    last_time: Option<f64>,
    departed: u64,
}

impl TrafficFeed {
    pub fn new(lane_ids: &[String], seed: u64) -> Result<Self> {
        for lane in lane_ids {
            parse_lane_id(lane)?;
        }
        Ok(Self {
            rng: SmallRng::seed_from_u64(seed),
            lane_ids: lane_ids.to_vec(),
            arrival_rates: Approach::ALL.iter().map(|&a| (a, DEFAULT_ARRIVAL_RATE)).collect(),
            vehicles: Vec::new(),
            emergencies: VecDeque::new(),
            next_track_id: 1,
            last_time: None,
            departed: 0,
        })
    }

    /// Sets the per-lane arrival rate (vehicles per second) of an approach.
    pub fn set_arrival_rate(&mut self, approach: Approach, rate: f64) -> Result<()> {
        if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
            return Err(EngineError::config(format!(
                "arrival rate for {} must be in [0, 1] veh/s, got {}",
                approach, rate
            )));
        }
        self.arrival_rates.insert(approach, rate);
        Ok(())
    }

    pub fn arrival_rate(&self, approach: Approach) -> f64 {
        self.arrival_rates.get(&approach).copied().unwrap_or_default()
    }

    /// Queues an emergency vehicle to appear at [`SPAWN_DISTANCE`] on `lane_id`.
    pub fn schedule_emergency(&mut self, time: f64, lane_id: &str, class_name: &str) -> Result<()> {
        parse_lane_id(lane_id)?;
        if !self.lane_ids.iter().any(|l| l == lane_id) {
            return Err(EngineError::InvalidLaneId(lane_id.to_string()));
        }
        let pos = self
            .emergencies
            .iter()
            .position(|e| e.time > time)
            .unwrap_or(self.emergencies.len());
        self.emergencies.insert(
            pos,
            ScheduledEmergency {
                time,
                lane_id: lane_id.to_string(),
                class_name: class_name.to_string(),
            },
        );
        Ok(())
    }

    pub fn active_vehicles(&self) -> usize {
        self.vehicles.len()
    }

    pub fn departed(&self) -> u64 {
        self.departed
    }

    /// Advances the world to `now` under `signal` and returns what perception would see.
    pub fn step(&mut self, signal: &str, now: f64) -> Result<Vec<PerceivedVehicle>> {
        let dt = self.last_time.map_or(0.0, |t| (now - t).max(0.0));
        self.last_time = Some(now);

        self.move_vehicles(signal, dt);
        self.release_emergencies(now)?;
        self.spawn_arrivals(dt)?;

        self.vehicles.iter().map(SimVehicle::to_perceived).collect()
    }

    fn move_vehicles(&mut self, signal: &str, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        // Front of each lane first, so followers see their leader's new position.
        self.vehicles.sort_by(|a, b| {
            a.lane_id
                .cmp(&b.lane_id)
                .then(a.distance.total_cmp(&b.distance))
        });

        let mut leader: Option<(String, f64)> = None;
        let mut departed = 0;
        for v in self.vehicles.iter_mut() {
            let max_move = if v.emergency_class.is_some() {
                EMERGENCY_SPEED * dt
            } else {
                let mut limit = CRUISE_SPEED * dt;
                let must_stop = match light_for_lane(signal, &v.lane_id) {
                    Some(LightState::Green) => false,
                    Some(LightState::Yellow) => v.distance > YELLOW_COMMIT_DISTANCE,
                    _ => true,
                };
                if must_stop && v.distance >= 0.0 {
                    limit = limit.min(v.distance);
                }
                if let Some((lane, lead_distance)) = &leader {
                    if *lane == v.lane_id && *lead_distance >= 0.0 {
                        limit = limit.min((v.distance - lead_distance - QUEUE_SPACING).max(0.0));
                    }
                }
                limit
            };

            v.distance -= max_move;
            v.speed = max_move / dt;
            if v.distance < 0.0 {
                departed += 1;
            }
            if v.emergency_class.is_none() {
                leader = Some((v.lane_id.clone(), v.distance));
            }
        }

        self.vehicles.retain(|v| v.distance >= 0.0);
        self.departed += departed;
    }

    fn release_emergencies(&mut self, now: f64) -> Result<()> {
        while self.emergencies.front().map_or(false, |e| e.time <= now) {
            let Some(e) = self.emergencies.pop_front() else {
                break;
            };
            let (approach, lane_index) = parse_lane_id(&e.lane_id)?;
            log::info!(
                "[{:.1}s] Emergency vehicle '{}' enters {} at {}m",
                now, e.class_name, e.lane_id, SPAWN_DISTANCE
            );
            let track_id = self.allocate_id();
            self.vehicles.push(SimVehicle {
                track_id,
                lane_id: e.lane_id,
                approach,
                lane_index,
                distance: SPAWN_DISTANCE,
                speed: EMERGENCY_SPEED,
                emergency_class: Some(e.class_name),
            });
        }
        Ok(())
    }

    fn spawn_arrivals(&mut self, dt: f64) -> Result<()> {
        if dt <= 0.0 {
            return Ok(());
        }
        for i in 0..self.lane_ids.len() {
            let lane_id = self.lane_ids[i].clone();
            let (approach, lane_index) = parse_lane_id(&lane_id)?;
            let p = (self.arrival_rate(approach) * dt).clamp(0.0, 1.0);
            if !self.rng.random_bool(p) {
                continue;
            }

            let in_lane = self.vehicles.iter().filter(|v| v.lane_id == lane_id);
            let (count, tail) = in_lane.fold((0usize, f64::NEG_INFINITY), |(n, far), v| {
                (n + 1, if v.emergency_class.is_none() { far.max(v.distance) } else { far })
            });
            if count >= MAX_VEHICLES_PER_LANE || tail > SPAWN_DISTANCE - QUEUE_SPACING {
                continue;
            }

            let speed = self.rng.random_range(0.7..=1.0) * CRUISE_SPEED;
            let track_id = self.allocate_id();
            self.vehicles.push(SimVehicle {
                track_id,
                lane_id,
                approach,
                lane_index,
                distance: SPAWN_DISTANCE,
                speed,
                emergency_class: None,
            });
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> i64 {
        let id = self.next_track_id;
        self.next_track_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_system::signal_phases::{PhaseType, ALL_RED_STATE};
    use crate::models::intersection::default_lane_ids;

    #[test]
    fn same_seed_same_traffic() {
        let lanes = default_lane_ids();
        let mut a = TrafficFeed::new(&lanes, 7).unwrap();
        let mut b = TrafficFeed::new(&lanes, 7).unwrap();
        for i in 0..600 {
            let t = i as f64 * 0.1;
            assert_eq!(a.step(ALL_RED_STATE, t).unwrap(), b.step(ALL_RED_STATE, t).unwrap());
        }
    }

    #[test]
    fn red_light_builds_a_spaced_queue() {
        let lanes = vec!["N_in_0".to_string()];
        let mut feed = TrafficFeed::new(&lanes, 3).unwrap();
        feed.set_arrival_rate(Approach::N, 1.0).unwrap();
        let mut seen = Vec::new();
        for i in 0..=1200 {
            seen = feed.step(ALL_RED_STATE, i as f64 * 0.1).unwrap();
        }
        assert_eq!(feed.departed(), 0);
        let mut distances: Vec<f64> = seen.iter().map(|v| v.distance_to_stop_line()).collect();
        distances.sort_by(f64::total_cmp);
        assert_eq!(distances[0], 0.0);
        for pair in distances.windows(2) {
            assert!(pair[1] - pair[0] >= QUEUE_SPACING - 1e-9);
        }
        assert!(seen.len() <= MAX_VEHICLES_PER_LANE);
    }

    #[test]
    fn green_light_discharges() {
        let lanes = vec!["E_in_1".to_string()];
        let mut feed = TrafficFeed::new(&lanes, 11).unwrap();
        feed.set_arrival_rate(Approach::E, 0.5).unwrap();
        let green = PhaseType::EwThrough.config().green_state;
        for i in 0..=600 {
            feed.step(green, i as f64 * 0.1).unwrap();
        }
        assert!(feed.departed() > 0);
    }

    #[test]
    fn emergency_vehicle_runs_the_red() {
        let lanes = default_lane_ids();
        let mut feed = TrafficFeed::new(&lanes, 1).unwrap();
        for a in Approach::ALL {
            feed.set_arrival_rate(a, 0.0).unwrap();
        }
        feed.schedule_emergency(1.0, "S_in_1", "ambulance").unwrap();

        let first = feed.step(ALL_RED_STATE, 1.0).unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].is_emergency());
        assert_eq!(first[0].class_name(), "ambulance");
        assert_eq!(first[0].distance_to_stop_line(), SPAWN_DISTANCE);

        for i in 2..=12 {
            feed.step(ALL_RED_STATE, i as f64).unwrap();
        }
        assert_eq!(feed.active_vehicles(), 0);
        assert_eq!(feed.departed(), 1);
    }

    #[test]
    fn rejects_unknown_lanes_and_rates() {
        let mut feed = TrafficFeed::new(&["W_in_0".to_string()], 0).unwrap();
        assert!(feed.schedule_emergency(5.0, "N_in_0", "fire_truck").is_err());
        assert!(feed.set_arrival_rate(Approach::W, 2.0).is_err());
        assert!(TrafficFeed::new(&["X_in_0".to_string()], 0).is_err());
    }
}
