use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Distance sentinel for vehicles that are not assigned to an approach lane.
pub const NO_LANE_DISTANCE: f64 = -1.0;

/// A raw vehicle record as delivered by a perception adapter.
/// Converted into a [`PerceivedVehicle`] before it reaches state estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleObservation {
    pub track_id: i64,
    pub class_name: String,
    pub is_emergency: bool,
    pub confidence: f64,
    /// World coordinates (meters), intersection-relative.
    pub position: (f64, f64),
    /// World velocity (m/s).
    pub velocity: (f64, f64),
    pub lane_id: Option<String>,
    pub distance_to_stop_line: f64,
}

/// A validated, immutable vehicle observation.
///
/// Invariants checked at construction:
/// - `confidence` lies in `[0, 1]`
/// - position and velocity are finite
/// - `distance_to_stop_line == -1` iff `lane_id` is `None`, otherwise it is
///   finite and non-negative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VehicleObservation")]
pub struct PerceivedVehicle {
    track_id: i64,
    class_name: String,
    is_emergency: bool,
    confidence: f64,
    position: (f64, f64),
    velocity: (f64, f64),
    lane_id: Option<String>,
    distance_to_stop_line: f64,
}

impl PerceivedVehicle {
    /// Vehicle assigned to an approach lane.
    pub fn in_lane(
        track_id: i64,
        lane_id: impl Into<String>,
        distance_to_stop_line: f64,
        position: (f64, f64),
        velocity: (f64, f64),
    ) -> Result<Self> {
        Self::try_from(VehicleObservation {
            track_id,
            class_name: "car".to_string(),
            is_emergency: false,
            confidence: 1.0,
            position,
            velocity,
            lane_id: Some(lane_id.into()),
            distance_to_stop_line,
        })
    }

    /// Vehicle seen by perception but outside every approach lane.
    pub fn unassigned(track_id: i64, position: (f64, f64), velocity: (f64, f64)) -> Result<Self> {
        Self::try_from(VehicleObservation {
            track_id,
            class_name: "car".to_string(),
            is_emergency: false,
            confidence: 1.0,
            position,
            velocity,
            lane_id: None,
            distance_to_stop_line: NO_LANE_DISTANCE,
        })
    }

    /// Marks the vehicle as an emergency vehicle of the given class.
    pub fn into_emergency(mut self, class_name: impl Into<String>) -> Self {
        self.is_emergency = true;
        self.class_name = class_name.into();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Result<Self> {
        check_confidence(self.track_id, confidence)?;
        self.confidence = confidence;
        Ok(self)
    }

    pub fn track_id(&self) -> i64 {
        self.track_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn is_emergency(&self) -> bool {
        self.is_emergency
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn position(&self) -> (f64, f64) {
        self.position
    }

    pub fn velocity(&self) -> (f64, f64) {
        self.velocity
    }

    pub fn lane_id(&self) -> Option<&str> {
        self.lane_id.as_deref()
    }

    pub fn distance_to_stop_line(&self) -> f64 {
        self.distance_to_stop_line
    }

    /// Speed magnitude in m/s.
    pub fn speed(&self) -> f64 {
        self.velocity.0.hypot(self.velocity.1)
    }
}

fn check_confidence(track_id: i64, confidence: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(EngineError::vehicle(
            track_id,
            format!("confidence must be in [0, 1], got {}", confidence),
        ));
    }
    Ok(())
}

impl TryFrom<VehicleObservation> for PerceivedVehicle {
    type Error = EngineError;

    fn try_from(obs: VehicleObservation) -> Result<Self> {
        let id = obs.track_id;
        check_confidence(id, obs.confidence)?;

        let finite = [obs.position.0, obs.position.1, obs.velocity.0, obs.velocity.1];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::vehicle(id, "position and velocity must be finite"));
        }

        match obs.lane_id {
            None if obs.distance_to_stop_line != NO_LANE_DISTANCE => {
                return Err(EngineError::vehicle(
                    id,
                    format!(
                        "distance_to_stop_line must be -1 when lane_id is None, got {}",
                        obs.distance_to_stop_line
                    ),
                ));
            }
            Some(ref lane) if lane.is_empty() => {
                return Err(EngineError::vehicle(id, "lane_id must not be empty"));
            }
            Some(_) if !(obs.distance_to_stop_line.is_finite() && obs.distance_to_stop_line >= 0.0) => {
                return Err(EngineError::vehicle(
                    id,
                    format!(
                        "distance_to_stop_line must be >= 0 for a laned vehicle, got {}",
                        obs.distance_to_stop_line
                    ),
                ));
            }
            _ => {}
        }

        Ok(Self {
            track_id: obs.track_id,
            class_name: obs.class_name,
            is_emergency: obs.is_emergency,
            confidence: obs.confidence,
            position: obs.position,
            velocity: obs.velocity,
            lane_id: obs.lane_id,
            distance_to_stop_line: obs.distance_to_stop_line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation() -> VehicleObservation {
        VehicleObservation {
            track_id: 7,
            class_name: "car".to_string(),
            is_emergency: false,
            confidence: 0.9,
            position: (0.0, 20.0),
            velocity: (0.0, -3.0),
            lane_id: Some("N_in_0".to_string()),
            distance_to_stop_line: 20.0,
        }
    }

    #[test]
    fn valid_observation_converts() {
        let v = PerceivedVehicle::try_from(observation()).unwrap();
        assert_eq!(v.lane_id(), Some("N_in_0"));
        assert!((v.speed() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn distance_without_lane_is_rejected() {
        let mut obs = observation();
        obs.lane_id = None;
        assert!(matches!(
            PerceivedVehicle::try_from(obs),
            Err(EngineError::InvalidVehicle { track_id: 7, .. })
        ));
    }

    #[test]
    fn sentinel_distance_with_lane_is_rejected() {
        let mut obs = observation();
        obs.distance_to_stop_line = NO_LANE_DISTANCE;
        assert!(PerceivedVehicle::try_from(obs).is_err());
    }

    #[test]
    fn confidence_out_of_range_is_rejected() {
        let mut obs = observation();
        obs.confidence = 1.2;
        assert!(PerceivedVehicle::try_from(obs).is_err());
        let v = PerceivedVehicle::unassigned(1, (0.0, 0.0), (0.0, 0.0)).unwrap();
        assert!(v.with_confidence(-0.1).is_err());
    }

    #[test]
    fn unassigned_vehicle_carries_sentinel() {
        let v = PerceivedVehicle::unassigned(3, (1.0, 1.0), (0.0, 0.0)).unwrap();
        assert_eq!(v.lane_id(), None);
        assert_eq!(v.distance_to_stop_line(), NO_LANE_DISTANCE);
    }

    #[test]
    fn non_finite_kinematics_are_rejected() {
        let mut obs = observation();
        obs.velocity = (f64::NAN, 0.0);
        assert!(PerceivedVehicle::try_from(obs).is_err());
    }
}
