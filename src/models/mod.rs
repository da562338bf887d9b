pub mod intersection;
pub mod vehicle;

pub use intersection::{default_lane_ids, Approach, LightState};
pub use vehicle::{PerceivedVehicle, VehicleObservation};
