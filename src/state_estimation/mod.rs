pub mod lane_state_tracker;
pub mod smoothing;
pub mod state_estimator;

pub use lane_state_tracker::{LaneState, LaneStateTracker};
pub use state_estimator::{ApproachMetrics, IntersectionState, TrafficStateEstimator};
