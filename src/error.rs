//! Error types for the signal engine.

use thiserror::Error;

/// Errors raised when an input or derived state breaks a physical or
/// structural invariant. These are fatal for the tick that produced them.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A perceived vehicle record failed validation at construction.
    #[error("Invalid vehicle {track_id}: {reason}")]
    InvalidVehicle { track_id: i64, reason: String },

    /// A lane identifier does not follow the `<approach>_in_<index>` convention.
    #[error("Invalid lane id '{0}'")]
    InvalidLaneId(String),

    /// The same lane was configured twice.
    #[error("Duplicate lane id '{0}'")]
    DuplicateLane(String),

    /// A snapshot did not contain exactly one state per configured lane.
    #[error("Incomplete snapshot: {got} states for {expected} lanes")]
    IncompleteSnapshot { expected: usize, got: usize },

    /// A lane state violated one of its physical bounds.
    #[error("Lane {lane_id}: {reason}")]
    InvalidLaneState { lane_id: String, reason: String },

    /// Intersection totals disagree with the per-lane states.
    #[error("Inconsistent intersection state: {0}")]
    InconsistentState(String),

    /// Configuration values are out of range.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading the configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing the configuration file failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Creates an invalid-vehicle error.
    pub fn vehicle(track_id: i64, reason: impl Into<String>) -> Self {
        Self::InvalidVehicle {
            track_id,
            reason: reason.into(),
        }
    }

    /// Creates an invalid-lane-state error.
    pub fn lane_state(lane_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLaneState {
            lane_id: lane_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
