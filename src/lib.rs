pub mod config;
pub mod control_system;
pub mod error;
pub mod global_variables;
pub mod models;
pub mod monitoring;
pub mod shared_data;
pub mod simulation_engine;
pub mod state_estimation;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
