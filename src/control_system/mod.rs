pub mod adaptive_controller;
pub mod emergency_priority;
pub mod fixed_time_controller;
pub mod safety_validator;
pub mod signal_phases;
pub mod traffic_light_controller;

pub use adaptive_controller::AdaptiveController;
pub use emergency_priority::{EmergencyPriorityController, EmergencyState};
pub use fixed_time_controller::FixedTimeController;
pub use safety_validator::{SafetyValidator, TransitionPath};
pub use signal_phases::{PhaseType, SignalCommand, TransitionStage};
pub use traffic_light_controller::{
    ControlMode, ControllerStatus, IntegratedSignalController, NormalController, SignalControl,
};
