// simulation.rs
use crate::config::EngineConfig;
use crate::control_system::signal_phases::{PhaseType, SignalCommand};
use crate::control_system::traffic_light_controller::{ControllerStatus, IntegratedSignalController};
use crate::error::Result;
use crate::models::vehicle::PerceivedVehicle;
use crate::monitoring::signal_log::SignalSink;
use crate::shared_data::{RunSummary, TickRecord};
use crate::simulation_engine::scenarios::TrafficScenario;
use crate::simulation_engine::traffic_feed::TrafficFeed;
use crate::state_estimation::state_estimator::{format_summary, IntersectionState, TrafficStateEstimator};
use tokio::time::{sleep, Duration};

/// Sim-time interval between progress log lines.
const PROGRESS_INTERVAL: f64 = 30.0;

/// Everything produced by one engine tick.
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub state: IntersectionState,
    pub command: SignalCommand,
    pub status: ControllerStatus,
}

/// Perception output in, signal string out: estimator plus arbiter.
#[derive(Debug, Clone)]
pub struct SignalEngine {
    estimator: TrafficStateEstimator,
    controller: IntegratedSignalController,
    last_command: SignalCommand,
}

impl SignalEngine {
    pub fn new(estimator: TrafficStateEstimator, controller: IntegratedSignalController) -> Self {
        Self {
            estimator,
            controller,
            last_command: SignalCommand::green(PhaseType::NsThrough),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let estimator = TrafficStateEstimator::with_history(
            &config.lane_ids,
            config.enable_smoothing,
            config.history_length,
        )?;
        let controller = IntegratedSignalController::from_config(config)?;
        Ok(Self::new(estimator, controller))
    }

    /// Runs one tick. `now` must not decrease between calls.
    pub fn tick(&mut self, vehicles: &[PerceivedVehicle], now: f64) -> Result<TickOutput> {
        let state = self.estimator.update(vehicles, now)?;
        let command = self.controller.update(&state, now);
        self.last_command = command;
        Ok(TickOutput {
            state,
            command,
            status: self.controller.status(),
        })
    }

    /// Signal currently shown; what the feed drives against on the next tick.
    pub fn last_command(&self) -> SignalCommand {
        self.last_command
    }

    pub fn estimator(&self) -> &TrafficStateEstimator {
        &self.estimator
    }

    pub fn controller(&self) -> &IntegratedSignalController {
        &self.controller
    }

    pub fn reset(&mut self) {
        self.estimator.reset();
        self.controller.reset();
        self.last_command = SignalCommand::green(PhaseType::NsThrough);
    }
}

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub seed: u64,
    /// Overrides the scenario's duration.
    pub duration: Option<f64>,
    /// Sleep one tick interval of wall time per tick.
    pub realtime: bool,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            seed: 1,
            duration: None,
            realtime: false,
        }
    }
}

/// Drives a scenario through the synthetic feed and the engine, writing each
/// tick to every sink. Sink failures are logged and do not stop the run.
pub async fn run_simulation(
    config: &EngineConfig,
    scenario: &TrafficScenario,
    options: &SimulationOptions,
    sinks: &mut [Box<dyn SignalSink>],
) -> Result<RunSummary> {
    let mut engine = SignalEngine::from_config(config)?;
    let mut feed = TrafficFeed::new(&config.lane_ids, options.seed)?;
    scenario.apply(&mut feed)?;

    let duration = options.duration.unwrap_or(scenario.duration);
    let steps = (duration / config.tick_interval).round() as u64;
    let controller_name = engine.controller().status().normal_controller;
    let mut summary = RunSummary::new(scenario.name, controller_name);
    let mut next_progress = PROGRESS_INTERVAL;

    log::info!(
        "Running '{}' for {:.0}s ({} ticks of {}s) with seed {}",
        scenario.name, duration, steps, config.tick_interval, options.seed
    );

    for step in 0..=steps {
        let now = step as f64 * config.tick_interval;
        let vehicles = feed.step(engine.last_command().state, now)?;
        let out = engine.tick(&vehicles, now)?;

        let record = TickRecord::new(now, &out.command, &out.status, &out.state);
        summary.record(&record);
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.set_signal_state(&record) {
                log::warn!("Signal sink error at t={:.1}: {}", now, e);
            }
        }

        if now >= next_progress {
            log::info!(
                "[{:.0}s] {} | {:?} | {} active, {} departed",
                now,
                out.command,
                out.status.mode,
                feed.active_vehicles(),
                feed.departed()
            );
            log::debug!("\n{}", format_summary(&out.state));
            next_progress += PROGRESS_INTERVAL;
        }

        if options.realtime {
            sleep(Duration::from_secs_f64(config.tick_interval)).await;
        }
    }

    for sink in sinks.iter_mut() {
        if let Err(e) = sink.flush() {
            log::warn!("Failed to flush signal sink: {}", e);
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerKind;
    use crate::simulation_engine::scenarios::ScenarioKind;
    use crate::state_estimation::state_estimator::validate_intersection_state;

    #[test]
    fn engine_produces_complete_states() {
        let config = EngineConfig::default();
        let mut engine = SignalEngine::from_config(&config).unwrap();
        let mut feed = TrafficFeed::new(&config.lane_ids, 9).unwrap();
        for i in 0..1200 {
            let now = i as f64 * 0.1;
            let vehicles = feed.step(engine.last_command().state, now).unwrap();
            let out = engine.tick(&vehicles, now).unwrap();
            assert_eq!(out.state.lane_states.len(), 12);
            validate_intersection_state(&out.state).unwrap();
            assert_eq!(out.command.state.len(), 12);
        }
    }

    #[tokio::test]
    async fn single_emergency_scenario_preempts() {
        let config = EngineConfig {
            controller: ControllerKind::Fixed,
            ..EngineConfig::default()
        };
        let scenario = TrafficScenario::new(ScenarioKind::SingleEmergency);
        let options = SimulationOptions {
            seed: 4,
            duration: Some(200.0),
            realtime: false,
        };
        let summary = run_simulation(&config, &scenario, &options, &mut []).await.unwrap();
        assert_eq!(summary.ticks, 2001);
        assert!(summary.emergency_ticks > 0);
        assert!(summary.phase_changes > 0);
    }
}
