// smoothing.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Exponential moving average over independent keyed series.
#[derive(Debug, Clone)]
pub struct ExponentialMovingAverage {
    alpha: f64,
    state: HashMap<String, f64>,
}

impl ExponentialMovingAverage {
    /// `alpha` in (0, 1]: 1 means no smoothing, small values mean heavy smoothing.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            state: HashMap::new(),
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Feeds one measurement and returns the smoothed value.
    /// The first measurement of a key initialises its series unchanged.
    pub fn update(&mut self, key: &str, value: f64) -> f64 {
        let alpha = self.alpha;
        let smoothed = match self.state.get(key) {
            Some(&prev) => alpha * value + (1.0 - alpha) * prev,
            None => value,
        };
        self.state.insert(key.to_string(), smoothed);
        smoothed
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.state.get(key).copied()
    }

    pub fn reset_key(&mut self, key: &str) {
        self.state.remove(key);
    }

    pub fn reset(&mut self) {
        self.state.clear();
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

/// Lane metrics that pass through the filter bank.
/// Emergency flags, stopped counts and average speed always pass through raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SmoothedMetric {
    QueueLength,
    Density,
    AvgWaitingTime,
    VehicleCount,
}

impl SmoothedMetric {
    pub const ALL: [SmoothedMetric; 4] = [
        SmoothedMetric::QueueLength,
        SmoothedMetric::Density,
        SmoothedMetric::AvgWaitingTime,
        SmoothedMetric::VehicleCount,
    ];

    /// Fixed smoothing factor for each metric.
    pub fn alpha(self) -> f64 {
        match self {
            SmoothedMetric::QueueLength => 0.3,
            SmoothedMetric::Density => 0.4,
            // Saw-tooth from departures makes this the noisiest signal.
            SmoothedMetric::AvgWaitingTime => 0.2,
            // Discrete arrivals and departures need a responsive filter.
            SmoothedMetric::VehicleCount => 0.5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SmoothedMetric::QueueLength => "queue_length",
            SmoothedMetric::Density => "density",
            SmoothedMetric::AvgWaitingTime => "avg_waiting_time",
            SmoothedMetric::VehicleCount => "vehicle_count",
        }
    }
}

/// One EMA series per (lane, metric) pair, each metric with its own alpha.
#[derive(Debug, Clone)]
pub struct SmoothingFilterBank {
    filters: HashMap<SmoothedMetric, ExponentialMovingAverage>,
}

impl Default for SmoothingFilterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl SmoothingFilterBank {
    pub fn new() -> Self {
        let filters = SmoothedMetric::ALL
            .iter()
            .map(|&m| (m, ExponentialMovingAverage::new(m.alpha())))
            .collect();
        Self { filters }
    }

    pub fn update(&mut self, key: &str, metric: SmoothedMetric, value: f64) -> f64 {
        match self.filters.get_mut(&metric) {
            Some(filter) => filter.update(key, value),
            None => value,
        }
    }

    pub fn get(&self, key: &str, metric: SmoothedMetric) -> Option<f64> {
        self.filters.get(&metric).and_then(|f| f.get(key))
    }

    pub fn reset(&mut self) {
        for filter in self.filters.values_mut() {
            filter.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_initialises_without_lag() {
        let mut ema = ExponentialMovingAverage::new(0.3);
        assert_eq!(ema.update("N_in_0", 12.0), 12.0);
    }

    #[test]
    fn subsequent_observations_blend_with_alpha() {
        let mut ema = ExponentialMovingAverage::new(0.5);
        ema.update("k", 10.0);
        assert!((ema.update("k", 20.0) - 15.0).abs() < 1e-12);
        assert!((ema.update("k", 15.0) - 15.0).abs() < 1e-12);
    }

    #[test]
    fn keys_are_independent() {
        let mut ema = ExponentialMovingAverage::new(0.3);
        ema.update("a", 1.0);
        ema.update("b", 100.0);
        assert_eq!(ema.get("a"), Some(1.0));
        assert_eq!(ema.get("b"), Some(100.0));
        ema.reset_key("a");
        assert_eq!(ema.get("a"), None);
        assert_eq!(ema.len(), 1);
    }

    #[test]
    fn bank_uses_per_metric_alpha() {
        let mut bank = SmoothingFilterBank::new();
        for metric in SmoothedMetric::ALL {
            bank.update("N_in_0", metric, 0.0);
        }
        let q = bank.update("N_in_0", SmoothedMetric::QueueLength, 10.0);
        let d = bank.update("N_in_0", SmoothedMetric::Density, 10.0);
        let w = bank.update("N_in_0", SmoothedMetric::AvgWaitingTime, 10.0);
        let c = bank.update("N_in_0", SmoothedMetric::VehicleCount, 10.0);
        assert!((q - 3.0).abs() < 1e-12);
        assert!((d - 4.0).abs() < 1e-12);
        assert!((w - 2.0).abs() < 1e-12);
        assert!((c - 5.0).abs() < 1e-12);
    }

    #[test]
    fn same_lane_different_metrics_do_not_interfere() {
        let mut bank = SmoothingFilterBank::new();
        bank.update("S_in_1", SmoothedMetric::Density, 5.0);
        assert_eq!(bank.update("S_in_1", SmoothedMetric::QueueLength, 20.0), 20.0);
        bank.reset();
        assert_eq!(bank.get("S_in_1", SmoothedMetric::Density), None);
    }
}
