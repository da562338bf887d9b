// scenarios.rs

use crate::error::{EngineError, Result};
use crate::models::intersection::Approach;
use crate::simulation_engine::traffic_feed::{TrafficFeed, DEFAULT_ARRIVAL_RATE};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyEvent {
    pub spawn_time: f64,
    pub lane_id: String,
    pub vehicle_type: String,
}

impl EmergencyEvent {
    fn new(spawn_time: f64, lane_id: &str, vehicle_type: &str) -> Self {
        Self {
            spawn_time,
            lane_id: lane_id.to_string(),
            vehicle_type: vehicle_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScenarioKind {
    Baseline,
    SingleEmergency,
    MultipleEmergencies,
    PeakTraffic,
    Imbalanced,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 5] = [
        ScenarioKind::Baseline,
        ScenarioKind::SingleEmergency,
        ScenarioKind::MultipleEmergencies,
        ScenarioKind::PeakTraffic,
        ScenarioKind::Imbalanced,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ScenarioKind::Baseline => "baseline",
            ScenarioKind::SingleEmergency => "single-emergency",
            ScenarioKind::MultipleEmergencies => "multiple-emergencies",
            ScenarioKind::PeakTraffic => "peak",
            ScenarioKind::Imbalanced => "imbalanced",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ScenarioKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        ScenarioKind::ALL
            .iter()
            .copied()
            .find(|k| k.key() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = ScenarioKind::ALL.iter().map(|k| k.key()).collect();
                EngineError::config(format!("unknown scenario '{}' (expected one of {:?})", s, known))
            })
    }
}

/// Traffic demand plus scripted emergency arrivals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficScenario {
    pub kind: ScenarioKind,
    pub name: &'static str,
    pub description: &'static str,
    /// Seconds of simulated time.
    pub duration: f64,
    pub flow_multiplier: f64,
    pub directional_bias: BTreeMap<Approach, f64>,
    pub emergency_events: Vec<EmergencyEvent>,
}

impl TrafficScenario {
    pub fn new(kind: ScenarioKind) -> Self {
        let base = |name, description, duration| TrafficScenario {
            kind,
            name,
            description,
            duration,
            flow_multiplier: 1.0,
            directional_bias: BTreeMap::new(),
            emergency_events: Vec::new(),
        };

        match kind {
            ScenarioKind::Baseline => {
                base("Baseline", "Normal balanced traffic, no emergencies", 300.0)
            }
            ScenarioKind::SingleEmergency => TrafficScenario {
                emergency_events: vec![EmergencyEvent::new(150.0, "N_in_1", "ambulance")],
                ..base("Single Emergency", "Normal traffic with ambulance at t=150s", 300.0)
            },
            ScenarioKind::MultipleEmergencies => TrafficScenario {
                emergency_events: vec![
                    EmergencyEvent::new(100.0, "N_in_1", "ambulance"),
                    EmergencyEvent::new(200.0, "E_in_1", "fire_truck"),
                    EmergencyEvent::new(300.0, "S_in_1", "ambulance"),
                ],
                ..base("Multiple Emergencies", "Three emergency vehicles at different times", 400.0)
            },
            ScenarioKind::PeakTraffic => TrafficScenario {
                flow_multiplier: 1.5,
                emergency_events: vec![EmergencyEvent::new(180.0, "N_in_1", "ambulance")],
                ..base("Peak Traffic", "Heavy traffic (1.5x) with emergency at t=180s", 360.0)
            },
            ScenarioKind::Imbalanced => TrafficScenario {
                directional_bias: [
                    (Approach::N, 1.5),
                    (Approach::S, 1.5),
                    (Approach::E, 0.5),
                    (Approach::W, 0.5),
                ]
                .into_iter()
                .collect(),
                ..base("Imbalanced Traffic", "Heavy N-S (1.5x), Light E-W (0.5x)", 300.0)
            },
        }
    }

    pub fn all() -> Vec<TrafficScenario> {
        ScenarioKind::ALL.iter().map(|&k| TrafficScenario::new(k)).collect()
    }

    /// Per-lane arrival rate for an approach under this scenario.
    pub fn arrival_rate(&self, approach: Approach) -> f64 {
        let bias = self.directional_bias.get(&approach).copied().unwrap_or(1.0);
        DEFAULT_ARRIVAL_RATE * self.flow_multiplier * bias
    }

    /// Configures demand and schedules the emergency vehicles on `feed`.
    pub fn apply(&self, feed: &mut TrafficFeed) -> Result<()> {
        for approach in Approach::ALL {
            feed.set_arrival_rate(approach, self.arrival_rate(approach))?;
        }
        for event in &self.emergency_events {
            feed.schedule_emergency(event.spawn_time, &event.lane_id, &event.vehicle_type)?;
        }
        log::info!(
            "Scenario '{}': {} ({:.0}s, {} emergency vehicles)",
            self.name,
            self.description,
            self.duration,
            self.emergency_events.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::intersection::default_lane_ids;

    #[test]
    fn parses_scenario_keys() {
        for kind in ScenarioKind::ALL {
            assert_eq!(kind.key().parse::<ScenarioKind>().unwrap(), kind);
        }
        assert!("rush-hour".parse::<ScenarioKind>().is_err());
    }

    #[test]
    fn emergency_schedules_match_definitions() {
        let multi = TrafficScenario::new(ScenarioKind::MultipleEmergencies);
        let times: Vec<f64> = multi.emergency_events.iter().map(|e| e.spawn_time).collect();
        assert_eq!(times, vec![100.0, 200.0, 300.0]);
        assert_eq!(multi.duration, 400.0);
        assert!(TrafficScenario::new(ScenarioKind::Baseline).emergency_events.is_empty());
    }

    #[test]
    fn demand_follows_multiplier_and_bias() {
        let peak = TrafficScenario::new(ScenarioKind::PeakTraffic);
        assert!((peak.arrival_rate(Approach::E) - DEFAULT_ARRIVAL_RATE * 1.5).abs() < 1e-12);

        let imbalanced = TrafficScenario::new(ScenarioKind::Imbalanced);
        assert!(imbalanced.arrival_rate(Approach::N) > imbalanced.arrival_rate(Approach::W));
    }

    #[test]
    fn applies_to_a_feed() {
        let mut feed = TrafficFeed::new(&default_lane_ids(), 5).unwrap();
        TrafficScenario::new(ScenarioKind::Imbalanced).apply(&mut feed).unwrap();
        assert!((feed.arrival_rate(Approach::S) - DEFAULT_ARRIVAL_RATE * 1.5).abs() < 1e-12);
        assert_eq!(TrafficScenario::all().len(), 5);
    }
}
