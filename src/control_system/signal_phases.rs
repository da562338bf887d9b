// signal_phases.rs

use crate::models::intersection::Approach;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every light red.
pub const ALL_RED_STATE: &str = "rrrrrrrrrrrr";

/// Delay before a controller retries a transition the validator blocked.
pub const TRANSITION_RETRY_DELAY: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseType {
    NsThrough,
    EwThrough,
    NsLeft,
    EwLeft,
    AllRed,
    EmergencyNs,
    EmergencyEw,
}

impl PhaseType {
    pub const ALL: [PhaseType; 7] = [
        PhaseType::NsThrough,
        PhaseType::EwThrough,
        PhaseType::NsLeft,
        PhaseType::EwLeft,
        PhaseType::AllRed,
        PhaseType::EmergencyNs,
        PhaseType::EmergencyEw,
    ];

    pub fn config(self) -> &'static SignalPhase {
        &PHASES[self as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            PhaseType::NsThrough => "NS_THROUGH",
            PhaseType::EwThrough => "EW_THROUGH",
            PhaseType::NsLeft => "NS_LEFT",
            PhaseType::EwLeft => "EW_LEFT",
            PhaseType::AllRed => "ALL_RED",
            PhaseType::EmergencyNs => "EMERGENCY_NS",
            PhaseType::EmergencyEw => "EMERGENCY_EW",
        }
    }

    pub fn is_emergency(self) -> bool {
        matches!(self, PhaseType::EmergencyNs | PhaseType::EmergencyEw)
    }

    /// Emergency phase that clears the corridor of an approach.
    pub fn emergency_for(approach: Approach) -> PhaseType {
        if approach.is_north_south() {
            PhaseType::EmergencyNs
        } else {
            PhaseType::EmergencyEw
        }
    }

    /// `Some(true)` for phases serving N/S, `Some(false)` for E/W, `None` for all-red.
    fn north_south_axis(self) -> Option<bool> {
        self.config()
            .green_approaches
            .first()
            .map(|a| a.is_north_south())
    }

    /// Two phases conflict when they give green to crossing axes.
    /// Switching between them must pass through yellow and all-red.
    pub fn conflicts_with(self, other: PhaseType) -> bool {
        match (self.north_south_axis(), other.north_south_axis()) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        }
    }
}

impl fmt::Display for PhaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static configuration of a signal phase.
///
/// Signal strings have one character per connection, ordered
/// `[N0 N1 N2][E0 E1 E2][S0 S1 S2][W0 W1 W2]`, lane 2 being the left turn.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalPhase {
    pub phase_type: PhaseType,
    pub phase_id: u8,
    pub green_approaches: &'static [Approach],
    pub min_duration: f64,
    pub max_duration: f64,
    pub yellow_duration: f64,
    pub all_red_duration: f64,
    pub green_state: &'static str,
    pub yellow_state: &'static str,
    pub red_state: &'static str,
}

const NS: &[Approach] = &[Approach::N, Approach::S];
const EW: &[Approach] = &[Approach::E, Approach::W];

static PHASES: [SignalPhase; 7] = [
    SignalPhase {
        phase_type: PhaseType::NsThrough,
        phase_id: 0,
        green_approaches: NS,
        min_duration: 10.0,
        max_duration: 60.0,
        yellow_duration: 3.0,
        all_red_duration: 2.0,
        green_state: "GGGrrrGGGrrr",
        yellow_state: "yyyrrryyyrrr",
        red_state: ALL_RED_STATE,
    },
    SignalPhase {
        phase_type: PhaseType::EwThrough,
        phase_id: 1,
        green_approaches: EW,
        min_duration: 10.0,
        max_duration: 60.0,
        yellow_duration: 3.0,
        all_red_duration: 2.0,
        green_state: "rrrGGGrrrGGG",
        yellow_state: "rrryyyrrryyy",
        red_state: ALL_RED_STATE,
    },
    SignalPhase {
        phase_type: PhaseType::NsLeft,
        phase_id: 2,
        green_approaches: NS,
        min_duration: 5.0,
        max_duration: 30.0,
        yellow_duration: 3.0,
        all_red_duration: 2.0,
        green_state: "rrGrrrrrGrrr",
        yellow_state: "rryrrrrryrrr",
        red_state: ALL_RED_STATE,
    },
    SignalPhase {
        phase_type: PhaseType::EwLeft,
        phase_id: 3,
        green_approaches: EW,
        min_duration: 5.0,
        max_duration: 30.0,
        yellow_duration: 3.0,
        all_red_duration: 2.0,
        green_state: "rrrrrGrrrrrG",
        yellow_state: "rrrrryrrrrry",
        red_state: ALL_RED_STATE,
    },
    SignalPhase {
        phase_type: PhaseType::AllRed,
        phase_id: 4,
        green_approaches: &[],
        min_duration: 2.0,
        max_duration: 10.0,
        yellow_duration: 0.0,
        all_red_duration: 2.0,
        green_state: ALL_RED_STATE,
        yellow_state: ALL_RED_STATE,
        red_state: ALL_RED_STATE,
    },
    SignalPhase {
        phase_type: PhaseType::EmergencyNs,
        phase_id: 5,
        green_approaches: NS,
        min_duration: 15.0,
        max_duration: 120.0,
        yellow_duration: 3.0,
        all_red_duration: 2.0,
        green_state: "GGGrrrGGGrrr",
        yellow_state: "yyyrrryyyrrr",
        red_state: ALL_RED_STATE,
    },
    SignalPhase {
        phase_type: PhaseType::EmergencyEw,
        phase_id: 6,
        green_approaches: EW,
        min_duration: 15.0,
        max_duration: 120.0,
        yellow_duration: 3.0,
        all_red_duration: 2.0,
        green_state: "rrrGGGrrrGGG",
        yellow_state: "rrryyyrrryyy",
        red_state: ALL_RED_STATE,
    },
];

/// Where a controller is within a phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionStage {
    Green,
    Yellow,
    AllRed,
}

/// Output of one controller tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalCommand {
    /// Phase whose lights are shown (the outgoing phase during clearance).
    pub phase: PhaseType,
    pub stage: TransitionStage,
    pub state: &'static str,
}

impl SignalCommand {
    pub fn green(phase: PhaseType) -> Self {
        Self {
            phase,
            stage: TransitionStage::Green,
            state: phase.config().green_state,
        }
    }

    /// Clearance interval after `phase`'s yellow.
    pub fn all_red(phase: PhaseType) -> Self {
        Self {
            phase,
            stage: TransitionStage::AllRed,
            state: phase.config().red_state,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.state
    }
}

impl fmt::Display for SignalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state)
    }
}

/// Result of advancing a transition by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionStep {
    /// Still clearing; show this command.
    Hold(SignalCommand),
    /// All-red finished; the target phase is now green.
    Completed(PhaseType),
}

/// Yellow / all-red bookkeeping shared by the normal controllers.
///
/// Timer fields are explicit and unset (`None`) outside their stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseTransition {
    pub stage: TransitionStage,
    pub target: Option<PhaseType>,
    pub yellow_start: Option<f64>,
    pub all_red_start: Option<f64>,
}

impl Default for PhaseTransition {
    fn default() -> Self {
        Self::idle()
    }
}

impl PhaseTransition {
    pub fn idle() -> Self {
        Self {
            stage: TransitionStage::Green,
            target: None,
            yellow_start: None,
            all_red_start: None,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.stage != TransitionStage::Green
    }

    /// Starts clearance towards `target`; yellow begins at `now`.
    pub fn begin(&mut self, target: PhaseType, now: f64) {
        self.stage = TransitionStage::Yellow;
        self.target = Some(target);
        self.yellow_start = Some(now);
        self.all_red_start = None;
    }

    /// Moves through yellow and all-red using the target phase's durations.
    pub fn advance(&mut self, current: PhaseType, now: f64) -> TransitionStep {
        let target = match self.target {
            Some(t) if self.in_progress() => t,
            _ => {
                *self = Self::idle();
                return TransitionStep::Hold(SignalCommand::green(current));
            }
        };
        let timing = target.config();

        match self.stage {
            TransitionStage::Yellow => {
                let start = *self.yellow_start.get_or_insert(now);
                if now - start < timing.yellow_duration {
                    return TransitionStep::Hold(SignalCommand {
                        phase: current,
                        stage: TransitionStage::Yellow,
                        state: current.config().yellow_state,
                    });
                }
                // Yellow expired: all-red is shown from this tick on.
                self.stage = TransitionStage::AllRed;
                self.yellow_start = None;
                self.all_red_start = Some(now);
                TransitionStep::Hold(SignalCommand::all_red(current))
            }
            TransitionStage::AllRed => {
                let start = *self.all_red_start.get_or_insert(now);
                if now - start >= timing.all_red_duration {
                    *self = Self::idle();
                    TransitionStep::Completed(target)
                } else {
                    TransitionStep::Hold(SignalCommand::all_red(current))
                }
            }
            TransitionStage::Green => TransitionStep::Hold(SignalCommand::green(current)),
        }
    }
}
