use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of signalised connections per approach in the signal string.
pub const LANES_PER_APPROACH: usize = 3;

/// Length of a full signal-state string (4 approaches x 3 connections).
pub const SIGNAL_STRING_LEN: usize = 4 * LANES_PER_APPROACH;

/// One of the four compass directions feeding the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Approach {
    N,
    S,
    E,
    W,
}

impl Approach {
    pub const ALL: [Approach; 4] = [Approach::N, Approach::S, Approach::E, Approach::W];

    pub fn letter(self) -> char {
        match self {
            Approach::N => 'N',
            Approach::S => 'S',
            Approach::E => 'E',
            Approach::W => 'W',
        }
    }

    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter {
            "N" => Some(Approach::N),
            "S" => Some(Approach::S),
            "E" => Some(Approach::E),
            "W" => Some(Approach::W),
            _ => None,
        }
    }

    /// Approach of a lane following the `"N_in_0"` naming convention.
    pub fn from_lane_id(lane_id: &str) -> Option<Self> {
        lane_id.split('_').next().and_then(Self::from_letter)
    }

    /// Offset of this approach's block in the signal string,
    /// ordered `[N][E][S][W]`.
    pub fn signal_offset(self) -> usize {
        match self {
            Approach::N => 0,
            Approach::E => LANES_PER_APPROACH,
            Approach::S => 2 * LANES_PER_APPROACH,
            Approach::W => 3 * LANES_PER_APPROACH,
        }
    }

    pub fn is_north_south(self) -> bool {
        matches!(self, Approach::N | Approach::S)
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Colour of a single connection in a signal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightState {
    Green,
    Yellow,
    Red,
}

impl LightState {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'G' | 'g' => Some(LightState::Green),
            'y' | 'Y' => Some(LightState::Yellow),
            'r' | 'R' => Some(LightState::Red),
            _ => None,
        }
    }

    /// Vehicles may proceed on green and on yellow.
    pub fn allows_movement(self) -> bool {
        !matches!(self, LightState::Red)
    }
}

/// Splits a lane id of the form `<approach>_in_<index>` into its parts.
pub fn parse_lane_id(lane_id: &str) -> Result<(Approach, usize)> {
    let parts: Vec<&str> = lane_id.split('_').collect();
    if parts.len() != 3 || parts[1] != "in" {
        return Err(EngineError::InvalidLaneId(lane_id.to_string()));
    }
    let approach =
        Approach::from_letter(parts[0]).ok_or_else(|| EngineError::InvalidLaneId(lane_id.to_string()))?;
    let index: usize = parts[2]
        .parse()
        .map_err(|_| EngineError::InvalidLaneId(lane_id.to_string()))?;
    if index >= LANES_PER_APPROACH {
        return Err(EngineError::InvalidLaneId(lane_id.to_string()));
    }
    Ok((approach, index))
}

/// Position of a lane's connection inside the 12-character signal string.
pub fn signal_index(lane_id: &str) -> Result<usize> {
    let (approach, index) = parse_lane_id(lane_id)?;
    Ok(approach.signal_offset() + index)
}

/// Light currently shown to a lane, or `None` for a malformed signal string.
pub fn light_for_lane(signal: &str, lane_id: &str) -> Option<LightState> {
    let idx = signal_index(lane_id).ok()?;
    signal.chars().nth(idx).and_then(LightState::from_char)
}

/// The standard four-approach, three-lane layout.
pub fn default_lane_ids() -> Vec<String> {
    Approach::ALL
        .iter()
        .flat_map(|a| (0..LANES_PER_APPROACH).map(move |i| format!("{}_in_{}", a, i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_id_roundtrip_through_parse() {
        assert_eq!(parse_lane_id("N_in_0").unwrap(), (Approach::N, 0));
        assert_eq!(parse_lane_id("W_in_2").unwrap(), (Approach::W, 2));
        assert!(parse_lane_id("X_in_0").is_err());
        assert!(parse_lane_id("N_out_0").is_err());
        assert!(parse_lane_id("N_in_3").is_err());
        assert!(parse_lane_id("N_in_a").is_err());
    }

    #[test]
    fn signal_indices_follow_nesw_blocks() {
        assert_eq!(signal_index("N_in_0").unwrap(), 0);
        assert_eq!(signal_index("E_in_1").unwrap(), 4);
        assert_eq!(signal_index("S_in_2").unwrap(), 8);
        assert_eq!(signal_index("W_in_0").unwrap(), 9);
    }

    #[test]
    fn light_lookup_reads_the_lane_character() {
        let signal = "GGGrrrGGGrrr";
        assert_eq!(light_for_lane(signal, "N_in_1"), Some(LightState::Green));
        assert_eq!(light_for_lane(signal, "E_in_1"), Some(LightState::Red));
        assert_eq!(light_for_lane("yyyrrryyyrrr", "S_in_0"), Some(LightState::Yellow));
        assert_eq!(light_for_lane("short", "W_in_2"), None);
    }

    #[test]
    fn default_layout_has_twelve_lanes() {
        let lanes = default_lane_ids();
        assert_eq!(lanes.len(), 12);
        assert_eq!(lanes[0], "N_in_0");
        assert!(lanes.iter().all(|l| parse_lane_id(l).is_ok()));
    }
}
