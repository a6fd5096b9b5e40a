//! Small shared value types used across the stimulus, camera, acquisition
//! and analysis modules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four bar-sweep directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Left to right (sweeps azimuth, increasing).
    LR,
    /// Right to left (sweeps azimuth, decreasing).
    RL,
    /// Top to bottom (sweeps elevation, decreasing).
    TB,
    /// Bottom to top (sweeps elevation, increasing).
    BT,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Direction::LR, Direction::RL, Direction::TB, Direction::BT];

    /// The visual-field axis this direction sweeps.
    pub fn axis(self) -> Axis {
        match self {
            Direction::LR | Direction::RL => Axis::Azimuth,
            Direction::TB | Direction::BT => Axis::Elevation,
        }
    }

    /// True if this direction's sweep increases along its axis.
    pub fn is_increasing(self) -> bool {
        matches!(self, Direction::LR | Direction::BT)
    }

    /// The direction that sweeps the same axis in reverse, used by the
    /// bidirectional combine (spec.md §4.10 step 4).
    pub fn opposite(self) -> Direction {
        match self {
            Direction::LR => Direction::RL,
            Direction::RL => Direction::LR,
            Direction::TB => Direction::BT,
            Direction::BT => Direction::TB,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::LR => "LR",
            Direction::RL => "RL",
            Direction::TB => "TB",
            Direction::BT => "BT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "LR" => Ok(Direction::LR),
            "RL" => Ok(Direction::RL),
            "TB" => Ok(Direction::TB),
            "BT" => Ok(Direction::BT),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// The two retinotopic axes of the visual field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    Azimuth,
    Elevation,
}

/// A visual-field coordinate, in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisualAngle {
    pub azimuth_deg: f32,
    pub elevation_deg: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_is_involutive() {
        for d in Direction::ALL {
            assert_eq!(d.opposite().opposite(), d);
            assert_ne!(d.opposite(), d);
        }
    }

    #[test]
    fn axis_grouping_matches_spec() {
        assert_eq!(Direction::LR.axis(), Axis::Azimuth);
        assert_eq!(Direction::RL.axis(), Axis::Azimuth);
        assert_eq!(Direction::TB.axis(), Axis::Elevation);
        assert_eq!(Direction::BT.axis(), Axis::Elevation);
    }
}
