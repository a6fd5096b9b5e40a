//! Per-direction stimulus frame library, and the smart-invalidation rule
//! that decides whether a parameter change should drop it (spec.md §4.5).

use crate::error::{IsiError, Result};
use crate::geometry::MonitorGeometry;
use crate::param::ParamGroup;
use crate::stimulus::generator::{self, StimulusParams};
use crate::types::Direction;
use std::collections::HashMap;

/// One direction's frame sequence plus its parallel bar-center angle
/// sequence (spec.md §3 Stimulus Frame Library).
pub struct DirectionFrames {
    pub frames: Vec<Vec<u8>>,
    pub angles: Vec<f32>,
}

impl DirectionFrames {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Parameter keys whose *value* change invalidates a pre-generated library.
/// Keys outside this set (e.g. a hardware re-detection rewriting
/// `selected_display` to the value it already had) never trigger
/// invalidation even if the group as a whole is re-published.
const RELEVANT_MONITOR_KEYS: &[&str] = &[
    "monitor_width_px",
    "monitor_height_px",
    "monitor_fps",
    "monitor_width_cm",
    "monitor_height_cm",
    "monitor_distance_cm",
    "monitor_lateral_angle_deg",
    "monitor_tilt_angle_deg",
];

const RELEVANT_STIMULUS_KEYS: &[&str] = &[
    "bar_width_deg",
    "drift_speed_deg_per_sec",
    "checker_size_deg",
    "strobe_rate_hz",
    "contrast",
    "background_luminance",
];

/// The pre-generated library: one `DirectionFrames` per direction, plus the
/// exact parameter snapshot it was built from. The playback engine is the
/// sole owner (spec.md §9); this type has no interior mutability because
/// the library itself never changes after `pre_generate_all` returns — only
/// the engine's reference to it does.
pub struct StimulusLibrary {
    pub per_direction: HashMap<Direction, DirectionFrames>,
    monitor_snapshot: ParamGroup,
    stimulus_snapshot: ParamGroup,
}

impl StimulusLibrary {
    /// Builds the library for `directions` from the given monitor/stimulus
    /// snapshots. Fails with `MissingParameter` if any referenced key is
    /// absent (spec.md §4.4 public contract).
    pub fn build(
        directions: &[Direction],
        monitor: ParamGroup,
        stimulus: ParamGroup,
    ) -> Result<Self> {
        let geometry = MonitorGeometry::from_params(&monitor)?;
        let params = StimulusParams::from_params(&monitor, &stimulus)?;

        let mut per_direction = HashMap::new();
        for &direction in directions {
            let (frames, angles) = generator::generate_direction(direction, &geometry, &params)?;
            per_direction.insert(direction, DirectionFrames { frames, angles });
        }

        Ok(Self {
            per_direction,
            monitor_snapshot: monitor,
            stimulus_snapshot: stimulus,
        })
    }

    pub fn get(&self, direction: Direction) -> Option<&DirectionFrames> {
        self.per_direction.get(&direction)
    }

    pub fn frame_count(&self, direction: Direction) -> Option<usize> {
        self.get(direction).map(DirectionFrames::frame_count)
    }

    /// Smart invalidation (spec.md §4.5): a changed partial only invalidates
    /// the library if it touches a geometry- or appearance-relevant key
    /// *and* actually changes its value relative to the captured snapshot.
    pub fn is_invalidated_by(&self, group: &str, partial: &ParamGroup) -> bool {
        let (snapshot, relevant_keys) = match group {
            "monitor" => (&self.monitor_snapshot, RELEVANT_MONITOR_KEYS),
            "stimulus" => (&self.stimulus_snapshot, RELEVANT_STIMULUS_KEYS),
            _ => return false,
        };

        partial.iter().any(|(key, new_value)| {
            relevant_keys.contains(&key.as_str())
                && snapshot.get(key).map_or(true, |old| old != new_value)
        })
    }

    pub fn missing_direction(direction: Direction) -> IsiError {
        IsiError::invalid_parameter(
            "acquisition",
            "directions",
            format!("direction {direction} is not present in the pre-generated library"),
        )
    }
}
