//! Stimulus Generator (spec.md §4.4): spherical geometry + checkerboard bar
//! sweep frame synthesis. Deterministic for a given parameter snapshot —
//! the same monitor/stimulus values always produce the same frame bytes.

use crate::error::{IsiError, Result};
use crate::geometry::{MonitorGeometry, SphericalMap};
use crate::param::{ParamGroup, ParamValue};
use crate::types::Direction;

fn require_f64(group: &ParamGroup, name: &str, key: &str) -> Result<f64> {
    group
        .get(key)
        .and_then(ParamValue::as_f64)
        .ok_or_else(|| IsiError::missing_parameter(name, key))
}

/// The stimulus-relevant subset of parameters, read once per generation.
#[derive(Clone, Copy, Debug)]
pub struct StimulusParams {
    pub bar_width_deg: f64,
    pub drift_speed_deg_per_sec: f64,
    pub checker_size_deg: f64,
    pub strobe_rate_hz: f64,
    pub contrast: f64,
    pub background_luminance: f64,
    pub monitor_fps: f64,
}

impl StimulusParams {
    pub fn from_params(monitor: &ParamGroup, stimulus: &ParamGroup) -> Result<Self> {
        Ok(Self {
            bar_width_deg: require_f64(stimulus, "stimulus", "bar_width_deg")?,
            drift_speed_deg_per_sec: require_f64(stimulus, "stimulus", "drift_speed_deg_per_sec")?,
            checker_size_deg: require_f64(stimulus, "stimulus", "checker_size_deg")?,
            strobe_rate_hz: require_f64(stimulus, "stimulus", "strobe_rate_hz")?,
            contrast: require_f64(stimulus, "stimulus", "contrast")?,
            background_luminance: require_f64(stimulus, "stimulus", "background_luminance")?,
            monitor_fps: require_f64(monitor, "monitor", "monitor_fps")?,
        })
    }
}

/// The sweep-axis angle array for one direction (spec.md §4.4 step 2):
/// monotonic from `min-bar_half_width` to `max+bar_half_width` (or reversed)
/// at `drift_speed_deg_per_sec / monitor_fps` per step.
pub fn sweep_angles(direction: Direction, map: &SphericalMap, params: &StimulusParams) -> Result<Vec<f32>> {
    let bar_half_width = params.bar_width_deg / 2.0;
    let no_valid_pixels = || {
        IsiError::invalid_parameter(
            "monitor",
            "monitor_distance_cm",
            "spherical map has no valid pixels; monitor geometry places the entire screen behind the eye plane",
        )
    };
    let (lo, hi) = match direction.axis() {
        crate::types::Axis::Azimuth => map.azimuth_extent().ok_or_else(no_valid_pixels)?,
        crate::types::Axis::Elevation => map.elevation_extent().ok_or_else(no_valid_pixels)?,
    };

    let start = lo as f64 - bar_half_width;
    let end = hi as f64 + bar_half_width;
    let step = params.drift_speed_deg_per_sec / params.monitor_fps;
    let frame_count = ((end - start) / step).ceil().max(1.0) as usize;

    let mut angles = Vec::with_capacity(frame_count);
    for i in 0..frame_count {
        let angle = start + step * i as f64;
        angles.push(angle as f32);
    }
    if !direction.is_increasing() {
        angles.reverse();
    }
    Ok(angles)
}

/// Renders one frame: inside-bar pixels get a counter-phase checkerboard at
/// constant angular cell size; outside-bar pixels get flat background
/// luminance. Contrast is applied symmetrically around the background
/// (spec.md §4.4 step 3).
pub fn render_frame(
    direction: Direction,
    center_angle_deg: f32,
    map: &SphericalMap,
    params: &StimulusParams,
    frame_parity: bool,
) -> Vec<u8> {
    let bar_half_width = (params.bar_width_deg / 2.0) as f32;
    let mut frame = vec![0u8; map.width_px * map.height_px];

    let background = (params.background_luminance * 255.0).clamp(0.0, 255.0);
    let amplitude = (params.contrast * 255.0 / 2.0).max(0.0);

    for row in 0..map.height_px {
        for col in 0..map.width_px {
            let idx = row * map.width_px + col;
            let Some((az, el)) = map.at(row, col) else {
                frame[idx] = background as u8;
                continue;
            };

            let sweep_coord = match direction.axis() {
                crate::types::Axis::Azimuth => az,
                crate::types::Axis::Elevation => el,
            };

            let in_bar = (sweep_coord - center_angle_deg).abs() <= bar_half_width;
            if !in_bar {
                frame[idx] = background as u8;
                continue;
            }

            let checker_col = (az as f64 / params.checker_size_deg).floor() as i64;
            let checker_row = (el as f64 / params.checker_size_deg).floor() as i64;
            let mut parity = (checker_col + checker_row).rem_euclid(2) == 0;
            if frame_parity {
                parity = !parity;
            }

            let value = if parity {
                background + amplitude
            } else {
                background - amplitude
            };
            frame[idx] = value.clamp(0.0, 255.0) as u8;
        }
    }

    frame
}

/// Builds the full monitor geometry map and produces `pre_generate_all`'s
/// per-direction frame and angle sequences (spec.md §4.4 public contract).
pub fn generate_direction(
    direction: Direction,
    geometry: &MonitorGeometry,
    params: &StimulusParams,
) -> Result<(Vec<Vec<u8>>, Vec<f32>)> {
    let map = SphericalMap::build(geometry);
    let angles = sweep_angles(direction, &map, params)?;

    let frames_per_strobe_cycle = (params.monitor_fps / params.strobe_rate_hz).max(1.0);
    let frames = angles
        .iter()
        .enumerate()
        .map(|(i, &angle)| {
            let parity = ((i as f64 / frames_per_strobe_cycle).floor() as i64).rem_euclid(2) == 1;
            render_frame(direction, angle, &map, params, parity)
        })
        .collect();

    Ok((frames, angles))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> MonitorGeometry {
        MonitorGeometry {
            width_px: 64,
            height_px: 48,
            width_cm: 60.0,
            height_cm: 34.0,
            distance_cm: 10.0,
            lateral_angle_deg: 0.0,
            tilt_angle_deg: 0.0,
        }
    }

    fn params() -> StimulusParams {
        StimulusParams {
            bar_width_deg: 20.0,
            drift_speed_deg_per_sec: 9.0,
            checker_size_deg: 25.0,
            strobe_rate_hz: 6.0,
            contrast: 1.0,
            background_luminance: 0.5,
            monitor_fps: 60.0,
        }
    }

    #[test]
    fn frame_count_matches_sweep_formula() {
        let map = SphericalMap::build(&geometry());
        let p = params();
        let angles = sweep_angles(Direction::LR, &map, &p).unwrap();
        let (lo, hi) = map.azimuth_extent().unwrap();
        let range = (hi - lo) as f64 + p.bar_width_deg;
        let expected = (range / (p.drift_speed_deg_per_sec / p.monitor_fps)).ceil() as usize;
        assert!((angles.len() as i64 - expected as i64).abs() <= 1);
    }

    #[test]
    fn lr_angles_increase_rl_angles_decrease() {
        let map = SphericalMap::build(&geometry());
        let p = params();
        let lr = sweep_angles(Direction::LR, &map, &p).unwrap();
        let rl = sweep_angles(Direction::RL, &map, &p).unwrap();
        assert!(lr.first().unwrap() < lr.last().unwrap());
        assert!(rl.first().unwrap() > rl.last().unwrap());
    }

    #[test]
    fn rendered_frame_is_right_sized_and_in_byte_range() {
        let (frames, angles) = generate_direction(Direction::LR, &geometry(), &params()).unwrap();
        assert_eq!(frames.len(), angles.len());
        assert_eq!(frames[0].len(), 64 * 48);
    }

    #[test]
    fn outside_bar_pixels_equal_background() {
        let map = SphericalMap::build(&geometry());
        let p = params();
        // A center angle far outside any valid pixel puts every pixel outside the bar.
        let frame = render_frame(Direction::LR, 10_000.0, &map, &p, false);
        let expected = (p.background_luminance * 255.0) as u8;
        assert!(frame.iter().all(|&v| v == expected));
    }
}
