//! Spherical Geometry Model (spec.md §3, §4.4 step 1): the mapping from a
//! monitor pixel to the (azimuth, elevation) visual-field angle it subtends
//! at the mouse's eye. This is the single geometric truth the stimulus
//! generator and the analysis pipeline both consult — neither module
//! derives angles from pixel coordinates any other way.
//!
//! Grounded on `nalgebra`, pulled from the wider retrieval pack's
//! camera-geometry crates (the teacher has no geometry module of its own).

use crate::error::{IsiError, Result};
use crate::param::{ParamGroup, ParamValue};
use nalgebra::{Point3, Vector3};

/// A required monitor geometry parameter, read once per map build.
fn require_f64(group: &ParamGroup, key: &str) -> Result<f64> {
    group
        .get(key)
        .and_then(ParamValue::as_f64)
        .ok_or_else(|| IsiError::missing_parameter("monitor", key))
}

fn require_i64(group: &ParamGroup, key: &str) -> Result<i64> {
    group
        .get(key)
        .and_then(ParamValue::as_i64)
        .ok_or_else(|| IsiError::missing_parameter("monitor", key))
}

/// The physical layout derived from the `monitor` parameter group.
#[derive(Clone, Copy, Debug)]
pub struct MonitorGeometry {
    pub width_px: usize,
    pub height_px: usize,
    pub width_cm: f64,
    pub height_cm: f64,
    pub distance_cm: f64,
    pub lateral_angle_deg: f64,
    pub tilt_angle_deg: f64,
}

impl MonitorGeometry {
    pub fn from_params(monitor: &ParamGroup) -> Result<Self> {
        Ok(Self {
            width_px: require_i64(monitor, "monitor_width_px")? as usize,
            height_px: require_i64(monitor, "monitor_height_px")? as usize,
            width_cm: require_f64(monitor, "monitor_width_cm")?,
            height_cm: require_f64(monitor, "monitor_height_cm")?,
            distance_cm: require_f64(monitor, "monitor_distance_cm")?,
            lateral_angle_deg: require_f64(monitor, "monitor_lateral_angle_deg")?,
            tilt_angle_deg: require_f64(monitor, "monitor_tilt_angle_deg")?,
        })
    }
}

/// A precomputed (azimuth, elevation) angle for every monitor pixel, row
/// major, plus `None` for pixels behind the eye plane (spec.md §4.4 edge
/// case). Built once per `pre_generate_all`; read-only afterward.
pub struct SphericalMap {
    pub width_px: usize,
    pub height_px: usize,
    azimuth_deg: Vec<f32>,
    elevation_deg: Vec<f32>,
    valid: Vec<bool>,
}

impl SphericalMap {
    /// Builds the pixel → (azimuth, elevation) map. The monitor is modeled
    /// as a flat rectangle centered on the eye's forward axis, then rotated
    /// by the lateral yaw and tilt and translated out to `distance_cm`. For
    /// each pixel the visual angle is the direction from the eye (origin)
    /// to that point on the rotated plane.
    pub fn build(geometry: &MonitorGeometry) -> Self {
        let w = geometry.width_px;
        let h = geometry.height_px;
        let mut azimuth_deg = vec![0.0f32; w * h];
        let mut elevation_deg = vec![0.0f32; w * h];
        let mut valid = vec![false; w * h];

        let yaw = geometry.lateral_angle_deg.to_radians();
        let tilt = geometry.tilt_angle_deg.to_radians();
        let rotation = nalgebra::Rotation3::from_euler_angles(tilt, yaw, 0.0);

        let half_w_cm = geometry.width_cm / 2.0;
        let half_h_cm = geometry.height_cm / 2.0;
        let center = Vector3::new(0.0, 0.0, geometry.distance_cm);

        for row in 0..h {
            for col in 0..w {
                let u = (col as f64 + 0.5) / w as f64 * geometry.width_cm - half_w_cm;
                let v = half_h_cm - (row as f64 + 0.5) / h as f64 * geometry.height_cm;
                let local = Vector3::new(u, v, 0.0);
                let world = rotation * local + center;
                let point = Point3::from(world);

                let idx = row * w + col;
                if point.z <= 0.0 {
                    valid[idx] = false;
                    continue;
                }
                let azimuth = point.x.atan2(point.z).to_degrees();
                let elevation = point.y.atan2(point.z).to_degrees();
                azimuth_deg[idx] = azimuth as f32;
                elevation_deg[idx] = elevation as f32;
                valid[idx] = true;
            }
        }

        Self {
            width_px: w,
            height_px: h,
            azimuth_deg,
            elevation_deg,
            valid,
        }
    }

    #[inline]
    pub fn at(&self, row: usize, col: usize) -> Option<(f32, f32)> {
        let idx = row * self.width_px + col;
        if self.valid[idx] {
            Some((self.azimuth_deg[idx], self.elevation_deg[idx]))
        } else {
            None
        }
    }

    /// Min/max azimuth across all valid pixels; `None` if no pixel is valid.
    pub fn azimuth_extent(&self) -> Option<(f32, f32)> {
        extent(&self.azimuth_deg, &self.valid)
    }

    pub fn elevation_extent(&self) -> Option<(f32, f32)> {
        extent(&self.elevation_deg, &self.valid)
    }
}

fn extent(values: &[f32], valid: &[bool]) -> Option<(f32, f32)> {
    let mut iter = values
        .iter()
        .zip(valid.iter())
        .filter(|(_, v)| **v)
        .map(|(x, _)| *x);
    let first = iter.next()?;
    let (min, max) = iter.fold((first, first), |(min, max), x| (min.min(x), max.max(x)));
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_geometry() -> MonitorGeometry {
        MonitorGeometry {
            width_px: 100,
            height_px: 80,
            width_cm: 60.0,
            height_cm: 34.0,
            distance_cm: 10.0,
            lateral_angle_deg: 0.0,
            tilt_angle_deg: 0.0,
        }
    }

    #[test]
    fn center_pixel_is_near_zero_azimuth_and_elevation() {
        let map = SphericalMap::build(&flat_geometry());
        let (az, el) = map.at(40, 50).unwrap();
        assert!(az.abs() < 2.0, "azimuth {az} should be near zero");
        assert!(el.abs() < 2.0, "elevation {el} should be near zero");
    }

    #[test]
    fn azimuth_increases_left_to_right() {
        let map = SphericalMap::build(&flat_geometry());
        let (left, _) = map.at(40, 0).unwrap();
        let (right, _) = map.at(40, 99).unwrap();
        assert!(left < right);
    }

    #[test]
    fn all_pixels_are_valid_for_a_monitor_facing_the_eye() {
        let map = SphericalMap::build(&flat_geometry());
        for row in 0..map.height_px {
            for col in 0..map.width_px {
                assert!(map.at(row, col).is_some());
            }
        }
    }

    #[test]
    fn azimuth_extent_brackets_every_pixel() {
        let map = SphericalMap::build(&flat_geometry());
        let (min, max) = map.azimuth_extent().unwrap();
        for row in 0..map.height_px {
            for col in 0..map.width_px {
                let (az, _) = map.at(row, col).unwrap();
                assert!(az >= min - 1e-3 && az <= max + 1e-3);
            }
        }
    }
}
