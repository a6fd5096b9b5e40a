//! Bidirectional combine (spec.md §4.10 step 4): cancels the hemodynamic
//! delay by subtracting forward and reverse single-direction phase maps and
//! halving, re-wrapped with `atan2(sin, cos)`. No unwrapping, no explicit
//! delay correction — the subtraction does both jobs.

/// Combines one axis's forward/reverse phase maps (radians) into a
/// retinotopy map in degrees, using `axis_extent_deg` to convert the
/// half-cycle phase difference into visual-field degrees.
pub fn bidirectional_combine(forward_phase: &[f32], reverse_phase: &[f32], axis_extent_deg: f32) -> Vec<f32> {
    assert_eq!(forward_phase.len(), reverse_phase.len());
    forward_phase
        .iter()
        .zip(reverse_phase)
        .map(|(&f, &r)| {
            let d = (f - r) / 2.0;
            let wrapped = d.sin().atan2(d.cos());
            wrapped * axis_extent_deg / (2.0 * std::f32::consts::PI)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn known_phase_pair_converts_to_expected_degrees() {
        // spec.md §8 test 6 / §8 E3: forward = pi/2, reverse = -pi/2, extent
        // 120 degrees -> combined value 30 degrees.
        let forward = vec![std::f32::consts::FRAC_PI_2; 4];
        let reverse = vec![-std::f32::consts::FRAC_PI_2; 4];
        let result = bidirectional_combine(&forward, &reverse, 120.0);
        for value in result {
            assert_relative_eq!(value, 30.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn wrap_handles_phase_crossing_boundary() {
        let forward = vec![std::f32::consts::PI - 0.01];
        let reverse = vec![-std::f32::consts::PI + 0.01];
        let result = bidirectional_combine(&forward, &reverse, 360.0);
        // d would be ~pi without wrapping; atan2(sin,cos) keeps it in range.
        assert!(result[0].is_finite());
        assert!(result[0].abs() <= 180.0 + 1e-3);
    }
}
